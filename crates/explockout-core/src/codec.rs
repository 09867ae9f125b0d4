//! Failure timestamps in the `YYYYMMDDHHMMSS` wire format.
//!
//! Values are fixed-width and zero-padded, so byte-wise comparison of two
//! validated values is the same as chronological comparison. Only validated
//! values can be compared; there is no "empty" timestamp to seed a running
//! maximum with.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use crate::error::FormatError;

/// Number of ASCII digits in a wire-format timestamp.
pub const TIMESTAMP_LEN: usize = 14;

/// One failed-authentication instant, UTC, second precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailureTimestamp(String);

impl FailureTimestamp {
    /// Parse a strict 14-digit value.
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        let bytes = raw.as_bytes();
        if bytes.len() != TIMESTAMP_LEN {
            return Err(FormatError::Length {
                value: raw.to_string(),
                len: bytes.len(),
            });
        }
        if let Some(position) = bytes.iter().position(|b| !b.is_ascii_digit()) {
            return Err(FormatError::NonDigit {
                value: raw.to_string(),
                position,
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Parse the LDAP GeneralizedTime storage form `YYYYMMDDHHMMSS[.f]Z`.
    ///
    /// Fractional seconds are dropped. Values without the `Z` suffix go
    /// through [`FailureTimestamp::parse`] unchanged.
    pub fn parse_generalized(raw: &str) -> Result<Self, FormatError> {
        let Some(body) = raw.strip_suffix('Z') else {
            return Self::parse(raw);
        };
        let seconds = match body.split_once(['.', ',']) {
            Some((seconds, fraction)) => {
                if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(FormatError::Fraction {
                        value: raw.to_string(),
                    });
                }
                seconds
            }
            None => body,
        };
        Self::parse(seconds)
    }

    /// Render a UTC instant in the wire format.
    pub fn from_datetime(at: DateTime<Utc>) -> Result<Self, FormatError> {
        let raw = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}",
            at.year(),
            at.month(),
            at.day(),
            at.hour(),
            at.minute(),
            at.second(),
        );
        Self::parse(&raw)
    }

    /// Convert to a UTC instant. Fails for digit strings that do not name a
    /// real calendar date and time (month 13, hour 24, ...).
    pub fn to_datetime(&self) -> Result<DateTime<Utc>, FormatError> {
        let field = |range: std::ops::Range<usize>| -> u32 {
            self.0.as_bytes()[range]
                .iter()
                .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
        };

        let year = field(0..4) as i32;
        NaiveDate::from_ymd_opt(year, field(4..6), field(6..8))
            .and_then(|date| date.and_hms_opt(field(8..10), field(10..12), field(12..14)))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| FormatError::Calendar {
                value: self.0.clone(),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Left-to-right comparison over all 14 digits.
pub fn compare(a: &FailureTimestamp, b: &FailureTimestamp) -> Ordering {
    a.0.as_bytes().cmp(b.0.as_bytes())
}

impl Ord for FailureTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for FailureTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FailureTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(raw: &str) -> FailureTimestamp {
        FailureTimestamp::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_accepts_fourteen_digits() {
        assert_eq!(ts("20180101000000").as_str(), "20180101000000");
    }

    #[test]
    fn test_parse_rejects_short_value() {
        let err = FailureTimestamp::parse("2018010100000").unwrap_err();
        assert!(matches!(err, FormatError::Length { len: 13, .. }));
    }

    #[test]
    fn test_parse_rejects_long_value() {
        let err = FailureTimestamp::parse("201801010000000").unwrap_err();
        assert!(matches!(err, FormatError::Length { len: 15, .. }));
    }

    #[test]
    fn test_parse_rejects_non_digit() {
        let err = FailureTimestamp::parse("2018010100000X").unwrap_err();
        assert!(matches!(err, FormatError::NonDigit { position: 13, .. }));
    }

    #[test]
    fn test_parse_reports_byte_length_for_non_ascii() {
        // 14 characters, 15 bytes
        let err = FailureTimestamp::parse("2018010100000é").unwrap_err();
        assert!(matches!(err, FormatError::Length { len: 15, .. }));

        // 14 bytes with a multi-byte character
        let err = FailureTimestamp::parse("201801010000é").unwrap_err();
        assert!(matches!(err, FormatError::NonDigit { position: 12, .. }));
    }

    #[test]
    fn test_parse_rejects_generalized_suffix_in_strict_mode() {
        assert!(FailureTimestamp::parse("20180101000000Z").is_err());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(
            FailureTimestamp::parse(""),
            Err(FormatError::Length { len: 0, .. })
        ));
    }

    #[test]
    fn test_parse_generalized_forms() {
        assert_eq!(
            FailureTimestamp::parse_generalized("20180101000000Z").unwrap(),
            ts("20180101000000")
        );
        assert_eq!(
            FailureTimestamp::parse_generalized("20180101000000.123456Z").unwrap(),
            ts("20180101000000")
        );
        assert_eq!(
            FailureTimestamp::parse_generalized("20180101000000").unwrap(),
            ts("20180101000000")
        );
        assert!(matches!(
            FailureTimestamp::parse_generalized("20180101000000.Z"),
            Err(FormatError::Fraction { .. })
        ));
        assert!(FailureTimestamp::parse_generalized("2018010100000Z").is_err());
    }

    #[test]
    fn test_compare_orders_chronologically() {
        let a = ts("20180101000000");
        let b = ts("20180101000001");
        assert_eq!(compare(&a, &b), Ordering::Less);
        assert_eq!(compare(&b, &a), Ordering::Greater);
        assert_eq!(compare(&a, &a.clone()), Ordering::Equal);
        assert!(ts("20171231235959") < ts("20180101000000"));
    }

    #[test]
    fn test_to_datetime() {
        let at = ts("20180315123045").to_datetime().unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2018, 3, 15, 12, 30, 45).unwrap());
    }

    #[test]
    fn test_to_datetime_rejects_impossible_dates() {
        assert!(ts("20181301000000").to_datetime().is_err());
        assert!(ts("20180230000000").to_datetime().is_err());
        assert!(ts("20180101240000").to_datetime().is_err());
    }

    #[test]
    fn test_from_datetime_renders_wire_format() {
        let at = Utc.with_ymd_and_hms(2024, 2, 9, 7, 5, 3).unwrap();
        assert_eq!(FailureTimestamp::from_datetime(at).unwrap().as_str(), "20240209070503");
    }

    proptest! {
        #[test]
        fn prop_compare_matches_chronology(a in 0i64..4_000_000_000, b in 0i64..4_000_000_000) {
            let da = Utc.timestamp_opt(a, 0).unwrap();
            let db = Utc.timestamp_opt(b, 0).unwrap();
            let ta = FailureTimestamp::from_datetime(da).unwrap();
            let tb = FailureTimestamp::from_datetime(db).unwrap();
            prop_assert_eq!(compare(&ta, &tb), da.cmp(&db));
            prop_assert_eq!(ta.to_datetime().unwrap(), da);
        }

        #[test]
        fn prop_parse_rejects_wrong_length(raw in "[0-9]{0,13}|[0-9]{15,20}") {
            prop_assert!(FailureTimestamp::parse(&raw).is_err());
        }
    }
}
