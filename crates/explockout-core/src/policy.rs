//! Exponential lockout window.
//!
//! ```text
//! wait = basetime ^ failures      while wait < maxtime
//! wait = maxtime                  otherwise
//! ```
//!
//! `basetime` of 0 or 1 is allowed and gives a window that never grows.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wait time in seconds after `failures` failed attempts.
///
/// The power is built one multiplication at a time and stops as soon as the
/// running product reaches `maxtime` (or would overflow), so large failure
/// counts never produce overflowed arithmetic.
pub fn wait_seconds(failures: usize, basetime: u64, maxtime: u64) -> u64 {
    let wait = match (failures, basetime) {
        (0, _) => 1,
        (_, 0) => 0,
        (_, 1) => 1,
        _ => {
            let mut wait: u64 = 1;
            for _ in 0..failures {
                match wait.checked_mul(basetime) {
                    Some(next) if next < maxtime => wait = next,
                    _ => return maxtime,
                }
            }
            wait
        }
    };
    wait.min(maxtime)
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LockoutVerdict {
    Allow,
    Deny { retry_after_seconds: u64 },
}

impl LockoutVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LockoutVerdict::Allow)
    }

    /// Remaining wait for a denied attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LockoutVerdict::Allow => None,
            LockoutVerdict::Deny {
                retry_after_seconds,
            } => Some(Duration::from_secs(*retry_after_seconds)),
        }
    }
}

/// Decide an attempt at `now` given the failure count and the most recent
/// failure.
///
/// A zero wait never locks. A `latest` in the future (clock skew between
/// writers) counts as zero elapsed time, so the full window applies.
pub fn decide(
    failures: usize,
    latest: DateTime<Utc>,
    now: DateTime<Utc>,
    basetime: u64,
    maxtime: u64,
) -> LockoutVerdict {
    if failures == 0 {
        return LockoutVerdict::Allow;
    }
    let wait = wait_seconds(failures, basetime, maxtime);
    if wait == 0 {
        return LockoutVerdict::Allow;
    }

    let elapsed = u64::try_from((now - latest).num_seconds()).unwrap_or(0);
    if elapsed >= wait {
        LockoutVerdict::Allow
    } else {
        LockoutVerdict::Deny {
            retry_after_seconds: wait - elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_514_764_800 + secs, 0).unwrap()
    }

    #[test]
    fn test_zero_failures_is_one_second() {
        assert_eq!(wait_seconds(0, 2, 60), 1);
        assert_eq!(wait_seconds(0, 5, 300), 1);
    }

    #[test]
    fn test_wait_sequence_saturates() {
        let waits: Vec<u64> = (1..=7).map(|n| wait_seconds(n, 2, 60)).collect();
        assert_eq!(waits, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_exact_hit_returns_maxtime() {
        assert_eq!(wait_seconds(6, 2, 64), 64);
        assert_eq!(wait_seconds(5, 2, 64), 32);
    }

    #[test]
    fn test_degenerate_basetimes() {
        assert_eq!(wait_seconds(10, 0, 60), 0);
        assert_eq!(wait_seconds(10, 1, 60), 1);
        assert_eq!(wait_seconds(0, 0, 60), 1);
    }

    #[test]
    fn test_huge_counts_do_not_overflow() {
        assert_eq!(wait_seconds(usize::MAX, 10, 86_400), 86_400);
        assert_eq!(wait_seconds(200, u64::MAX, u64::MAX), u64::MAX);
        assert_eq!(wait_seconds(usize::MAX, 1, 86_400), 1);
    }

    #[test]
    fn test_zero_maxtime_disables_waits() {
        assert_eq!(wait_seconds(0, 2, 0), 0);
        assert_eq!(wait_seconds(3, 2, 0), 0);
    }

    #[test]
    fn test_decide_denies_inside_window() {
        let verdict = decide(1, at(0), at(3), 5, 300);
        assert_eq!(
            verdict,
            LockoutVerdict::Deny {
                retry_after_seconds: 2
            }
        );
        assert_eq!(verdict.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_decide_allows_after_window() {
        assert_eq!(decide(1, at(0), at(10), 5, 300), LockoutVerdict::Allow);
        assert_eq!(decide(1, at(0), at(5), 5, 300), LockoutVerdict::Allow);
    }

    #[test]
    fn test_decide_future_failure_applies_full_window() {
        assert_eq!(
            decide(2, at(100), at(0), 2, 60),
            LockoutVerdict::Deny {
                retry_after_seconds: 4
            }
        );
    }

    #[test]
    fn test_decide_no_failures_allows() {
        assert!(decide(0, at(0), at(0), 2, 60).is_allowed());
    }

    #[test]
    fn test_verdict_serialization() {
        let allow = serde_json::to_value(LockoutVerdict::Allow).unwrap();
        assert_eq!(allow, serde_json::json!({ "decision": "allow" }));
        let deny = serde_json::to_value(LockoutVerdict::Deny {
            retry_after_seconds: 7,
        })
        .unwrap();
        assert_eq!(
            deny,
            serde_json::json!({ "decision": "deny", "retry_after_seconds": 7 })
        );
    }

    proptest! {
        #[test]
        fn prop_wait_never_exceeds_maxtime(
            failures in 0usize..10_000,
            basetime in 0u64..1_000,
            maxtime in 0u64..10_000_000,
        ) {
            prop_assert!(wait_seconds(failures, basetime, maxtime) <= maxtime);
        }

        #[test]
        fn prop_wait_is_monotonic(
            failures in 0usize..200,
            basetime in 2u64..100,
            maxtime in 0u64..u64::MAX,
        ) {
            prop_assert!(
                wait_seconds(failures, basetime, maxtime)
                    <= wait_seconds(failures + 1, basetime, maxtime)
            );
        }
    }
}
