use crate::codec::{self, FailureTimestamp};
use crate::error::{FormatError, HistoryError};
use crate::record::PrincipalRecord;

/// Attribute holding failed-authentication timestamps in password-policy
/// schemas.
pub const PWD_FAILURE_TIME: &str = "pwdFailureTime";

/// Failure count and most recent failure for one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureHistory {
    pub count: usize,
    pub latest: Option<FailureTimestamp>,
}

impl FailureHistory {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Pulls the failure history out of a principal record.
#[derive(Debug, Clone)]
pub struct FailureHistoryExtractor {
    attribute: String,
    accept_generalized_time: bool,
}

impl Default for FailureHistoryExtractor {
    fn default() -> Self {
        Self::new(PWD_FAILURE_TIME)
    }
}

impl FailureHistoryExtractor {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            accept_generalized_time: false,
        }
    }

    /// Also accept `YYYYMMDDHHMMSS[.f]Z` values.
    pub fn accept_generalized_time(mut self, accept: bool) -> Self {
        self.accept_generalized_time = accept;
        self
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Validate every stored value and return the count and latest failure.
    ///
    /// One malformed value poisons the whole history for this principal.
    pub fn extract(&self, record: &PrincipalRecord) -> Result<FailureHistory, HistoryError> {
        let mut history = FailureHistory::default();

        for raw in record.values_ignore_case(&self.attribute) {
            let stamp = self.parse(raw).map_err(|source| HistoryError::Corrupt {
                principal: record.principal.clone(),
                source,
            })?;
            history.count += 1;
            history.latest = match history.latest.take() {
                Some(latest) if codec::compare(&latest, &stamp).is_ge() => Some(latest),
                _ => Some(stamp),
            };
        }

        tracing::debug!(
            principal = %record.principal,
            failures = history.count,
            latest = ?history.latest.as_ref().map(FailureTimestamp::as_str),
            "failure history extracted"
        );
        Ok(history)
    }

    fn parse(&self, raw: &str) -> Result<FailureTimestamp, FormatError> {
        if self.accept_generalized_time {
            FailureTimestamp::parse_generalized(raw)
        } else {
            FailureTimestamp::parse(raw)
        }
    }
}
