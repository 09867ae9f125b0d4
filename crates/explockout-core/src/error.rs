use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A stored failure timestamp that is not in the 14-digit wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("failure timestamp {value:?} is {len} bytes long (expected 14)")]
    Length { value: String, len: usize },
    #[error("failure timestamp {value:?} has a non-digit character at position {position}")]
    NonDigit { value: String, position: usize },
    #[error("failure timestamp {value:?} has a malformed fractional-seconds part")]
    Fraction { value: String },
    #[error("failure timestamp {value:?} is not a valid calendar instant")]
    Calendar { value: String },
}

/// The failure history of one principal could not be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("corrupt failure history for {principal}: {source}")]
    Corrupt {
        principal: String,
        #[source]
        source: FormatError,
    },
}

/// Errors returned by a [`RecordStore`](crate::record::RecordStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("no record for principal {0}")]
    NotFound(String),
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors returned by an [`OutcomeRecorder`](crate::record::OutcomeRecorder).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to record outcome for {principal}: {reason}")]
pub struct RecordError {
    pub principal: String,
    pub reason: String,
}

/// The gate could not reach a decision for one attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    History(#[from] HistoryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failure attribute name must not be empty")]
    EmptyAttribute,
}
