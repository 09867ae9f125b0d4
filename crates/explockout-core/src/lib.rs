//! explockout-core — exponential lockout gate for authentication attempts.
//!
//! Given the failure timestamps stored on a principal's record, decide
//! whether a new authentication attempt may proceed to the real credential
//! check, and if not, how long the principal must still wait:
//!
//! ```text
//! wait = min(basetime ^ failures, maxtime)
//! deny while now < latest_failure + wait
//! ```
//!
//! The crate never stores anything itself. The host supplies records through
//! [`RecordStore`] and updates failure history through [`OutcomeRecorder`].

pub mod codec;
pub mod config;
pub mod error;
pub mod history;
pub mod interceptor;
pub mod policy;
pub mod record;

pub use codec::FailureTimestamp;
pub use config::{FetchFailurePolicy, GateConfig, LockoutConfig};
pub use error::{ConfigError, FetchError, FormatError, GateError, HistoryError, RecordError};
pub use history::{FailureHistory, FailureHistoryExtractor, PWD_FAILURE_TIME};
pub use interceptor::{AttemptOutcome, BindInterceptor, Clock, SystemClock};
pub use policy::{wait_seconds, LockoutVerdict};
pub use record::{CheckOutcome, MemoryRecordStore, OutcomeRecorder, PrincipalRecord, RecordStore};
