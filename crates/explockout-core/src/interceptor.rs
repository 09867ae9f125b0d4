//! Gate around the host's credential check.
//!
//! Each attempt goes `Idle -> Evaluating -> {Allowed, Denied}` and keeps no
//! state afterwards. A denied attempt never reaches the credential check.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::config::{FetchFailurePolicy, GateConfig};
use crate::error::{FetchError, GateError, HistoryError};
use crate::history::FailureHistoryExtractor;
use crate::policy::{self, LockoutVerdict};
use crate::record::{CheckOutcome, OutcomeRecorder, PrincipalRecord, RecordStore};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of a full gated attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Denied before the credential check ran.
    Locked { retry_after_seconds: u64 },
    /// The credential check ran and returned this outcome.
    Completed(CheckOutcome),
}

pub struct BindInterceptor<S, C = SystemClock> {
    config: GateConfig,
    extractor: FailureHistoryExtractor,
    store: S,
    clock: C,
}

impl<S: RecordStore> BindInterceptor<S> {
    pub fn new(config: GateConfig, store: S) -> Self {
        Self::with_clock(config, store, SystemClock)
    }
}

impl<S: RecordStore, C: Clock> BindInterceptor<S, C> {
    pub fn with_clock(config: GateConfig, store: S, clock: C) -> Self {
        let extractor = FailureHistoryExtractor::new(config.failure_attribute.clone())
            .accept_generalized_time(config.accept_generalized_time);
        Self {
            config,
            extractor,
            store,
            clock,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn extractor(&self) -> &FailureHistoryExtractor {
        &self.extractor
    }

    /// Decide an attempt against an already fetched record.
    pub fn evaluate(
        &self,
        record: &PrincipalRecord,
        now: DateTime<Utc>,
    ) -> Result<LockoutVerdict, HistoryError> {
        let history = self.extractor.extract(record)?;
        let Some(latest) = history.latest else {
            return Ok(LockoutVerdict::Allow);
        };
        let latest = latest
            .to_datetime()
            .map_err(|source| HistoryError::Corrupt {
                principal: record.principal.clone(),
                source,
            })?;

        let lockout = self.config.lockout;
        Ok(policy::decide(
            history.count,
            latest,
            now,
            lockout.basetime,
            lockout.maxtime,
        ))
    }

    /// Fetch and evaluate, surfacing every reason the gate could not decide.
    ///
    /// The fetch is bounded by `fetch_timeout_secs`.
    pub async fn try_pre_check(&self, principal: &str) -> Result<LockoutVerdict, GateError> {
        let timeout = self.config.fetch_timeout();
        let record = tokio::time::timeout(timeout, self.store.fetch(principal))
            .await
            .unwrap_or(Err(FetchError::Timeout(timeout)))?;
        Ok(self.evaluate(&record, self.clock.now())?)
    }

    /// Pre-check hook: the verdict to apply before the credential check.
    ///
    /// Unknown principals are allowed through so the real check fails them
    /// the same way it fails a wrong password. A corrupt history denies for
    /// `maxtime` (at least 1s); a store failure follows `on_fetch_error`.
    pub async fn pre_check(&self, principal: &str) -> LockoutVerdict {
        let verdict = match self.try_pre_check(principal).await {
            Ok(verdict) => verdict,
            Err(GateError::Fetch(FetchError::NotFound(_))) => {
                tracing::debug!(principal, "no record for principal; passing through");
                LockoutVerdict::Allow
            }
            Err(GateError::History(e)) => {
                tracing::error!(principal, error = %e, "failure history is corrupt; denying");
                self.fail_closed()
            }
            Err(GateError::Fetch(e)) => match self.config.on_fetch_error {
                FetchFailurePolicy::FailClosed => {
                    tracing::error!(principal, error = %e, "cannot evaluate lockout; denying");
                    self.fail_closed()
                }
                FetchFailurePolicy::FailOpen => {
                    tracing::error!(principal, error = %e, "cannot evaluate lockout; allowing");
                    LockoutVerdict::Allow
                }
            },
        };

        match verdict {
            LockoutVerdict::Allow => tracing::debug!(principal, "attempt allowed"),
            LockoutVerdict::Deny {
                retry_after_seconds,
            } => tracing::warn!(principal, retry_after_seconds, "attempt denied by lockout"),
        }
        verdict
    }

    /// A deny always carries a non-zero retry-after, even when `maxtime` is 0.
    fn fail_closed(&self) -> LockoutVerdict {
        LockoutVerdict::Deny {
            retry_after_seconds: self.config.lockout.maxtime.max(1),
        }
    }
}

impl<S: RecordStore + OutcomeRecorder, C: Clock> BindInterceptor<S, C> {
    /// Post-check hook: hand the real outcome to the host's recorder.
    ///
    /// Recorder errors are logged; they never change the outcome.
    pub async fn post_check(&self, principal: &str, outcome: CheckOutcome) {
        if let Err(e) = self.store.record(principal, outcome, self.clock.now()).await {
            tracing::error!(principal, ?outcome, error = %e, "failed to record check outcome");
        }
    }

    /// Gate one attempt: pre-check, then `check` only when allowed, then
    /// post-check with the real outcome.
    pub async fn authenticate<F, Fut>(&self, principal: &str, check: F) -> AttemptOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CheckOutcome>,
    {
        if let LockoutVerdict::Deny {
            retry_after_seconds,
        } = self.pre_check(principal).await
        {
            return AttemptOutcome::Locked {
                retry_after_seconds,
            };
        }

        let outcome = check().await;
        self.post_check(principal, outcome).await;
        AttemptOutcome::Completed(outcome)
    }
}
