//! Collaborator seams owned by the host: the principal record store and the
//! post-check hook that updates failure history.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::codec::FailureTimestamp;
use crate::error::{FetchError, RecordError};

/// Snapshot of one principal's attributes, as returned by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub principal: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl PrincipalRecord {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder-style attribute insertion.
    pub fn with_values<I, V>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attributes
            .entry(attribute.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// All values of every attribute whose name matches `name`, ignoring
    /// ASCII case.
    pub fn values_ignore_case<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, values)| values.iter().map(String::as_str))
    }
}

/// Result of the real credential check, reported to the post-check hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Success,
    Failure,
}

impl From<bool> for CheckOutcome {
    fn from(success: bool) -> Self {
        if success {
            CheckOutcome::Success
        } else {
            CheckOutcome::Failure
        }
    }
}

/// Read access to principal records. Must tolerate concurrent callers.
pub trait RecordStore: Send + Sync {
    fn fetch(
        &self,
        principal: &str,
    ) -> impl Future<Output = Result<PrincipalRecord, FetchError>> + Send;
}

/// Host-side reaction to the real credential check outcome.
pub trait OutcomeRecorder: Send + Sync {
    fn record(
        &self,
        principal: &str,
        outcome: CheckOutcome,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), RecordError>> + Send;
}

/// In-process record store.
///
/// On failure the current instant is appended to the failure attribute
/// (creating the principal if needed); on success the attribute is removed.
#[derive(Debug)]
pub struct MemoryRecordStore {
    failure_attribute: String,
    records: RwLock<HashMap<String, PrincipalRecord>>,
}

impl MemoryRecordStore {
    pub fn new(failure_attribute: impl Into<String>) -> Self {
        Self {
            failure_attribute: failure_attribute.into(),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a whole record.
    pub async fn insert(&self, record: PrincipalRecord) {
        self.records
            .write()
            .await
            .insert(record.principal.clone(), record);
    }
}

impl RecordStore for MemoryRecordStore {
    async fn fetch(&self, principal: &str) -> Result<PrincipalRecord, FetchError> {
        self.records
            .read()
            .await
            .get(principal)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(principal.to_string()))
    }
}

impl OutcomeRecorder for MemoryRecordStore {
    async fn record(
        &self,
        principal: &str,
        outcome: CheckOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), RecordError> {
        let mut records = self.records.write().await;
        match outcome {
            CheckOutcome::Success => {
                if let Some(record) = records.get_mut(principal) {
                    let attribute = &self.failure_attribute;
                    record
                        .attributes
                        .retain(|key, _| !key.eq_ignore_ascii_case(attribute));
                }
            }
            CheckOutcome::Failure => {
                let stamp = FailureTimestamp::from_datetime(at).map_err(|e| RecordError {
                    principal: principal.to_string(),
                    reason: e.to_string(),
                })?;
                records
                    .entry(principal.to_string())
                    .or_insert_with(|| PrincipalRecord::new(principal))
                    .attributes
                    .entry(self.failure_attribute.clone())
                    .or_default()
                    .push(stamp.to_string());
            }
        }
        Ok(())
    }
}
