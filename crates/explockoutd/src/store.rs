use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use explockout_core::{
    CheckOutcome, FailureTimestamp, FetchError, OutcomeRecorder, PrincipalRecord, RecordError,
    RecordStore,
};
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("cannot render failure timestamp: {0}")]
    Timestamp(#[from] explockout_core::FormatError),
}

/// SQLite-backed principal records.
///
/// Every attribute value is one row in `attribute_values`. The failure
/// attribute is appended to on a failed check and cleared on a successful
/// one; the gate itself only ever reads.
#[derive(Clone)]
pub struct PrincipalStore {
    conn: Connection,
    failure_attribute: String,
}

impl PrincipalStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path, failure_attribute: &str) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS principals (
                     name TEXT PRIMARY KEY,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS attribute_values (
                     principal TEXT NOT NULL REFERENCES principals(name) ON DELETE CASCADE,
                     attribute TEXT NOT NULL,
                     value TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_values_principal ON attribute_values(principal);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            failure_attribute: failure_attribute.to_string(),
        })
    }

    /// Create a principal if it does not exist yet.
    pub async fn ensure_principal(&self, principal: &str) -> Result<(), StoreError> {
        let principal = principal.to_string();
        let created_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO principals (name, created_at) VALUES (?1, ?2)",
                    [&principal, &created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Add one attribute value to an existing principal.
    pub async fn add_value(
        &self,
        principal: &str,
        attribute: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let (principal, attribute, value) =
            (principal.to_string(), attribute.to_string(), value.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attribute_values (principal, attribute, value) VALUES (?1, ?2, ?3)",
                    [&principal, &attribute, &value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Load all attributes of a principal. `None` if the principal is unknown.
    pub async fn load(&self, principal: &str) -> Result<Option<PrincipalRecord>, StoreError> {
        let name = principal.to_string();
        let rows: Option<Vec<(String, String)>> = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM principals WHERE name = ?1)",
                    [&name],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(None);
                }
                let mut stmt = conn.prepare(
                    "SELECT attribute, value FROM attribute_values
                     WHERE principal = ?1 ORDER BY rowid",
                )?;
                let rows = stmt.query_map([&name], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                Ok(Some(rows.collect::<Result<Vec<_>, _>>()?))
            })
            .await?;

        Ok(rows.map(|rows| {
            let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
            for (attribute, value) in rows {
                attributes.entry(attribute).or_default().push(value);
            }
            PrincipalRecord {
                principal: principal.to_string(),
                attributes,
            }
        }))
    }

    /// Stored failure timestamps of a principal, oldest first, unvalidated.
    pub async fn failure_values(&self, principal: &str) -> Result<Vec<String>, StoreError> {
        let principal = principal.to_string();
        let attribute = self.failure_attribute.clone();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT value FROM attribute_values
                     WHERE principal = ?1 AND attribute = ?2 COLLATE NOCASE
                     ORDER BY rowid",
                )?;
                let rows = stmt.query_map([&principal, &attribute], |row| row.get(0))?;
                Ok(rows.collect::<Result<Vec<String>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Remove the failure history of a principal. Returns whether any value
    /// was removed.
    pub async fn clear_failures(&self, principal: &str) -> Result<bool, StoreError> {
        let principal = principal.to_string();
        let attribute = self.failure_attribute.clone();
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "DELETE FROM attribute_values
                     WHERE principal = ?1 AND attribute = ?2 COLLATE NOCASE",
                    [&principal, &attribute],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Append a failure at `at`, creating the principal if needed.
    pub async fn append_failure(&self, principal: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let stamp = FailureTimestamp::from_datetime(at)?;
        self.ensure_principal(principal).await?;
        self.add_value(principal, &self.failure_attribute, stamp.as_str())
            .await
    }

    /// Count known principals.
    pub async fn count_principals(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM principals", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }
}

impl RecordStore for PrincipalStore {
    async fn fetch(&self, principal: &str) -> Result<PrincipalRecord, FetchError> {
        match self.load(principal).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(FetchError::NotFound(principal.to_string())),
            Err(e) => Err(FetchError::Unavailable(e.to_string())),
        }
    }
}

impl OutcomeRecorder for PrincipalStore {
    async fn record(
        &self,
        principal: &str,
        outcome: CheckOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), RecordError> {
        let result = match outcome {
            CheckOutcome::Failure => self.append_failure(principal, at).await,
            CheckOutcome::Success => self.clear_failures(principal).await.map(|cleared| {
                if cleared {
                    tracing::info!(principal, "failure history cleared after success");
                }
            }),
        };
        result.map_err(|e| RecordError {
            principal: principal.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn open() -> PrincipalStore {
        PrincipalStore::open(Path::new(":memory:"), "pwdFailureTime")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_principal_is_not_found() {
        let store = open().await;
        let err = store.fetch("uid=ghost").await.unwrap_err();
        assert_eq!(err, FetchError::NotFound("uid=ghost".to_string()));
    }

    #[tokio::test]
    async fn test_load_groups_attribute_values() {
        let store = open().await;
        store.ensure_principal("uid=alice").await.unwrap();
        store.add_value("uid=alice", "cn", "Alice").await.unwrap();
        store
            .add_value("uid=alice", "pwdFailureTime", "20180101000000")
            .await
            .unwrap();
        store
            .add_value("uid=alice", "pwdFailureTime", "20180101000004")
            .await
            .unwrap();

        let record = store.fetch("uid=alice").await.unwrap();
        assert_eq!(record.principal, "uid=alice");
        assert_eq!(record.attributes["cn"], vec!["Alice"]);
        assert_eq!(
            record.attributes["pwdFailureTime"],
            vec!["20180101000000", "20180101000004"]
        );
    }

    #[tokio::test]
    async fn test_failure_then_success_cycle() {
        let store = open().await;
        let t = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();

        store
            .record("uid=bob", CheckOutcome::Failure, t)
            .await
            .unwrap();
        store
            .record("uid=bob", CheckOutcome::Failure, t + chrono::TimeDelta::seconds(3))
            .await
            .unwrap();
        assert_eq!(
            store.failure_values("uid=bob").await.unwrap(),
            vec!["20180101000000", "20180101000003"]
        );
        assert_eq!(store.count_principals().await.unwrap(), 1);

        store
            .record("uid=bob", CheckOutcome::Success, t)
            .await
            .unwrap();
        assert!(store.failure_values("uid=bob").await.unwrap().is_empty());
        // principal survives, only its history is gone
        assert!(store.fetch("uid=bob").await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_attribute_match_ignores_case() {
        let store = open().await;
        store.ensure_principal("uid=carol").await.unwrap();
        store
            .add_value("uid=carol", "PWDFAILURETIME", "20180101000000")
            .await
            .unwrap();
        assert_eq!(store.failure_values("uid=carol").await.unwrap().len(), 1);
        assert!(store.clear_failures("uid=carol").await.unwrap());
        assert!(!store.clear_failures("uid=carol").await.unwrap());
    }

    #[tokio::test]
    async fn test_cross_principal_isolation() {
        let store = open().await;
        let t = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
        store
            .record("uid=alice", CheckOutcome::Failure, t)
            .await
            .unwrap();
        store
            .record("uid=bob", CheckOutcome::Success, t)
            .await
            .unwrap();

        assert_eq!(store.failure_values("uid=alice").await.unwrap().len(), 1);
        assert!(matches!(
            store.fetch("uid=bob").await,
            Err(FetchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_count_principals_reports_database_errors() {
        let store = open().await;
        store.ensure_principal("uid=alice").await.unwrap();
        assert_eq!(store.count_principals().await.unwrap(), 1);

        store
            .conn
            .call(|conn| {
                conn.execute_batch("DROP TABLE attribute_values; DROP TABLE principals;")?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(store.count_principals().await.is_err());
    }
}
