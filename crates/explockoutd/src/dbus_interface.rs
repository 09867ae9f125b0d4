use std::sync::Arc;

use explockout_core::{
    BindInterceptor, CheckOutcome, FailureHistoryExtractor, LockoutConfig, LockoutVerdict,
    PrincipalRecord,
};
use zbus::interface;

use crate::config::Config;
use crate::store::PrincipalStore;

/// Shared state accessible by D-Bus method handlers.
///
/// Nothing here is mutated per attempt, so handlers run concurrently without
/// a lock.
pub struct AppState {
    pub config: Config,
    pub gate: BindInterceptor<PrincipalStore>,
}

/// D-Bus interface for the exponential lockout daemon.
///
/// Bus name: org.openldap.ExpLockout1
/// Object path: /org/openldap/ExpLockout1
pub struct ExpLockoutService {
    pub state: Arc<AppState>,
}

/// Retrieve the UID of the D-Bus peer identified by `sender_str` (a unique bus name).
async fn get_caller_uid(sender_str: &str, conn: &zbus::Connection) -> zbus::fdo::Result<u32> {
    let dbus_proxy = zbus::fdo::DBusProxy::new(conn)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    let bus_name = zbus::names::BusName::try_from(sender_str)
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    dbus_proxy
        .get_connection_unix_user(bus_name)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// JSON view of a principal's stored failures, validated the same way the
/// gate validates them. A corrupt value yields an `error` and no window.
fn history_report(
    extractor: &FailureHistoryExtractor,
    lockout: LockoutConfig,
    principal: &str,
    values: &[String],
) -> serde_json::Value {
    let record =
        PrincipalRecord::new(principal).with_values(extractor.attribute(), values.iter().cloned());
    match extractor.extract(&record) {
        Ok(history) => {
            let wait = if history.is_empty() {
                0
            } else {
                lockout.wait_for(history.count).as_secs()
            };
            serde_json::json!({
                "principal": principal,
                "failures": values,
                "count": history.count,
                "latest": history.latest.map(|ts| ts.to_string()),
                "wait_seconds": wait,
            })
        }
        Err(e) => serde_json::json!({
            "principal": principal,
            "failures": values,
            "count": values.len(),
            "latest": null,
            "wait_seconds": null,
            "error": e.to_string(),
        }),
    }
}

impl ExpLockoutService {
    /// Methods that write failure history are root-only on the system bus,
    /// otherwise any local user could lock anyone out.
    async fn require_root(
        &self,
        method: &str,
        header: &zbus::message::Header<'_>,
        conn: &zbus::Connection,
    ) -> zbus::fdo::Result<()> {
        if self.state.config.session_bus {
            return Ok(());
        }
        let sender = header
            .sender()
            .ok_or_else(|| zbus::fdo::Error::Failed("no sender in message".to_string()))?;
        let caller_uid = get_caller_uid(sender.as_str(), conn).await?;
        if caller_uid != 0 {
            tracing::warn!(method, caller_uid, "rejecting non-root caller");
            return Err(zbus::fdo::Error::AccessDenied(format!(
                "{method} requires root"
            )));
        }
        Ok(())
    }
}

#[interface(name = "org.openldap.ExpLockout1")]
impl ExpLockoutService {
    /// Decide whether an authentication attempt may proceed.
    ///
    /// Returns `(allowed, retry_after_seconds)`; the second value is 0 when
    /// allowed.
    async fn pre_check(&self, principal: &str) -> (bool, u64) {
        tracing::info!(principal, "pre-check requested");
        match self.state.gate.pre_check(principal).await {
            LockoutVerdict::Allow => (true, 0),
            LockoutVerdict::Deny {
                retry_after_seconds,
            } => (false, retry_after_seconds),
        }
    }

    /// Report the outcome of the real credential check.
    async fn post_check(
        &self,
        principal: &str,
        success: bool,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<()> {
        self.require_root("PostCheck", &header, conn).await?;
        tracing::info!(principal, success, "post-check reported");
        self.state
            .gate
            .post_check(principal, CheckOutcome::from(success))
            .await;
        Ok(())
    }

    /// Stored failure timestamps for a principal as JSON.
    async fn history(&self, principal: &str) -> zbus::fdo::Result<String> {
        let store = self.state.gate.store();
        let values = store
            .failure_values(principal)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        let report = history_report(
            self.state.gate.extractor(),
            self.state.gate.config().lockout,
            principal,
            &values,
        );
        Ok(report.to_string())
    }

    /// Clear the failure history of a principal.
    async fn reset(
        &self,
        principal: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<bool> {
        self.require_root("Reset", &header, conn).await?;
        let cleared = self
            .state
            .gate
            .store()
            .clear_failures(principal)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        if cleared {
            tracing::info!(principal, "failure history reset");
        } else {
            tracing::warn!(principal, "no failure history to reset");
        }
        Ok(cleared)
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let config = self.state.gate.config();
        let principals = self
            .state
            .gate
            .store()
            .count_principals()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to count principals");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "basetime": config.lockout.basetime,
            "maxtime": config.lockout.maxtime,
            "failure_attribute": config.failure_attribute,
            "on_fetch_error": config.on_fetch_error,
            "principals": principals,
        })
        .to_string())
    }
}
