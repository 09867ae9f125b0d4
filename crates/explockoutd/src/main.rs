use std::sync::Arc;

use anyhow::{Context, Result};
use explockout_core::BindInterceptor;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod store;

use config::Config;
use dbus_interface::{AppState, ExpLockoutService};
use store::PrincipalStore;

const BUS_NAME: &str = "org.openldap.ExpLockout1";
const OBJECT_PATH: &str = "/org/openldap/ExpLockout1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("explockoutd starting");

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(
        db = %config.db_path.display(),
        basetime = config.gate.lockout.basetime,
        maxtime = config.gate.lockout.maxtime,
        on_fetch_error = ?config.gate.on_fetch_error,
        session_bus = config.session_bus,
        "configuration loaded"
    );

    let store = PrincipalStore::open(&config.db_path, &config.gate.failure_attribute)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;

    let gate = BindInterceptor::new(config.gate.clone(), store);
    let session_bus = config.session_bus;
    let service = ExpLockoutService {
        state: Arc::new(AppState { config, gate }),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "explockoutd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("explockoutd shutting down");

    Ok(())
}
