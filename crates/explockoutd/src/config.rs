use std::path::PathBuf;

use explockout_core::{ConfigError, FetchFailurePolicy, GateConfig};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Whether the daemon is running on the session bus (development mode).
    /// Caller UID checks are skipped on the session bus.
    pub session_bus: bool,
    /// Lockout gate settings.
    pub gate: GateConfig,
}

impl Config {
    /// Load configuration from `EXPLOCKOUT_*` environment variables.
    ///
    /// `EXPLOCKOUT_CONFIG` names a TOML file for the gate settings; the
    /// individual variables override values from that file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("explockout");

        let db_path = std::env::var("EXPLOCKOUT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("principals.db"));

        let mut gate = match std::env::var("EXPLOCKOUT_CONFIG") {
            Ok(path) => GateConfig::load(&PathBuf::from(path))?,
            Err(_) => GateConfig::default(),
        };

        gate.lockout.basetime = env_u64("EXPLOCKOUT_BASETIME", gate.lockout.basetime)?;
        gate.lockout.maxtime = env_u64("EXPLOCKOUT_MAXTIME", gate.lockout.maxtime)?;
        gate.fetch_timeout_secs = env_u64("EXPLOCKOUT_FETCH_TIMEOUT_SECS", gate.fetch_timeout_secs)?;
        if let Ok(attribute) = std::env::var("EXPLOCKOUT_FAILURE_ATTRIBUTE") {
            gate.failure_attribute = attribute;
        }
        if let Ok(policy) = std::env::var("EXPLOCKOUT_ON_FETCH_ERROR") {
            gate.on_fetch_error = policy.parse::<FetchFailurePolicy>()?;
        }
        if let Ok(v) = std::env::var("EXPLOCKOUT_ACCEPT_GENERALIZED_TIME") {
            gate.accept_generalized_time = v != "0";
        }
        gate.validate()?;

        Ok(Self {
            db_path,
            session_bus: std::env::var("EXPLOCKOUT_SESSION_BUS").is_ok(),
            gate,
        })
    }
}

/// A set but unparsable variable is an error rather than a silent default,
/// so a typo in a lockout parameter cannot disable the lockout.
fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value: v }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_u64_default_and_invalid() {
        assert_eq!(env_u64("EXPLOCKOUT_TEST_UNSET_VARIABLE", 7).unwrap(), 7);

        std::env::set_var("EXPLOCKOUT_TEST_BAD_VARIABLE", "-3");
        assert!(matches!(
            env_u64("EXPLOCKOUT_TEST_BAD_VARIABLE", 7),
            Err(ConfigError::InvalidValue { .. })
        ));

        std::env::set_var("EXPLOCKOUT_TEST_GOOD_VARIABLE", " 42 ");
        assert_eq!(env_u64("EXPLOCKOUT_TEST_GOOD_VARIABLE", 7).unwrap(), 42);
    }
}
