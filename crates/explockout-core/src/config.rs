use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::history::PWD_FAILURE_TIME;
use crate::policy;

/// Exponential lockout parameters, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub basetime: u64,
    pub maxtime: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            basetime: 2,
            maxtime: 3600,
        }
    }
}

impl LockoutConfig {
    pub fn new(basetime: u64, maxtime: u64) -> Self {
        Self { basetime, maxtime }
    }

    /// Wait window after `failures` failed attempts.
    pub fn wait_for(&self, failures: usize) -> Duration {
        Duration::from_secs(policy::wait_seconds(failures, self.basetime, self.maxtime))
    }

    /// Wait windows after 1, 2, ... `failures` failed attempts.
    pub fn schedule(&self, failures: usize) -> impl Iterator<Item = u64> + '_ {
        (1..=failures).map(move |n| policy::wait_seconds(n, self.basetime, self.maxtime))
    }
}

/// What to answer when the record store cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    #[default]
    FailClosed,
    FailOpen,
}

impl std::str::FromStr for FetchFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_closed" | "closed" | "deny" => Ok(Self::FailClosed),
            "fail_open" | "open" | "allow" => Ok(Self::FailOpen),
            _ => Err(ConfigError::InvalidValue {
                key: "on_fetch_error",
                value: s.to_string(),
            }),
        }
    }
}

/// Full gate configuration as read from a TOML file.
///
/// ```toml
/// basetime = 2
/// maxtime = 3600
/// failure_attribute = "pwdFailureTime"
/// fetch_timeout_secs = 5
/// on_fetch_error = "fail_closed"
/// accept_generalized_time = false
/// ```
///
/// Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "GateFile")]
pub struct GateConfig {
    #[serde(flatten)]
    pub lockout: LockoutConfig,
    pub failure_attribute: String,
    pub fetch_timeout_secs: u64,
    pub on_fetch_error: FetchFailurePolicy,
    pub accept_generalized_time: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            lockout: LockoutConfig::default(),
            failure_attribute: PWD_FAILURE_TIME.to_string(),
            fetch_timeout_secs: 5,
            on_fetch_error: FetchFailurePolicy::FailClosed,
            accept_generalized_time: false,
        }
    }
}

/// On-disk layout of [`GateConfig`]: the same keys, flat.
#[derive(Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GateFile {
    basetime: u64,
    maxtime: u64,
    failure_attribute: String,
    fetch_timeout_secs: u64,
    on_fetch_error: FetchFailurePolicy,
    accept_generalized_time: bool,
}

impl Default for GateFile {
    fn default() -> Self {
        let config = GateConfig::default();
        Self {
            basetime: config.lockout.basetime,
            maxtime: config.lockout.maxtime,
            failure_attribute: config.failure_attribute,
            fetch_timeout_secs: config.fetch_timeout_secs,
            on_fetch_error: config.on_fetch_error,
            accept_generalized_time: config.accept_generalized_time,
        }
    }
}

impl From<GateFile> for GateConfig {
    fn from(file: GateFile) -> Self {
        Self {
            lockout: LockoutConfig::new(file.basetime, file.maxtime),
            failure_attribute: file.failure_attribute,
            fetch_timeout_secs: file.fetch_timeout_secs,
            on_fetch_error: file.on_fetch_error,
            accept_generalized_time: file.accept_generalized_time,
        }
    }
}

impl GateConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            basetime = config.lockout.basetime,
            maxtime = config.lockout.maxtime,
            "gate config loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_attribute.trim().is_empty() {
            return Err(ConfigError::EmptyAttribute);
        }
        if self.lockout.maxtime == 0 {
            tracing::warn!("maxtime is 0: every lockout window collapses to zero");
        }
        if self.lockout.basetime <= 1 {
            tracing::warn!(
                basetime = self.lockout.basetime,
                "basetime <= 1: lockout window does not grow"
            );
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.lockout, LockoutConfig::new(2, 3600));
        assert_eq!(config.failure_attribute, "pwdFailureTime");
        assert_eq!(config.on_fetch_error, FetchFailurePolicy::FailClosed);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_full_file() {
        let config = GateConfig::from_toml_str(
            r#"
            basetime = 5
            maxtime = 300
            failure_attribute = "myFailureTime"
            fetch_timeout_secs = 2
            on_fetch_error = "fail_open"
            accept_generalized_time = true
            "#,
        )
        .unwrap();
        assert_eq!(config.lockout, LockoutConfig::new(5, 300));
        assert_eq!(config.failure_attribute, "myFailureTime");
        assert_eq!(config.fetch_timeout_secs, 2);
        assert_eq!(config.on_fetch_error, FetchFailurePolicy::FailOpen);
        assert!(config.accept_generalized_time);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = GateConfig::from_toml_str("maxtime = 60").unwrap();
        assert_eq!(config.lockout, LockoutConfig::new(2, 60));
        assert_eq!(config.failure_attribute, "pwdFailureTime");
    }

    #[test]
    fn test_rejects_negative_and_empty() {
        assert!(matches!(
            GateConfig::from_toml_str("basetime = -1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            GateConfig::from_toml_str("failure_attribute = \"  \""),
            Err(ConfigError::EmptyAttribute)
        ));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(matches!(
            GateConfig::from_toml_str("bogus_key = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            GateConfig::from_toml_str("basetime = 3\nmax_time = 60"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_fetch_policy_from_str() {
        assert_eq!("closed".parse::<FetchFailurePolicy>().unwrap(), FetchFailurePolicy::FailClosed);
        assert_eq!("FAIL_OPEN".parse::<FetchFailurePolicy>().unwrap(), FetchFailurePolicy::FailOpen);
        assert!("maybe".parse::<FetchFailurePolicy>().is_err());
    }

    #[test]
    fn test_schedule() {
        let lockout = LockoutConfig::new(2, 60);
        assert_eq!(lockout.schedule(7).collect::<Vec<_>>(), vec![2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(lockout.wait_for(3), Duration::from_secs(8));
    }
}
