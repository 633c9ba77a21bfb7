//! Session configuration with environment overrides.

use std::time::Duration;

use learn_core::PassThreshold;
use sandbox::{Denylist, SandboxConfig};
use thiserror::Error;

pub const ENV_EXEC_TIMEOUT_SECS: &str = "LEARN_EXEC_TIMEOUT_SECS";
pub const ENV_MAX_CODE_LENGTH: &str = "LEARN_MAX_CODE_LENGTH";
pub const ENV_PASS_THRESHOLD: &str = "LEARN_PASS_THRESHOLD";
pub const ENV_EXTRA_DENYLIST: &str = "LEARN_EXTRA_DENYLIST";

/// Upper bound for `LEARN_EXEC_TIMEOUT_SECS`.
pub const MAX_EXEC_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{key}: `{value}` is not valid ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Everything a coordinator needs to know besides its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionConfig {
    pub sandbox: SandboxConfig,
    pub pass_threshold: PassThreshold,
}

impl SessionConfig {
    /// Defaults overridden by the `LEARN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a variable that is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`SessionConfig::from_env`] but reads values through `lookup`.
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a value that cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(ENV_EXEC_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ConfigError::invalid(ENV_EXEC_TIMEOUT_SECS, &raw, "expected whole seconds")
            })?;
            if secs == 0 || secs > MAX_EXEC_TIMEOUT_SECS {
                return Err(ConfigError::invalid(
                    ENV_EXEC_TIMEOUT_SECS,
                    &raw,
                    format!("must be between 1 and {MAX_EXEC_TIMEOUT_SECS}"),
                ));
            }
            config.sandbox = config.sandbox.with_timeout(Duration::from_secs(secs));
        }

        if let Some(raw) = get(ENV_MAX_CODE_LENGTH) {
            let len: usize = raw.trim().parse().map_err(|_| {
                ConfigError::invalid(ENV_MAX_CODE_LENGTH, &raw, "expected a character count")
            })?;
            if len == 0 {
                return Err(ConfigError::invalid(ENV_MAX_CODE_LENGTH, &raw, "must be positive"));
            }
            config.sandbox = config.sandbox.with_max_source_len(len);
        }

        if let Some(raw) = get(ENV_PASS_THRESHOLD) {
            config.pass_threshold = raw
                .parse()
                .map_err(|e: learn_core::progression::ParseThresholdError| {
                    ConfigError::invalid(ENV_PASS_THRESHOLD, &raw, e.to_string())
                })?;
        }

        if let Some(raw) = get(ENV_EXTRA_DENYLIST) {
            let names: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect();
            if let Some(bad) = names
                .iter()
                .find(|name| !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            {
                return Err(ConfigError::invalid(
                    ENV_EXTRA_DENYLIST,
                    &raw,
                    format!("`{bad}` is not a builtin name"),
                ));
            }
            let denylist: Denylist = config.sandbox.denylist.clone().with_builtins(names);
            config.sandbox = config.sandbox.with_denylist(denylist);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.pass_threshold, PassThreshold::Majority);
        assert_eq!(config.sandbox.timeout, Duration::from_secs(5));
    }

    #[test]
    fn overrides_are_applied() {
        let config = SessionConfig::from_lookup(lookup(&[
            (ENV_EXEC_TIMEOUT_SECS, "2"),
            (ENV_MAX_CODE_LENGTH, "500"),
            (ENV_PASS_THRESHOLD, "percent:80"),
            (ENV_EXTRA_DENYLIST, "sorted, zip"),
        ]))
        .unwrap();
        assert_eq!(config.sandbox.timeout, Duration::from_secs(2));
        assert_eq!(config.sandbox.max_source_len, 500);
        assert_eq!(config.pass_threshold, PassThreshold::Percent(80));
        assert!(config.sandbox.denylist.denies_builtin("sorted"));
        assert!(config.sandbox.denylist.denies_builtin("zip"));
        assert!(config.sandbox.denylist.denies_builtin("open"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = SessionConfig::from_lookup(lookup(&[(ENV_PASS_THRESHOLD, "  ")])).unwrap();
        assert_eq!(config.pass_threshold, PassThreshold::Majority);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err =
            SessionConfig::from_lookup(lookup(&[(ENV_EXEC_TIMEOUT_SECS, "soon")])).unwrap_err();
        assert!(err.to_string().starts_with(ENV_EXEC_TIMEOUT_SECS));

        assert!(SessionConfig::from_lookup(lookup(&[(ENV_EXEC_TIMEOUT_SECS, "0")])).is_err());
        assert!(SessionConfig::from_lookup(lookup(&[(ENV_MAX_CODE_LENGTH, "-1")])).is_err());
        assert!(SessionConfig::from_lookup(lookup(&[(ENV_PASS_THRESHOLD, "most")])).is_err());
        assert!(SessionConfig::from_lookup(lookup(&[(ENV_EXTRA_DENYLIST, "os.system")])).is_err());
    }
}
