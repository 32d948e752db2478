//! Billing configuration.
//!
//! Loaded from a JSON file (default `~/.config/navbill/config.json`), then
//! overridden by `NAVBILL_*` environment variables. Missing fields fall back
//! to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::paths::default_config_path;

pub const ENV_BASE_URL: &str = "NAVBILL_BASE_URL";
pub const ENV_ACCESS_TOKEN: &str = "NAVBILL_ACCESS_TOKEN";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "NAVBILL_REQUEST_TIMEOUT_SECS";
pub const ENV_HEARTBEAT_SECS: &str = "NAVBILL_HEARTBEAT_SECS";
pub const ENV_LOG_DIR: &str = "NAVBILL_LOG_DIR";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/billing/v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Base URL of the billing REST service.
    pub base_url: String,

    /// Sent as the `access_token` query parameter on every request.
    pub access_token: String,

    pub request_timeout_secs: u64,

    /// Usage heartbeat period. `None` disables the heartbeat.
    pub heartbeat_interval_secs: Option<u64>,

    /// Directory for the backend request log. `None` disables it.
    pub log_dir: Option<PathBuf>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            heartbeat_interval_secs: None,
            log_dir: None,
        }
    }
}

impl BillingConfig {
    /// Parse a config file. Does not apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Resolve the effective configuration.
    ///
    /// Reads `path` if given (it must exist), otherwise the default path if
    /// it exists, otherwise starts from defaults. Environment overrides are
    /// applied last and the result is validated.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(default_path) => {
                    log::debug!("Loading billing config from {}", default_path.display());
                    Self::load(&default_path)?
                }
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `NAVBILL_*` overrides from `lookup` (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(token) = get(ENV_ACCESS_TOKEN) {
            self.access_token = token;
        }
        if let Some(secs) = get(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = parse_secs(ENV_REQUEST_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = get(ENV_HEARTBEAT_SECS) {
            self.heartbeat_interval_secs = Some(parse_secs(ENV_HEARTBEAT_SECS, &secs)?);
        }
        if let Some(dir) = get(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url cannot be empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "base_url must be http(s): {}",
                self.base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_secs.map(Duration::from_secs)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a whole number of seconds")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    mod load {
        use super::*;

        #[test]
        fn reads_partial_file_with_defaults() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("config.json");
            std::fs::write(
                &path,
                r#"{"base_url": "https://billing.example.com/v1", "heartbeat_interval_secs": 300}"#,
            )
            .unwrap();

            let config = BillingConfig::load(&path).unwrap();
            assert_eq!(config.base_url, "https://billing.example.com/v1");
            assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(300)));
            assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
            assert!(config.access_token.is_empty());
        }

        #[test]
        fn missing_file_is_io_error() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("nope.json");

            match BillingConfig::load(&path) {
                Err(ConfigError::Io { path: p, .. }) => assert_eq!(p, path),
                other => panic!("Expected Io error, got {:?}", other),
            }
        }

        #[test]
        fn malformed_file_is_parse_error() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("config.json");
            std::fs::write(&path, "{ not json").unwrap();

            assert!(matches!(
                BillingConfig::load(&path),
                Err(ConfigError::Parse(_))
            ));
        }

        #[test]
        fn resolve_with_explicit_path_validates() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("config.json");
            std::fs::write(&path, r#"{"base_url": "ftp://nope"}"#).unwrap();

            // NAVBILL_BASE_URL is not set by any test, so the file value stands.
            assert!(matches!(
                BillingConfig::resolve(Some(&path)),
                Err(ConfigError::Invalid(_))
            ));
        }
    }

    mod overrides {
        use super::*;

        #[test]
        fn env_values_replace_file_values() {
            let mut config = BillingConfig::default();
            config
                .apply_overrides(env(&[
                    (ENV_BASE_URL, "https://override.example.com"),
                    (ENV_ACCESS_TOKEN, "pk.secret"),
                    (ENV_REQUEST_TIMEOUT_SECS, "3"),
                    (ENV_HEARTBEAT_SECS, "60"),
                    (ENV_LOG_DIR, "/tmp/navbill-logs"),
                ]))
                .unwrap();

            assert_eq!(config.base_url, "https://override.example.com");
            assert_eq!(config.access_token, "pk.secret");
            assert_eq!(config.request_timeout(), Duration::from_secs(3));
            assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(60)));
            assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/navbill-logs")));
        }

        #[test]
        fn empty_values_are_ignored() {
            let mut config = BillingConfig::default();
            config
                .apply_overrides(env(&[(ENV_BASE_URL, "  "), (ENV_ACCESS_TOKEN, "")]))
                .unwrap();
            assert_eq!(config, BillingConfig::default());
        }

        #[test]
        fn non_numeric_timeout_is_rejected() {
            let mut config = BillingConfig::default();
            let err = config
                .apply_overrides(env(&[(ENV_REQUEST_TIMEOUT_SECS, "soon")]))
                .unwrap_err();
            assert!(err.to_string().contains(ENV_REQUEST_TIMEOUT_SECS));
        }
    }

    mod validate {
        use super::*;

        #[test]
        fn default_is_valid() {
            assert!(BillingConfig::default().validate().is_ok());
        }

        #[test]
        fn rejects_empty_base_url() {
            let config = BillingConfig {
                base_url: String::new(),
                ..BillingConfig::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }

        #[test]
        fn rejects_zero_durations() {
            let config = BillingConfig {
                request_timeout_secs: 0,
                ..BillingConfig::default()
            };
            assert!(config.validate().is_err());

            let config = BillingConfig {
                heartbeat_interval_secs: Some(0),
                ..BillingConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }
}
