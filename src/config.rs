//! Engine configuration.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. `--config <path>`)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! ```toml
//! base_url = "https://api.example.com/v1"
//! promise_timeout_ms = 30000
//! max_concurrency = 8
//! invalidation = "self"
//! retry = { retries = 2, base_delay_ms = 250 }
//!
//! [default_headers]
//! accept = "application/json"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::cache::DEFAULT_PROMISE_TIMEOUT;
use crate::fetch::{RetryConfig, RetrySettings};
use crate::plugins::InvalidationMode;
use crate::{HuginnError, Result};

const CONFIG_FILE: &str = "config.toml";
const SYSTEM_DIR: &str = "/etc/huginn";

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Prefix of every request URL.
    pub base_url: String,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    /// Retry policy, or `false` to disable retries.
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    /// Lifetime of unsettled entries in the dedup table (default: 30000).
    #[serde(default = "default_promise_timeout_ms")]
    pub promise_timeout_ms: u64,
    /// Concurrent network calls allowed; unlimited when absent.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Default invalidation mode for writes (default: "all").
    #[serde(default)]
    pub invalidation: InvalidationMode,
}

fn default_promise_timeout_ms() -> u64 {
    DEFAULT_PROMISE_TIMEOUT.as_millis() as u64
}

impl EngineConfig {
    /// Minimal configuration pointing at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: BTreeMap::new(),
            retry: None,
            promise_timeout_ms: default_promise_timeout_ms(),
            max_concurrency: None,
            invalidation: InvalidationMode::default(),
        }
    }

    /// Load configuration from an explicit path, or else from the first
    /// existing file among [`default_paths`](Self::default_paths).
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(path) => path.to_path_buf(),
            None => Self::discover()?,
        };
        let config = Self::from_file(&path)?;
        info!(path = %path.display(), base_url = %config.base_url, "configuration loaded");
        Ok(config)
    }

    /// Searched locations, most specific first: the user file
    /// (`~/.huginn/config.toml`) when a home directory is known, then
    /// the system file.
    pub fn default_paths() -> Vec<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".huginn").join(CONFIG_FILE))
            .into_iter()
            .chain([Path::new(SYSTEM_DIR).join(CONFIG_FILE)])
            .collect()
    }

    fn discover() -> Result<PathBuf> {
        let candidates = Self::default_paths();
        candidates
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or_else(|| {
                let searched: Vec<String> =
                    candidates.iter().map(|p| p.display().to_string()).collect();
                HuginnError::Configuration(format!(
                    "no config file found (searched {})",
                    searched.join(", ")
                ))
            })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content).map_err(|e| match e {
            HuginnError::Configuration(msg) => {
                HuginnError::Configuration(format!("Failed to parse config file {path:?}: {msg}"))
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HuginnError::Configuration(e.to_string()))
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
            .clone()
            .map(RetryConfig::from)
            .unwrap_or_default()
    }

    pub fn promise_timeout(&self) -> Duration {
        Duration::from_millis(self.promise_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = EngineConfig::parse(r#"base_url = "http://localhost:8080""#).unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
        // Defaults preserved
        assert_eq!(config.promise_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_config(), RetryConfig::default());
        assert_eq!(config.invalidation, InvalidationMode::All);
        assert!(config.max_concurrency.is_none());
    }

    #[test]
    fn parse_full_config() {
        let config = EngineConfig::parse(
            r#"
            base_url = "https://api.example.com"
            promise_timeout_ms = 5000
            max_concurrency = 4
            invalidation = "self"
            retry = { retries = 1, base_delay_ms = 50, max_delay_ms = 200 }

            [default_headers]
            accept = "application/json"
            "#,
        )
        .unwrap();
        assert_eq!(config.promise_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_concurrency, Some(4));
        assert_eq!(config.invalidation, InvalidationMode::SelfOnly);
        assert_eq!(
            config.retry_config(),
            RetryConfig::new()
                .retries(1)
                .base_delay(Duration::from_millis(50))
                .max_delay(Duration::from_millis(200))
        );
        assert_eq!(config.default_headers["accept"], "application/json");
    }

    #[test]
    fn retry_can_be_disabled() {
        let config = EngineConfig::parse(
            r#"
            base_url = "http://localhost"
            retry = false
            "#,
        )
        .unwrap();
        assert_eq!(config.retry_config().retries, 0);
    }

    #[test]
    fn missing_base_url_is_configuration_error() {
        let err = EngineConfig::parse("max_concurrency = 2").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn missing_explicit_path_is_reported() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/huginn.toml"))).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Failed to read config file"));
        assert!(err.to_string().contains("/nonexistent/huginn.toml"));
    }

    #[test]
    fn user_file_is_searched_before_system_file() {
        let paths = EngineConfig::default_paths();
        assert_eq!(paths.last(), Some(&PathBuf::from("/etc/huginn/config.toml")));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(paths.first(), Some(&home.join(".huginn/config.toml")));
            assert_eq!(paths.len(), 2);
        }
    }
}
