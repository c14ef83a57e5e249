//! Configuration for one TaskPool.
//!
//! All durations are milliseconds so the TOML form stays flat:
//!
//! ```toml
//! namespace = "reverse"
//! lease_ttl_ms = 30000
//! value_ttl_ms = 86400000
//!
//! [wait]
//! base_delay_ms = 100
//! max_delay_ms = 5000
//! jitter = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::wait::WaitPolicy;
use crate::ledger::BatchOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPoolConfig {
    /// Row prefix for this getter. Must be non-empty and free of '-'.
    pub namespace: String,
    /// A Pending row older than this is treated as abandoned.
    pub lease_ttl_ms: u64,
    /// Retention of ledger rows.
    pub value_ttl_ms: u64,
    /// Local cache TTL. Unset = value_ttl_ms.
    pub local_ttl_ms: Option<u64>,
    /// Reaper cadence. Unset = value_ttl_ms / 4.
    pub reap_interval_ms: Option<u64>,
    pub max_concurrent_batches: usize,
    pub max_batch_size: usize,
    pub batch_window_ms: u64,
    /// Owner deletes its Pending row after publishing the outcome.
    pub release_lease_on_completion: bool,
    pub wait: WaitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Unset = uncapped doubling.
    pub max_delay_ms: Option<u64>,
    pub jitter: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TaskPoolConfig {
    fn default() -> Self {
        let batch = BatchOptions::default();
        Self {
            namespace: String::new(),
            lease_ttl_ms: 30_000,
            value_ttl_ms: 24 * 60 * 60 * 1_000,
            local_ttl_ms: None,
            reap_interval_ms: None,
            max_concurrent_batches: batch.max_concurrent_batches,
            max_batch_size: batch.max_batch_size,
            batch_window_ms: batch.window.as_millis() as u64,
            release_lease_on_completion: false,
            wait: WaitConfig::default(),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        let policy = WaitPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: None,
            jitter: false,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to parse config: {0}")]
    Invalid(#[from] toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TaskPoolConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn value_ttl(&self) -> Duration {
        Duration::from_millis(self.value_ttl_ms)
    }

    pub fn local_ttl(&self) -> Duration {
        Duration::from_millis(self.local_ttl_ms.unwrap_or(self.value_ttl_ms))
    }

    pub fn reap_interval(&self) -> Duration {
        self.reap_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.value_ttl() / 4)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_concurrent_batches: self.max_concurrent_batches,
            max_batch_size: self.max_batch_size,
            window: Duration::from_millis(self.batch_window_ms),
        }
    }
}

impl WaitConfig {
    pub fn policy(&self) -> WaitPolicy {
        WaitPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: self.max_delay_ms.map(Duration::from_millis),
            jitter: self.jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_follow_value_ttl() {
        let config = TaskPoolConfig::default();
        assert_eq!(config.local_ttl(), config.value_ttl());
        assert_eq!(config.reap_interval(), config.value_ttl() / 4);
        assert_eq!(config.wait.policy(), WaitPolicy::default());
        assert!(!config.release_lease_on_completion);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = TaskPoolConfig::from_toml_str(
            r#"
            namespace = "reverse"
            lease_ttl_ms = 500

            [wait]
            max_delay_ms = 2000
            jitter = true
            "#,
        )
        .unwrap();

        assert_eq!(config.namespace, "reverse");
        assert_eq!(config.lease_ttl(), Duration::from_millis(500));
        assert_eq!(config.value_ttl_ms, TaskPoolConfig::default().value_ttl_ms);
        assert_eq!(config.wait.base_delay_ms, 100);
        assert_eq!(config.wait.policy().max_delay, Some(Duration::from_secs(2)));
        assert!(config.wait.jitter);
    }

    #[test]
    fn explicit_overrides() {
        let config = TaskPoolConfig::from_toml_str(
            r#"
            value_ttl_ms = 8000
            local_ttl_ms = 1000
            reap_interval_ms = 250
            batch_window_ms = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.local_ttl(), Duration::from_secs(1));
        assert_eq!(config.reap_interval(), Duration::from_millis(250));
        assert_eq!(config.batch_options().window, Duration::from_millis(7));
    }

    #[test]
    fn bad_types_are_rejected() {
        let err = TaskPoolConfig::from_toml_str(r#"lease_ttl_ms = "soon""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "namespace = \"fromfile\"").unwrap();

        let config = TaskPoolConfig::load(file.path()).unwrap();
        assert_eq!(config.namespace, "fromfile");

        let missing = TaskPoolConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::ReadFailed(..))));
    }
}
