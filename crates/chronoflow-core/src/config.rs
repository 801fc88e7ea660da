//! ChronoFlow configuration system.
//!
//! TOML file + environment overrides. The env overrides exist so runtime
//! toggles (apply-changes, thresholds) can flip without editing the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ChronoflowError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChronoflowConfig {
    /// Master switch for remote mutation. When false every event is a
    /// dry run: matched actions are reported, nothing is written.
    #[serde(default)]
    pub apply_changes: bool,
    /// Batches larger than this run on the background pool instead of
    /// inline in the caller's request cycle.
    #[serde(default = "default_async_threshold")]
    pub async_action_threshold: usize,
    /// Rules with no explicit trigger event match every event type.
    #[serde(default = "bool_true")]
    pub wildcard_triggers: bool,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    #[serde(default = "default_rule_cache_ttl_secs")]
    pub rule_cache_ttl_secs: u64,
    /// Bounded worker pool for async refreshes and large batches.
    /// 0 means "size to available parallelism".
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_async_threshold() -> usize {
    5
}
fn default_dedup_ttl_secs() -> u64 {
    600
}
fn default_rule_cache_ttl_secs() -> u64 {
    300
}
fn bool_true() -> bool {
    true
}

impl Default for ChronoflowConfig {
    fn default() -> Self {
        Self {
            apply_changes: false,
            async_action_threshold: default_async_threshold(),
            wildcard_triggers: true,
            dedup_ttl_secs: default_dedup_ttl_secs(),
            rule_cache_ttl_secs: default_rule_cache_ttl_secs(),
            worker_threads: 0,
            retry: RetryConfig::default(),
        }
    }
}

impl ChronoflowConfig {
    /// Load config from the default path (~/.chronoflow/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChronoflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ChronoflowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chronoflow")
            .join("config.toml")
    }

    /// Apply CHRONOFLOW_* environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = bool_env("CHRONOFLOW_APPLY_CHANGES") {
            self.apply_changes = v;
        }
        if let Some(v) = bool_env("CHRONOFLOW_WILDCARD_TRIGGERS") {
            self.wildcard_triggers = v;
        }
        if let Some(v) = parsed_env::<usize>("CHRONOFLOW_ASYNC_ACTION_THRESHOLD") {
            self.async_action_threshold = v;
        }
        if let Some(v) = parsed_env::<u64>("CHRONOFLOW_DEDUP_TTL_SECS") {
            self.dedup_ttl_secs = v;
        }
        if let Some(v) = parsed_env::<u32>("CHRONOFLOW_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
    }

    /// Effective worker pool size.
    pub fn worker_pool_size(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .max(2)
        }
    }
}

/// Retry/backoff bounds for outbound API calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Cap applied to a server-provided Retry-After value.
    #[serde(default = "default_retry_after_cap_ms")]
    pub retry_after_cap_ms: u64,
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_retry_after_cap_ms() -> u64 {
    5_000
}
fn default_jitter_min_ms() -> u64 {
    50
}
fn default_jitter_max_ms() -> u64 {
    150
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retry_after_cap_ms: default_retry_after_cap_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

fn bool_env(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        other => {
            tracing::warn!("Ignoring unparseable boolean for {key}: '{other}'");
            None
        }
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable value for {key}: '{raw}'");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChronoflowConfig::default();
        assert!(!config.apply_changes);
        assert_eq!(config.async_action_threshold, 5);
        assert!(config.wildcard_triggers);
        assert_eq!(config.dedup_ttl_secs, 600);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert!(config.worker_pool_size() >= 2);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            apply_changes = true
            async_action_threshold = 8

            [retry]
            max_attempts = 6
            base_delay_ms = 100
        "#;

        let config: ChronoflowConfig = toml::from_str(toml_str).unwrap();
        assert!(config.apply_changes);
        assert_eq!(config.async_action_threshold, 8);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay_ms, 100);
        // Unset fields keep their defaults.
        assert_eq!(config.retry.max_delay_ms, 2_000);
        assert_eq!(config.rule_cache_ttl_secs, 300);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: ChronoflowConfig = toml::from_str("").unwrap();
        assert!(!config.apply_changes);
        assert_eq!(config.async_action_threshold, 5);
    }
}
