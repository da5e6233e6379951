use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use vira_agent::RetryPolicy;
use vira_core::{ViraError, ViraResult};

/// Tunables of the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker Pool ceiling shared by all instances.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Default per-attempt timeout; workflow types may override it.
    #[serde(default = "default_subtask_timeout_ms")]
    pub subtask_timeout_ms: u64,
    /// How long a cancelled worker may keep running before it is aborted.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: u32,
    /// Write instance snapshots here when set.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_subtask_timeout_ms() -> u64 {
    120_000
}

fn default_cancel_grace_ms() -> u64 {
    10_000
}

fn default_max_nesting_depth() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            retry: RetryPolicy::default(),
            subtask_timeout_ms: default_subtask_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            max_nesting_depth: default_max_nesting_depth(),
            snapshot_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ViraResult<()> {
        if self.max_concurrency == 0 {
            return Err(ViraError::Config("max_concurrency must be at least 1".into()));
        }
        if self.subtask_timeout_ms == 0 {
            return Err(ViraError::Config("subtask_timeout_ms must be positive".into()));
        }
        if self.retry.max_retries == 0 {
            return Err(ViraError::Config(
                "retry.max_retries counts the first run and must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn subtask_timeout(&self) -> Duration {
        Duration::from_millis(self.subtask_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.backoff_base_ms, 1_000);
        assert_eq!(config.retry.backoff_factor, 2);
        assert_eq!(config.retry.backoff_max_ms, 30_000);
        assert_eq!(config.cancel_grace(), Duration::from_secs(10));
        assert!(config.snapshot_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            max_concurrency = 2
            [retry]
            backoff_base_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.retry.backoff_base_ms, 10);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.subtask_timeout_ms, 120_000);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = EngineConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_configuration());

        let config = EngineConfig {
            subtask_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
