use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget and exponential backoff for transient worker failures.
///
/// `max_retries` bounds the total number of executions of one subtask,
/// the first run included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first requeue.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    /// Cap for the exponential backoff.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_factor: default_backoff_factor(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Whether a transiently failed subtask with `attempts` executions so far
    /// may run again.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// Delay before the `requeue`-th requeue (1-based).
    pub fn backoff_for(&self, requeue: u32) -> Duration {
        let exp = requeue.saturating_sub(1);
        let delay = self
            .backoff_base_ms
            .saturating_mul(u64::from(self.backoff_factor).saturating_pow(exp));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_sequence() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(4_000));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(6), Duration::from_millis(30_000));
        assert_eq!(policy.backoff_for(64), Duration::from_millis(30_000));
    }

    #[test]
    fn test_budget_counts_first_run() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        assert!(policy.allows_another(1));
        assert!(!policy.allows_another(2));
    }
}
