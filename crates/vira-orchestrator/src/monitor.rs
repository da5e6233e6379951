use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use vira_agent::WorkerRole;

/// Counters kept per worker role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMetrics {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub duration_ms: u64,
}

/// Tracks pool concurrency and per-role execution metrics.
pub struct PoolMonitor {
    roles: Arc<RwLock<HashMap<WorkerRole, RoleMetrics>>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl PoolMonitor {
    pub fn new() -> Self {
        let roles = WorkerRole::ALL
            .iter()
            .map(|role| (*role, RoleMetrics::default()))
            .collect();
        Self {
            roles: Arc::new(RwLock::new(roles)),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// An execution took a pool slot.
    pub async fn start(&self, role: WorkerRole) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let mut roles = self.roles.write().await;
        roles.entry(role).or_default().executions += 1;
    }

    /// An execution released its pool slot.
    pub async fn finish(&self, role: WorkerRole, success: bool, elapsed: Duration) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        let mut roles = self.roles.write().await;
        let metrics = roles.entry(role).or_default();
        if success {
            metrics.successes += 1;
        } else {
            metrics.failures += 1;
        }
        metrics.duration_ms += u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub async fn record_retry(&self, role: WorkerRole) {
        let mut roles = self.roles.write().await;
        roles.entry(role).or_default().retries += 1;
    }

    pub async fn record_timeout(&self, role: WorkerRole) {
        let mut roles = self.roles.write().await;
        roles.entry(role).or_default().timeouts += 1;
    }

    /// Executions currently holding a pool slot.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest value [`PoolMonitor::running`] has reached.
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub async fn role_metrics(&self, role: WorkerRole) -> RoleMetrics {
        self.roles.read().await.get(&role).cloned().unwrap_or_default()
    }

    pub async fn aggregate(&self) -> RoleMetrics {
        let roles = self.roles.read().await;
        let mut total = RoleMetrics::default();
        for metrics in roles.values() {
            total.executions += metrics.executions;
            total.successes += metrics.successes;
            total.failures += metrics.failures;
            total.retries += metrics.retries;
            total.timeouts += metrics.timeouts;
            total.duration_ms += metrics.duration_ms;
        }
        total
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let roles: std::collections::BTreeMap<String, RoleMetrics> = self
            .roles
            .read()
            .await
            .iter()
            .map(|(role, m)| (role.to_string(), m.clone()))
            .collect();
        serde_json::json!({
            "running": self.running(),
            "peak_running": self.peak_running(),
            "roles": roles,
            "aggregate": self.aggregate().await,
        })
    }
}

impl Default for PoolMonitor {
    fn default() -> Self {
        Self::new()
    }
}
