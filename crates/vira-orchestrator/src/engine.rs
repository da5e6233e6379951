use crate::config::EngineConfig;
use crate::context::{validate_writers, ContextEntry, ContextStore};
use crate::executor::{InstanceView, WorkflowExecutor};
use crate::graph::DependencyGraph;
use crate::monitor::PoolMonitor;
use crate::pool::{NestedOutcome, NestedRunner, WorkerPool};
use crate::registry::WorkflowRegistry;
use crate::snapshot::{FileSnapshotStore, InstanceSnapshot, SnapshotStore};
use crate::types::{
    FailureKind, StatusSnapshot, SubtaskError, SubtaskInput, WorkflowOutcome, WorkflowStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use uuid::Uuid;
use vira_agent::{CancelToken, WorkerRoster};
use vira_core::{ViraError, ViraResult};

/// Registry entry of one running or finished instance.
struct InstanceEntry {
    workflow_type: String,
    created_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
    cancel: CancelToken,
    context: ContextStore,
    view: watch::Receiver<InstanceView>,
}

impl InstanceEntry {
    fn snapshot(&self, id: Uuid) -> StatusSnapshot {
        let view = self.view.borrow();
        StatusSnapshot {
            instance_id: id.to_string(),
            workflow_type: self.workflow_type.clone(),
            status: view.status,
            ready_count: view.counts.ready,
            running_count: view.counts.running,
            completed_count: view.counts.completed,
            failed_count: view.counts.failed,
            skipped_count: view.counts.skipped,
            total: view.counts.total,
            created_at: self.created_at,
            deadline: self.deadline,
        }
    }
}

struct EngineInner {
    registry: Arc<WorkflowRegistry>,
    roster: WorkerRoster,
    pool: Arc<WorkerPool>,
    config: EngineConfig,
    instances: RwLock<HashMap<Uuid, InstanceEntry>>,
    snapshots: parking_lot::RwLock<Option<Arc<dyn SnapshotStore>>>,
}

/// Master coordinator: routes requests to workflow types and keeps the
/// registry of live instances.
///
/// Cloning is cheap and every clone drives the same engine. Instances are
/// kept until their result is fetched or they are discarded.
#[derive(Clone)]
pub struct OrchestrationEngine {
    inner: Arc<EngineInner>,
}

impl OrchestrationEngine {
    pub fn new(
        registry: WorkflowRegistry,
        roster: WorkerRoster,
        config: EngineConfig,
    ) -> ViraResult<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.max_concurrency, config.cancel_grace());
        info!(
            max_concurrency = config.max_concurrency,
            workflows = registry.names().len(),
            roles = roster.roles().len(),
            "Orchestration engine ready"
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                registry: Arc::new(registry),
                roster,
                pool: Arc::new(pool),
                config,
                instances: RwLock::new(HashMap::new()),
                snapshots: parking_lot::RwLock::new(None),
            }),
        })
    }

    /// Like [`OrchestrationEngine::new`], opening a [`FileSnapshotStore`]
    /// when the configuration names a snapshot directory.
    pub async fn from_config(
        registry: WorkflowRegistry,
        roster: WorkerRoster,
        config: EngineConfig,
    ) -> ViraResult<Self> {
        let dir = config.snapshot_dir.clone();
        let engine = Self::new(registry, roster, config)?;
        match dir {
            Some(dir) => {
                let store = FileSnapshotStore::new(dir).await?;
                Ok(engine.with_snapshot_store(Arc::new(store)))
            }
            None => Ok(engine),
        }
    }

    pub fn with_snapshot_store(self, store: Arc<dyn SnapshotStore>) -> Self {
        *self.inner.snapshots.write() = Some(store);
        self
    }

    pub fn monitor(&self) -> Arc<PoolMonitor> {
        Arc::clone(self.inner.pool.monitor())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Registered workflow types, sorted.
    pub fn workflow_types(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.inner.registry
    }

    /// Validate and start an instance of `workflow_type`. Returns as soon as
    /// the instance is registered; configuration errors are reported here
    /// and the instance never runs.
    pub async fn submit(
        &self,
        workflow_type: &str,
        request: serde_json::Value,
    ) -> ViraResult<Uuid> {
        self.submit_at_depth(workflow_type, request, 0).await
    }

    async fn submit_at_depth(
        &self,
        workflow_type: &str,
        request: serde_json::Value,
        depth: u32,
    ) -> ViraResult<Uuid> {
        let definition = self
            .inner
            .registry
            .get(workflow_type)
            .ok_or_else(|| ViraError::UnknownWorkflow(workflow_type.to_string()))?;
        let specs = (definition.decompose)(&request)?;
        let graph = DependencyGraph::from_specs(specs)?;
        validate_writers(&graph)?;
        self.validate_staffing(&graph)?;

        let instance_id = Uuid::new_v4();
        let created_at = Utc::now();
        let deadline = definition.policy.deadline;
        let deadline_at = deadline
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| created_at + d);
        let cancel = CancelToken::new();
        let work = cancel.child();
        let context = ContextStore::new();
        let (view_tx, view_rx) = watch::channel(InstanceView::pending(graph.counts()));
        let nested: Arc<dyn NestedRunner> = Arc::new(self.clone());
        let session = self
            .inner
            .pool
            .session(instance_id.to_string(), work.clone(), Some(nested));
        let snapshots = self.inner.snapshots.read().clone();

        let executor = WorkflowExecutor {
            instance_id,
            definition: Arc::clone(&definition),
            graph,
            context: context.clone(),
            roster: self.inner.roster.clone(),
            session,
            config: self.inner.config.clone(),
            depth,
            cancel: cancel.clone(),
            work,
            created_at,
            deadline: deadline.map(|d| tokio::time::Instant::now() + d),
            view: view_tx,
            snapshots,
        };

        self.inner.instances.write().await.insert(
            instance_id,
            InstanceEntry {
                workflow_type: definition.name.clone(),
                created_at,
                deadline: deadline_at,
                cancel,
                context,
                view: view_rx,
            },
        );
        info!(
            instance_id = %instance_id,
            workflow = %definition.name,
            depth,
            "Workflow instance submitted"
        );
        tokio::spawn(executor.run());
        Ok(instance_id)
    }

    /// Every prompt subtask needs a worker for its role and every nested
    /// subtask a registered workflow type.
    fn validate_staffing(&self, graph: &DependencyGraph) -> ViraResult<()> {
        for subtask in graph.subtasks() {
            match &subtask.spec.input {
                SubtaskInput::Prompt { .. } => {
                    if !self.inner.roster.has(subtask.spec.role) {
                        return Err(ViraError::UnstaffedRole(subtask.spec.role.to_string()));
                    }
                }
                SubtaskInput::Nested { workflow_type, .. } => {
                    if !self.inner.registry.contains(workflow_type) {
                        return Err(ViraError::UnknownWorkflow(workflow_type.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn status(&self, instance_id: Uuid) -> ViraResult<StatusSnapshot> {
        let instances = self.inner.instances.read().await;
        instances
            .get(&instance_id)
            .map(|entry| entry.snapshot(instance_id))
            .ok_or_else(|| ViraError::NotFound(instance_id.to_string()))
    }

    /// Request cancellation. Cancelling a terminal instance is a no-op.
    pub async fn cancel(&self, instance_id: Uuid) -> ViraResult<()> {
        let instances = self.inner.instances.read().await;
        let entry = instances
            .get(&instance_id)
            .ok_or_else(|| ViraError::NotFound(instance_id.to_string()))?;
        let status = entry.view.borrow().status;
        if status.is_terminal() || entry.cancel.is_cancelled() {
            return Ok(());
        }
        info!(instance_id = %instance_id, "Cancelling workflow instance");
        entry.cancel.cancel();
        Ok(())
    }

    /// Wait for the instance to finish and hand over its outcome. The
    /// instance is forgotten afterwards.
    pub async fn result(&self, instance_id: Uuid) -> ViraResult<WorkflowOutcome> {
        let mut view = {
            let instances = self.inner.instances.read().await;
            instances
                .get(&instance_id)
                .map(|entry| entry.view.clone())
                .ok_or_else(|| ViraError::NotFound(instance_id.to_string()))?
        };
        // Errs only if the executor died before publishing an outcome.
        let outcome = view
            .wait_for(|v| v.outcome.is_some())
            .await
            .ok()
            .and_then(|v| v.outcome.clone());
        self.inner.instances.write().await.remove(&instance_id);
        outcome.map(|o| (*o).clone()).ok_or_else(|| {
            ViraError::Orchestrator(format!("instance {instance_id} stopped without an outcome"))
        })
    }

    /// Cancel if still running and drop the instance without waiting.
    /// Its snapshot is deleted once the executor has stopped writing it.
    pub async fn discard(&self, instance_id: Uuid) -> ViraResult<()> {
        let entry = self
            .inner
            .instances
            .write()
            .await
            .remove(&instance_id)
            .ok_or_else(|| ViraError::NotFound(instance_id.to_string()))?;
        entry.cancel.cancel();
        info!(instance_id = %instance_id, "Workflow instance discarded");

        let store = self.inner.snapshots.read().clone();
        if let Some(store) = store {
            let mut view = entry.view;
            tokio::spawn(async move {
                // The executor writes a last snapshot on its way out.
                let _ = view.wait_for(|v| v.outcome.is_some()).await;
                if let Err(e) = store.remove(instance_id).await {
                    warn!(instance_id = %instance_id, error = %e, "Failed to remove snapshot");
                }
            });
        }
        Ok(())
    }

    /// Last snapshot written for an instance, including instances whose
    /// result was already fetched. `None` without a snapshot store.
    pub async fn archived(&self, instance_id: Uuid) -> ViraResult<Option<InstanceSnapshot>> {
        let store = self.inner.snapshots.read().clone();
        match store {
            Some(store) => store.load(instance_id).await,
            None => Ok(None),
        }
    }

    /// Status of every registered instance, oldest first.
    pub async fn list(&self) -> Vec<StatusSnapshot> {
        let instances = self.inner.instances.read().await;
        let mut out: Vec<StatusSnapshot> = instances
            .iter()
            .map(|(id, entry)| entry.snapshot(*id))
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        out
    }

    /// Read-only copy of an instance's context store.
    pub async fn context(&self, instance_id: Uuid) -> ViraResult<Vec<ContextEntry>> {
        let instances = self.inner.instances.read().await;
        instances
            .get(&instance_id)
            .map(|entry| entry.context.entries())
            .ok_or_else(|| ViraError::NotFound(instance_id.to_string()))
    }
}

#[async_trait]
impl NestedRunner for OrchestrationEngine {
    async fn run_nested(
        &self,
        workflow_type: &str,
        request: serde_json::Value,
        depth: u32,
        cancel: CancelToken,
    ) -> NestedOutcome {
        let limit = self.inner.config.max_nesting_depth;
        if depth > limit {
            return NestedOutcome {
                instance_id: None,
                result: Err(SubtaskError::new(
                    FailureKind::Nested,
                    format!("nesting depth {depth} exceeds the limit of {limit}"),
                )),
            };
        }
        if cancel.is_cancelled() {
            return NestedOutcome {
                instance_id: None,
                result: Err(SubtaskError::cancelled()),
            };
        }

        let child = match self.submit_at_depth(workflow_type, request, depth).await {
            Ok(id) => id,
            Err(e) => {
                return NestedOutcome {
                    instance_id: None,
                    result: Err(SubtaskError::new(FailureKind::Nested, e.to_string())),
                }
            }
        };

        let outcome = tokio::select! {
            outcome = self.result(child) => outcome,
            _ = cancel.cancelled() => {
                if let Err(e) = self.cancel(child).await {
                    warn!(instance_id = %child, error = %e, "Failed to cancel nested instance");
                }
                self.result(child).await
            }
        };

        let result = match outcome {
            Ok(outcome) => match outcome.status {
                WorkflowStatus::Succeeded | WorkflowStatus::PartialFailure => Ok(outcome.payload),
                WorkflowStatus::Cancelled => Err(SubtaskError::cancelled()),
                status => {
                    let reason = outcome
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| status.to_string());
                    Err(SubtaskError::new(
                        FailureKind::Nested,
                        format!("{workflow_type} instance {child} ended {status}: {reason}"),
                    ))
                }
            },
            Err(e) => Err(SubtaskError::new(FailureKind::Nested, e.to_string())),
        };
        NestedOutcome {
            instance_id: Some(child.to_string()),
            result,
        }
    }
}
