use crate::config::EngineConfig;
use crate::context::ContextStore;
use crate::graph::DependencyGraph;
use crate::pool::{Job, JobKind, PoolSession};
use crate::registry::{SubtaskOutput, WorkflowDefinition};
use crate::snapshot::{InstanceSnapshot, SnapshotStore};
use crate::types::{
    FailureKind, InstanceError, StatusCounts, SubtaskError, SubtaskInput, SubtaskStatus,
    WorkerResult, WorkflowOutcome, WorkflowStatus,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vira_agent::{CancelToken, WorkRequest, WorkerRoster};

/// What observers of an instance see, republished after every change.
#[derive(Debug, Clone)]
pub struct InstanceView {
    pub status: WorkflowStatus,
    pub counts: StatusCounts,
    /// Set exactly once, at the terminal transition.
    pub outcome: Option<Arc<WorkflowOutcome>>,
}

impl InstanceView {
    pub fn pending(counts: StatusCounts) -> Self {
        Self {
            status: WorkflowStatus::Pending,
            counts,
            outcome: None,
        }
    }
}

/// Why the scheduling loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Drained,
    Cancelled,
    DeadlineExceeded,
}

/// Drives one workflow instance to a terminal status.
///
/// The executor is the only writer of its instance's graph and context.
/// It submits ready subtasks to the shared pool, applies results in the
/// order they arrive and stops once nothing is running or ready.
pub struct WorkflowExecutor {
    pub(crate) instance_id: Uuid,
    pub(crate) definition: Arc<WorkflowDefinition>,
    pub(crate) graph: DependencyGraph,
    pub(crate) context: ContextStore,
    pub(crate) roster: WorkerRoster,
    pub(crate) session: PoolSession,
    pub(crate) config: EngineConfig,
    /// Nesting depth of this instance; top-level instances run at 0.
    pub(crate) depth: u32,
    /// Raised by the engine on external cancellation.
    pub(crate) cancel: CancelToken,
    /// Handed to the pool; raised on cancellation and on deadline expiry.
    pub(crate) work: CancelToken,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) deadline: Option<tokio::time::Instant>,
    pub(crate) view: watch::Sender<InstanceView>,
    pub(crate) snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl WorkflowExecutor {
    pub async fn run(mut self) {
        info!(
            instance_id = %self.instance_id,
            workflow = %self.definition.name,
            subtasks = self.graph.len(),
            depth = self.depth,
            "Workflow instance started"
        );
        self.publish(WorkflowStatus::Running);

        let stop = self.schedule().await;
        if stop != Stop::Drained {
            self.work.cancel();
            self.drain().await;
        }
        self.finish(stop).await;
    }

    async fn schedule(&mut self) -> Stop {
        let deadline = self.deadline;
        loop {
            if self.cancel.is_cancelled() {
                return Stop::Cancelled;
            }
            for id in self.graph.ready_set() {
                self.dispatch(&id);
            }
            if self.session.in_flight() == 0 {
                return Stop::Drained;
            }
            self.publish(WorkflowStatus::Running);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Stop::Cancelled,
                _ = until(deadline) => {
                    warn!(instance_id = %self.instance_id, "Workflow deadline exceeded");
                    return Stop::DeadlineExceeded;
                }
                result = self.session.await_any() => match result {
                    Some(result) => self.apply(result).await,
                    None => return Stop::Drained,
                },
            }
        }
    }

    /// Collect the results of work that was signalled to stop.
    async fn drain(&mut self) {
        while let Some(result) = self.session.await_any().await {
            self.apply(result).await;
        }
    }

    fn dispatch(&mut self, id: &str) {
        match self.job_for(id) {
            Ok(job) => {
                if let Err(e) = self.graph.mark(id, SubtaskStatus::Running) {
                    warn!(instance_id = %self.instance_id, subtask = %id, error = %e, "Cannot start subtask");
                    return;
                }
                self.session.submit(job);
            }
            Err(err) => {
                let result = WorkerResult {
                    subtask_id: id.to_string(),
                    outcome: Err(err),
                    attempts: 0,
                    duration: Duration::ZERO,
                    nested_instance: None,
                };
                if let Err(e) = self.graph.apply(&result) {
                    warn!(instance_id = %self.instance_id, subtask = %id, error = %e, "Cannot fail subtask");
                }
            }
        }
    }

    fn job_for(&self, id: &str) -> Result<Job, SubtaskError> {
        let subtask = self.graph.get(id).ok_or_else(|| {
            SubtaskError::new(FailureKind::Internal, format!("unknown subtask '{id}'"))
        })?;
        let spec = &subtask.spec;
        let policy = &self.definition.policy;
        let timeout = spec
            .timeout_ms
            .map(Duration::from_millis)
            .or(policy.subtask_timeout)
            .unwrap_or_else(|| self.config.subtask_timeout());
        let mut retry = self.config.retry.clone();
        if let Some(max_retries) = policy.max_retries {
            retry.max_retries = max_retries;
        }

        let kind = match &spec.input {
            SubtaskInput::Prompt { instruction, tools } => {
                let worker = self.roster.get(spec.role).ok_or_else(|| {
                    SubtaskError::new(
                        FailureKind::Internal,
                        format!("no worker configured for role '{}'", spec.role),
                    )
                })?;
                let context = self.context.visible_to(&self.graph.ancestors(id));
                JobKind::Prompt {
                    worker,
                    request: WorkRequest {
                        instance_id: self.instance_id.to_string(),
                        subtask_id: id.to_string(),
                        instruction: instruction.clone(),
                        tools: tools.clone(),
                        context,
                        attempt: 0,
                    },
                }
            }
            SubtaskInput::Nested {
                workflow_type,
                request,
            } => JobKind::Nested {
                workflow_type: workflow_type.clone(),
                request: request.clone(),
                depth: self.depth + 1,
            },
        };

        Ok(Job {
            subtask_id: id.to_string(),
            role: spec.role,
            kind,
            timeout,
            retry,
        })
    }

    async fn apply(&mut self, result: WorkerResult) {
        // Writes land before the subtask is marked, so dependents see them.
        match &result.outcome {
            Ok(payload) => {
                if let Some(subtask) = self.graph.get(&result.subtask_id) {
                    self.context
                        .write(subtask.spec.id.clone(), payload.clone(), &result.subtask_id);
                    for key in &subtask.spec.writes {
                        self.context
                            .write(key.clone(), payload.clone(), &result.subtask_id);
                    }
                }
                debug!(
                    instance_id = %self.instance_id,
                    subtask = %result.subtask_id,
                    attempts = result.attempts,
                    duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
                    "Subtask succeeded"
                );
            }
            Err(err) => {
                info!(
                    instance_id = %self.instance_id,
                    subtask = %result.subtask_id,
                    attempts = result.attempts,
                    error = %err,
                    "Subtask failed"
                );
            }
        }

        match self.graph.apply(&result) {
            Ok(skipped) if !skipped.is_empty() => {
                info!(instance_id = %self.instance_id, skipped = ?skipped, "Dependents skipped");
            }
            Ok(_) => {}
            Err(e) => warn!(instance_id = %self.instance_id, error = %e, "Discarded worker result"),
        }
        self.publish(WorkflowStatus::Running);
        self.save_snapshot(WorkflowStatus::Running).await;
    }

    async fn finish(mut self, stop: Stop) {
        self.graph.skip_pending();
        let (status, error) = match stop {
            Stop::Cancelled => (WorkflowStatus::Cancelled, None),
            Stop::DeadlineExceeded => (
                WorkflowStatus::Failed,
                Some(InstanceError {
                    subtask: None,
                    kind: FailureKind::Timeout,
                    message: "deadline exceeded".into(),
                }),
            ),
            Stop::Drained => self.judge(),
        };

        let payload = if status == WorkflowStatus::Cancelled {
            serde_json::Value::Null
        } else {
            let outputs: Vec<SubtaskOutput> = self
                .graph
                .subtasks()
                .map(|s| SubtaskOutput {
                    id: s.spec.id.clone(),
                    role: s.spec.role,
                    status: s.status,
                    payload: if s.status == SubtaskStatus::Succeeded {
                        s.payload.clone()
                    } else {
                        None
                    },
                })
                .collect();
            (self.definition.merge)(&self.definition.name, &outputs)
        };

        let outcome = WorkflowOutcome {
            instance_id: self.instance_id.to_string(),
            workflow_type: self.definition.name.clone(),
            status,
            payload,
            subtasks: self.graph.subtasks().map(|s| s.report()).collect(),
            error,
        };

        self.save_snapshot(status).await;
        info!(
            instance_id = %self.instance_id,
            workflow = %self.definition.name,
            status = %status,
            "Workflow instance finished"
        );
        let counts = self.graph.counts();
        self.view.send_replace(InstanceView {
            status,
            counts,
            outcome: Some(Arc::new(outcome)),
        });
    }

    /// Terminal status of a drained instance.
    fn judge(&self) -> (WorkflowStatus, Option<InstanceError>) {
        let unsuccessful: Vec<_> = self
            .graph
            .subtasks()
            .filter(|s| matches!(s.status, SubtaskStatus::Failed | SubtaskStatus::Skipped))
            .collect();
        if unsuccessful.is_empty() {
            return (WorkflowStatus::Succeeded, None);
        }
        let critical_hit = unsuccessful.iter().any(|s| s.spec.critical);
        if !critical_hit && self.definition.policy.partial_results_ok {
            return (WorkflowStatus::PartialFailure, None);
        }

        // Lowest id among failed critical subtasks, else among all failures.
        let failed = || {
            unsuccessful
                .iter()
                .filter(|s| s.status == SubtaskStatus::Failed)
        };
        let first = failed()
            .filter(|s| s.spec.critical)
            .min_by(|a, b| a.spec.id.cmp(&b.spec.id))
            .or_else(|| failed().min_by(|a, b| a.spec.id.cmp(&b.spec.id)));
        let error = first.map(|s| {
            let (kind, message) = s
                .error
                .as_ref()
                .map(|e| (e.kind, e.message.clone()))
                .unwrap_or((FailureKind::Internal, "failed".into()));
            InstanceError {
                subtask: Some(s.spec.id.clone()),
                kind,
                message,
            }
        });
        (WorkflowStatus::Failed, error)
    }

    fn publish(&self, status: WorkflowStatus) {
        let counts = self.graph.counts();
        self.view.send_replace(InstanceView {
            status,
            counts,
            outcome: None,
        });
    }

    async fn save_snapshot(&self, status: WorkflowStatus) {
        let Some(store) = &self.snapshots else {
            return;
        };
        let snapshot = InstanceSnapshot::capture(
            self.instance_id,
            &self.definition.name,
            status,
            &self.graph,
            &self.context,
            self.created_at,
        );
        if let Err(e) = store.save(&snapshot).await {
            warn!(instance_id = %self.instance_id, error = %e, "Failed to write snapshot");
        }
    }
}

/// Resolves at `deadline`, or never when there is none.
async fn until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
