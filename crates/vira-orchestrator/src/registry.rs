use crate::types::{SubtaskId, SubtaskSpec, SubtaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vira_agent::WorkerRole;
use vira_core::ViraResult;

/// Expands a request into subtasks.
pub type DecomposeFn = Arc<dyn Fn(&serde_json::Value) -> ViraResult<Vec<SubtaskSpec>> + Send + Sync>;

/// Builds the aggregated payload from subtask outputs in creation order.
pub type MergeFn = Arc<dyn Fn(&str, &[SubtaskOutput]) -> serde_json::Value + Send + Sync>;

/// One subtask as seen by a merge function.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskOutput {
    pub id: SubtaskId,
    pub role: WorkerRole,
    pub status: SubtaskStatus,
    /// Present only for succeeded subtasks.
    pub payload: Option<serde_json::Value>,
}

/// Execution policy of a workflow type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowPolicy {
    /// Report `PartialFailure` instead of `Failed` when only non-critical
    /// subtasks fail.
    pub partial_results_ok: bool,
    /// Overrides the engine's per-attempt subtask timeout.
    pub subtask_timeout: Option<Duration>,
    /// Overrides the engine's retry budget.
    pub max_retries: Option<u32>,
    /// Wall-clock limit for the whole instance.
    pub deadline: Option<Duration>,
}

/// A registered workflow type.
pub struct WorkflowDefinition {
    pub name: String,
    pub description: String,
    pub decompose: DecomposeFn,
    pub merge: MergeFn,
    pub policy: WorkflowPolicy,
}

impl WorkflowDefinition {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, decompose: F) -> Self
    where
        F: Fn(&serde_json::Value) -> ViraResult<Vec<SubtaskSpec>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            decompose: Arc::new(decompose),
            merge: Arc::new(default_merge),
            policy: WorkflowPolicy::default(),
        }
    }

    pub fn with_merge<F>(mut self, merge: F) -> Self
    where
        F: Fn(&str, &[SubtaskOutput]) -> serde_json::Value + Send + Sync + 'static,
    {
        self.merge = Arc::new(merge);
        self
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn partial_results_ok(mut self) -> Self {
        self.policy.partial_results_ok = true;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.policy.deadline = Some(deadline);
        self
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Conservative aggregate: every subtask's status in creation order, plus
/// the payloads of the subtasks that succeeded.
pub fn default_merge(workflow: &str, outputs: &[SubtaskOutput]) -> serde_json::Value {
    let statuses: Vec<serde_json::Value> = outputs
        .iter()
        .map(|o| serde_json::json!({ "id": o.id, "role": o.role, "status": o.status }))
        .collect();
    let payloads: Vec<serde_json::Value> = outputs
        .iter()
        .filter(|o| o.status == SubtaskStatus::Succeeded)
        .filter_map(|o| {
            o.payload
                .as_ref()
                .map(|p| serde_json::json!({ "id": o.id, "payload": p }))
        })
        .collect();
    serde_json::json!({
        "workflow": workflow,
        "status_by_subtask": statuses,
        "outputs": payloads,
    })
}

/// Mapping from workflow-type name to its definition, populated at startup.
#[derive(Default)]
pub struct WorkflowRegistry {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in workflow types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::workflows::register_builtin_workflows(&mut registry);
        registry
    }

    pub fn register(&mut self, definition: WorkflowDefinition) {
        info!(workflow = %definition.name, "Registered workflow type");
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    /// `(name, description)` pairs sorted by name.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .definitions
            .values()
            .map(|d| (d.name.clone(), d.description.clone()))
            .collect();
        out.sort();
        out
    }
}
