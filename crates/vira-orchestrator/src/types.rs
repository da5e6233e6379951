use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vira_agent::WorkerRole;
use vira_core::{ProviderErrorKind, ToolCall, ViraError};

/// Subtask ids are chosen by the decomposition strategy and unique per instance.
pub type SubtaskId = String;

/// What a subtask asks its executor to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubtaskInput {
    /// Run a worker with this instruction.
    Prompt {
        instruction: String,
        #[serde(default)]
        tools: Vec<ToolCall>,
    },
    /// Run another workflow instance and wait for its result.
    Nested {
        workflow_type: String,
        #[serde(default)]
        request: serde_json::Value,
    },
}

/// A subtask as produced by a decomposition strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub id: SubtaskId,
    pub role: WorkerRole,
    pub input: SubtaskInput,
    #[serde(default)]
    pub depends_on: Vec<SubtaskId>,
    #[serde(default)]
    pub critical: bool,
    /// Context keys written on success, in addition to the subtask id.
    #[serde(default)]
    pub writes: Vec<String>,
    /// Overrides the workflow's subtask timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl SubtaskSpec {
    pub fn prompt(id: impl Into<String>, role: WorkerRole, instruction: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            input: SubtaskInput::Prompt {
                instruction: instruction.into(),
                tools: Vec::new(),
            },
            depends_on: Vec::new(),
            critical: false,
            writes: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn nested(
        id: impl Into<String>,
        workflow_type: impl Into<String>,
        request: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            role: WorkerRole::Orchestrator,
            input: SubtaskInput::Nested {
                workflow_type: workflow_type.into(),
                request,
            },
            depends_on: Vec::new(),
            critical: false,
            writes: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn writes<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Attach declared tool calls. No effect on nested subtasks.
    pub fn with_tools(mut self, calls: Vec<ToolCall>) -> Self {
        if let SubtaskInput::Prompt { tools, .. } = &mut self.input {
            *tools = calls;
        }
        self
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.input, SubtaskInput::Nested { .. })
    }
}

/// Lifecycle of one subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Unreachable because an ancestor failed or the instance stopped.
    Skipped,
}

impl SubtaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubtaskStatus::Succeeded | SubtaskStatus::Failed | SubtaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtaskStatus::Pending => write!(f, "pending"),
            SubtaskStatus::Running => write!(f, "running"),
            SubtaskStatus::Succeeded => write!(f, "succeeded"),
            SubtaskStatus::Failed => write!(f, "failed"),
            SubtaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Classification of a failed worker outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Unavailable,
    InvalidInput,
    PolicyRejected,
    Tool,
    Nested,
    Internal,
    Cancelled,
}

impl FailureKind {
    /// Transient failures are requeued while the retry budget lasts.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::RateLimited | FailureKind::Unavailable
        )
    }

    pub fn from_error(err: &ViraError) -> Self {
        match err {
            ViraError::Provider(p) => match p.kind {
                ProviderErrorKind::RateLimited => FailureKind::RateLimited,
                ProviderErrorKind::Timeout => FailureKind::Timeout,
                ProviderErrorKind::Unavailable => FailureKind::Unavailable,
                ProviderErrorKind::InvalidRequest => FailureKind::InvalidInput,
            },
            ViraError::Timeout(_) => FailureKind::Timeout,
            ViraError::Tool(_) => FailureKind::Tool,
            ViraError::InvalidInput(_) => FailureKind::InvalidInput,
            ViraError::PolicyRejected(_) => FailureKind::PolicyRejected,
            ViraError::Cancelled => FailureKind::Cancelled,
            ViraError::Nested(_) => FailureKind::Nested,
            _ => FailureKind::Internal,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Unavailable => "unavailable",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::PolicyRejected => "policy_rejected",
            FailureKind::Tool => "tool",
            FailureKind::Nested => "nested",
            FailureKind::Internal => "internal",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Typed failure recorded on a subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl SubtaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled")
    }
}

impl From<&ViraError> for SubtaskError {
    fn from(err: &ViraError) -> Self {
        Self::new(FailureKind::from_error(err), err.to_string())
    }
}

impl std::fmt::Display for SubtaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A subtask tracked by the dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    #[serde(flatten)]
    pub spec: SubtaskSpec,
    /// Creation order within the instance.
    pub seq: usize,
    pub status: SubtaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<SubtaskError>,
    /// Id of the child instance run for a nested subtask.
    #[serde(default)]
    pub nested_instance: Option<String>,
}

impl Subtask {
    pub fn new(spec: SubtaskSpec, seq: usize) -> Self {
        Self {
            spec,
            seq,
            status: SubtaskStatus::Pending,
            attempts: 0,
            payload: None,
            error: None,
            nested_instance: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn report(&self) -> SubtaskReport {
        SubtaskReport {
            id: self.spec.id.clone(),
            role: self.spec.role,
            status: self.status,
            critical: self.spec.critical,
            attempts: self.attempts,
            error: self.error.clone(),
            nested_instance: self.nested_instance.clone(),
        }
    }
}

/// Final outcome of one subtask, consumed once by its executor.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub subtask_id: SubtaskId,
    pub outcome: Result<serde_json::Value, SubtaskError>,
    /// Executions made, the first run included.
    pub attempts: u32,
    pub duration: Duration,
    pub nested_instance: Option<String>,
}

impl WorkerResult {
    pub fn status(&self) -> SubtaskStatus {
        if self.outcome.is_ok() {
            SubtaskStatus::Succeeded
        } else {
            SubtaskStatus::Failed
        }
    }
}

/// Lifecycle of one workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    PartialFailure,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkflowStatus::Pending | WorkflowStatus::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::PartialFailure => write!(f, "partial_failure"),
            WorkflowStatus::Succeeded => write!(f, "succeeded"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-status subtask counts of one instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub instance_id: String,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub ready_count: usize,
    pub running_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub total: usize,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Diagnostic view of one subtask in an aggregated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskReport {
    pub id: SubtaskId,
    pub role: WorkerRole,
    pub status: SubtaskStatus,
    pub critical: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SubtaskError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested_instance: Option<String>,
}

/// The error surfaced for a failed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceError {
    /// `None` when the instance itself failed, e.g. its deadline passed.
    pub subtask: Option<SubtaskId>,
    pub kind: FailureKind,
    pub message: String,
}

/// Terminal result of a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub instance_id: String,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub payload: serde_json::Value,
    /// Every subtask in creation order.
    pub subtasks: Vec<SubtaskReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InstanceError>,
}
