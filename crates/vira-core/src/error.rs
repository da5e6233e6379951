use serde::{Deserialize, Serialize};

/// A convenience `Result` alias using [`ViraError`].
pub type ViraResult<T> = Result<T, ViraError>;

/// Kind of failure reported by a completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The provider throttled the request.
    RateLimited,
    /// The request was malformed or rejected by the provider.
    InvalidRequest,
    /// The provider did not answer in time.
    Timeout,
    /// The provider could not be reached or is overloaded.
    Unavailable,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::RateLimited => write!(f, "rate_limited"),
            ProviderErrorKind::InvalidRequest => write!(f, "invalid_request"),
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Failure of a single `complete` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// Classification used by the retry policy.
    pub kind: ProviderErrorKind,
    /// Human-readable detail (status line, response body, transport error).
    pub message: String,
}

impl ProviderError {
    /// Creates a provider error of the given kind.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a [`ProviderErrorKind::RateLimited`] error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    /// Shorthand for a [`ProviderErrorKind::InvalidRequest`] error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    /// Shorthand for a [`ProviderErrorKind::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    /// Shorthand for a [`ProviderErrorKind::Unavailable`] error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }
}

/// Top-level error type for the VIRA engine.
///
/// Configuration variants are raised at submission time and never reach a
/// running workflow; worker variants are captured per subtask and surface to
/// callers only through the aggregated result.
#[derive(Debug, thiserror::Error)]
pub enum ViraError {
    /// No workflow type is registered under this name.
    #[error("unknown workflow type '{0}'")]
    UnknownWorkflow(String),

    /// Adding the dependency `from -> to` would close a cycle.
    #[error("dependency cycle: '{to}' cannot depend on '{from}'")]
    Cycle {
        /// The dependency being added.
        from: String,
        /// The subtask that would depend on it.
        to: String,
    },

    /// A subtask names a dependency that does not exist in its instance.
    #[error("subtask '{subtask}' depends on unknown subtask '{dependency}'")]
    UnknownDependency {
        /// The subtask declaring the dependency.
        subtask: String,
        /// The missing dependency id.
        dependency: String,
    },

    /// Two subtasks in one instance share an id.
    #[error("duplicate subtask id '{0}'")]
    DuplicateSubtask(String),

    /// Two subtasks that may run concurrently both declare the same writable key.
    #[error("context key '{key}' is writable by concurrent subtasks '{first}' and '{second}'")]
    WriteConflict {
        /// The contested context key.
        key: String,
        /// First writer (creation order).
        first: String,
        /// Second writer (creation order).
        second: String,
    },

    /// A subtask needs a role that no worker is configured for.
    #[error("no worker configured for role '{0}'")]
    UnstaffedRole(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The instance id is unknown or its result was already retrieved.
    #[error("workflow instance '{0}' not found")]
    NotFound(String),

    /// A completion provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A tool capability failed or was not granted.
    #[error("Tool error: {0}")]
    Tool(String),

    /// The subtask input cannot be processed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The request was refused by policy.
    #[error("policy rejection: {0}")]
    PolicyRejected(String),

    /// A subtask or instance exceeded its time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Work stopped because of an operator-initiated cancellation.
    #[error("cancelled")]
    Cancelled,

    /// A nested workflow instance ended in failure.
    #[error("nested workflow failed: {0}")]
    Nested(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal orchestration invariant was violated.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),
}

impl ViraError {
    /// True for errors that reject a workflow at submission time.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ViraError::UnknownWorkflow(_)
                | ViraError::Cycle { .. }
                | ViraError::UnknownDependency { .. }
                | ViraError::DuplicateSubtask(_)
                | ViraError::WriteConflict { .. }
                | ViraError::UnstaffedRole(_)
                | ViraError::Config(_)
        )
    }
}
