use crate::cancel::CancelToken;
use crate::config::CompletionOptions;
use crate::provider::CompletionProvider;
use crate::tools::{ToolRegistry, ToolSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use vira_core::{ToolCall, ToolResult, ViraError, ViraResult};

/// Specialist role a worker is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Breaks work into sequential, executable steps.
    Planner,
    /// Investigates topics and synthesises findings.
    Researcher,
    /// Designs system architecture and interfaces.
    Architect,
    /// Implements code from specifications.
    Developer,
    /// Writes test suites and QA strategies.
    Tester,
    /// Reviews output for quality and security.
    Reviewer,
    /// Integrates results of other workflows.
    Orchestrator,
    /// Repository operations and code tooling.
    CodeSpecialist,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 8] = [
        WorkerRole::Planner,
        WorkerRole::Researcher,
        WorkerRole::Architect,
        WorkerRole::Developer,
        WorkerRole::Tester,
        WorkerRole::Reviewer,
        WorkerRole::Orchestrator,
        WorkerRole::CodeSpecialist,
    ];
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerRole::Planner => write!(f, "planner"),
            WorkerRole::Researcher => write!(f, "researcher"),
            WorkerRole::Architect => write!(f, "architect"),
            WorkerRole::Developer => write!(f, "developer"),
            WorkerRole::Tester => write!(f, "tester"),
            WorkerRole::Reviewer => write!(f, "reviewer"),
            WorkerRole::Orchestrator => write!(f, "orchestrator"),
            WorkerRole::CodeSpecialist => write!(f, "code_specialist"),
        }
    }
}

/// Static configuration of one specialist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleProfile {
    pub role: WorkerRole,
    pub system_prompt: String,
    #[serde(default)]
    pub options: CompletionOptions,
    /// Tool names this role may invoke.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

/// Capabilities injected into a worker at construction.
#[derive(Clone)]
pub struct Capabilities {
    pub provider: Arc<dyn CompletionProvider>,
    pub tools: ToolSet,
}

impl Capabilities {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            tools: ToolSet::empty(),
        }
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }
}

/// Everything a worker needs to run one attempt of a subtask.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub instance_id: String,
    pub subtask_id: String,
    pub instruction: String,
    pub tools: Vec<ToolCall>,
    /// Entries written by the subtask's transitive dependencies, sorted by key.
    pub context: Vec<(String, serde_json::Value)>,
    /// 1-based execution number.
    pub attempt: u32,
}

/// Executes subtasks for one role.
pub struct Worker {
    profile: RoleProfile,
    capabilities: Capabilities,
}

impl Worker {
    pub fn new(profile: RoleProfile, capabilities: Capabilities) -> Self {
        Self {
            profile,
            capabilities,
        }
    }

    pub fn role(&self) -> WorkerRole {
        self.profile.role
    }

    pub fn profile(&self) -> &RoleProfile {
        &self.profile
    }

    /// Run one attempt. Returns the provider text as a JSON string.
    ///
    /// `cancel` is checked before each tool call, before the provider call
    /// and after it.
    pub async fn execute(
        &self,
        request: &WorkRequest,
        cancel: &CancelToken,
    ) -> ViraResult<serde_json::Value> {
        let mut tool_results = Vec::with_capacity(request.tools.len());
        for call in &request.tools {
            if cancel.is_cancelled() {
                return Err(ViraError::Cancelled);
            }
            debug!(subtask = %request.subtask_id, tool = %call.name, "Invoking tool");
            tool_results.push(self.capabilities.tools.invoke(call).await?);
        }

        if cancel.is_cancelled() {
            return Err(ViraError::Cancelled);
        }

        let prompt = build_prompt(&self.profile.system_prompt, request, &tool_results);
        let text = self
            .capabilities
            .provider
            .complete(&prompt, &self.profile.options)
            .await?;

        if cancel.is_cancelled() {
            return Err(ViraError::Cancelled);
        }

        info!(
            instance_id = %request.instance_id,
            subtask = %request.subtask_id,
            role = %self.profile.role,
            attempt = request.attempt,
            provider = self.capabilities.provider.name(),
            chars = text.len(),
            "Worker produced output"
        );
        Ok(serde_json::Value::String(text))
    }
}

/// Lay out the prompt sent to the provider.
pub fn build_prompt(system_prompt: &str, request: &WorkRequest, tool_results: &[ToolResult]) -> String {
    let mut prompt = String::new();
    prompt.push_str(system_prompt.trim());
    prompt.push_str("\n\n## Task\n");
    prompt.push_str(&format!("Subtask: {}\n", request.subtask_id));
    prompt.push_str(request.instruction.trim());
    prompt.push('\n');

    if !request.context.is_empty() {
        prompt.push_str("\n## Context\n");
        for (key, value) in &request.context {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            prompt.push_str(&format!("### {key}\n{rendered}\n"));
        }
    }

    if !tool_results.is_empty() {
        prompt.push_str("\n## Tool results\n");
        for result in tool_results {
            prompt.push_str(&format!(
                "### {} ({})\n{}\n",
                result.tool, result.call_id, result.output
            ));
        }
    }
    prompt
}

/// Mapping from role to the worker that serves it.
#[derive(Default, Clone)]
pub struct WorkerRoster {
    workers: HashMap<WorkerRole, Arc<Worker>>,
}

impl WorkerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Staff every profile with the same provider and the tools its profile allows.
    pub fn from_profiles(
        profiles: Vec<RoleProfile>,
        provider: Arc<dyn CompletionProvider>,
        registry: &ToolRegistry,
    ) -> Self {
        let mut roster = Self::new();
        for profile in profiles {
            let tools = registry.subset(&profile.allowed_tools);
            let caps = Capabilities::new(Arc::clone(&provider)).with_tools(tools);
            roster.insert(Worker::new(profile, caps));
        }
        roster
    }

    pub fn with_worker(mut self, worker: Worker) -> Self {
        self.insert(worker);
        self
    }

    pub fn insert(&mut self, worker: Worker) {
        self.workers.insert(worker.role(), Arc::new(worker));
    }

    pub fn get(&self, role: WorkerRole) -> Option<Arc<Worker>> {
        self.workers.get(&role).cloned()
    }

    pub fn has(&self, role: WorkerRole) -> bool {
        self.workers.contains_key(&role)
    }

    pub fn roles(&self) -> Vec<WorkerRole> {
        let mut roles: Vec<_> = self.workers.keys().copied().collect();
        roles.sort();
        roles
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use vira_core::ProviderError;

    struct Recording {
        calls: AtomicUsize,
        last_prompt: Mutex<String>,
    }

    #[async_trait]
    impl CompletionProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        async fn complete(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = prompt.to_string();
            Ok("ok".into())
        }
    }

    fn recording() -> Arc<Recording> {
        Arc::new(Recording {
            calls: AtomicUsize::new(0),
            last_prompt: Default::default(),
        })
    }

    fn request() -> WorkRequest {
        WorkRequest {
            instance_id: "i".into(),
            subtask_id: "plan".into(),
            instruction: "Write the plan".into(),
            tools: vec![],
            context: vec![
                ("analysis".into(), serde_json::json!("requirements")),
                ("risks".into(), serde_json::json!({"level": "low"})),
            ],
            attempt: 1,
        }
    }

    fn profile() -> RoleProfile {
        RoleProfile {
            role: WorkerRole::Planner,
            system_prompt: "You plan.".into(),
            options: CompletionOptions::default(),
            allowed_tools: vec![],
        }
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt("You plan.", &request(), &[]);
        let task = prompt.find("## Task").unwrap();
        let ctx = prompt.find("## Context").unwrap();
        assert!(prompt.starts_with("You plan."));
        assert!(task < ctx);
        assert!(prompt.contains("Subtask: plan"));
        assert!(prompt.find("### analysis").unwrap() < prompt.find("### risks").unwrap());
        assert!(prompt.contains(r#"{"level":"low"}"#));
        assert!(!prompt.contains("## Tool results"));
    }

    #[tokio::test]
    async fn test_execute_returns_string_payload() {
        let provider = recording();
        let worker = Worker::new(profile(), Capabilities::new(provider.clone()));
        let out = worker.execute(&request(), &CancelToken::new()).await.unwrap();
        assert_eq!(out, serde_json::json!("ok"));
        assert!(provider.last_prompt.lock().unwrap().contains("Write the plan"));
    }

    #[tokio::test]
    async fn test_cancelled_before_provider_call() {
        let provider = recording();
        let worker = Worker::new(profile(), Capabilities::new(provider.clone()));
        let token = CancelToken::new();
        token.cancel();
        let err = worker.execute(&request(), &token).await.unwrap_err();
        assert!(matches!(err, ViraError::Cancelled));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ungranted_tool_fails_before_provider() {
        let provider = recording();
        let worker = Worker::new(profile(), Capabilities::new(provider.clone()));
        let mut req = request();
        req.tools = vec![ToolCall::new("c1", "shell", serde_json::Value::Null)];
        let err = worker.execute(&req, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, ViraError::Tool(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_roster_from_profiles() {
        let roster = WorkerRoster::from_profiles(vec![profile()], recording(), &ToolRegistry::new());
        assert!(roster.has(WorkerRole::Planner));
        assert!(!roster.has(WorkerRole::Tester));
        assert_eq!(roster.roles(), vec![WorkerRole::Planner]);
    }
}
