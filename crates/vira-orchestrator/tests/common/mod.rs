#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vira_agent::{CompletionOptions, CompletionProvider, RetryPolicy, ToolRegistry, WorkerRoster};
use vira_core::{ProviderError, ProviderErrorKind};
use vira_orchestrator::{
    default_profiles, EngineConfig, OrchestrationEngine, SubtaskSpec, WorkflowDefinition,
    WorkflowRegistry, WorkflowStatus,
};

// ---------------------------------------------------------------------------
// Scripted provider: behaviour keyed by the subtask id found in the prompt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Script {
    delay: Duration,
    /// Fail this many calls before answering; `u32::MAX` fails forever.
    failures: u32,
    kind: Option<ProviderErrorKind>,
}

#[derive(Default)]
pub struct ScriptedProvider {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, subtask: &str, delay: Duration) -> Self {
        self.scripts.entry(subtask.to_string()).or_default().delay = delay;
        self
    }

    pub fn failing(mut self, subtask: &str, kind: ProviderErrorKind, times: u32) -> Self {
        let script = self.scripts.entry(subtask.to_string()).or_default();
        script.kind = Some(kind);
        script.failures = times;
        self
    }

    pub fn always_failing(self, subtask: &str, kind: ProviderErrorKind) -> Self {
        self.failing(subtask, kind, u32::MAX)
    }

    pub fn calls(&self, subtask: &str) -> u32 {
        self.calls.lock().get(subtask).copied().unwrap_or(0)
    }

    /// Every prompt sent for `subtask`, oldest first.
    pub fn prompts_for(&self, subtask: &str) -> Vec<String> {
        self.prompts
            .lock()
            .iter()
            .filter(|(id, _)| id == subtask)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

fn subtask_of(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("Subtask: "))
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let id = subtask_of(prompt);
        let call = {
            let mut calls = self.calls.lock();
            let n = calls.entry(id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        self.prompts.lock().push((id.clone(), prompt.to_string()));

        let script = self.scripts.get(&id).cloned().unwrap_or_default();
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        match script.kind {
            Some(kind) if call <= script.failures => {
                Err(ProviderError::new(kind, format!("injected failure for {id}")))
            }
            _ => Ok(format!("output of {id}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine fixtures
// ---------------------------------------------------------------------------

/// Small timeouts and millisecond backoff.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        max_concurrency: 4,
        retry: RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 5,
            backoff_factor: 2,
            backoff_max_ms: 20,
        },
        subtask_timeout_ms: 2_000,
        cancel_grace_ms: 100,
        ..EngineConfig::default()
    }
}

pub fn roster(provider: Arc<ScriptedProvider>) -> WorkerRoster {
    WorkerRoster::from_profiles(default_profiles(), provider, &ToolRegistry::new())
}

pub fn engine(
    provider: Arc<ScriptedProvider>,
    registry: WorkflowRegistry,
    config: EngineConfig,
) -> OrchestrationEngine {
    OrchestrationEngine::new(registry, roster(provider), config).unwrap()
}

/// A workflow type that always decomposes into `specs`.
pub fn fixed(name: &str, specs: Vec<SubtaskSpec>) -> WorkflowDefinition {
    WorkflowDefinition::new(name, "fixed test workflow", move |_| Ok(specs.clone()))
}

pub fn registry_with(definitions: Vec<WorkflowDefinition>) -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::with_builtins();
    for definition in definitions {
        registry.register(definition);
    }
    registry
}

/// Poll until the instance reaches a terminal status without fetching its result.
pub async fn wait_terminal(engine: &OrchestrationEngine, id: uuid::Uuid) -> WorkflowStatus {
    for _ in 0..500 {
        let status = engine.status(id).await.unwrap().status;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("instance {id} did not finish");
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
