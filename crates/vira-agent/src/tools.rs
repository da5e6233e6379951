use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use vira_core::{ToolCall, ToolResult, ViraError, ViraResult};

/// An optional capability a worker may invoke before calling its provider.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn invoke(&self, args: serde_json::Value) -> ViraResult<serde_json::Value>;
}

/// Central registry for all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolCapability>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn ToolCapability>) {
        let name = tool.name().to_string();
        info!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolCapability>> {
        self.tools.get(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Build the set granted to one worker. Unknown names are ignored.
    pub fn subset(&self, names: &[String]) -> ToolSet {
        let mut granted = BTreeMap::new();
        for name in names {
            match self.tools.get(name) {
                Some(tool) => {
                    granted.insert(name.clone(), Arc::clone(tool));
                }
                None => warn!(tool = %name, "Requested tool is not registered"),
            }
        }
        ToolSet { tools: granted }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The tools granted to one worker.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn ToolCapability>>,
}

impl ToolSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a declared call. A tool outside this set is a terminal error.
    pub async fn invoke(&self, call: &ToolCall) -> ViraResult<ToolResult> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ViraError::Tool(format!("tool '{}' not granted", call.name)))?;
        let output = tool.invoke(call.arguments.clone()).await?;
        Ok(ToolResult::for_call(call, output))
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.names()).finish()
    }
}
