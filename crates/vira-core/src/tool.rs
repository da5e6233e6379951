use serde::{Deserialize, Serialize};

/// A declared request to invoke a specific tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier of this call, unique within a subtask.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// Name of the tool that produced it.
    pub tool: String,
    /// The output produced by the tool.
    pub output: serde_json::Value,
}

impl ToolResult {
    /// Creates a tool result for the given call.
    pub fn for_call(call: &ToolCall, output: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            output,
        }
    }
}
