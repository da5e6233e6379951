use crate::tools::ToolCapability;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;
use vira_core::{ViraError, ViraResult};

const MAX_FILE_SIZE: u64 = 1024 * 1024; // 1MB
const BLOCKED_PATTERNS: [&str; 5] = [".ssh/", ".env", "credentials", "secret", ".aws/"];

/// Resolve `requested` under `root`, refusing anything that escapes it.
async fn resolve(root: &Path, requested: &str) -> ViraResult<PathBuf> {
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| ViraError::Tool(format!("cannot resolve root '{}': {e}", root.display())))?;
    let candidate = root.join(requested);
    let canonical = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|e| ViraError::Tool(format!("cannot resolve path '{requested}': {e}")))?;

    if !canonical.starts_with(&root) {
        return Err(ViraError::PolicyRejected(format!(
            "'{requested}' is outside the workspace root"
        )));
    }
    let rendered = canonical.to_string_lossy();
    if BLOCKED_PATTERNS.iter().any(|p| rendered.contains(p)) {
        return Err(ViraError::PolicyRejected(format!(
            "'{requested}' matches a blocked pattern"
        )));
    }
    Ok(canonical)
}

fn path_arg(args: &serde_json::Value) -> &str {
    args["path"].as_str().unwrap_or(".")
}

/// Read a UTF-8 file below a fixed root directory.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ToolCapability for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file relative to the workspace root. Arguments: {\"path\": string}"
    }

    async fn invoke(&self, args: serde_json::Value) -> ViraResult<serde_json::Value> {
        let requested = path_arg(&args);
        let path = resolve(&self.root, requested).await?;
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(ViraError::Tool(format!("'{requested}' is not a file")));
        }
        if metadata.len() > MAX_FILE_SIZE {
            return Err(ViraError::Tool(format!(
                "'{requested}' is {} bytes, limit is {MAX_FILE_SIZE}",
                metadata.len()
            )));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        info!(path = %path.display(), bytes = content.len(), "File read");
        Ok(serde_json::json!({ "path": requested, "content": content }))
    }
}

/// List the entries of a directory below a fixed root directory.
pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ToolCapability for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory relative to the workspace root. Arguments: {\"path\": string}"
    }

    async fn invoke(&self, args: serde_json::Value) -> ViraResult<serde_json::Value> {
        let requested = path_arg(&args);
        let path = resolve(&self.root, requested).await?;
        let mut dir = tokio::fs::read_dir(&path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(serde_json::json!({ "path": requested, "entries": entries }))
    }
}
