use crate::context::{ContextEntry, ContextStore};
use crate::graph::DependencyGraph;
use crate::types::{Subtask, WorkflowStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;
use vira_core::{ViraError, ViraResult};

/// Dependency graph, context and per-subtask status of one instance,
/// serialised as a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub instance_id: Uuid,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    /// Subtasks in creation order.
    pub subtasks: Vec<Subtask>,
    pub context: Vec<ContextEntry>,
    pub created_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

impl InstanceSnapshot {
    pub fn capture(
        instance_id: Uuid,
        workflow_type: &str,
        status: WorkflowStatus,
        graph: &DependencyGraph,
        context: &ContextStore,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id,
            workflow_type: workflow_type.to_string(),
            status,
            subtasks: graph.subtasks().cloned().collect(),
            context: context.entries(),
            created_at,
            taken_at: Utc::now(),
        }
    }

    /// Rebuild the dependency graph, rejecting cyclic or dangling data.
    pub fn restore_graph(&self) -> ViraResult<DependencyGraph> {
        DependencyGraph::restore(self.subtasks.clone())
    }

    pub fn restore_context(&self) -> ContextStore {
        ContextStore::from_entries(self.context.clone())
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot of `snapshot.instance_id` atomically.
    async fn save(&self, snapshot: &InstanceSnapshot) -> ViraResult<()>;
    async fn load(&self, id: Uuid) -> ViraResult<Option<InstanceSnapshot>>;
    async fn remove(&self, id: Uuid) -> ViraResult<()>;
    async fn list(&self) -> ViraResult<Vec<Uuid>>;
}

/// One `<instance id>.json` file per instance.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub async fn new(dir: PathBuf) -> ViraResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &InstanceSnapshot) -> ViraResult<()> {
        let path = self.snapshot_path(snapshot.instance_id);
        let tmp = self.dir.join(format!("{}.json.tmp", snapshot.instance_id));
        let json = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ViraResult<Option<InstanceSnapshot>> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let snapshot: InstanceSnapshot = serde_json::from_str(&data)
            .map_err(|e| ViraError::Orchestrator(format!("Failed to parse snapshot: {e}")))?;
        Ok(Some(snapshot))
    }

    async fn remove(&self, id: Uuid) -> ViraResult<()> {
        let path = self.snapshot_path(id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> ViraResult<Vec<Uuid>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
