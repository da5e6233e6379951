use crate::graph::DependencyGraph;
use crate::types::SubtaskId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use vira_core::{ViraError, ViraResult};

/// One value in a [`ContextStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub written_by: SubtaskId,
}

/// Key/value state shared by the subtasks of one workflow instance.
///
/// Each instance gets its own store, so entries never leak across instances.
/// Writes are last-writer-wins per key.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    entries: Arc<RwLock<BTreeMap<String, ContextEntry>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ContextEntry>) -> Self {
        let store = Self::new();
        {
            let mut map = store.entries.write();
            for entry in entries {
                map.insert(entry.key.clone(), entry);
            }
        }
        store
    }

    pub fn write(&self, key: impl Into<String>, value: serde_json::Value, written_by: &str) {
        let key = key.into();
        self.entries.write().insert(
            key.clone(),
            ContextEntry {
                key,
                value,
                written_by: written_by.to_string(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<ContextEntry> {
        self.entries.read().get(key).cloned()
    }

    /// All entries sorted by key.
    pub fn entries(&self) -> Vec<ContextEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Entries written by any of `writers`, sorted by key.
    pub fn visible_to(&self, writers: &HashSet<SubtaskId>) -> Vec<(String, serde_json::Value)> {
        self.entries
            .read()
            .values()
            .filter(|e| writers.contains(&e.written_by))
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Reject graphs where two subtasks that may run concurrently can write the
/// same key. Every subtask implicitly writes its own id.
pub fn validate_writers(graph: &DependencyGraph) -> ViraResult<()> {
    let mut writers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for subtask in graph.subtasks() {
        let id = subtask.id();
        let mut keys: Vec<&str> = vec![id];
        keys.extend(subtask.spec.writes.iter().map(String::as_str));
        keys.sort_unstable();
        keys.dedup();
        for key in keys {
            writers.entry(key).or_default().push(id);
        }
    }

    for (key, ids) in &writers {
        for (i, first) in ids.iter().enumerate() {
            for second in &ids[i + 1..] {
                if !graph.is_ancestor(first, second) && !graph.is_ancestor(second, first) {
                    return Err(ViraError::WriteConflict {
                        key: (*key).to_string(),
                        first: (*first).to_string(),
                        second: (*second).to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}
