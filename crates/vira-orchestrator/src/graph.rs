use crate::types::{StatusCounts, Subtask, SubtaskId, SubtaskSpec, SubtaskStatus, WorkerResult};
use std::collections::{HashMap, HashSet};
use vira_core::{ViraError, ViraResult};

/// A DAG of subtasks for one workflow instance.
///
/// Edges point from a dependency to its dependents. The graph stays acyclic:
/// every mutation that would close a cycle is rejected before it changes
/// anything.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<SubtaskId, Subtask>,
    /// Subtask ids in creation order.
    order: Vec<SubtaskId>,
    dependents: HashMap<SubtaskId, Vec<SubtaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from decomposition output. Dependencies may reference
    /// subtasks declared later in `specs`.
    pub fn from_specs(specs: Vec<SubtaskSpec>) -> ViraResult<Self> {
        let mut graph = Self::new();
        let mut edges = Vec::new();
        for mut spec in specs {
            let deps = std::mem::take(&mut spec.depends_on);
            let id = spec.id.clone();
            graph.insert_node(spec)?;
            edges.extend(deps.into_iter().map(|dep| (id.clone(), dep)));
        }
        for (subtask, dep) in edges {
            graph.add_dependency(&subtask, &dep)?;
        }
        Ok(graph)
    }

    /// Add a subtask whose dependencies already exist in the graph.
    pub fn add_subtask(&mut self, spec: SubtaskSpec) -> ViraResult<()> {
        if self.nodes.contains_key(&spec.id) {
            return Err(ViraError::DuplicateSubtask(spec.id));
        }
        for dep in &spec.depends_on {
            if *dep == spec.id {
                return Err(ViraError::Cycle {
                    from: dep.clone(),
                    to: spec.id.clone(),
                });
            }
            if !self.nodes.contains_key(dep) {
                return Err(ViraError::UnknownDependency {
                    subtask: spec.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        let id = spec.id.clone();
        let deps = spec.depends_on.clone();
        self.insert_node(spec)?;
        for dep in deps {
            self.dependents.entry(dep).or_default().push(id.clone());
        }
        Ok(())
    }

    /// Declare that `subtask` depends on `dependency`.
    ///
    /// Fails with [`ViraError::Cycle`] when `dependency` is reachable from
    /// `subtask` already; the graph is left untouched on any error.
    pub fn add_dependency(&mut self, subtask: &str, dependency: &str) -> ViraResult<()> {
        if !self.nodes.contains_key(subtask) {
            return Err(ViraError::Orchestrator(format!("unknown subtask '{subtask}'")));
        }
        if !self.nodes.contains_key(dependency) {
            return Err(ViraError::UnknownDependency {
                subtask: subtask.to_string(),
                dependency: dependency.to_string(),
            });
        }
        if subtask == dependency || self.reaches(subtask, dependency) {
            return Err(ViraError::Cycle {
                from: dependency.to_string(),
                to: subtask.to_string(),
            });
        }
        let Some(node) = self.nodes.get_mut(subtask) else {
            return Ok(());
        };
        if node.spec.depends_on.iter().any(|d| d == dependency) {
            return Ok(());
        }
        node.spec.depends_on.push(dependency.to_string());
        self.dependents
            .entry(dependency.to_string())
            .or_default()
            .push(subtask.to_string());
        Ok(())
    }

    /// Rebuild a graph from persisted subtasks, keeping their statuses.
    pub fn restore(mut subtasks: Vec<Subtask>) -> ViraResult<Self> {
        subtasks.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.spec.id.cmp(&b.spec.id)));
        let mut graph = Self::new();
        for subtask in subtasks {
            let id = subtask.spec.id.clone();
            if graph.nodes.contains_key(&id) {
                return Err(ViraError::DuplicateSubtask(id));
            }
            graph.order.push(id.clone());
            graph.nodes.insert(id, subtask);
        }
        for id in &graph.order {
            let Some(node) = graph.nodes.get(id) else {
                continue;
            };
            for dep in &node.spec.depends_on {
                if !graph.nodes.contains_key(dep) {
                    return Err(ViraError::UnknownDependency {
                        subtask: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(id.clone());
            }
        }
        if graph.has_cycle() {
            return Err(ViraError::Config(
                "restored dependency graph contains a cycle".into(),
            ));
        }
        Ok(graph)
    }

    fn insert_node(&mut self, spec: SubtaskSpec) -> ViraResult<()> {
        if self.nodes.contains_key(&spec.id) {
            return Err(ViraError::DuplicateSubtask(spec.id));
        }
        let id = spec.id.clone();
        let subtask = Subtask::new(spec, self.order.len());
        self.order.push(id.clone());
        self.nodes.insert(id, subtask);
        Ok(())
    }

    /// True when `to` is reachable from `from` along dependency edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(next) = self.dependents.get(id) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        false
    }

    /// True when `ancestor` is a transitive dependency of `id`.
    pub fn is_ancestor(&self, ancestor: &str, id: &str) -> bool {
        ancestor != id && self.reaches(ancestor, id)
    }

    /// All transitive dependencies of `id`.
    pub fn ancestors(&self, id: &str) -> HashSet<SubtaskId> {
        let mut out = HashSet::new();
        let mut stack: Vec<&str> = self
            .nodes
            .get(id)
            .map(|n| n.spec.depends_on.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(dep) = stack.pop() {
            if out.insert(dep.to_string()) {
                if let Some(node) = self.nodes.get(dep) {
                    stack.extend(node.spec.depends_on.iter().map(String::as_str));
                }
            }
        }
        out
    }

    /// Pending subtasks whose dependencies have all succeeded, in creation order.
    pub fn ready_set(&self) -> Vec<SubtaskId> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|node| node.status == SubtaskStatus::Pending)
            .filter(|node| {
                node.spec.depends_on.iter().all(|dep| {
                    self.nodes
                        .get(dep)
                        .is_some_and(|d| d.status == SubtaskStatus::Succeeded)
                })
            })
            .map(|node| node.spec.id.clone())
            .collect()
    }

    /// Transition a subtask. Failing or skipping it skips every transitive
    /// dependent that has not reached a terminal status; their ids are
    /// returned in creation order.
    pub fn mark(&mut self, id: &str, status: SubtaskStatus) -> ViraResult<Vec<SubtaskId>> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| ViraError::Orchestrator(format!("unknown subtask '{id}'")))?;
        node.status = status;
        if !matches!(status, SubtaskStatus::Failed | SubtaskStatus::Skipped) {
            return Ok(Vec::new());
        }

        let mut stack: Vec<SubtaskId> = self.dependents.get(id).cloned().unwrap_or_default();
        let mut skipped = HashSet::new();
        while let Some(dep) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&dep) else {
                continue;
            };
            if node.status.is_terminal() || !skipped.insert(dep.clone()) {
                continue;
            }
            node.status = SubtaskStatus::Skipped;
            if let Some(next) = self.dependents.get(&dep) {
                stack.extend(next.iter().cloned());
            }
        }
        Ok(self
            .order
            .iter()
            .filter(|id| skipped.contains(*id))
            .cloned()
            .collect())
    }

    /// Record a worker result and transition its subtask.
    pub fn apply(&mut self, result: &WorkerResult) -> ViraResult<Vec<SubtaskId>> {
        let node = self.nodes.get_mut(&result.subtask_id).ok_or_else(|| {
            ViraError::Orchestrator(format!("result for unknown subtask '{}'", result.subtask_id))
        })?;
        node.attempts = result.attempts;
        node.nested_instance = result.nested_instance.clone();
        match &result.outcome {
            Ok(payload) => {
                node.payload = Some(payload.clone());
                node.error = None;
            }
            Err(err) => {
                node.payload = None;
                node.error = Some(err.clone());
            }
        }
        self.mark(&result.subtask_id, result.status())
    }

    /// Skip every subtask that has not started. Used when the instance stops.
    pub fn skip_pending(&mut self) -> Vec<SubtaskId> {
        let mut skipped = Vec::new();
        for id in &self.order {
            if let Some(node) = self.nodes.get_mut(id) {
                if node.status == SubtaskStatus::Pending {
                    node.status = SubtaskStatus::Skipped;
                    skipped.push(id.clone());
                }
            }
        }
        skipped
    }

    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.nodes.get(id)
    }

    /// Subtasks in creation order.
    pub fn subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// True once every subtask is Succeeded, Failed or Skipped.
    pub fn is_done(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_terminal())
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            ready: self.ready_set().len(),
            total: self.order.len(),
            ..Default::default()
        };
        for node in self.nodes.values() {
            match node.status {
                SubtaskStatus::Running => counts.running += 1,
                SubtaskStatus::Succeeded => counts.completed += 1,
                SubtaskStatus::Failed => counts.failed += 1,
                SubtaskStatus::Skipped => counts.skipped += 1,
                SubtaskStatus::Pending => {}
            }
        }
        counts
    }

    /// Full cycle check over the stored edges.
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        for id in &self.order {
            if self.dfs_cycle(id, &mut visited) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle<'a>(&'a self, id: &'a str, visited: &mut HashMap<&'a str, u8>) -> bool {
        match visited.get(id) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(node) = self.nodes.get(id) {
            for dep in &node.spec.depends_on {
                if self.dfs_cycle(dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }
}
