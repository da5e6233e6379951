//! Workflow orchestration engine.
//!
//! Decomposes a request into a dependency graph of subtasks, runs ready
//! subtasks concurrently on a bounded worker pool, and merges their outputs
//! in creation order into one result.
//!
//! # Main types
//!
//! - [`OrchestrationEngine`]: submit, status, cancel and result per instance.
//! - [`WorkflowExecutor`]: drives one instance to a terminal status.
//! - [`DependencyGraph`]: acyclic subtask graph with skip propagation.
//! - [`WorkerPool`]: concurrency ceiling, retries and timeouts.
//! - [`ContextStore`]: per-instance key/value state.
//! - [`WorkflowRegistry`]: workflow-type name to decomposition and merge.
//! - [`PoolMonitor`]: per-role metrics and the concurrency gauge.
//! - [`SnapshotStore`]: optional instance snapshots.

/// Engine tunables.
pub mod config;
/// Per-instance context store and write-conflict validation.
pub mod context;
/// Master coordinator and instance registry.
pub mod engine;
/// Per-instance scheduling loop.
pub mod executor;
/// Subtask dependency graph.
pub mod graph;
/// Worker pool metrics.
pub mod monitor;
/// Bounded worker pool.
pub mod pool;
/// Default role profiles.
pub mod profiles;
/// Workflow type registry and the default merge.
pub mod registry;
/// Instance snapshots.
pub mod snapshot;
/// Subtask, instance and outcome types.
pub mod types;
/// Built-in workflow types.
pub mod workflows;

pub use config::EngineConfig;
pub use context::{validate_writers, ContextEntry, ContextStore};
pub use engine::OrchestrationEngine;
pub use executor::{InstanceView, WorkflowExecutor};
pub use graph::DependencyGraph;
pub use monitor::{PoolMonitor, RoleMetrics};
pub use pool::{Job, JobKind, NestedOutcome, NestedRunner, PoolSession, WorkerPool};
pub use profiles::default_profiles;
pub use registry::{
    default_merge, DecomposeFn, MergeFn, SubtaskOutput, WorkflowDefinition, WorkflowPolicy,
    WorkflowRegistry,
};
pub use snapshot::{FileSnapshotStore, InstanceSnapshot, SnapshotStore};
pub use types::{
    FailureKind, InstanceError, StatusCounts, StatusSnapshot, Subtask, SubtaskError, SubtaskId,
    SubtaskInput, SubtaskReport, SubtaskSpec, SubtaskStatus, WorkerResult, WorkflowOutcome,
    WorkflowStatus,
};
pub use workflows::register_builtin_workflows;
