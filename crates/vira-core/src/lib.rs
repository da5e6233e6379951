//! Core types and error definitions for the VIRA orchestration engine.
//!
//! This crate provides the foundational types shared across all VIRA crates:
//! the unified error taxonomy and the tool-call value types exchanged between
//! workers and their tool capabilities.
//!
//! # Main types
//!
//! - [`ViraError`]: Unified error enum for all VIRA subsystems.
//! - [`ViraResult`]: Convenience alias for `Result<T, ViraError>`.
//! - [`ProviderError`]: Typed failure of a completion provider.
//! - [`ToolCall`]: A declared invocation of a tool capability.
//! - [`ToolResult`]: The result returned after executing a tool call.

/// Error taxonomy.
pub mod error;
/// Tool invocation value types.
pub mod tool;

pub use error::{ProviderError, ProviderErrorKind, ViraError, ViraResult};
pub use tool::{ToolCall, ToolResult};
