//! Workers and the capabilities injected into them.
//!
//! A [`Worker`] is bound to one specialist [`WorkerRole`] and executes one
//! subtask at a time using an injected [`CompletionProvider`] plus the tool
//! capabilities granted to its role.
//!
//! # Main types
//!
//! - [`CompletionProvider`]: `complete(prompt, options)` capability.
//! - [`AnthropicProvider`] / [`OpenAiProvider`]: HTTP implementations.
//! - [`ToolCapability`] / [`ToolRegistry`] / [`ToolSet`]: optional tools.
//! - [`ReadFileTool`] / [`ListDirectoryTool`]: workspace-rooted filesystem tools.
//! - [`Worker`] / [`WorkerRoster`]: role-bound executors.
//! - [`CancelToken`]: cooperative cancellation flag.
//! - [`RetryPolicy`]: retry budget and exponential backoff.

pub mod backends;
pub mod cancel;
pub mod config;
pub mod fs_tools;
pub mod provider;
pub mod retry;
pub mod tools;
pub mod worker;

pub use backends::anthropic::AnthropicProvider;
pub use backends::openai::OpenAiProvider;
pub use cancel::CancelToken;
pub use config::{CompletionOptions, ModelConfig, ModelPreferences, ProviderKind};
pub use fs_tools::{ListDirectoryTool, ReadFileTool};
pub use provider::{provider_from_config, CompletionProvider};
pub use retry::RetryPolicy;
pub use tools::{ToolCapability, ToolRegistry, ToolSet};
pub use worker::{Capabilities, RoleProfile, WorkRequest, Worker, WorkerRole, WorkerRoster};
