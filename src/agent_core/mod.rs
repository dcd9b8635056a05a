//! Agent Core — the conversation layer of toolmesh.
//!
//! Submodules:
//! - `client`: The `AgentClient` facade (servers + one conversation)
//! - `conversation`: The bounded turn loop over a model backend
//! - `tool_invoker`: Routes tool calls to servers and renders their results
//! - `errors`: Agent-level error types

pub mod client;
pub mod conversation;
pub mod errors;
pub mod tool_invoker;

// Re-exports for convenience
pub use client::AgentClient;
pub use conversation::{ChatResponse, ConversationConfig, ConversationLoop};
pub use errors::AgentError;
pub use tool_invoker::{RoutingPolicy, ToolInvoker, ToolOutcome};
