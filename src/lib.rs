//! toolmesh — a terminal chat agent that lets a local model call tools on
//! several MCP servers at once.
//!
//! Layers, bottom-up:
//! - `mcp_client`: Transports, sessions and the server registry
//! - `inference`: The model backend seam and its Ollama implementation
//! - `agent_core`: Tool routing and the bounded conversation loop
//! - `config`: Server lists and agent settings
//! - `logging`: File-based tracing setup

pub mod agent_core;
pub mod config;
pub mod inference;
pub mod logging;
pub mod mcp_client;

#[cfg(test)]
mod test_support;

pub use agent_core::{AgentClient, AgentError, ChatResponse, ConversationConfig, RoutingPolicy};
pub use config::{AgentSettings, ServersConfig};
pub use inference::{ModelBackend, OllamaClient};
pub use mcp_client::{McpError, ServerRegistry};
