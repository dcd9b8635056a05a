//! MCP Client — JSON-RPC 2.0 over stdio or streamable HTTP.
//!
//! This module handles:
//! - Spawning subprocess servers and talking to HTTP endpoints
//! - The capability handshake and one-time tool listing per server
//! - The registry of connected servers and the active subset
//! - The namespaced tool catalog handed to the model
//!
//! Tool routing and result formatting live one layer up, in
//! `agent_core::tool_invoker`.

pub mod catalog;
pub mod errors;
pub mod http;
pub mod registry;
pub mod session;
pub mod stdio;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use catalog::ToolCatalog;
pub use errors::McpError;
pub use registry::ServerRegistry;
pub use session::ServerSession;
pub use transport::Transport;
pub use types::{HttpServerSpec, StdioServerSpec, ToolDescriptor, TransportKind, TransportSpec};
