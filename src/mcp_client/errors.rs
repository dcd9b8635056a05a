//! MCP client error types.

use thiserror::Error;

/// Errors that can occur while talking to tool servers.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// A remote endpoint could not be reached (or its URL is invalid).
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectFailed {
        endpoint: String,
        reason: String,
    },

    /// The capability handshake did not complete.
    #[error("server '{name}' handshake failed: {reason}")]
    HandshakeFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error, closed channel).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The remote tool reported a failure or returned unusable output.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution {
        tool: String,
        reason: String,
    },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// A tool call could not be routed to any active server.
    #[error("no server selected for '{tool}': {reason}")]
    Selection {
        tool: String,
        reason: String,
    },

    /// A request did not complete in time.
    #[error("'{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },

    /// Configuration error (missing names, bad config file).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = McpError::Timeout {
            operation: "tools/call".into(),
            timeout_ms: 500,
        };
        assert_eq!(err.to_string(), "'tools/call' timed out after 500ms");
    }
}
