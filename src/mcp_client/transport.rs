//! Transport abstraction over one tool server.
//!
//! A transport only has to move JSON-RPC messages (`request`, `notify`) and
//! release its resources (`close`). The MCP operations themselves
//! (`initialize`, `list_tools`, `call_tool`) are provided on top of those
//! primitives, so the stdio and streamable-HTTP variants share one protocol
//! implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::errors::McpError;
use super::types::{
    error_codes, CallToolResult, InitializeResult, JsonRpcResponse, ListToolsResult, RemoteTool,
    PROTOCOL_VERSION,
};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// A connected, bidirectional request/response channel to exactly one tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name of the server this transport talks to (for error context).
    fn server_name(&self) -> &str;

    /// Send a JSON-RPC request and wait for the matching response.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, McpError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Release the underlying process or network resources.
    async fn close(&self) -> Result<(), McpError>;

    /// Perform the capability handshake: `initialize` followed by the
    /// `notifications/initialized` notification. Single attempt.
    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let handshake_err = |reason: String| McpError::HandshakeFailed {
            name: self.server_name().to_string(),
            reason,
        };
        // Connect and spawn failures keep their own variant.
        let into_handshake = |e: McpError| match e {
            McpError::ServerError { code, message, .. } => {
                handshake_err(format!("[{code}] {message}"))
            }
            McpError::TransportError { reason, .. } => handshake_err(reason),
            other => other,
        };

        let response = self
            .request("initialize", Some(params))
            .await
            .map_err(into_handshake)?;
        let result = extract_result(response).map_err(into_handshake)?;

        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| handshake_err(format!("failed to parse initialize response: {e}")))?;

        self.notify("notifications/initialized", None)
            .await
            .map_err(into_handshake)?;

        tracing::debug!(
            server = %self.server_name(),
            protocol = ?init.protocol_version,
            remote = ?init.server_info.as_ref().and_then(|i| i.name.as_deref()),
            "handshake complete"
        );

        Ok(init)
    }

    /// Fetch the server's declared tools, following pagination cursors.
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let response = self.request("tools/list", params).await?;
            let result = extract_result(response)?;

            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::TransportError {
                    server: self.server_name().to_string(),
                    reason: format!("failed to parse tools/list response: {e}"),
                })?;

            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Call a tool by its server-local name and return its text output.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String, McpError> {
        let params = json!({
            "name": name,
            "arguments": Value::Object(arguments),
        });

        let response = self.request("tools/call", Some(params)).await?;
        let result = extract_result(response)?;

        let call: CallToolResult =
            serde_json::from_value(result).map_err(|e| McpError::ToolExecution {
                tool: name.to_string(),
                reason: format!("malformed tools/call result: {e}"),
            })?;

        let text = call.text();
        if call.is_error {
            return Err(McpError::ToolExecution {
                tool: name.to_string(),
                reason: text.unwrap_or_else(|| "tool reported an error".into()),
            });
        }

        text.ok_or_else(|| McpError::ToolExecution {
            tool: name.to_string(),
            reason: "result contained no text content".into(),
        })
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::JsonRpcError;
    use crate::test_support::StubTransport;

    #[test]
    fn test_next_request_id_is_monotonic() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert!(id2 > id1);
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        match extract_result(resp).unwrap_err() {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: None,
            error: None,
        };
        assert!(matches!(
            extract_result(resp).unwrap_err(),
            McpError::ServerError { .. }
        ));
    }

    #[tokio::test]
    async fn test_initialize_sends_initialized_notification() {
        let stub = StubTransport::new("a").with_tool("ping", "pong");
        let init = stub.initialize().await.unwrap();
        assert_eq!(init.protocol_version.as_deref(), Some(PROTOCOL_VERSION));
        assert_eq!(stub.notifications(), vec!["notifications/initialized"]);
    }

    #[tokio::test]
    async fn test_initialize_rejected_is_handshake_error() {
        let stub = StubTransport::new("a").rejecting_handshake();
        let err = stub.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::HandshakeFailed { ref name, .. } if name == "a"));
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let stub = StubTransport::new("a")
            .with_tool("one", "1")
            .with_tool("two", "2")
            .with_tool("three", "3")
            .with_page_size(2);
        let tools = stub.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_call_tool_returns_text() {
        let stub = StubTransport::new("a").with_tool("ping", "pong");
        let text = stub.call_tool("ping", Map::new()).await.unwrap();
        assert_eq!(text, "pong");
    }

    #[tokio::test]
    async fn test_call_tool_is_error_flag() {
        let stub = StubTransport::new("a").with_failing_tool("explode", "kaboom");
        let err = stub.call_tool("explode", Map::new()).await.unwrap_err();
        match err {
            McpError::ToolExecution { tool, reason } => {
                assert_eq!(tool, "explode");
                assert_eq!(reason, "kaboom");
            }
            other => panic!("expected ToolExecution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_unknown_tool_is_server_error() {
        let stub = StubTransport::new("a");
        let err = stub.call_tool("missing", Map::new()).await.unwrap_err();
        assert!(matches!(err, McpError::ServerError { .. }));
    }
}
