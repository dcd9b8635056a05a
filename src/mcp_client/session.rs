//! A connected tool server: transport, handshake, and its fixed tool list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};

use super::errors::McpError;
use super::http::HttpTransport;
use super::stdio::StdioTransport;
use super::transport::Transport;
use super::types::{ServerInfo, ToolDescriptor, TransportKind, TransportSpec};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
///
/// Generous because some servers import large frameworks at startup.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// ─── ServerSession ───────────────────────────────────────────────────────────

/// One connected tool server.
///
/// The tool list is fetched once, right after the handshake, and never
/// re-synced.
pub struct ServerSession {
    name: String,
    kind: TransportKind,
    transport: Box<dyn Transport>,
    tools: Vec<ToolDescriptor>,
    server_info: Option<ServerInfo>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl ServerSession {
    /// Build the transport for `spec` and establish a session over it.
    pub async fn connect(name: &str, spec: &TransportSpec) -> Result<Self, McpError> {
        let transport: Box<dyn Transport> = match spec {
            TransportSpec::Stdio(stdio) => Box::new(StdioTransport::spawn(name, stdio)?),
            TransportSpec::Http(http) => Box::new(HttpTransport::connect(name, http)?),
        };

        Self::establish(name, spec.kind(), transport).await
    }

    /// Handshake over an already-open transport and fetch its tools.
    ///
    /// On failure the transport is closed before the error is returned.
    pub async fn establish(
        name: &str,
        kind: TransportKind,
        transport: Box<dyn Transport>,
    ) -> Result<Self, McpError> {
        let setup = async {
            let init = match tokio::time::timeout(HANDSHAKE_TIMEOUT, transport.initialize()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(McpError::HandshakeFailed {
                        name: name.to_string(),
                        reason: format!(
                            "initialization timed out after {}s",
                            HANDSHAKE_TIMEOUT.as_secs()
                        ),
                    })
                }
            };
            let remote_tools = transport.list_tools().await?;
            Ok::<_, McpError>((init, remote_tools))
        };

        let (init, remote_tools) = match setup.await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(server = name, error = %e, "session setup failed, closing transport");
                if let Err(close_err) = transport.close().await {
                    tracing::debug!(server = name, error = %close_err, "close after failed setup");
                }
                return Err(e);
            }
        };

        let tools: Vec<ToolDescriptor> = remote_tools
            .into_iter()
            .map(|tool| ToolDescriptor::qualify(name, tool))
            .collect();

        tracing::info!(
            server = name,
            transport = ?kind,
            tool_count = tools.len(),
            tools = ?tools.iter().map(|t| t.qualified_name.as_str()).collect::<Vec<_>>(),
            "connected to tool server"
        );

        Ok(Self {
            name: name.to_string(),
            kind,
            transport,
            tools,
            server_info: init.server_info,
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Namespaced tools declared by this server at connect time.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Look up one of this session's tools by its server-local name.
    pub fn tool(&self, local_name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.local_name == local_name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Call a tool by its server-local name, bounded by `timeout`.
    pub async fn call_tool(
        &self,
        local_name: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> Result<String, McpError> {
        if self.is_closed() {
            return Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "session closed".into(),
            });
        }

        tokio::time::timeout(timeout, self.transport.call_tool(local_name, arguments))
            .await
            .map_err(|_| McpError::Timeout {
                operation: format!("{}/{local_name}", self.name),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    /// Release the transport. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(server = %self.name, "closing tool server session");
        self.transport.close().await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
