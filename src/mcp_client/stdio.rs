//! JSON-RPC over stdio transport.
//!
//! Spawns a tool server as a child process and talks to it with
//! line-delimited JSON (one JSON object per line) over stdin/stdout.
//! The child's lifetime is scoped to the transport: `close()` ends its
//! input, waits for it to exit, and kills it if it does not.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::transport::{next_request_id, Transport};
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, StdioServerSpec};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the child to exit after its stdin is closed before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── LineChannel ─────────────────────────────────────────────────────────────

/// Newline-delimited JSON-RPC framing over any async byte pipe.
pub struct LineChannel<R, W> {
    server_name: String,
    reader: BufReader<R>,
    /// `None` once the write side has been shut (end-of-input sent).
    writer: Option<W>,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(server_name: &str, reader: R, writer: W) -> Self {
        Self {
            server_name: server_name.to_string(),
            reader: BufReader::new(reader),
            writer: Some(writer),
        }
    }

    fn transport_err(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// Serialize `message` and write it as a single line.
    async fn send_line<T: Serialize>(&mut self, message: &T) -> Result<(), McpError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| self.transport_err(format!("failed to serialize message: {e}")))?;
        json.push('\n');

        let server = self.server_name.clone();
        let writer = self.writer.as_mut().ok_or_else(|| McpError::TransportError {
            server: server.clone(),
            reason: "channel closed".into(),
        })?;

        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: server.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            server,
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    /// Write a request and read lines until the response with the same id.
    ///
    /// Lines that are not JSON-RPC responses (server notifications, stray log
    /// output) and responses to abandoned earlier requests are skipped.
    pub async fn round_trip(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        self.send_line(request).await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_err(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_err(
                    "server stdout closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == request.id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        stale_id = resp.id,
                        expected_id = request.id,
                        "skipping response for another request"
                    );
                }
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = trimmed, "skipping non-response line");
                }
            }
        }
    }

    /// Write a notification line.
    pub async fn notify(&mut self, notification: &JsonRpcNotification) -> Result<(), McpError> {
        self.send_line(notification).await
    }

    /// Shut the write side, signalling end-of-input to the peer.
    pub async fn shutdown_writer(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}

// ─── StdioTransport ──────────────────────────────────────────────────────────

/// Transport to a tool server running as a child process.
///
/// Calls are serialized: one request/response round trip holds the channel
/// at a time.
pub struct StdioTransport {
    server_name: String,
    channel: Mutex<LineChannel<ChildStdout, ChildStdin>>,
    process: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Spawn the server process described by `spec` and wire its stdio.
    pub fn spawn(name: &str, spec: &StdioServerSpec) -> Result<Self, McpError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        if let Some(dir) = spec.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{}: {e}", spec.command),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;

        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(name.to_string(), stderr);
        }

        tracing::info!(
            server = name,
            command = %spec.command,
            pid = ?child.id(),
            "spawned stdio tool server"
        );

        Ok(Self {
            server_name: name.to_string(),
            channel: Mutex::new(LineChannel::new(name, stdout, stdin)),
            process: Mutex::new(Some(child)),
        })
    }
}

/// Relay the child's stderr into the log, one line per event.
fn forward_stderr(server: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, stderr = %line, "server stderr");
        }
    });
}

#[async_trait]
impl Transport for StdioTransport {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let request = JsonRpcRequest::new(next_request_id(), method, params);
        let mut channel = self.channel.lock().await;
        channel.round_trip(&request).await
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let mut channel = self.channel.lock().await;
        channel.notify(&notification).await
    }

    async fn close(&self) -> Result<(), McpError> {
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.channel.lock()).await {
            Ok(mut channel) => channel.shutdown_writer().await,
            Err(_) => tracing::warn!(
                server = %self.server_name,
                "channel still busy, skipping end-of-input"
            ),
        }

        let Some(mut child) = self.process.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server_name, %status, "server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to wait for server exit: {e}"),
            }),
            Err(_) => {
                tracing::warn!(
                    server = %self.server_name,
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "server did not exit after end-of-input, killing"
                );
                child.kill().await.map_err(|e| McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("failed to kill server: {e}"),
                })
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
