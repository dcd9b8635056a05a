//! Streamable-HTTP transport.
//!
//! Every client message is POSTed to the server URL. The server answers a
//! request either with a plain `application/json` body or with a
//! `text/event-stream` whose events carry JSON-RPC messages; the response
//! with the matching id may be preceded by server notifications. The
//! `Mcp-Session-Id` header handed out at initialization is replayed on every
//! later message and used to terminate the session on close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client as HttpClient, StatusCode, Url};
use serde::Serialize;

use super::errors::McpError;
use super::transport::{next_request_id, Transport};
use super::types::{HttpServerSpec, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a single exchange, including a long-running event stream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Header carrying the server-assigned session id.
const SESSION_HEADER: &str = "mcp-session-id";

// ─── HttpTransport ───────────────────────────────────────────────────────────

/// Transport to a tool server reachable over streamable HTTP.
///
/// Each exchange is an independent HTTP request, so concurrent calls are safe.
pub struct HttpTransport {
    server_name: String,
    url: Url,
    http: HttpClient,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Validate the endpoint and prepare the HTTP client.
    ///
    /// Reachability is established by the first exchange (the handshake).
    pub fn connect(name: &str, spec: &HttpServerSpec) -> Result<Self, McpError> {
        let url = Url::parse(&spec.url).map_err(|e| McpError::ConnectFailed {
            endpoint: spec.url.clone(),
            reason: format!("invalid URL: {e}"),
        })?;

        let mut headers = HeaderMap::new();
        for (key, value) in &spec.headers {
            let header_name =
                HeaderName::from_bytes(key.as_bytes()).map_err(|e| McpError::ConfigError {
                    reason: format!("invalid header name '{key}' for server '{name}': {e}"),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| McpError::ConfigError {
                reason: format!("invalid value for header '{key}' on server '{name}': {e}"),
            })?;
            headers.insert(header_name, header_value);
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| McpError::ConnectFailed {
                endpoint: spec.url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        tracing::info!(server = name, url = %url, "prepared streamable HTTP transport");

        Ok(Self {
            server_name: name.to_string(),
            url,
            http,
            headers,
            session_id: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn transport_err(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    fn current_session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|guard| guard.clone())
    }

    /// POST one JSON-RPC message, returning the successful response.
    async fn post<T: Serialize + Sync>(
        &self,
        method: &str,
        message: &T,
    ) -> Result<reqwest::Response, McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.transport_err("transport closed".into()));
        }

        let mut request = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(message);

        if let Some(session_id) = self.current_session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                McpError::ConnectFailed {
                    endpoint: self.url.to_string(),
                    reason: e.to_string(),
                }
            } else if e.is_timeout() {
                McpError::Timeout {
                    operation: method.to_string(),
                    timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
                }
            } else {
                self.transport_err(format!("request failed: {e}"))
            }
        })?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut guard) = self.session_id.lock() {
                if guard.as_deref() != Some(session_id) {
                    tracing::debug!(server = %self.server_name, session_id, "session id assigned");
                    *guard = Some(session_id.to_string());
                }
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.transport_err(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }

        Ok(response)
    }

    /// Read events from an SSE body until the response for `id` arrives.
    async fn read_event_stream(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut byte_stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            for event in drain_events(&mut buffer) {
                if let Some(resp) = sse_event_data(&event).and_then(|data| match_response(&data, id)) {
                    return Ok(resp);
                }
            }

            match byte_stream.next().await {
                Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    return Err(self.transport_err(format!("event stream read error: {e}")));
                }
                None => {
                    let tail = String::from_utf8_lossy(&buffer);
                    if let Some(resp) = sse_event_data(tail.trim()).and_then(|d| match_response(&d, id)) {
                        return Ok(resp);
                    }
                    return Err(self.transport_err(
                        "event stream ended before the response arrived".into(),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let request = JsonRpcRequest::new(next_request_id(), method, params);
        let response = self.post(method, &request).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            return self.read_event_stream(response, request.id).await;
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_err(format!("failed to read response body: {e}")))?;

        match_response(&body, request.id).ok_or_else(|| {
            self.transport_err(format!("no response for request {} in body", request.id))
        })
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        self.post(method, &notification).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let Some(session_id) = self.current_session_id() else {
            return Ok(());
        };

        let result = self
            .http
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session_id)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::METHOD_NOT_ALLOWED => {
                tracing::debug!(server = %self.server_name, "session terminated");
                Ok(())
            }
            Ok(resp) => Err(self.transport_err(format!(
                "session termination returned HTTP {}",
                resp.status().as_u16()
            ))),
            Err(e) => Err(self.transport_err(format!("session termination failed: {e}"))),
        }
    }
}

// ─── SSE Helpers ─────────────────────────────────────────────────────────────

/// Remove and return every complete (blank-line terminated) event in `buffer`.
///
/// Only complete events are decoded, so a multi-byte character split across
/// network chunks stays intact.
fn drain_events(buffer: &mut Vec<u8>) -> Vec<String> {
    if buffer.contains(&b'\r') {
        strip_crlf(buffer);
    }

    let mut events = Vec::new();
    while let Some(end) = buffer.windows(2).position(|w| w == b"\n\n") {
        events.push(String::from_utf8_lossy(&buffer[..end]).into_owned());
        buffer.drain(..end + 2);
    }
    events
}

/// Turn every `\r\n` into `\n`. A trailing lone `\r` is kept until its
/// `\n` arrives.
fn strip_crlf(buffer: &mut Vec<u8>) {
    let mut out = Vec::with_capacity(buffer.len());
    let mut bytes = buffer.iter().peekable();
    while let Some(&b) = bytes.next() {
        if b == b'\r' && bytes.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    *buffer = out;
}

/// Concatenated `data:` payload of one SSE event, if it has any.
fn sse_event_data(event: &str) -> Option<String> {
    let lines: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Find the response with `id` in a JSON payload (single message or batch).
fn match_response(payload: &str, id: u64) -> Option<JsonRpcResponse> {
    let value: serde_json::Value = serde_json::from_str(payload.trim()).ok()?;
    let candidates = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };

    candidates
        .into_iter()
        .filter_map(|v| serde_json::from_value::<JsonRpcResponse>(v).ok())
        .find(|resp| resp.id == id)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
