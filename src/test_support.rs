//! In-memory stand-ins for tool servers and model backends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::inference::{
    BackendEvent, BackendStream, ChatMessage, InferenceError, ModelBackend, ToolCallIntent,
};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::transport::{next_request_id, Transport};
use crate::mcp_client::types::{error_codes, JsonRpcError, JsonRpcResponse, PROTOCOL_VERSION};
use crate::mcp_client::{ServerSession, ToolDescriptor, TransportKind};

// ─── StubTransport ───────────────────────────────────────────────────────────

#[derive(Default)]
struct StubState {
    closed: AtomicBool,
    close_count: AtomicUsize,
    notifications: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

/// Observer handle onto a `StubTransport` after it has been boxed away.
#[derive(Clone)]
pub struct StubHandle(Arc<StubState>);

impl StubHandle {
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.0.close_count.load(Ordering::SeqCst)
    }

    /// Local tool names received by `tools/call`, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.0.calls.lock().unwrap().clone()
    }
}

#[derive(Clone)]
enum StubReply {
    Text(String),
    Error(String),
}

#[derive(Clone)]
struct StubTool {
    name: String,
    schema: Value,
    reply: StubReply,
    delay: Option<Duration>,
}

/// A scripted tool server speaking JSON-RPC in memory.
pub struct StubTransport {
    name: String,
    tools: Vec<StubTool>,
    page_size: Option<usize>,
    reject_handshake: bool,
    fail_close: bool,
    state: Arc<StubState>,
}

impl StubTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
            page_size: None,
            reject_handshake: false,
            fail_close: false,
            state: Arc::new(StubState::default()),
        }
    }

    fn push(mut self, name: &str, schema: Value, reply: StubReply, delay: Option<Duration>) -> Self {
        self.tools.push(StubTool {
            name: name.to_string(),
            schema,
            reply,
            delay,
        });
        self
    }

    pub fn with_tool(self, name: &str, reply: &str) -> Self {
        self.push(name, json!({"type": "object"}), StubReply::Text(reply.into()), None)
    }

    pub fn with_schema_tool(self, name: &str, reply: &str, schema: Value) -> Self {
        self.push(name, schema, StubReply::Text(reply.into()), None)
    }

    /// A tool whose result is flagged `isError`.
    pub fn with_failing_tool(self, name: &str, error: &str) -> Self {
        self.push(name, json!({"type": "object"}), StubReply::Error(error.into()), None)
    }

    pub fn with_slow_tool(self, name: &str, reply: &str, delay: Duration) -> Self {
        self.push(
            name,
            json!({"type": "object"}),
            StubReply::Text(reply.into()),
            Some(delay),
        )
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn rejecting_handshake(mut self) -> Self {
        self.reject_handshake = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn handle(&self) -> StubHandle {
        StubHandle(self.state.clone())
    }

    pub fn notifications(&self) -> Vec<String> {
        self.state.notifications.lock().unwrap().clone()
    }

    fn list_page(&self, params: Option<&Value>) -> Value {
        let start = params
            .and_then(|p| p.get("cursor"))
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let end = self
            .page_size
            .map(|size| (start + size).min(self.tools.len()))
            .unwrap_or(self.tools.len());

        let tools: Vec<Value> = self.tools[start..end]
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": format!("{} tool", t.name),
                    "inputSchema": t.schema,
                })
            })
            .collect();

        if end < self.tools.len() {
            json!({"tools": tools, "nextCursor": end.to_string()})
        } else {
            json!({"tools": tools})
        }
    }

    async fn call(&self, params: Option<&Value>) -> Result<Value, JsonRpcError> {
        let name = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.state.calls.lock().unwrap().push(name.clone());

        let tool = self
            .tools
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| JsonRpcError {
                code: error_codes::INVALID_PARAMS,
                message: format!("unknown tool: {name}"),
                data: None,
            })?;

        if let Some(delay) = tool.delay {
            tokio::time::sleep(delay).await;
        }

        Ok(match tool.reply {
            StubReply::Text(text) => json!({"content": [{"type": "text", "text": text}]}),
            StubReply::Error(text) => {
                json!({"content": [{"type": "text", "text": text}], "isError": true})
            }
        })
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "closed".into(),
            });
        }

        let outcome = match method {
            "initialize" if self.reject_handshake => Err(JsonRpcError {
                code: error_codes::INTERNAL_ERROR,
                message: "initialization refused".into(),
                data: None,
            }),
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": self.name, "version": "0.0.1"},
            })),
            "tools/list" => Ok(self.list_page(params.as_ref())),
            "tools/call" => self.call(params.as_ref()).await,
            other => Err(JsonRpcError {
                code: -32601,
                message: format!("method not found: {other}"),
                data: None,
            }),
        };

        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Ok(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: next_request_id(),
            result,
            error,
        })
    }

    async fn notify(&self, method: &str, _params: Option<Value>) -> Result<(), McpError> {
        self.state.notifications.lock().unwrap().push(method.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.close_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(McpError::TransportError {
                server: self.name.clone(),
                reason: "close failed".into(),
            });
        }
        Ok(())
    }
}

/// Establish a session over a stub transport.
pub async fn stub_session(name: &str, stub: StubTransport) -> ServerSession {
    ServerSession::establish(name, TransportKind::Stdio, Box::new(stub))
        .await
        .unwrap()
}

// ─── StubBackend ─────────────────────────────────────────────────────────────

enum StubTurn {
    Events(Vec<Result<BackendEvent, InferenceError>>),
    Refuse(InferenceError),
}

/// A model backend that replays scripted turns and records what it was sent.
///
/// Once the script is exhausted it answers with an empty turn, or with the
/// `forever` tool call when one is set.
#[derive(Default)]
pub struct StubBackend {
    turns: Mutex<VecDeque<StubTurn>>,
    forever: Option<(String, Value)>,
    histories: Mutex<Vec<Vec<ChatMessage>>>,
    offered_tools: Mutex<Vec<Vec<String>>>,
}

pub fn intent(name: &str, arguments: Value) -> ToolCallIntent {
    ToolCallIntent::from_raw(None, name, arguments).unwrap()
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, turn: StubTurn) -> Self {
        self.turns.lock().unwrap().push_back(turn);
        self
    }

    /// A turn streaming the given text fragments.
    pub fn text(self, fragments: &[&str]) -> Self {
        let events = fragments
            .iter()
            .map(|f| Ok(BackendEvent::Content(f.to_string())))
            .collect();
        self.push(StubTurn::Events(events))
    }

    /// A turn requesting the given tools.
    pub fn tool_calls(self, calls: &[(&str, Value)]) -> Self {
        let events = calls
            .iter()
            .map(|(name, args)| Ok(BackendEvent::ToolCall(intent(name, args.clone()))))
            .collect();
        self.push(StubTurn::Events(events))
    }

    pub fn events(self, events: Vec<Result<BackendEvent, InferenceError>>) -> Self {
        self.push(StubTurn::Events(events))
    }

    /// A turn whose `chat_stream` call itself fails.
    pub fn refuse(self, error: InferenceError) -> Self {
        self.push(StubTurn::Refuse(error))
    }

    /// After the script, request this tool on every turn.
    pub fn forever_calling(mut self, name: &str, arguments: Value) -> Self {
        self.forever = Some((name.to_string(), arguments));
        self
    }

    /// Every history sent to the backend, in call order.
    pub fn histories(&self) -> Vec<Vec<ChatMessage>> {
        self.histories.lock().unwrap().clone()
    }

    /// Qualified tool names offered on each call.
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered_tools.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.histories.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelBackend for StubBackend {
    async fn chat_stream(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<BackendStream, InferenceError> {
        self.histories.lock().unwrap().push(history.to_vec());
        self.offered_tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.qualified_name.clone()).collect());

        let next = self.turns.lock().unwrap().pop_front();
        let events = match next {
            Some(StubTurn::Events(events)) => events,
            Some(StubTurn::Refuse(error)) => return Err(error),
            None => match &self.forever {
                Some((name, args)) => vec![Ok(BackendEvent::ToolCall(intent(name, args.clone())))],
                None => Vec::new(),
            },
        };

        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}
