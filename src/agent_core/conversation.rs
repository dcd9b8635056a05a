//! ConversationLoop — drives model turns and tool dispatch for one prompt.
//!
//! A `submit` is a bounded state machine:
//!
//! ```text
//! AwaitingModel → Streaming → Done
//!                          ↘ Dispatching → AwaitingModel → …
//! ```
//!
//! Text fragments are yielded as they arrive; each tool batch is executed
//! and its merged result yielded as one `tool` response before the model is
//! called again with the extended history.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};

use super::errors::AgentError;
use super::tool_invoker::{RoutingPolicy, ToolInvoker, DEFAULT_CALL_TIMEOUT};
use crate::inference::{BackendEvent, BackendStream, ChatMessage, ModelBackend, Role, ToolCallIntent};
use crate::mcp_client::ServerRegistry;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default number of model calls allowed per `submit`.
pub const DEFAULT_MAX_TURNS: usize = 20;

/// System prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to external tools. \
Use the tool results you receive to give accurate answers, and pass user-supplied values to tools exactly as given.";

// ─── Types ──────────────────────────────────────────────────────────────────

/// One item yielded by `submit`: model text or a rendered tool message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    /// `Assistant` or `Tool`.
    pub role: Role,
    pub content: String,
}

impl ChatResponse {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Tunables for a conversation.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub system_prompt: String,
    /// Model calls allowed per `submit`; `None` is unbounded.
    pub max_turns: Option<usize>,
    pub call_timeout: Duration,
    pub routing: RoutingPolicy,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_turns: Some(DEFAULT_MAX_TURNS),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            routing: RoutingPolicy::default(),
        }
    }
}

// ─── ConversationLoop ───────────────────────────────────────────────────────

/// Message history plus everything needed to run turns against it.
pub struct ConversationLoop {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ServerRegistry>,
    invoker: ToolInvoker,
    system_prompt: String,
    max_turns: Option<usize>,
    history: Vec<ChatMessage>,
}

impl ConversationLoop {
    /// Create a conversation that starts already reset.
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ServerRegistry>,
        config: ConversationConfig,
    ) -> Self {
        let invoker = ToolInvoker::new(registry.clone(), config.routing, config.call_timeout);
        let mut conversation = Self {
            backend,
            registry,
            invoker,
            system_prompt: config.system_prompt,
            max_turns: config.max_turns,
            history: Vec::new(),
        };
        conversation.reset();
        conversation
    }

    /// Drop everything but the system message.
    pub fn reset(&mut self) {
        self.history.clear();
        self.history.push(ChatMessage::system(self.system_prompt.clone()));
        tracing::debug!("conversation reset");
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Append `user_text` and drive turns until the model stops calling tools.
    ///
    /// The stream ends after the first `Err` item. Dropping it early cancels
    /// any in-flight model or tool call; history keeps what was appended so
    /// far.
    pub fn submit(
        &mut self,
        user_text: &str,
    ) -> impl Stream<Item = Result<ChatResponse, AgentError>> + '_ {
        self.history.push(ChatMessage::user(user_text));
        tracing::info!(
            history_len = self.history.len(),
            active_servers = ?self.registry.active_names(),
            "prompt submitted"
        );

        let driver = TurnDriver {
            conversation: self,
            state: TurnState::AwaitingModel,
            model_calls: 0,
        };

        stream::unfold(driver, |mut driver| async move {
            let item = driver.step().await?;
            Some((item, driver))
        })
    }
}

// ─── State Machine ──────────────────────────────────────────────────────────

enum TurnState {
    AwaitingModel,
    Streaming {
        stream: BackendStream,
        text: String,
        intents: Vec<ToolCallIntent>,
    },
    Dispatching {
        text: String,
        intents: Vec<ToolCallIntent>,
    },
    Done {
        text: String,
    },
    Finished,
}

struct TurnDriver<'a> {
    conversation: &'a mut ConversationLoop,
    state: TurnState,
    model_calls: usize,
}

impl TurnDriver<'_> {
    /// Advance until the next item to yield, or `None` when finished.
    async fn step(&mut self) -> Option<Result<ChatResponse, AgentError>> {
        loop {
            match std::mem::replace(&mut self.state, TurnState::Finished) {
                TurnState::AwaitingModel => {
                    if let Some(max_turns) = self.conversation.max_turns {
                        if self.model_calls >= max_turns {
                            tracing::warn!(max_turns, "turn limit reached, stopping");
                            return Some(Err(AgentError::TurnLimitExceeded { max_turns }));
                        }
                    }
                    self.model_calls += 1;

                    let catalog = self.conversation.registry.catalog();
                    tracing::debug!(
                        turn = self.model_calls,
                        tool_count = catalog.len(),
                        "prompting model"
                    );
                    match self
                        .conversation
                        .backend
                        .chat_stream(&self.conversation.history, catalog.tools())
                        .await
                    {
                        Ok(stream) => {
                            self.state = TurnState::Streaming {
                                stream,
                                text: String::new(),
                                intents: Vec::new(),
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "model backend failed");
                            return Some(Err(e.into()));
                        }
                    }
                }

                TurnState::Streaming {
                    mut stream,
                    mut text,
                    mut intents,
                } => match stream.next().await {
                    Some(Ok(BackendEvent::Content(fragment))) => {
                        let yielded = (!fragment.is_empty()).then(|| {
                            text.push_str(&fragment);
                            ChatResponse::assistant(fragment)
                        });
                        self.state = TurnState::Streaming {
                            stream,
                            text,
                            intents,
                        };
                        if let Some(response) = yielded {
                            return Some(Ok(response));
                        }
                    }
                    Some(Ok(BackendEvent::ToolCall(intent))) => {
                        intents.push(intent);
                        self.state = TurnState::Streaming {
                            stream,
                            text,
                            intents,
                        };
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "model stream failed");
                        return Some(Err(e.into()));
                    }
                    None if intents.is_empty() => self.state = TurnState::Done { text },
                    None => self.state = TurnState::Dispatching { text, intents },
                },

                TurnState::Dispatching { text, intents } => {
                    let content = if text.is_empty() {
                        let names: Vec<&str> =
                            intents.iter().map(|i| i.qualified_name.as_str()).collect();
                        format!("I'll call the following tools: {}", names.join(", "))
                    } else {
                        text
                    };

                    tracing::info!(count = intents.len(), "dispatching tool calls");
                    let tool_message = self.conversation.invoker.dispatch(&intents).await;

                    // Recorded together so a stream dropped mid-dispatch leaves
                    // no announcement without its results.
                    self.conversation.history.push(ChatMessage::assistant(content));
                    self.conversation
                        .history
                        .push(ChatMessage::tool(tool_message.clone()));

                    self.state = TurnState::AwaitingModel;
                    return Some(Ok(ChatResponse::tool(tool_message)));
                }

                TurnState::Done { text } => {
                    if !text.is_empty() {
                        self.conversation.history.push(ChatMessage::assistant(text));
                    }
                    tracing::info!(model_calls = self.model_calls, "prompt complete");
                    return None;
                }

                TurnState::Finished => return None,
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
