//! AgentClient — the entry point outer layers drive.
//!
//! Owns one conversation and shares a server registry, which may be shared
//! further with other clients.

use std::sync::Arc;

use futures::Stream;

use super::conversation::{ChatResponse, ConversationConfig, ConversationLoop};
use super::errors::AgentError;
use crate::config::ServersConfig;
use crate::inference::ModelBackend;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::{ServerRegistry, ToolCatalog, TransportSpec};

/// A conversation over a (possibly shared) set of tool servers.
pub struct AgentClient {
    registry: Arc<ServerRegistry>,
    conversation: ConversationLoop,
}

impl AgentClient {
    /// Create a client with its own, empty registry.
    pub fn new(backend: Arc<dyn ModelBackend>, config: ConversationConfig) -> Self {
        Self::with_registry(backend, Arc::new(ServerRegistry::new()), config)
    }

    /// Create a client over an existing registry.
    pub fn with_registry(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ServerRegistry>,
        config: ConversationConfig,
    ) -> Self {
        tracing::info!(model = %backend.model_name(), "agent client created");
        let conversation = ConversationLoop::new(backend, registry.clone(), config);
        Self {
            registry,
            conversation,
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    // ─── Servers ────────────────────────────────────────────────────────

    /// Connect one server. Returns the name it was registered under.
    pub async fn connect(&self, name: Option<&str>, spec: &TransportSpec) -> Result<String, McpError> {
        let session = self.registry.connect(name, spec).await?;
        Ok(session.name().to_string())
    }

    /// Connect every server in `config`; failures are returned per name.
    pub async fn connect_all(&self, config: &ServersConfig) -> Vec<(String, McpError)> {
        self.registry.connect_all(config.to_specs()).await
    }

    /// Replace the active subset; returns the names actually selected.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        self.registry.select(names)
    }

    pub fn list_all_servers(&self) -> Vec<String> {
        self.registry.all_names()
    }

    pub fn list_active_servers(&self) -> Vec<String> {
        self.registry.active_names()
    }

    /// Tools of the active servers.
    pub fn list_tools(&self) -> ToolCatalog {
        self.registry.catalog()
    }

    // ─── Conversation ───────────────────────────────────────────────────

    pub fn reset_conversation(&mut self) {
        self.conversation.reset();
    }

    pub fn conversation(&self) -> &ConversationLoop {
        &self.conversation
    }

    /// Send a prompt; see [`ConversationLoop::submit`].
    pub fn submit(
        &mut self,
        user_text: &str,
    ) -> impl Stream<Item = Result<ChatResponse, AgentError>> + '_ {
        self.conversation.submit(user_text)
    }

    /// Close every server in the registry. Failures are logged and returned.
    pub async fn shutdown(&self) -> Vec<(String, McpError)> {
        self.registry.close_all().await
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
