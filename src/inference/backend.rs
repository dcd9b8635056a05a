//! The model-completion seam the conversation loop talks to.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::errors::InferenceError;
use super::types::{BackendEvent, ChatMessage};
use crate::mcp_client::ToolDescriptor;

/// A streamed model turn: text fragments and tool calls, in arrival order.
pub type BackendStream = Pin<Box<dyn Stream<Item = Result<BackendEvent, InferenceError>> + Send>>;

/// A chat model that can stream a reply and request tools.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Start one model turn over the full `history`, offering `tools`.
    ///
    /// Connection-level failures are returned directly; failures after the
    /// stream has started arrive as `Err` items.
    async fn chat_stream(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<BackendStream, InferenceError>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}
