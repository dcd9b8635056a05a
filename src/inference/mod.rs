//! Inference — the model backend the conversation loop streams from.
//!
//! This module handles:
//! - The backend-neutral `ModelBackend` trait and conversation types
//! - Tool-call intent validation at the backend boundary
//! - The Ollama `/api/chat` client and its NDJSON stream parser
//!
//! Swapping the model is a settings change; swapping the backend is a new
//! `ModelBackend` implementation.

pub mod backend;
pub mod errors;
pub mod ollama;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use backend::{BackendStream, ModelBackend};
pub use errors::InferenceError;
pub use ollama::OllamaClient;
pub use types::{BackendEvent, ChatMessage, Role, ToolCallIntent, ToolDefinition};
