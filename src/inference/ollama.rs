//! Ollama chat client.
//!
//! Sends `/api/chat` requests to a local or remote Ollama instance and
//! streams back text fragments and tool calls. Also lists the models the
//! instance has pulled.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::backend::{BackendStream, ModelBackend};
use super::errors::InferenceError;
use super::streaming::parse_ndjson_stream;
use super::types::{
    ChatMessage, OllamaChatRequest, OllamaModelInfo, OllamaTagsResponse, ToolDefinition,
};
use crate::mcp_client::ToolDescriptor;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Default chat model.
pub const DEFAULT_MODEL: &str = "qwen3:8b";

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Total request timeout for streaming calls.
///
/// Local models can take a long time to emit the first token when the
/// history is large.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ─── OllamaClient ────────────────────────────────────────────────────────────

/// Client for one model on one Ollama instance.
pub struct OllamaClient {
    /// HTTP client for non-streaming requests (30s timeout).
    http: HttpClient,
    /// HTTP client for streaming requests (180s timeout).
    http_stream: HttpClient,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Create a client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn new(base_url: &str, model: &str) -> Result<Self, InferenceError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "base_url is empty".into(),
            });
        }
        if model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model is empty".into(),
            });
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            base_url,
            model: model.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ─── Model Listing ───────────────────────────────────────────────────

    /// List every model pulled into the Ollama instance (`GET /api/tags`).
    pub async fn list_models(&self) -> Result<Vec<OllamaModelInfo>, InferenceError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| map_send_error(&url, e, REQUEST_TIMEOUT))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        let tags: OllamaTagsResponse =
            response.json().await.map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse model list: {e}"),
            })?;

        Ok(tags
            .models
            .unwrap_or_default()
            .into_iter()
            .map(OllamaModelInfo::from)
            .collect())
    }

    /// Check if the endpoint is reachable. Never fails.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).timeout(CONNECT_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaClient {
    async fn chat_stream(
        &self,
        history: &[ChatMessage],
        tools: &[ToolDescriptor],
    ) -> Result<BackendStream, InferenceError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest {
            model: &self.model,
            messages: history,
            tools: tools.iter().map(ToolDefinition::from).collect(),
            stream: true,
        };

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %self.model,
            message_count = history.len(),
            tool_count = body.tools.len(),
            "sending chat request"
        );

        let response = self
            .http_stream
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(&url, e, STREAM_REQUEST_TIMEOUT))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body_text, "chat request rejected");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(Box::pin(parse_ndjson_stream(response.bytes_stream())))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn map_send_error(url: &str, e: reqwest::Error, timeout: Duration) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout {
            duration_secs: timeout.as_secs(),
        }
    } else {
        InferenceError::ConnectionFailed {
            endpoint: url.to_string(),
            reason: e.to_string(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
