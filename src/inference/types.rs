//! Shared types for the model backend.
//!
//! Conversation messages and tool-call intents are backend-neutral. The
//! `Ollama*` structs mirror the `/api/chat` and `/api/tags` wire formats and
//! are used for request building and response parsing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::errors::InferenceError;
use crate::mcp_client::ToolDescriptor;

// ─── Conversation Types ──────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// A validated tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallIntent {
    /// Unique ID for this call (generated if the model doesn't provide one).
    pub id: String,
    /// Namespaced tool name, e.g. `"weather/forecast"`.
    pub qualified_name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCallIntent {
    /// Validate a raw tool call from the wire.
    ///
    /// Arguments must be a JSON object, a string holding a JSON object, or
    /// null (treated as `{}`). Anything else is rejected here, before the
    /// call can reach a tool server.
    pub fn from_raw(id: Option<&str>, name: &str, arguments: Value) -> Result<Self, InferenceError> {
        let parse_err = |reason: String| InferenceError::ToolCallParseError {
            raw_response: format!("{name}({arguments})"),
            reason,
        };

        if name.trim().is_empty() {
            return Err(parse_err("empty tool name".into()));
        }

        let arguments = match &arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(parse_err(format!(
                        "arguments string must encode an object, got {}",
                        json_kind(&other)
                    )))
                }
                Err(e) => return Err(parse_err(format!("invalid JSON arguments: {e}"))),
            },
            other => {
                return Err(parse_err(format!(
                    "arguments must be an object, got {}",
                    json_kind(other)
                )))
            }
        };

        let id = id
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));

        Ok(Self {
            id,
            qualified_name: name.trim().to_string(),
            arguments,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One item of a streamed model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A text fragment.
    Content(String),
    /// A complete tool call.
    ToolCall(ToolCallIntent),
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// Tool definition sent in the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDescriptor> for ToolDefinition {
    fn from(tool: &ToolDescriptor) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: tool.qualified_name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameter_schema.clone(),
            },
        }
    }
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// One NDJSON line of a streaming `/api/chat` response.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChatChunk {
    #[serde(default)]
    pub message: Option<OllamaChunkMessage>,
    #[serde(default)]
    pub done: bool,
    /// Set when the backend fails mid-stream.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChunkMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Information about a single locally available model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaModelInfo {
    pub name: String,
    pub size_bytes: u64,
    pub parameter_size: String,
    pub quantization_level: String,
}

/// Raw `/api/tags` response shape.
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaTagsResponse {
    pub models: Option<Vec<OllamaTagModel>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaTagModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    pub details: Option<OllamaTagModelDetails>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OllamaTagModelDetails {
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

impl From<OllamaTagModel> for OllamaModelInfo {
    fn from(model: OllamaTagModel) -> Self {
        let details = model.details.unwrap_or_default();
        Self {
            name: model.name,
            size_bytes: model.size,
            parameter_size: details.parameter_size.unwrap_or_default(),
            quantization_level: details.quantization_level.unwrap_or_default(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::tool("ok")).unwrap();
        assert_eq!(json, json!({"role": "tool", "content": "ok"}));
    }

    #[test]
    fn test_intent_accepts_object_arguments() {
        let intent =
            ToolCallIntent::from_raw(Some("c1"), "a/ping", json!({"host": "x"})).unwrap();
        assert_eq!(intent.id, "c1");
        assert_eq!(intent.qualified_name, "a/ping");
        assert_eq!(intent.arguments.get("host"), Some(&json!("x")));
    }

    #[test]
    fn test_intent_null_arguments_become_empty() {
        let intent = ToolCallIntent::from_raw(None, "a/ping", Value::Null).unwrap();
        assert!(intent.arguments.is_empty());
        assert!(intent.id.starts_with("call_"));
    }

    #[test]
    fn test_intent_parses_json_string_arguments() {
        let intent =
            ToolCallIntent::from_raw(None, "a/ping", json!(r#"{"count": 3}"#)).unwrap();
        assert_eq!(intent.arguments.get("count"), Some(&json!(3)));
    }

    #[test]
    fn test_intent_rejects_non_object_arguments() {
        for bad in [json!([1, 2]), json!(42), json!("not json"), json!("[1]")] {
            let err = ToolCallIntent::from_raw(None, "a/ping", bad.clone()).unwrap_err();
            assert!(
                matches!(err, InferenceError::ToolCallParseError { .. }),
                "expected parse error for {bad}"
            );
        }
    }

    #[test]
    fn test_intent_rejects_empty_name() {
        let err = ToolCallIntent::from_raw(None, "  ", json!({})).unwrap_err();
        assert!(matches!(err, InferenceError::ToolCallParseError { .. }));
    }

    #[test]
    fn test_tool_definition_uses_qualified_name() {
        let tool = ToolDescriptor::qualify(
            "weather",
            serde_json::from_value(json!({
                "name": "forecast",
                "description": "Get the forecast",
                "inputSchema": {"type": "object"}
            }))
            .unwrap(),
        );
        let def = ToolDefinition::from(&tool);
        assert_eq!(def.r#type, "function");
        assert_eq!(def.function.name, "weather/forecast");
        assert_eq!(def.function.parameters, json!({"type": "object"}));
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let messages = [ChatMessage::user("hi")];
        let req = OllamaChatRequest {
            model: "qwen3:8b",
            messages: &messages,
            tools: vec![],
            stream: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["stream"], json!(true));
    }

    #[test]
    fn test_tags_model_without_details() {
        let raw: OllamaTagsResponse =
            serde_json::from_value(json!({"models": [{"name": "llama3:8b", "size": 42}]}))
                .unwrap();
        let info: Vec<OllamaModelInfo> = raw
            .models
            .unwrap_or_default()
            .into_iter()
            .map(OllamaModelInfo::from)
            .collect();
        assert_eq!(info[0].name, "llama3:8b");
        assert_eq!(info[0].size_bytes, 42);
        assert_eq!(info[0].parameter_size, "");
    }
}
