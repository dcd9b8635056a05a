//! ToolInvoker — routes model tool calls to tool servers.
//!
//! The invoker is the bridge between the model's tool-call intents and the
//! connected servers. It handles:
//! - Resolution of `server/tool` names against the active servers
//! - The fallback policy when the named server is not active
//! - Required-field validation against the tool's parameter schema
//! - Bounded, concurrent execution of one turn's batch
//! - Rendering every outcome into a delimited block for the model
//!
//! Failures never propagate past this module; they become `TOOL ERROR`
//! blocks the model can read and react to.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::inference::ToolCallIntent;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::registry::ActiveSessions;
use crate::mcp_client::{ServerRegistry, ServerSession};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default bound on a single tool call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const BLOCK_FOOTER: &str = "==========================";

// ─── Routing Policy ─────────────────────────────────────────────────────────

/// What to do when an intent names a server that is not active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Route to the first active server and log a warning.
    #[default]
    FallbackToFirstActive,
    /// Fail the call with a selection error.
    Strict,
}

/// Result of one tool call, before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success { text: String },
    Failure { error_message: String },
}

impl From<Result<String, McpError>> for ToolOutcome {
    fn from(result: Result<String, McpError>) -> Self {
        match result {
            Ok(text) => ToolOutcome::Success { text },
            Err(e) => ToolOutcome::Failure {
                error_message: e.to_string(),
            },
        }
    }
}

// ─── ToolInvoker ────────────────────────────────────────────────────────────

/// Executes tool-call intents against the registry's active servers.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ServerRegistry>,
    policy: RoutingPolicy,
    call_timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ServerRegistry>, policy: RoutingPolicy, call_timeout: Duration) -> Self {
        Self {
            registry,
            policy,
            call_timeout,
        }
    }

    // ─── Resolution ─────────────────────────────────────────────────────

    /// Pick the session and server-local tool name for `qualified_name`.
    ///
    /// The name is split on the first `/`; a name without one is treated as
    /// a bare local name whose server is never found.
    pub fn resolve(
        &self,
        active: &[Arc<ServerSession>],
        qualified_name: &str,
    ) -> Result<(Arc<ServerSession>, String), McpError> {
        let (server, local) = match qualified_name.split_once('/') {
            Some((server, local)) => (Some(server), local),
            None => (None, qualified_name),
        };

        let first = active.first().ok_or_else(|| McpError::Selection {
            tool: qualified_name.to_string(),
            reason: "no tool servers are active".into(),
        })?;

        if let Some(session) = server.and_then(|s| active.iter().find(|a| a.name() == s)) {
            return Ok((session.clone(), local.to_string()));
        }

        match self.policy {
            RoutingPolicy::FallbackToFirstActive => {
                tracing::warn!(
                    tool = %qualified_name,
                    requested = ?server,
                    fallback = %first.name(),
                    "server not active, falling back to first active server"
                );
                Ok((first.clone(), local.to_string()))
            }
            RoutingPolicy::Strict => Err(McpError::Selection {
                tool: qualified_name.to_string(),
                reason: match server {
                    Some(s) => format!("server '{s}' is not active"),
                    None => "tool name has no server prefix".into(),
                },
            }),
        }
    }

    // ─── Execution ──────────────────────────────────────────────────────

    /// Execute one intent against the current active set.
    pub async fn invoke(&self, intent: &ToolCallIntent) -> ToolOutcome {
        let active = self.registry.active();
        self.invoke_on(&active, intent).await.into()
    }

    async fn invoke_on(
        &self,
        active: &ActiveSessions,
        intent: &ToolCallIntent,
    ) -> Result<String, McpError> {
        let start = Instant::now();
        let (session, local) = self.resolve(active, &intent.qualified_name)?;

        if let Some(tool) = session.tool(&local) {
            validate_required(&intent.qualified_name, &tool.parameter_schema, &intent.arguments)?;
        }

        let result = session
            .call_tool(&local, intent.arguments.clone(), self.call_timeout)
            .await;

        match &result {
            Ok(text) => tracing::info!(
                tool = %intent.qualified_name,
                server = %session.name(),
                duration_ms = start.elapsed().as_millis() as u64,
                result_len = text.len(),
                "tool call succeeded"
            ),
            Err(e) => tracing::error!(
                tool = %intent.qualified_name,
                server = %session.name(),
                duration_ms = start.elapsed().as_millis() as u64,
                error = %e,
                "tool call failed"
            ),
        }

        result
    }

    /// Execute one turn's intents concurrently.
    ///
    /// Every intent sees the same snapshot of the active set. Outcomes come
    /// back in intent order regardless of completion order.
    pub async fn invoke_batch(&self, intents: &[ToolCallIntent]) -> Vec<ToolOutcome> {
        let active = self.registry.active();
        let calls = intents.iter().map(|intent| self.invoke_on(&active, intent));
        futures::future::join_all(calls)
            .await
            .into_iter()
            .map(ToolOutcome::from)
            .collect()
    }

    /// Execute a batch and render it as the single tool message the model
    /// will see next.
    pub async fn dispatch(&self, intents: &[ToolCallIntent]) -> String {
        let outcomes = self.invoke_batch(intents).await;
        let blocks = intents
            .iter()
            .zip(outcomes.iter())
            .enumerate()
            .map(|(i, (intent, outcome))| format_outcome(i + 1, intent, outcome))
            .collect();
        merge_batch(blocks)
    }
}

/// Check that every field the schema lists as `required` is present.
fn validate_required(
    tool_name: &str,
    schema: &Value,
    arguments: &Map<String, Value>,
) -> Result<(), McpError> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };

    for field_name in required.iter().filter_map(Value::as_str) {
        if !arguments.contains_key(field_name) {
            return Err(McpError::InvalidArguments {
                tool: tool_name.to_string(),
                reason: format!("missing required field: '{field_name}'"),
            });
        }
    }

    Ok(())
}

// ─── Formatting ─────────────────────────────────────────────────────────────

/// Render one outcome as a `TOOL RESULT` or `TOOL ERROR` block (1-based `index`).
pub fn format_outcome(index: usize, intent: &ToolCallIntent, outcome: &ToolOutcome) -> String {
    let arguments =
        serde_json::to_string(&intent.arguments).unwrap_or_else(|_| "{}".to_string());

    match outcome {
        ToolOutcome::Success { text } => format!(
            "=== TOOL RESULT #{index} ===\nTool: {}\nArguments: {arguments}\nResult:\n{text}\n{BLOCK_FOOTER}",
            intent.qualified_name
        ),
        ToolOutcome::Failure { error_message } => format!(
            "=== TOOL ERROR #{index} ===\nTool: {}\nArguments: {arguments}\nError: {error_message}\n{BLOCK_FOOTER}",
            intent.qualified_name
        ),
    }
}

/// Merge a turn's blocks into one message. A single block is returned as-is.
pub fn merge_batch(blocks: Vec<String>) -> String {
    match blocks.len() {
        0 => String::new(),
        1 => blocks.into_iter().next().unwrap_or_default(),
        n => format!(
            "MULTIPLE TOOL RESULTS (Total: {n}):\n\n{}\n\nPlease analyze and correlate ALL {n} tool results above.",
            blocks.join("\n\n")
        ),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::Transport;
    use crate::test_support::{intent, stub_session, StubTransport};
    use serde_json::json;

    async fn registry_with(stubs: Vec<StubTransport>) -> Arc<ServerRegistry> {
        let registry = Arc::new(ServerRegistry::new());
        let mut names = Vec::new();
        for stub in stubs {
            let name = stub.server_name().to_string();
            registry.register(stub_session(&name, stub).await).await;
            names.push(name);
        }
        registry.select(&names);
        registry
    }

    fn invoker(registry: Arc<ServerRegistry>, policy: RoutingPolicy) -> ToolInvoker {
        ToolInvoker::new(registry, policy, Duration::from_secs(5))
    }

    #[test]
    fn test_format_success_block() {
        let i = intent("a/ping", json!({"host": "x"}));
        let block = format_outcome(1, &i, &ToolOutcome::Success { text: "pong".into() });
        assert_eq!(
            block,
            "=== TOOL RESULT #1 ===\nTool: a/ping\nArguments: {\"host\":\"x\"}\nResult:\npong\n=========================="
        );
    }

    #[test]
    fn test_format_error_block() {
        let i = intent("a/ping", json!({}));
        let block = format_outcome(
            3,
            &i,
            &ToolOutcome::Failure {
                error_message: "boom".into(),
            },
        );
        assert_eq!(
            block,
            "=== TOOL ERROR #3 ===\nTool: a/ping\nArguments: {}\nError: boom\n=========================="
        );
    }

    #[test]
    fn test_merge_single_is_verbatim() {
        assert_eq!(merge_batch(vec!["only".into()]), "only");
    }

    #[test]
    fn test_merge_multiple_wraps() {
        let merged = merge_batch(vec!["one".into(), "two".into()]);
        assert_eq!(
            merged,
            "MULTIPLE TOOL RESULTS (Total: 2):\n\none\n\ntwo\n\nPlease analyze and correlate ALL 2 tool results above."
        );
    }

    #[tokio::test]
    async fn test_routes_to_named_server() {
        let a = StubTransport::new("a").with_tool("ping", "from a");
        let b = StubTransport::new("b").with_tool("ping", "from b");
        let registry = registry_with(vec![a, b]).await;

        let outcome = invoker(registry, RoutingPolicy::default())
            .invoke(&intent("b/ping", json!({})))
            .await;
        assert_eq!(outcome, ToolOutcome::Success { text: "from b".into() });
    }

    #[tokio::test]
    async fn test_fallback_to_first_active() {
        let a = StubTransport::new("a").with_tool("pong", "a answered");
        let b = StubTransport::new("b").with_tool("pong", "b answered");
        let (seen_a, seen_b) = (a.handle(), b.handle());
        let registry = registry_with(vec![a, b]).await;
        registry.select(&["a"]);

        let outcome = invoker(registry, RoutingPolicy::FallbackToFirstActive)
            .invoke(&intent("b/pong", json!({})))
            .await;
        assert_eq!(outcome, ToolOutcome::Success { text: "a answered".into() });
        assert_eq!(seen_a.calls(), vec!["pong"]);
        assert!(seen_b.calls().is_empty());
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_inactive_server() {
        let a = StubTransport::new("a").with_tool("pong", "a answered");
        let seen = a.handle();
        let registry = registry_with(vec![a]).await;

        let outcome = invoker(registry, RoutingPolicy::Strict)
            .invoke(&intent("b/pong", json!({})))
            .await;
        match outcome {
            ToolOutcome::Failure { error_message } => {
                assert!(error_message.contains("'b' is not active"), "{error_message}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(seen.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bare_name_goes_through_policy() {
        let a = StubTransport::new("a").with_tool("ping", "pong");
        let registry = registry_with(vec![a]).await;

        let lenient = invoker(registry.clone(), RoutingPolicy::FallbackToFirstActive);
        assert_eq!(
            lenient.invoke(&intent("ping", json!({}))).await,
            ToolOutcome::Success { text: "pong".into() }
        );

        let strict = invoker(registry, RoutingPolicy::Strict);
        assert!(matches!(
            strict.invoke(&intent("ping", json!({}))).await,
            ToolOutcome::Failure { .. }
        ));
    }

    #[tokio::test]
    async fn test_no_active_servers_is_selection_failure() {
        let registry = Arc::new(ServerRegistry::new());
        let err = invoker(registry, RoutingPolicy::default())
            .resolve(&[], "a/ping")
            .unwrap_err();
        assert!(matches!(err, McpError::Selection { .. }));
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let a = StubTransport::new("a").with_schema_tool(
            "read",
            "contents",
            json!({"type": "object", "required": ["path"]}),
        );
        let seen = a.handle();
        let registry = registry_with(vec![a]).await;
        let invoker = invoker(registry, RoutingPolicy::default());

        let outcome = invoker.invoke(&intent("a/read", json!({}))).await;
        match outcome {
            ToolOutcome::Failure { error_message } => {
                assert!(error_message.contains("missing required field: 'path'"))
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(seen.calls().is_empty());

        let outcome = invoker.invoke(&intent("a/read", json!({"path": "/tmp"}))).await;
        assert_eq!(outcome, ToolOutcome::Success { text: "contents".into() });
    }

    #[tokio::test]
    async fn test_call_timeout_becomes_failure() {
        let a = StubTransport::new("a").with_slow_tool("sleep", "late", Duration::from_millis(300));
        let registry = registry_with(vec![a]).await;
        let invoker = ToolInvoker::new(registry, RoutingPolicy::default(), Duration::from_millis(20));

        let outcome = invoker.invoke(&intent("a/sleep", json!({}))).await;
        assert!(matches!(outcome, ToolOutcome::Failure { ref error_message } if error_message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_batch_keeps_intent_order() {
        let slow = StubTransport::new("slow").with_slow_tool("work", "slow done", Duration::from_millis(150));
        let fast = StubTransport::new("fast").with_slow_tool("work", "fast done", Duration::from_millis(5));
        let registry = registry_with(vec![slow, fast]).await;
        let invoker = invoker(registry, RoutingPolicy::default());

        let intents = vec![
            intent("slow/work", json!({})),
            intent("fast/work", json!({})),
            intent("fast/missing", json!({})),
        ];
        let message = invoker.dispatch(&intents).await;

        assert!(message.starts_with("MULTIPLE TOOL RESULTS (Total: 3):"));
        let first = message.find("=== TOOL RESULT #1 ===\nTool: slow/work").unwrap();
        let second = message.find("=== TOOL RESULT #2 ===\nTool: fast/work").unwrap();
        let third = message.find("=== TOOL ERROR #3 ===\nTool: fast/missing").unwrap();
        assert!(first < second && second < third);
        assert!(message.contains("slow done"));
    }

    #[tokio::test]
    async fn test_batch_uses_one_snapshot() {
        let a = StubTransport::new("a").with_slow_tool("work", "done", Duration::from_millis(50));
        let registry = registry_with(vec![a]).await;
        let invoker = invoker(registry.clone(), RoutingPolicy::Strict);

        let intents = vec![intent("a/work", json!({}))];
        let batch = invoker.invoke_batch(&intents);
        let deselect = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let none: [&str; 0] = [];
            registry.select(&none);
        };
        let (outcomes, _) = tokio::join!(batch, deselect);

        assert_eq!(outcomes, vec![ToolOutcome::Success { text: "done".into() }]);
        assert!(registry.active_names().is_empty());
    }
}
