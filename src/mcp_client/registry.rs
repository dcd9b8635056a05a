//! Server registry — every connected session plus the active subset.
//!
//! Provides:
//! - Connection of stdio / HTTP servers (single and batch)
//! - Selection of the active subset exposed to the model
//! - Snapshots of the active subset for catalog building and routing
//! - Best-effort teardown
//!
//! The registry is shared by every conversation issued against the same
//! client. Both maps live behind one lock and are swapped atomically, so a
//! `select()` never tears a concurrent `catalog()` or invocation: those work
//! on the snapshot taken when they started.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::catalog::ToolCatalog;
use super::errors::McpError;
use super::session::ServerSession;
use super::types::{TransportKind, TransportSpec};

/// Active sessions as seen at one point in time, in registry order.
pub type ActiveSessions = Arc<[Arc<ServerSession>]>;

struct RegistryState {
    /// Every connected session, in connect order.
    all: Vec<Arc<ServerSession>>,
    /// Subset of `all` (same `Arc`s), in registry order.
    active: ActiveSessions,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            all: Vec::new(),
            active: Arc::from(Vec::new()),
        }
    }
}

impl RegistryState {
    fn find(&self, name: &str) -> Option<&Arc<ServerSession>> {
        self.all.iter().find(|s| s.name() == name)
    }

    fn names(sessions: &[Arc<ServerSession>]) -> Vec<String> {
        sessions.iter().map(|s| s.name().to_string()).collect()
    }
}

// ─── ServerRegistry ──────────────────────────────────────────────────────────

/// Every connected tool server, keyed by name, plus the active subset.
#[derive(Default)]
pub struct ServerRegistry {
    state: RwLock<RegistryState>,
}

impl ServerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ─── Connection ──────────────────────────────────────────────────────

    /// Connect to one server and register it.
    ///
    /// An HTTP server without a name is called `http_<n>`, where `n` is the
    /// number of HTTP sessions already registered. Stdio servers must be
    /// named. The new session becomes active only if nothing was active.
    pub async fn connect(
        &self,
        name: Option<&str>,
        spec: &TransportSpec,
    ) -> Result<Arc<ServerSession>, McpError> {
        let name = match (name, spec) {
            (Some(name), _) => name.to_string(),
            (None, TransportSpec::Http(_)) => format!("http_{}", self.count_of(TransportKind::Http)),
            (None, TransportSpec::Stdio(s)) => {
                return Err(McpError::ConfigError {
                    reason: format!("stdio server '{}' needs a name", s.command),
                })
            }
        };

        let session = ServerSession::connect(&name, spec).await?;
        Ok(self.register(session).await)
    }

    /// Register an established session.
    ///
    /// Re-using a name replaces (and closes) the previous session.
    pub async fn register(&self, session: ServerSession) -> Arc<ServerSession> {
        let session = Arc::new(session);
        let replaced = {
            let mut state = self.write();
            let replaced = Self::insert(&mut state, session.clone());
            if state.active.is_empty() {
                state.active = Arc::from(vec![session.clone()]);
                tracing::info!(server = %session.name(), "auto-selected first server");
            }
            replaced
        };

        if let Some(old) = replaced {
            tracing::warn!(server = %old.name(), "server name reused, closing previous session");
            if let Err(e) = old.close().await {
                tracing::warn!(server = %old.name(), error = %e, "failed to close replaced session");
            }
        }

        session
    }

    /// Insert or replace by name, keeping `active` pointing at the live session.
    fn insert(state: &mut RegistryState, session: Arc<ServerSession>) -> Option<Arc<ServerSession>> {
        let position = state.all.iter().position(|s| s.name() == session.name());
        match position {
            Some(idx) => {
                let old = std::mem::replace(&mut state.all[idx], session.clone());
                if state.active.iter().any(|s| Arc::ptr_eq(s, &old)) {
                    state.active = state
                        .active
                        .iter()
                        .map(|s| if Arc::ptr_eq(s, &old) { session.clone() } else { s.clone() })
                        .collect();
                }
                Some(old)
            }
            None => {
                state.all.push(session);
                None
            }
        }
    }

    /// Connect to many servers concurrently.
    ///
    /// Successful sessions are registered in the order given, then every
    /// registered server becomes active. Failures are returned per name
    /// (partial startup is acceptable).
    pub async fn connect_all(
        &self,
        specs: Vec<(Option<String>, TransportSpec)>,
    ) -> Vec<(String, McpError)> {
        let mut http_index = self.count_of(TransportKind::Http);
        let mut named = Vec::with_capacity(specs.len());
        for (name, spec) in specs {
            let name = match (name, &spec) {
                (Some(name), _) => name,
                (None, TransportSpec::Http(_)) => {
                    let generated = format!("http_{http_index}");
                    http_index += 1;
                    generated
                }
                (None, TransportSpec::Stdio(s)) => s.command.clone(),
            };
            named.push((name, spec));
        }

        let attempts = named.iter().map(|(name, spec)| async move {
            (name.clone(), ServerSession::connect(name, spec).await)
        });
        let results = futures::future::join_all(attempts).await;

        let mut errors = Vec::new();
        for (name, result) in results {
            match result {
                Ok(session) => {
                    self.register(session).await;
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to connect tool server");
                    errors.push((name, e));
                }
            }
        }

        {
            let mut state = self.write();
            state.active = Arc::from(state.all.clone());
        }

        tracing::info!(
            servers = ?self.all_names(),
            failed = errors.len(),
            tools = ?self.catalog().names(),
            "connected tool servers"
        );

        errors
    }

    fn count_of(&self, kind: TransportKind) -> usize {
        self.read().all.iter().filter(|s| s.kind() == kind).count()
    }

    // ─── Selection ───────────────────────────────────────────────────────

    /// Replace the active subset with the registered servers named in `names`.
    ///
    /// Unknown names are ignored. Returns the names actually selected, in
    /// registry order; an empty result leaves nothing active.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut state = self.write();
        let selected: Vec<Arc<ServerSession>> = state
            .all
            .iter()
            .filter(|s| names.iter().any(|n| n.as_ref() == s.name()))
            .cloned()
            .collect();
        state.active = Arc::from(selected);

        let selected_names = RegistryState::names(&state.active);
        if selected_names.is_empty() {
            tracing::warn!(
                requested = ?names.iter().map(|n| n.as_ref()).collect::<Vec<_>>(),
                "selection matched no registered server; no tools are active"
            );
        } else {
            tracing::info!(selected = ?selected_names, "selected servers");
        }
        selected_names
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Snapshot of the active subset.
    pub fn active(&self) -> ActiveSessions {
        self.read().active.clone()
    }

    /// Look up any registered session by name.
    pub fn get(&self, name: &str) -> Option<Arc<ServerSession>> {
        self.read().find(name).cloned()
    }

    /// Names of every registered server, in connect order.
    pub fn all_names(&self) -> Vec<String> {
        RegistryState::names(&self.read().all)
    }

    /// Names of the active servers, in registry order.
    pub fn active_names(&self) -> Vec<String> {
        RegistryState::names(&self.read().active)
    }

    /// Tool catalog of the active subset.
    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog::from_sessions(&self.active())
    }

    pub fn is_empty(&self) -> bool {
        self.read().all.is_empty()
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Remove one server and close its transport.
    pub async fn close(&self, name: &str) -> Result<(), McpError> {
        let removed = {
            let mut state = self.write();
            let Some(idx) = state.all.iter().position(|s| s.name() == name) else {
                return Err(McpError::ConfigError {
                    reason: format!("no server named '{name}'"),
                });
            };
            let removed = state.all.remove(idx);
            state.active = state
                .active
                .iter()
                .filter(|s| !Arc::ptr_eq(s, &removed))
                .cloned()
                .collect();
            removed
        };

        removed.close().await
    }

    /// Close every registered server.
    ///
    /// Failures are logged and returned, never propagated; the registry is
    /// empty afterwards.
    pub async fn close_all(&self) -> Vec<(String, McpError)> {
        let sessions = {
            let mut state = self.write();
            state.active = Arc::from(Vec::new());
            std::mem::take(&mut state.all)
        };

        let closes = sessions.iter().map(|session| async move {
            (session.name().to_string(), session.close().await)
        });

        let mut errors = Vec::new();
        for (name, result) in futures::future::join_all(closes).await {
            if let Err(e) = result {
                tracing::warn!(server = %name, error = %e, "failed to close tool server");
                errors.push((name, e));
            }
        }

        tracing::info!(closed = sessions.len(), failed = errors.len(), "tool servers shut down");
        errors
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::HttpServerSpec;
    use crate::test_support::{stub_session, StubTransport};
    use std::collections::HashMap;

    async fn registry_with(names: &[&str]) -> ServerRegistry {
        let registry = ServerRegistry::new();
        for name in names {
            let stub = StubTransport::new(name).with_tool("tool", "ok");
            registry.register(stub_session(name, stub).await).await;
        }
        registry
    }

    #[tokio::test]
    async fn test_new_registry_is_empty() {
        let registry = ServerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.all_names().is_empty());
        assert!(registry.active_names().is_empty());
        assert!(registry.catalog().is_empty());
    }

    #[tokio::test]
    async fn test_first_registration_is_auto_selected() {
        let registry = registry_with(&["a", "b", "c"]).await;
        assert_eq!(registry.all_names(), vec!["a", "b", "c"]);
        assert_eq!(registry.active_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_active_shares_session_references() {
        let registry = registry_with(&["a", "b"]).await;
        registry.select(&["a", "b"]);
        let active = registry.active();
        for session in active.iter() {
            let registered = registry.get(session.name()).unwrap();
            assert!(Arc::ptr_eq(session, &registered));
        }
    }

    #[tokio::test]
    async fn test_select_intersects_with_registered() {
        let registry = registry_with(&["a", "b", "c"]).await;

        let selected = registry.select(&["c", "zzz", "a"]);
        assert_eq!(selected, vec!["a", "c"]);
        assert_eq!(registry.active_names(), vec!["a", "c"]);

        let selected = registry.select(&["nope"]);
        assert!(selected.is_empty());
        assert!(registry.active_names().is_empty());

        let none: [&str; 0] = [];
        assert!(registry.select(&none).is_empty());
    }

    #[tokio::test]
    async fn test_select_is_idempotent() {
        let registry = registry_with(&["a", "b", "c"]).await;
        let first = registry.select(&["b", "c"]);
        let second = registry.select(&["b", "c"]);
        assert_eq!(first, second);
        assert_eq!(registry.all_names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reselection() {
        let registry = registry_with(&["a", "b"]).await;
        registry.select(&["a", "b"]);
        let snapshot = registry.active();
        registry.select(&["b"]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.active().len(), 1);
    }

    #[tokio::test]
    async fn test_reused_name_replaces_and_closes_old() {
        let registry = registry_with(&["a"]).await;
        let old = registry.get("a").unwrap();

        let stub = StubTransport::new("a").with_tool("other", "x");
        registry.register(stub_session("a", stub).await).await;

        assert!(old.is_closed());
        assert_eq!(registry.all_names(), vec!["a"]);
        assert_eq!(registry.catalog().names(), vec!["a/other"]);
    }

    #[tokio::test]
    async fn test_close_one_removes_from_both_sets() {
        let registry = registry_with(&["a", "b"]).await;
        registry.select(&["a", "b"]);
        let a = registry.get("a").unwrap();

        registry.close("a").await.unwrap();
        assert!(a.is_closed());
        assert_eq!(registry.all_names(), vec!["b"]);
        assert_eq!(registry.active_names(), vec!["b"]);
        assert!(registry.close("a").await.is_err());
    }

    #[tokio::test]
    async fn test_close_all_collects_failures() {
        let registry = ServerRegistry::new();
        let good = StubTransport::new("good").with_tool("t", "ok");
        let good_seen = good.handle();
        let bad = StubTransport::new("bad").with_tool("t", "ok").failing_close();
        registry.register(stub_session("good", good).await).await;
        registry.register(stub_session("bad", bad).await).await;

        let errors = registry.close_all().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "bad");
        assert_eq!(good_seen.close_count(), 1);
        assert!(registry.is_empty());
        assert!(registry.active_names().is_empty());
    }

    #[tokio::test]
    async fn test_unnamed_stdio_connect_is_config_error() {
        let registry = ServerRegistry::new();
        let spec = TransportSpec::Stdio(crate::mcp_client::types::StdioServerSpec {
            command: "python".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
        });
        let err = registry.connect(None, &spec).await.unwrap_err();
        assert!(matches!(err, McpError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_connect_all_reports_failures_and_keeps_going() {
        let registry = registry_with(&["a"]).await;
        let specs = vec![
            (
                Some("ghost".to_string()),
                TransportSpec::Stdio(crate::mcp_client::types::StdioServerSpec {
                    command: "toolmesh-definitely-not-a-real-binary".into(),
                    args: vec![],
                    env: HashMap::new(),
                    cwd: None,
                }),
            ),
            (
                None,
                TransportSpec::Http(HttpServerSpec {
                    url: "definitely not a url".into(),
                    headers: HashMap::new(),
                }),
            ),
        ];

        let errors = registry.connect_all(specs).await;
        let failed: Vec<&str> = errors.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(failed, vec!["ghost", "http_0"]);
        assert_eq!(registry.all_names(), vec!["a"]);
        assert_eq!(registry.active_names(), vec!["a"]);
    }
}
