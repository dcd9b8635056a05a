//! Configuration: the tool-server file and the agent settings file.
//!
//! `server.json` maps server names to subprocess launch specs, plus an
//! optional `http_servers` list of streamable-HTTP endpoints:
//!
//! ```json
//! {
//!   "weather": { "command": "python", "args": ["weather.py"] },
//!   "http_servers": ["http://localhost:8000/mcp", { "url": "http://h/mcp", "name": "docs" }]
//! }
//! ```
//!
//! Agent settings are YAML with `${VAR}` / `${VAR:-default}` interpolation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent_core::conversation::{
    ConversationConfig, DEFAULT_MAX_TURNS, DEFAULT_SYSTEM_PROMPT,
};
use crate::agent_core::tool_invoker::{RoutingPolicy, DEFAULT_CALL_TIMEOUT};
use crate::inference::ollama::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::inference::InferenceError;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::{HttpServerSpec, StdioServerSpec, TransportSpec};

/// Key of the HTTP endpoint list inside `server.json`.
const HTTP_SERVERS_KEY: &str = "http_servers";

/// File name searched for when no settings path is given.
const SETTINGS_FILE: &str = "toolmesh.yaml";

// ─── Server File ─────────────────────────────────────────────────────────────

/// One entry of the `http_servers` list in object form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct HttpServerEntry {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

/// Parsed `server.json`, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServersConfig {
    pub stdio: Vec<(String, StdioServerSpec)>,
    /// Unnamed entries are named by the registry on connect.
    pub http: Vec<(Option<String>, HttpServerSpec)>,
}

impl ServersConfig {
    /// Read and parse a server file.
    pub fn load(path: &Path) -> Result<Self, McpError> {
        let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::parse(&raw)
    }

    /// Parse server-file JSON.
    ///
    /// String entries of `http_servers` are named `http_<i>` after their
    /// position in the list.
    pub fn parse(raw: &str) -> Result<Self, McpError> {
        let root: Map<String, Value> =
            serde_json::from_str(raw).map_err(|e| McpError::ConfigError {
                reason: format!("server file must be a JSON object: {e}"),
            })?;

        let mut config = Self::default();
        for (key, value) in root {
            if key == HTTP_SERVERS_KEY {
                config.http = parse_http_servers(value)?;
                continue;
            }

            let spec: StdioServerSpec =
                serde_json::from_value(value).map_err(|e| McpError::ConfigError {
                    reason: format!("invalid stdio server '{key}': {e}"),
                })?;
            config.stdio.push((key, spec));
        }

        tracing::debug!(
            stdio = config.stdio.len(),
            http = config.http.len(),
            "parsed server file"
        );
        Ok(config)
    }

    /// A config holding only unnamed HTTP endpoints.
    pub fn from_urls<S: AsRef<str>>(urls: &[S]) -> Self {
        let mut config = Self::default();
        config.add_urls(urls);
        config
    }

    /// Append unnamed HTTP endpoints.
    pub fn add_urls<S: AsRef<str>>(&mut self, urls: &[S]) {
        self.http.extend(urls.iter().map(|url| {
            (
                None,
                HttpServerSpec {
                    url: url.as_ref().to_string(),
                    headers: HashMap::new(),
                },
            )
        }));
    }

    pub fn is_empty(&self) -> bool {
        self.stdio.is_empty() && self.http.is_empty()
    }

    /// Connection specs in connect order: stdio servers, then HTTP.
    pub fn to_specs(&self) -> Vec<(Option<String>, TransportSpec)> {
        let stdio = self
            .stdio
            .iter()
            .map(|(name, spec)| (Some(name.clone()), TransportSpec::Stdio(spec.clone())));
        let http = self
            .http
            .iter()
            .map(|(name, spec)| (name.clone(), TransportSpec::Http(spec.clone())));
        stdio.chain(http).collect()
    }
}

fn parse_http_servers(value: Value) -> Result<Vec<(Option<String>, HttpServerSpec)>, McpError> {
    let Value::Array(entries) = value else {
        return Err(McpError::ConfigError {
            reason: format!("'{HTTP_SERVERS_KEY}' must be a list"),
        });
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            Value::String(url) => Ok((
                Some(format!("http_{i}")),
                HttpServerSpec {
                    url,
                    headers: HashMap::new(),
                },
            )),
            Value::Object(_) => {
                let entry: HttpServerEntry =
                    serde_json::from_value(entry).map_err(|e| McpError::ConfigError {
                        reason: format!("invalid http server #{i}: {e}"),
                    })?;
                Ok((
                    entry.name,
                    HttpServerSpec {
                        url: entry.url,
                        headers: entry.headers,
                    },
                ))
            }
            other => Err(McpError::ConfigError {
                reason: format!("invalid http server #{i}: expected a URL or an object, got {other}"),
            }),
        })
        .collect()
}

// ─── Agent Settings ──────────────────────────────────────────────────────────

/// Model and conversation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    /// Model calls per prompt; `null` for unbounded.
    pub max_turns: Option<usize>,
    pub call_timeout_secs: u64,
    pub routing: RoutingPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_turns: Some(DEFAULT_MAX_TURNS),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
            routing: RoutingPolicy::default(),
        }
    }
}

impl AgentSettings {
    /// Load a settings file.
    ///
    /// Performs environment-variable interpolation on values matching
    /// `${VAR_NAME}` or `${VAR_NAME:-default}` before parsing.
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, InferenceError> {
        let interpolated = interpolate_env_vars(raw);
        let settings: Self =
            serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
                reason: format!("failed to parse settings: {e}"),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), InferenceError> {
        if self.max_turns == Some(0) {
            return Err(InferenceError::ConfigError {
                reason: "max_turns must be at least 1 (or null for unbounded)".into(),
            });
        }
        if self.call_timeout_secs == 0 {
            return Err(InferenceError::ConfigError {
                reason: "call_timeout_secs must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Apply `OLLAMA_HOST` and `TOOLMESH_MODEL` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
            let host = host.trim();
            self.base_url = if host.contains("://") {
                host.to_string()
            } else {
                format!("http://{host}")
            };
        }
        if let Some(model) = lookup("TOOLMESH_MODEL").filter(|m| !m.trim().is_empty()) {
            self.model = model.trim().to_string();
        }
    }

    pub fn conversation_config(&self) -> ConversationConfig {
        ConversationConfig {
            system_prompt: self.system_prompt.clone(),
            max_turns: self.max_turns,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            routing: self.routing,
        }
    }
}

/// Locate the settings file.
///
/// Checks `TOOLMESH_SETTINGS`, then `toolmesh.yaml` in the working
/// directory, then `<config dir>/toolmesh/toolmesh.yaml`. Returns `None`
/// when nothing exists; defaults apply then.
pub fn find_settings_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TOOLMESH_SETTINGS") {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "TOOLMESH_SETTINGS points to a missing file");
    }

    let local = PathBuf::from(SETTINGS_FILE);
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("toolmesh").join(SETTINGS_FILE))
        .filter(|p| p.exists())
}

// ─── Interpolation ───────────────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` with environment values.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
