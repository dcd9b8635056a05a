//! Flattened, namespaced tool list of the active servers.

use std::sync::Arc;

use super::session::ServerSession;
use super::types::ToolDescriptor;

/// Every tool of the active servers, in registry order.
///
/// Names are never de-duplicated; two servers exposing the same local tool
/// simply appear twice under different prefixes.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn from_sessions(sessions: &[Arc<ServerSession>]) -> Self {
        let tools = sessions
            .iter()
            .flat_map(|s| s.tools().iter().cloned())
            .collect();
        Self { tools }
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Qualified names, in catalog order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.qualified_name.clone()).collect()
    }

    pub fn get(&self, qualified_name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.qualified_name == qualified_name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One line per tool, for listings.
    pub fn summary(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("{}: {}", t.qualified_name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
