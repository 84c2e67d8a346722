//! Tool registry: name → tool
//!
//! Registering a name twice replaces the earlier tool.

use crate::traits::Tool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Registry of executable tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "Replacing registered tool");
        } else {
            tracing::debug!(tool = %name, version = tool.version(), "Tool registered");
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Name → version for every registered tool.
    pub fn list_tools(&self) -> BTreeMap<String, String> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.version().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_tools())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTool;
    use conductor_types::PermissionLevel;

    #[test]
    fn register_get_exists() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool::new("echo")));

        assert!(registry.exists("echo"));
        assert!(!registry.exists("wipe"));
        assert_eq!(registry.get("echo").unwrap().name(), "echo");
        assert!(registry.get("wipe").is_none());
    }

    #[test]
    fn reregistration_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool::new("deploy")));
        registry.register(Arc::new(
            MockTool::new("deploy").with_permission(PermissionLevel::Admin),
        ));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("deploy").unwrap().permission_level(),
            PermissionLevel::Admin
        );
    }

    #[test]
    fn list_tools_reports_versions() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool::new("echo")));
        assert_eq!(registry.list_tools().get("echo").map(String::as_str), Some("1.0.0"));
    }
}
