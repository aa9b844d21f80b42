pub mod builtin;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use self::builtin::{
    CalendarBackend, CalendarReadTool, CalendarWriteTool, CurrentTimeTool, MemorySearchTool,
    MemoryStoreTool,
};
use crate::error::ToolError;
use crate::memory::MemoryService;
use crate::permissions::PermissionSnapshot;

/// Trait for all tools that can be invoked by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool
    fn name(&self) -> &str;

    /// Human-readable description injected into the system prompt
    fn description(&self) -> &str;

    /// Permission key that must be granted for the tool to be offered
    fn permission(&self) -> Option<&str> {
        None
    }

    /// Run the tool on a raw string (often JSON) argument
    async fn invoke(&self, input: &str) -> Result<String, ToolError>;
}

/// Static catalog of every tool the host knows about
///
/// The catalog is never consulted directly by the agent; it is resolved into a
/// [`ToolSet`] against a permission snapshot when an executor is built.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry populated with the built-in tools.
    ///
    /// Calendar tools are only registered when the host supplies a backend.
    pub fn with_builtin_tools(
        memory: Arc<MemoryService>,
        calendar: Option<Arc<dyn CalendarBackend>>,
    ) -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(MemorySearchTool::new(memory.clone())));
        registry.register(Arc::new(MemoryStoreTool::new(memory)));
        registry.register(Arc::new(CurrentTimeTool::new()));

        if let Some(calendar) = calendar {
            registry.register(Arc::new(CalendarReadTool::new(calendar.clone())));
            registry.register(Arc::new(CalendarWriteTool::new(calendar)));
        }

        debug!("ToolRegistry created with {} tools", registry.len());
        registry
    }

    /// Register a tool in the catalog
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Names in registration order (may contain duplicates)
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The tools usable under `permissions`.
    ///
    /// Gated tools whose permission is not granted are dropped. When several available tools
    /// share a name, the first registered wins.
    pub fn resolve(&self, permissions: &dyn PermissionSnapshot) -> ToolSet {
        let mut seen = HashSet::new();
        let mut available = Vec::new();

        for tool in &self.tools {
            if let Some(permission) = tool.permission() {
                if !permissions.is_granted(permission) {
                    debug!(
                        "Tool '{}' unavailable: permission '{}' not granted",
                        tool.name(),
                        permission
                    );
                    continue;
                }
            }
            if !seen.insert(tool.name().to_string()) {
                debug!("Tool '{}' shadowed by an earlier registration", tool.name());
                continue;
            }
            available.push(tool.clone());
        }

        ToolSet { tools: available }
    }
}

/// Tools available to one agent, resolved once at construction
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Case-sensitive exact lookup
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One `- name: description` line per tool, for prompts
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{GrantedPermissions, PermissionPolicy};

    struct NamedTool {
        name: &'static str,
        output: &'static str,
        permission: Option<&'static str>,
    }

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn permission(&self) -> Option<&str> {
            self.permission
        }

        async fn invoke(&self, _input: &str) -> Result<String, ToolError> {
            Ok(self.output.to_string())
        }
    }

    fn tool(
        name: &'static str,
        output: &'static str,
        permission: Option<&'static str>,
    ) -> Arc<dyn Tool> {
        Arc::new(NamedTool {
            name,
            output,
            permission,
        })
    }

    #[test]
    fn resolve_filters_by_permission() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("current_time", "now", None));
        registry.register(tool("calendar_read", "events", Some("calendar.read")));
        registry.register(tool("calendar_write", "created", Some("calendar.write")));

        let granted: GrantedPermissions = ["calendar.read"].into_iter().collect();
        let set = registry.resolve(&granted);

        assert_eq!(set.names(), vec!["current_time", "calendar_read"]);
        assert_eq!(registry.resolve(&PermissionPolicy::default()).len(), 1);
    }

    #[tokio::test]
    async fn names_are_unique_per_snapshot() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("lookup", "gated", Some("contacts.read")));
        registry.register(tool("lookup", "fallback", None));

        let denied = registry.resolve(&GrantedPermissions::none());
        let allowed = registry.resolve(&PermissionPolicy::allow_all());

        assert_eq!(denied.len(), 1);
        assert_eq!(allowed.len(), 1);
        let denied_out = denied.get("lookup").unwrap().invoke("").await.unwrap();
        let allowed_out = allowed.get("lookup").unwrap().invoke("").await.unwrap();
        assert_eq!(denied_out, "fallback");
        assert_eq!(allowed_out, "gated");
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("current_time", "now", None));
        let set = registry.resolve(&GrantedPermissions::none());

        assert!(set.get("current_time").is_some());
        assert!(set.get("Current_Time").is_none());
        assert_eq!(set.describe(), "- current_time: test tool");
    }
}
