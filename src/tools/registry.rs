use super::traits::{ExecutionContext, Tool};
use super::types::ToolSpec;
use std::collections::HashMap;
use std::sync::Arc;

/// Central mapping from tool name to invocable handler.
///
/// Owns no concurrency: construct it, register tools, then share it behind an
/// `Arc`. Execution with cross-cutting layers goes through the wrapping
/// pipeline, not the registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let tool: Arc<dyn Tool> = Arc::from(tool);
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Remove a tool by name. Returns whether it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Return sorted list of registered tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Return specs for all registered tools.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    /// Return specs filtered by the execution context's allowed-tools set.
    pub fn specs_for_context(&self, ctx: &ExecutionContext) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .filter(|(name, _)| ctx.is_tool_allowed(name))
            .map(|(_, tool)| tool.spec())
            .collect()
    }
}
