use super::types::{ToolResult, ToolSpec};
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Ambient state for one tool execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub workspace_dir: PathBuf,
    /// When set, only these tools may execute in this context.
    pub allowed_tools: Option<HashSet<String>>,
    pub turn_number: u32,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            workspace_dir: workspace_dir.into(),
            allowed_tools: None,
            turn_number: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_allowed_tools(mut self, allowed: HashSet<String>) -> Self {
        self.allowed_tools = Some(allowed);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_tool_allowed(&self, name: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .is_none_or(|allowed| allowed.contains(name))
    }

    /// Minimal context for unit tests.
    pub fn test_default() -> Self {
        Self::new("run_test", Path::new("."))
    }
}

/// Cross-cutting behavior flags the wrapping pipeline keys on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolFlags {
    /// Mutating tools get a checkpoint captured before the real handler runs.
    pub mutating: bool,
    /// Cacheable tools may be answered from a prior result with identical
    /// arguments.
    pub cacheable: bool,
}

/// Core tool contract. The pipeline wraps any implementor without knowledge
/// of its internals.
pub trait Tool: Send + Sync {
    /// Tool name (used in model function calling).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON schema for parameters.
    fn parameters_schema(&self) -> Value;

    fn flags(&self) -> ToolFlags {
        ToolFlags::default()
    }

    /// Files this invocation may mutate, so pre-mutation state can be
    /// captured. Only consulted for tools flagged `mutating`.
    fn affected_paths(&self, _args: &Value) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Execute the tool with the given arguments.
    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolResult>> + Send + 'a>>;

    /// Full spec for model registration.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes its input"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn execute<'a>(
            &'a self,
            args: Value,
            _ctx: &'a ExecutionContext,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolResult>> + Send + 'a>> {
            Box::pin(async move { Ok(ToolResult::ok(args.to_string())) })
        }
    }

    #[tokio::test]
    async fn default_flags_are_inert() {
        let tool = EchoTool;
        let flags = tool.flags();
        assert!(!flags.mutating);
        assert!(!flags.cacheable);
        assert!(tool.affected_paths(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn spec_mirrors_trait_accessors() {
        let spec = EchoTool.spec();
        assert_eq!(spec.name, "echo");
        assert_eq!(spec.description, "echoes its input");
    }

    #[test]
    fn context_allows_everything_by_default() {
        let ctx = ExecutionContext::test_default();
        assert!(ctx.is_tool_allowed("anything"));
    }

    #[test]
    fn context_allowed_set_filters() {
        let ctx = ExecutionContext::test_default()
            .with_allowed_tools(HashSet::from(["file_read".to_string()]));
        assert!(ctx.is_tool_allowed("file_read"));
        assert!(!ctx.is_tool_allowed("shell"));
    }
}
