use crate::approval::ApprovalManager;
use crate::tools::traits::ExecutionContext;
use crate::tools::types::ToolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Decision returned by a hook before tool execution.
#[derive(Debug, Clone)]
pub enum HookDecision {
    /// Allow the tool call to proceed with its current arguments.
    Allow,
    /// Veto the tool call with the given reason.
    Deny(String),
    /// Allow, substituting the given arguments for everything inward.
    Rewrite(Value),
}

/// Lifecycle hook for the tool wrapping pipeline.
///
/// Pre-call hooks run before any other layer and may veto or rewrite the
/// call; post-call hooks observe (and may rewrite) the result after the full
/// inward stack returns.
pub trait ToolHook: Send + Sync + std::fmt::Debug {
    /// Called before the cache/retry/checkpoint layers see the call.
    fn before_tool<'a>(
        &'a self,
        tool_name: &'a str,
        args: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = HookDecision> + Send + 'a>>;

    /// Called after the inward stack returns.
    fn after_tool<'a>(
        &'a self,
        tool_name: &'a str,
        result: &'a mut ToolResult,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

// ── Risk classification ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[must_use]
pub fn classify_risk(tool_name: &str) -> RiskLevel {
    match tool_name {
        "shell" => RiskLevel::High,
        "file_write" | "file_delete" => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Short human-readable summary of a call's arguments for approval prompts.
#[must_use]
pub fn summarize_args(tool_name: &str, args: &Value) -> String {
    match tool_name {
        "shell" => args
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("(unknown)")
            .to_string(),
        "file_write" => {
            let path = args.get("path").and_then(Value::as_str).unwrap_or("?");
            let len = args
                .get("content")
                .and_then(Value::as_str)
                .map_or(0, str::len);
            format!("write {len} bytes to {path}")
        }
        _ => serde_json::to_string(args).unwrap_or_default(),
    }
}

// ── ApprovalHook ────────────────────────────────────────────────────

/// Routes risk-classified tool calls through the approval manager before any
/// inner layer runs. The tool name doubles as the correlation key, so an
/// operator decision recorded ahead of time answers instantly.
#[derive(Debug)]
pub struct ApprovalHook {
    approvals: Arc<ApprovalManager>,
    /// Lowest risk level that needs human sign-off.
    threshold: RiskLevel,
}

impl ApprovalHook {
    pub fn new(approvals: Arc<ApprovalManager>) -> Self {
        Self {
            approvals,
            threshold: RiskLevel::Medium,
        }
    }

    pub fn with_threshold(mut self, threshold: RiskLevel) -> Self {
        self.threshold = threshold;
        self
    }
}

impl ToolHook for ApprovalHook {
    fn before_tool<'a>(
        &'a self,
        tool_name: &'a str,
        args: &'a Value,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = HookDecision> + Send + 'a>> {
        Box::pin(async move {
            if classify_risk(tool_name) < self.threshold {
                return HookDecision::Allow;
            }

            let summary = summarize_args(tool_name, args);
            tracing::info!(tool = tool_name, summary = %summary, "requesting approval");

            let approved = self
                .approvals
                .request(tool_name, tool_name, args, &ctx.cancel)
                .await;
            if approved {
                HookDecision::Allow
            } else {
                HookDecision::Deny(format!("approval denied for '{tool_name}' ({summary})"))
            }
        })
    }

    fn after_tool<'a>(
        &'a self,
        _tool_name: &'a str,
        _result: &'a mut ToolResult,
        _ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {})
    }
}
