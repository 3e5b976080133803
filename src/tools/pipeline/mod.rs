pub mod cache;
pub mod checkpoint;
pub mod hooks;
pub mod retry;

pub use cache::ToolCache;
pub use checkpoint::{CheckpointEntry, CheckpointStore};
pub use hooks::{ApprovalHook, HookDecision, RiskLevel, ToolHook, classify_risk, summarize_args};
pub use retry::RetryPolicy;

use crate::error::{OverseerError, ToolError};
use crate::events::{EventBus, OrchestratorEvent};
use crate::guard::RunGuard;
use crate::tools::registry::ToolRegistry;
use crate::tools::traits::{ExecutionContext, Tool};
use crate::tools::types::{ToolCallRequest, ToolResult, argument_fingerprint};
use serde_json::Value;
use std::sync::Arc;

/// Composes every raw tool handler with the cross-cutting layers in a fixed
/// order, innermost first: checkpoint, cache, retry, hooks.
///
/// The order is a contract. Hooks can veto or rewrite a call before the
/// cache or retry layers ever see it, and a checkpoint is captured
/// immediately before the real mutation, never before a cache
/// short-circuit.
pub struct ToolPipeline {
    registry: Arc<ToolRegistry>,
    guard: Arc<RunGuard>,
    cache: ToolCache,
    checkpoints: Arc<CheckpointStore>,
    retry: RetryPolicy,
    hooks: Vec<Arc<dyn ToolHook>>,
    events: EventBus,
}

impl ToolPipeline {
    pub fn new(
        registry: Arc<ToolRegistry>,
        guard: Arc<RunGuard>,
        retry: RetryPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            guard,
            cache: ToolCache::new(),
            checkpoints: Arc::new(CheckpointStore::new()),
            retry,
            hooks: Vec::new(),
            events,
        }
    }

    /// Register an externally supplied hook. Hooks run in registration order.
    pub fn add_hook(&mut self, hook: Arc<dyn ToolHook>) {
        self.hooks.push(hook);
    }

    /// Checkpoint history for the session that owns this pipeline.
    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    /// Execute one tool call through the full layer stack.
    pub async fn execute(
        &self,
        request: &ToolCallRequest,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, OverseerError> {
        let tool_name = request.tool_name.as_str();

        let Some(tool) = self.registry.get(tool_name) else {
            return Err(ToolError::NotFound {
                name: tool_name.to_string(),
            }
            .into());
        };
        if !ctx.is_tool_allowed(tool_name) {
            return Err(ToolError::HookDenied {
                name: tool_name.to_string(),
                reason: "tool is not in the allowed set for this run".into(),
            }
            .into());
        }

        // Admission control sees the arguments as issued, before any rewrite.
        let admission_fingerprint = request.fingerprint();
        if let Err(denial) = self
            .guard
            .before_tool_call(tool_name, &admission_fingerprint)
        {
            self.events.emit(OrchestratorEvent::GuardDenied {
                reason: denial.to_string(),
            });
            return Err(denial.into());
        }

        tracing::info!(
            tool = tool_name,
            run_id = %ctx.run_id,
            sequence = request.sequence,
            "tool execution started"
        );

        // Hook layer: outermost, may veto or rewrite before anything inward.
        let mut args = request.args.clone();
        for hook in &self.hooks {
            match hook.before_tool(tool_name, &args, ctx).await {
                HookDecision::Allow => {}
                HookDecision::Deny(reason) => {
                    tracing::warn!(tool = tool_name, reason = %reason, "tool call vetoed by hook");
                    return Err(ToolError::HookDenied {
                        name: tool_name.to_string(),
                        reason,
                    }
                    .into());
                }
                HookDecision::Rewrite(new_args) => args = new_args,
            }
        }

        let mut result = match self.run_inner_layers(tool, tool_name, &args, ctx).await {
            Ok(result) => result,
            Err(e) => {
                self.guard.after_tool_call(tool_name, false);
                return Err(e);
            }
        };

        for hook in &self.hooks {
            hook.after_tool(tool_name, &mut result, ctx).await;
        }

        self.guard.after_tool_call(tool_name, result.success);
        tracing::info!(
            tool = tool_name,
            run_id = %ctx.run_id,
            success = result.success,
            "tool execution finished"
        );
        Ok(result)
    }

    /// Retry wrapping cache wrapping checkpoint wrapping the raw handler.
    async fn run_inner_layers(
        &self,
        tool: &Arc<dyn Tool>,
        tool_name: &str,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, OverseerError> {
        // Cache and checkpoint key on the arguments the handler will see.
        let fingerprint = argument_fingerprint(args);
        let flags = tool.flags();

        let mut attempt = 1;
        loop {
            if flags.cacheable
                && let Some(hit) = self.cache.get(tool_name, &fingerprint)
            {
                tracing::debug!(tool = tool_name, "cache hit, skipping handler");
                return Ok(hit);
            }

            // Capture immediately before the real mutation. The entry stays
            // available for rewind even when the handler then fails.
            if flags.mutating {
                let paths = tool.affected_paths(args);
                if !paths.is_empty() {
                    self.checkpoints
                        .capture(&paths)
                        .await
                        .map_err(OverseerError::Other)?;
                }
            }

            match tool.execute(args.clone(), ctx).await {
                Ok(result) => {
                    if flags.cacheable && result.success {
                        self.cache.insert(tool_name, &fingerprint, result.clone());
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if self.retry.should_retry(attempt, &e) {
                        let delay = self.retry.backoff_delay(attempt);
                        tracing::warn!(
                            tool = tool_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "transient tool failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(into_tool_error(tool_name, e).into());
                }
            }
        }
    }
}

fn into_tool_error(tool_name: &str, error: anyhow::Error) -> ToolError {
    match error.downcast::<ToolError>() {
        Ok(tool_error) => tool_error,
        Err(other) => ToolError::Execution {
            name: tool_name.to_string(),
            message: other.to_string(),
        },
    }
}
