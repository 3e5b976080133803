use crate::approval::{ApprovalManager, PendingApprovalSnapshot};
use crate::config::OverseerConfig;
use crate::error::Result;
use crate::events::{EventBus, OrchestratorEvent};
use crate::guard::{GuardSnapshot, RunGuard};
use crate::subagents::{
    AgentTypeRegistry, ChildRunner, SubagentResult, SubagentSnapshot, SubagentSpawner,
    SubagentTask,
};
use crate::tools::{
    ApprovalHook, ExecutionContext, RetryPolicy, ToolCallRequest, ToolPipeline, ToolRegistry,
    ToolResult,
};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Serializable view of the whole session for a supervising UI.
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub run_id: String,
    pub guard: GuardSnapshot,
    pub subagents: Vec<SubagentSnapshot>,
    pub pending_approvals: Vec<PendingApprovalSnapshot>,
}

/// One root agent run: the tool pipeline, approval arbitration, run limits
/// and subagent spawning wired to a shared event bus and one cancellation
/// root. Dropping or cancelling the session tears all of it down.
pub struct AgentSession {
    config: OverseerConfig,
    run_id: String,
    workspace_dir: PathBuf,
    events: EventBus,
    approvals: Arc<ApprovalManager>,
    guard: Arc<RunGuard>,
    pipeline: ToolPipeline,
    spawner: Arc<SubagentSpawner>,
    cancel: CancellationToken,
    sequence: AtomicU64,
}

impl AgentSession {
    pub fn new(
        config: OverseerConfig,
        registry: ToolRegistry,
        agent_types: AgentTypeRegistry,
        runner: Arc<dyn ChildRunner>,
        workspace_dir: impl Into<PathBuf>,
    ) -> Self {
        let workspace_dir = workspace_dir.into();
        let run_id = format!("run_{}", Uuid::new_v4().simple());
        let events = EventBus::new();
        let cancel = CancellationToken::new();
        let approvals = Arc::new(ApprovalManager::new(events.clone()));
        let guard = Arc::new(RunGuard::new(config.guard.clone()));
        let registry = Arc::new(registry);

        let mut pipeline = ToolPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&guard),
            RetryPolicy::new(config.retry.clone()),
            events.clone(),
        );
        pipeline.add_hook(Arc::new(ApprovalHook::new(Arc::clone(&approvals))));

        let spawner = Arc::new(SubagentSpawner::new(
            config.spawner.clone(),
            agent_types,
            Arc::clone(&guard),
            Arc::clone(&approvals),
            runner,
            events.clone(),
            cancel.child_token(),
            workspace_dir.clone(),
        ));

        tracing::info!(run_id = %run_id, "agent session started");
        Self {
            config,
            run_id,
            workspace_dir,
            events,
            approvals,
            guard,
            pipeline,
            spawner,
            cancel,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Execute one tool call through the full wrapping pipeline.
    pub async fn call_tool(&self, tool_name: &str, args: Value) -> Result<ToolResult> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let request = ToolCallRequest::new(tool_name, args, self.run_id.clone(), sequence);
        let ctx = ExecutionContext::new(self.run_id.clone(), self.workspace_dir.clone())
            .with_cancel(self.cancel.child_token());
        self.pipeline.execute(&request, &ctx).await
    }

    /// Spawn a batch of subagents. Ids come back in submission order.
    pub fn spawn_subagents(&self, tasks: Vec<SubagentTask>) -> Result<Vec<String>> {
        self.spawner.spawn_parallel(tasks)
    }

    pub async fn wait_subagent(&self, task_id: &str) -> Result<SubagentResult> {
        self.spawner.wait(task_id).await
    }

    pub async fn wait_subagents(&self, task_ids: &[String]) -> Result<Vec<SubagentResult>> {
        self.spawner.wait_all(task_ids).await
    }

    /// Mark that verification evidence was observed this run.
    pub fn record_verification_evidence(&self) {
        self.guard.record_verification_evidence();
    }

    /// Gate check before the run may declare itself finished.
    pub fn check_completion(&self, observed_outputs: &[String]) -> Result<()> {
        self.guard
            .check_completion_gate(&self.config.completion, observed_outputs)?;
        Ok(())
    }

    /// Tear the session down: pending approvals are denied, queued and
    /// running subagents are cancelled, and in-flight tool calls observe
    /// their context token. Idempotent.
    pub fn cancel_all(&self, reason: &str) {
        tracing::info!(run_id = %self.run_id, reason, "cancelling session");
        self.cancel.cancel();
        self.spawner.cancel_all();
        self.approvals.cancel_all(reason);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    pub fn guard(&self) -> &Arc<RunGuard> {
        &self.guard
    }

    pub fn spawner(&self) -> &Arc<SubagentSpawner> {
        &self.spawner
    }

    pub fn pipeline(&self) -> &ToolPipeline {
        &self.pipeline
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            run_id: self.run_id.clone(),
            guard: self.guard.snapshot(),
            subagents: self.spawner.snapshots(),
            pending_approvals: self.approvals.list_pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompletionContract;
    use crate::error::{GuardError, OverseerError};
    use crate::guard::RunGuard;
    use crate::subagents::{AgentType, SubagentOutcome, SubagentStatus};
    use crate::tools::Tool;
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

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

    #[derive(Debug)]
    struct ShellTool;

    impl Tool for ShellTool {
        fn name(&self) -> &str {
            "shell"
        }

        fn description(&self) -> &str {
            "pretends to run a command"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn execute<'a>(
            &'a self,
            _args: Value,
            _ctx: &'a ExecutionContext,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolResult>> + Send + 'a>> {
            Box::pin(async move { Ok(ToolResult::ok("ran")) })
        }
    }

    struct StubRunner;

    impl ChildRunner for StubRunner {
        fn run<'a>(
            &'a self,
            task: &'a SubagentTask,
            _agent_type: &'a AgentType,
            _guard: &'a RunGuard,
            _approvals: &'a ApprovalManager,
            ctx: &'a ExecutionContext,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<SubagentOutcome>> + Send + 'a>> {
            Box::pin(async move {
                tokio::select! {
                    () = ctx.cancel.cancelled() => {}
                    () = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
                Ok(SubagentOutcome {
                    output: format!("done: {}", task.description),
                    tool_calls: 0,
                    tokens_used: 0,
                })
            })
        }
    }

    fn session(config: OverseerConfig) -> AgentSession {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(ShellTool));
        AgentSession::new(
            config,
            registry,
            AgentTypeRegistry::with_builtin_types(),
            Arc::new(StubRunner),
            ".",
        )
    }

    #[tokio::test]
    async fn low_risk_tool_runs_without_approval() {
        let session = session(OverseerConfig::default());
        let result = session.call_tool("echo", json!({"msg": "hi"})).await.unwrap();
        assert!(result.success);
        assert_eq!(session.guard().snapshot().total_calls, 1);
    }

    #[tokio::test]
    async fn high_risk_tool_honors_pre_approval() {
        let session = session(OverseerConfig::default());
        session.approvals().resolve_by_key("shell", true);

        let result = session.call_tool("shell", json!({"command": "ls"})).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn high_risk_tool_denied_without_approval() {
        let session = session(OverseerConfig::default());
        session.approvals().resolve_by_key("shell", false);

        let err = session
            .call_tool("shell", json!({"command": "ls"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("approval denied"));
    }

    #[tokio::test]
    async fn subagents_round_trip_through_the_session() {
        let session = session(OverseerConfig::default());
        let ids = session
            .spawn_subagents(vec![SubagentTask::new("explore", "general", "root")])
            .unwrap();
        let results = session.wait_subagents(&ids).await.unwrap();
        assert_eq!(results[0].status, SubagentStatus::Completed);
    }

    #[tokio::test]
    async fn completion_gate_blocks_until_evidence() {
        let config = OverseerConfig {
            completion: CompletionContract {
                require_verification_evidence: true,
                required_outputs: Vec::new(),
            },
            ..OverseerConfig::default()
        };
        let session = session(config);

        let err = session.check_completion(&[]).unwrap_err();
        assert!(matches!(
            err,
            OverseerError::Guard(GuardError::CompletionGateDenied { .. })
        ));

        session.record_verification_evidence();
        session.check_completion(&[]).unwrap();
    }

    #[tokio::test]
    async fn cancel_all_tears_everything_down() {
        let session = session(OverseerConfig::default());
        let ids = session
            .spawn_subagents(vec![SubagentTask::new("slow", "general", "root")])
            .unwrap();

        session.cancel_all("operator abort");
        let results = session.wait_subagents(&ids).await.unwrap();
        // Child either never started or stopped at its next await point.
        assert!(results
            .iter()
            .all(|r| r.status == SubagentStatus::Cancelled || r.status == SubagentStatus::Completed));
        assert!(!session.approvals().has_pending());

        // Idempotent.
        session.cancel_all("operator abort");
    }

    #[tokio::test]
    async fn snapshot_reflects_session_state() {
        let session = session(OverseerConfig::default());
        session.call_tool("echo", json!({})).await.unwrap();
        let ids = session
            .spawn_subagents(vec![SubagentTask::new("task", "general", "root")])
            .unwrap();
        session.wait_subagents(&ids).await.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.guard.total_calls, 1);
        assert_eq!(snapshot.subagents.len(), 1);
        assert!(snapshot.pending_approvals.is_empty());
        let encoded = serde_json::to_string(&snapshot).unwrap();
        assert!(encoded.contains(session.run_id()));
    }
}
