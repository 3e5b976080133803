//! End-to-end coverage of the orchestration core through the public API:
//! run limits, approval arbitration, the wrapped pipeline and subagent
//! spawning working together inside one session.

use overseer::{
    AgentSession, AgentType, AgentTypeRegistry, ApprovalManager, ChildRunner, CompletionContract,
    ExecutionContext,
    GuardConfig, GuardError, OverseerConfig, OverseerError, RunGuard, SpawnerConfig,
    SubagentOutcome, SubagentStatus, SubagentTask, Tool, ToolError, ToolFlags, ToolRegistry,
    ToolResult,
};
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_test::assert_ok;

// ── Fixtures ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct FileReadTool;

impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "reads a file"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn flags(&self) -> ToolFlags {
        ToolFlags {
            mutating: false,
            cacheable: true,
        }
    }

    fn execute<'a>(
        &'a self,
        args: Value,
        _ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolResult>> + Send + 'a>> {
        Box::pin(async move {
            let path = args.get("path").and_then(Value::as_str).unwrap_or("?");
            Ok(ToolResult::ok(format!("contents of {path}")))
        })
    }
}

#[derive(Debug)]
struct ShellTool;

impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "runs a command"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn execute<'a>(
        &'a self,
        _args: Value,
        _ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolResult>> + Send + 'a>> {
        Box::pin(async move { Ok(ToolResult::ok("command ran")) })
    }
}

/// Fails transiently until `succeed_after` calls have happened.
#[derive(Debug)]
struct FlakyTool {
    calls: AtomicU32,
    succeed_after: u32,
}

impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "fetches a url"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn execute<'a>(
        &'a self,
        _args: Value,
        _ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ToolResult>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.succeed_after {
                return Err(ToolError::Transient {
                    name: "web_fetch".into(),
                    message: "connection reset".into(),
                }
                .into());
            }
            Ok(ToolResult::ok("fetched"))
        })
    }
}

struct StubRunner {
    delay: Duration,
    running: AtomicU32,
    max_running: AtomicU32,
}

impl StubRunner {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: AtomicU32::new(0),
            max_running: AtomicU32::new(0),
        }
    }
}

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
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            // Cooperative: stop issuing work once the context token fires.
            tokio::select! {
                () = ctx.cancel.cancelled() => {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                    return Ok(SubagentOutcome {
                        output: String::new(),
                        tool_calls: 0,
                        tokens_used: 0,
                    });
                }
                () = tokio::time::sleep(self.delay) => {}
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(SubagentOutcome {
                output: format!("done: {}", task.description),
                tool_calls: 1,
                tokens_used: 10,
            })
        })
    }
}

fn session_with(config: OverseerConfig, runner: Arc<dyn ChildRunner>) -> AgentSession {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(FileReadTool));
    registry.register(Box::new(ShellTool));
    registry.register(Box::new(FlakyTool {
        calls: AtomicU32::new(0),
        succeed_after: 2,
    }));
    AgentSession::new(
        config,
        registry,
        AgentTypeRegistry::with_builtin_types(),
        runner,
        ".",
    )
}

fn default_session() -> AgentSession {
    session_with(
        OverseerConfig::default(),
        Arc::new(StubRunner::new(Duration::from_millis(5))),
    )
}

// ── Run limits ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn fourth_call_past_per_tool_budget_is_denied() {
    let config = OverseerConfig {
        guard: GuardConfig {
            max_calls_per_tool: 3,
            ..GuardConfig::default()
        },
        ..OverseerConfig::default()
    };
    let session = session_with(config, Arc::new(StubRunner::new(Duration::ZERO)));

    for i in 0..3 {
        let result = session
            .call_tool("file_read", json!({"path": format!("src/{i}.rs")}))
            .await
            .unwrap();
        assert!(result.success);
    }

    let err = session
        .call_tool("file_read", json!({"path": "src/3.rs"}))
        .await
        .unwrap_err();
    match err {
        OverseerError::Guard(GuardError::ToolBudgetExceeded { tool, used, limit }) => {
            assert_eq!(tool, "file_read");
            assert_eq!((used, limit), (3, 3));
        }
        other => panic!("expected per-tool budget denial, got {other}"),
    }

    // A different tool still has budget.
    session.approvals().resolve_by_key("shell", true);
    assert!(session.call_tool("shell", json!({})).await.is_ok());
}

#[tokio::test]
async fn identical_input_loop_hits_repeat_cap() {
    let session = default_session();

    // Identical arguments each time. The first call is answered by the
    // handler, the next two from cache; admission still counts them all.
    for _ in 0..3 {
        session
            .call_tool("file_read", json!({"path": "same.rs"}))
            .await
            .unwrap();
    }
    let err = session
        .call_tool("file_read", json!({"path": "same.rs"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OverseerError::Guard(GuardError::RepeatCapExceeded { .. })
    ));
}

#[tokio::test]
async fn transient_failures_retry_within_one_admitted_call() {
    let session = default_session();

    let result = session.call_tool("web_fetch", json!({"url": "x"})).await.unwrap();
    assert_eq!(result.output, "fetched");
    // Three handler attempts, one admitted call, streak reset by success.
    let snapshot = session.guard().snapshot();
    assert_eq!(snapshot.total_calls, 1);
    assert_eq!(snapshot.failure_streak, 0);
}

// ── Approval arbitration ─────────────────────────────────────────────────────

#[tokio::test]
async fn decision_before_and_after_request_are_equivalent() {
    // Early path: decision recorded before the call arrives.
    let early = default_session();
    early.approvals().resolve_by_key("shell", true);
    let early_result = early.call_tool("shell", json!({"command": "ls"})).await;

    // Late path: the call suspends, then the decision lands.
    let late = Arc::new(default_session());
    let call = {
        let late = Arc::clone(&late);
        tokio::spawn(async move { late.call_tool("shell", json!({"command": "ls"})).await })
    };
    for _ in 0..100 {
        if late.approvals().has_pending() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(late.approvals().has_pending());
    late.approvals().resolve_by_key("shell", true);
    let late_result = call.await.unwrap();

    assert_eq!(
        early_result.unwrap().output,
        late_result.unwrap().output
    );
}

#[tokio::test]
async fn denied_approval_blocks_the_tool_without_recording_an_outcome() {
    let session = default_session();
    session.approvals().resolve_by_key("shell", false);

    let err = session.call_tool("shell", json!({"command": "rm"})).await.unwrap_err();
    assert!(matches!(
        err,
        OverseerError::Tool(ToolError::HookDenied { .. })
    ));
    // The call was admitted but no outcome was recorded: a veto is not a
    // tool failure.
    assert_eq!(session.guard().snapshot().failure_streak, 0);
}

// ── Subagents ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn five_tasks_under_cap_two_never_overlap_more_than_two() {
    let config = OverseerConfig {
        spawner: SpawnerConfig {
            max_parallel: 2,
            ..SpawnerConfig::default()
        },
        guard: GuardConfig {
            max_parallel_subagents: 8,
            ..GuardConfig::default()
        },
        ..OverseerConfig::default()
    };
    let runner = Arc::new(StubRunner::new(Duration::from_millis(20)));
    let session = session_with(config, Arc::clone(&runner) as Arc<dyn ChildRunner>);

    let tasks: Vec<SubagentTask> = (0..5)
        .map(|i| SubagentTask::new(format!("t{i}"), "general", session.run_id()))
        .collect();
    let ids = session.spawn_subagents(tasks).unwrap();
    let results = session.wait_subagents(&ids).await.unwrap();

    assert!(runner.max_running.load(Ordering::SeqCst) <= 2);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.status, SubagentStatus::Completed);
        assert_eq!(result.output, format!("done: t{i}"));
    }
    // Every parallel slot was returned.
    assert_eq!(session.guard().snapshot().parallel_subagents, 0);
}

#[tokio::test]
async fn batch_larger_than_guard_limit_is_denied_whole() {
    let config = OverseerConfig {
        guard: GuardConfig {
            max_parallel_subagents: 2,
            ..GuardConfig::default()
        },
        ..OverseerConfig::default()
    };
    let session = session_with(config, Arc::new(StubRunner::new(Duration::ZERO)));

    let tasks: Vec<SubagentTask> = (0..3)
        .map(|i| SubagentTask::new(format!("t{i}"), "general", session.run_id()))
        .collect();
    let err = session.spawn_subagents(tasks).unwrap_err();
    assert!(matches!(
        err,
        OverseerError::Guard(GuardError::SubagentBatchDenied { .. })
    ));
    assert!(session.spawner().snapshots().is_empty());
}

// ── Cancellation and completion ──────────────────────────────────────────────

#[tokio::test]
async fn cancel_all_cascades_to_approvals_and_children() {
    let session = Arc::new(session_with(
        OverseerConfig::default(),
        Arc::new(StubRunner::new(Duration::from_secs(5))),
    ));

    let ids = session
        .spawn_subagents(vec![SubagentTask::new("slow", "general", session.run_id())])
        .unwrap();

    // A high-risk call suspends on approval.
    let blocked = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.call_tool("shell", json!({"command": "ls"})).await })
    };
    for _ in 0..100 {
        if session.approvals().has_pending() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    session.cancel_all("operator abort");

    // The suspended call resolves to a denial, not a hang.
    let err = blocked.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        OverseerError::Tool(ToolError::HookDenied { .. })
    ));

    let results = session.wait_subagents(&ids).await.unwrap();
    assert_eq!(results[0].status, SubagentStatus::Cancelled);
    assert!(!session.approvals().has_pending());
}

#[tokio::test]
async fn completion_gate_denies_until_contract_is_met() {
    let config = OverseerConfig {
        completion: CompletionContract {
            require_verification_evidence: true,
            required_outputs: vec!["reports/*.md".into()],
        },
        ..OverseerConfig::default()
    };
    let session = session_with(config, Arc::new(StubRunner::new(Duration::ZERO)));

    let err = session.check_completion(&[]).unwrap_err();
    assert!(matches!(
        err,
        OverseerError::Guard(GuardError::CompletionGateDenied { .. })
    ));

    session.record_verification_evidence();
    let err = session.check_completion(&["notes.txt".into()]).unwrap_err();
    assert!(err.to_string().contains("reports/*.md"));

    assert_ok!(session.check_completion(&["reports/summary.md".into()]));
}
