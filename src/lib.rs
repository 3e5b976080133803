#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

//! Orchestration core for a tool-calling agent: human-in-the-loop approval
//! arbitration, deterministic run limits, a layered tool execution pipeline
//! and bounded subagent spawning, all sharing one event bus and one
//! cancellation root.

pub mod approval;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod session;
pub mod subagents;
pub mod tools;

pub use approval::{ApprovalManager, PendingApprovalSnapshot};
pub use config::{CompletionContract, GuardConfig, OverseerConfig, RetryConfig, SpawnerConfig};
pub use error::{
    ApprovalError, ConfigError, GuardError, OverseerError, Result, SubagentError, ToolError,
};
pub use events::{EventBus, OrchestratorEvent};
pub use guard::{GuardSnapshot, RunGuard};
pub use session::{AgentSession, SessionSnapshot};
pub use subagents::{
    AgentType, AgentTypeRegistry, ChildRunner, SubagentOutcome, SubagentResult, SubagentSnapshot,
    SubagentSpawner, SubagentStatus, SubagentTask,
};
pub use tools::{
    ApprovalHook, ExecutionContext, HookDecision, RetryPolicy, RiskLevel, Tool, ToolCallRequest,
    ToolFlags, ToolHook, ToolPipeline, ToolRegistry, ToolResult, ToolSpec,
};
