use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `Overseer`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum OverseerError {
    // ── Approval arbitration ────────────────────────────────────────────
    #[error("approval: {0}")]
    Approval(#[from] ApprovalError),

    // ── Run limits ──────────────────────────────────────────────────────
    #[error("guard: {0}")]
    Guard(#[from] GuardError),

    // ── Subagent execution ──────────────────────────────────────────────
    #[error("subagent: {0}")]
    Subagent(#[from] SubagentError),

    // ── Tools / pipeline ────────────────────────────────────────────────
    #[error("tool: {0}")]
    Tool(#[from] ToolError),

    // ── Config ──────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Approval errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval denied for '{key}': {reason}")]
    Denied { key: String, reason: String },

    #[error("unknown approval id: {id} (already resolved or never existed)")]
    UnknownId { id: String },
}

// ─── Run Guard errors ────────────────────────────────────────────────────────

/// Denial reasons for the deterministic run limits.
///
/// Every variant carries enough context to tell an operator which specific
/// limit fired without inspecting internal counters.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("total tool-call budget exceeded ({used} of {limit} calls used)")]
    TotalBudgetExceeded { used: u32, limit: u32 },

    #[error("per-tool budget exceeded for '{tool}' ({used} of {limit} calls used)")]
    ToolBudgetExceeded {
        tool: String,
        used: u32,
        limit: u32,
    },

    #[error("repeat cap exceeded: '{tool}' called {count} times in a row with identical input")]
    RepeatCapExceeded { tool: String, count: u32 },

    #[error("failure streak exceeded: {streak} consecutive tool failures (cap {limit})")]
    FailureStreakExceeded { streak: u32, limit: u32 },

    #[error("subagent batch denied: {reason}")]
    SubagentBatchDenied { reason: String },

    #[error("completion gate denied: {reason}")]
    CompletionGateDenied { reason: String },
}

// ─── Subagent errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SubagentError {
    #[error("total subagent cap exceeded: {spawned} of {limit} already spawned this session")]
    TotalCapExceeded { spawned: u32, limit: u32 },

    #[error("unknown agent type: {name}")]
    UnknownAgentType { name: String },

    #[error("subagent run not found: {task_id}")]
    RunNotFound { task_id: String },

    #[error("result for subagent {task_id} already collected")]
    ResultAlreadyCollected { task_id: String },
}

// ─── Tool errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {name} not found")]
    NotFound { name: String },

    #[error("tool {name} execution failed: {message}")]
    Execution { name: String, message: String },

    #[error("tool {name} failed transiently: {message}")]
    Transient { name: String, message: String },

    #[error("tool {name} denied by hook: {reason}")]
    HookDenied { name: String, reason: String },
}

impl ToolError {
    /// Whether the pipeline's retry layer may re-attempt this failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Transient { .. })
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ──────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, OverseerError>;
