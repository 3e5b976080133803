use crate::config::{CompletionContract, GuardConfig};
use crate::error::GuardError;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

// ── State ────────────────────────────────────────────────────────────────────

/// Per-run counters behind the guard. Mutated only through the `RunGuard`
/// methods below; monotonic within a run except the failure streak, which
/// resets to zero on any success.
#[derive(Debug, Clone, Default)]
pub struct RunGuardState {
    total_calls: u32,
    per_tool: HashMap<String, u32>,
    /// Sliding window of the last K (tool, fingerprint) pairs.
    recent: VecDeque<(String, String)>,
    failure_streak: u32,
    depth: u32,
    parallel_subagents: u32,
    verification_seen: bool,
}

/// Serializable counter snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct GuardSnapshot {
    pub total_calls: u32,
    pub per_tool: HashMap<String, u32>,
    pub failure_streak: u32,
    pub depth: u32,
    pub parallel_subagents: u32,
    pub verification_seen: bool,
}

// ── Pure checks ──────────────────────────────────────────────────────────────
//
// Each check is a function of (state, limits, call arguments) only: no I/O,
// no suspension. The public methods wrap them in a single lock so concurrent
// callers never observe torn counters. Evaluation order within
// `check_tool_call` is fixed; the first violated limit names the denial.

fn check_tool_call(
    state: &RunGuardState,
    limits: &GuardConfig,
    tool: &str,
    fingerprint: &str,
) -> Result<(), GuardError> {
    if state.total_calls >= limits.max_total_calls {
        return Err(GuardError::TotalBudgetExceeded {
            used: state.total_calls,
            limit: limits.max_total_calls,
        });
    }

    let used = state.per_tool.get(tool).copied().unwrap_or(0);
    if used >= limits.max_calls_per_tool {
        return Err(GuardError::ToolBudgetExceeded {
            tool: tool.to_string(),
            used,
            limit: limits.max_calls_per_tool,
        });
    }

    let trailing = trailing_identical(state, tool, fingerprint);
    if trailing >= limits.repeat_cap {
        return Err(GuardError::RepeatCapExceeded {
            tool: tool.to_string(),
            count: trailing,
        });
    }

    if state.failure_streak >= limits.max_failure_streak {
        return Err(GuardError::FailureStreakExceeded {
            streak: state.failure_streak,
            limit: limits.max_failure_streak,
        });
    }

    Ok(())
}

/// Length of the run of entries identical to (tool, fingerprint) at the tail
/// of the sliding window.
fn trailing_identical(state: &RunGuardState, tool: &str, fingerprint: &str) -> u32 {
    let mut count = 0;
    for (seen_tool, seen_fp) in state.recent.iter().rev() {
        if seen_tool == tool && seen_fp == fingerprint {
            count += 1;
        } else {
            break;
        }
    }
    count
}

fn check_subagent_spawn(
    state: &RunGuardState,
    limits: &GuardConfig,
    requested: u32,
) -> Result<(), GuardError> {
    if state.depth >= limits.max_subagent_depth {
        return Err(GuardError::SubagentBatchDenied {
            reason: format!(
                "nesting depth {} has reached the limit of {}",
                state.depth, limits.max_subagent_depth
            ),
        });
    }
    if state.parallel_subagents + requested > limits.max_parallel_subagents {
        return Err(GuardError::SubagentBatchDenied {
            reason: format!(
                "requested {} parallel subagents with {} already running (limit {})",
                requested, state.parallel_subagents, limits.max_parallel_subagents
            ),
        });
    }
    Ok(())
}

fn check_completion_gate(
    state: &RunGuardState,
    contract: &CompletionContract,
    observed_outputs: &[String],
) -> Result<(), GuardError> {
    if contract.require_verification_evidence && !state.verification_seen {
        return Err(GuardError::CompletionGateDenied {
            reason: "verification evidence required but none observed".into(),
        });
    }
    for pattern in &contract.required_outputs {
        let satisfied = observed_outputs
            .iter()
            .any(|output| pattern_matches(pattern, output));
        if !satisfied {
            return Err(GuardError::CompletionGateDenied {
                reason: format!("required output '{pattern}' was not produced"),
            });
        }
    }
    Ok(())
}

/// Minimal wildcard match: `*` matches any (possibly empty) run of characters.
/// Iterative two-pointer walk with star backtracking, linear in practice even
/// for multi-star patterns.
fn pattern_matches(pattern: &str, value: &str) -> bool {
    let p = pattern.as_bytes();
    let v = value.as_bytes();
    let (mut pi, mut vi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while vi < v.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, vi));
            pi += 1;
        } else if pi < p.len() && p[pi] == v[vi] {
            pi += 1;
            vi += 1;
        } else if let Some((star_pi, star_vi)) = star {
            // Retry the most recent star with one more consumed byte.
            pi = star_pi + 1;
            vi = star_vi + 1;
            star = Some((star_pi, star_vi + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

// ── Guard ────────────────────────────────────────────────────────────────────

/// Deterministic admission control for one agent run.
///
/// Child runs get their own guard (see [`RunGuard::child`]) at depth+1 so
/// budgets and streaks never bleed between sibling subagents.
#[derive(Debug)]
pub struct RunGuard {
    limits: GuardConfig,
    state: Mutex<RunGuardState>,
}

impl RunGuard {
    pub fn new(limits: GuardConfig) -> Self {
        Self {
            limits,
            state: Mutex::new(RunGuardState::default()),
        }
    }

    /// Fresh guard for a child run one nesting level down.
    pub fn child(&self) -> Self {
        let depth = self.lock().depth;
        let guard = Self::new(self.limits.clone());
        guard.lock().depth = depth + 1;
        guard
    }

    /// Admission check for a tool call. On allow, the call is recorded so
    /// later budget checks observe it.
    pub fn before_tool_call(&self, tool: &str, fingerprint: &str) -> Result<(), GuardError> {
        let mut state = self.lock();
        check_tool_call(&state, &self.limits, tool, fingerprint).inspect_err(|denial| {
            tracing::warn!(tool, %denial, "tool call denied by run guard");
        })?;

        state.total_calls += 1;
        *state.per_tool.entry(tool.to_string()).or_insert(0) += 1;
        state
            .recent
            .push_back((tool.to_string(), fingerprint.to_string()));
        while state.recent.len() > self.limits.repeat_window {
            state.recent.pop_front();
        }
        Ok(())
    }

    /// Record a call outcome. Success resets the failure streak.
    pub fn after_tool_call(&self, tool: &str, succeeded: bool) {
        let mut state = self.lock();
        if succeeded {
            state.failure_streak = 0;
        } else {
            state.failure_streak += 1;
            tracing::debug!(
                tool,
                streak = state.failure_streak,
                "tool failure recorded"
            );
        }
    }

    /// Batch admission for subagent spawns: denies the whole batch when the
    /// nesting depth or parallel limit would be exceeded. On allow, the batch
    /// is counted into the parallel total.
    pub fn before_subagent_spawn(&self, requested: u32) -> Result<(), GuardError> {
        let mut state = self.lock();
        check_subagent_spawn(&state, &self.limits, requested).inspect_err(|denial| {
            tracing::warn!(requested, %denial, "subagent batch denied by run guard");
        })?;
        state.parallel_subagents += requested;
        Ok(())
    }

    /// Release parallel slots once children finish. Called by the spawner only.
    pub fn after_subagent_finished(&self, count: u32) {
        let mut state = self.lock();
        state.parallel_subagents = state.parallel_subagents.saturating_sub(count);
    }

    /// Mark that verification evidence (a test run, a diff check) was seen.
    pub fn record_verification_evidence(&self) {
        self.lock().verification_seen = true;
    }

    /// Final check before the run may declare itself finished.
    pub fn check_completion_gate(
        &self,
        contract: &CompletionContract,
        observed_outputs: &[String],
    ) -> Result<(), GuardError> {
        let state = self.lock();
        check_completion_gate(&state, contract, observed_outputs)
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        let state = self.lock();
        GuardSnapshot {
            total_calls: state.total_calls,
            per_tool: state.per_tool.clone(),
            failure_streak: state.failure_streak,
            depth: state.depth,
            parallel_subagents: state.parallel_subagents,
            verification_seen: state.verification_seen,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunGuardState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
