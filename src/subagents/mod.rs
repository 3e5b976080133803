pub mod agent_types;

pub use agent_types::{AgentType, AgentTypeRegistry};

use crate::approval::ApprovalManager;
use crate::config::SpawnerConfig;
use crate::error::{OverseerError, Result, SubagentError};
use crate::events::{EventBus, OrchestratorEvent};
use crate::guard::RunGuard;
use crate::tools::ExecutionContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ── Task and result types ────────────────────────────────────────────────────

/// One delegated unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentTask {
    pub description: String,
    /// Name of a registered [`AgentType`] profile.
    pub agent_type: String,
    pub parent_run_id: String,
}

impl SubagentTask {
    pub fn new(
        description: impl Into<String>,
        agent_type: impl Into<String>,
        parent_run_id: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            agent_type: agent_type.into(),
            parent_run_id: parent_run_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubagentStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubagentStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What a child runner hands back on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentOutcome {
    pub output: String,
    pub tool_calls: u32,
    pub tokens_used: u64,
}

/// Terminal record for one subagent run. Collected exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentResult {
    pub task_id: String,
    pub status: SubagentStatus,
    pub output: String,
    pub error: Option<String>,
    pub tool_calls: u32,
    pub tokens_used: u64,
}

impl SubagentResult {
    fn cancelled(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: SubagentStatus::Cancelled,
            output: String::new(),
            error: None,
            tool_calls: 0,
            tokens_used: 0,
        }
    }
}

/// Point-in-time view of a run for supervising UIs. Counts stay zero until
/// the child reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct SubagentSnapshot {
    pub task_id: String,
    pub agent_type: String,
    pub description: String,
    pub status: SubagentStatus,
    pub tool_calls: u32,
    pub tokens_used: u64,
}

// ── Child execution seam ─────────────────────────────────────────────────────

/// Executes one child run. The spawner owns queueing, limits, status tracking
/// and cancellation; the runner owns the actual agent loop. Children share
/// the session's approval manager so operator decisions span the whole run.
pub trait ChildRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        task: &'a SubagentTask,
        agent_type: &'a AgentType,
        guard: &'a RunGuard,
        approvals: &'a ApprovalManager,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<SubagentOutcome>> + Send + 'a>>;
}

// ── Spawner ──────────────────────────────────────────────────────────────────

struct RunEntry {
    task: SubagentTask,
    status: SubagentStatus,
    result: Option<SubagentResult>,
    collected: bool,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

#[derive(Default)]
struct SpawnerState {
    spawned_total: u32,
    runs: HashMap<String, RunEntry>,
}

/// Spawns child runs under the session's limits.
///
/// Admission happens synchronously at spawn time (agent type resolution, the
/// session total cap, then the guard's batch check); execution is queued
/// behind a fair semaphore so at most `max_parallel` children run at once and
/// queued tasks start in submission order.
pub struct SubagentSpawner {
    config: SpawnerConfig,
    agent_types: AgentTypeRegistry,
    guard: Arc<RunGuard>,
    approvals: Arc<ApprovalManager>,
    runner: Arc<dyn ChildRunner>,
    events: EventBus,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    workspace_dir: PathBuf,
    state: Mutex<SpawnerState>,
}

impl SubagentSpawner {
    pub fn new(
        config: SpawnerConfig,
        agent_types: AgentTypeRegistry,
        guard: Arc<RunGuard>,
        approvals: Arc<ApprovalManager>,
        runner: Arc<dyn ChildRunner>,
        events: EventBus,
        cancel: CancellationToken,
        workspace_dir: impl Into<PathBuf>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel));
        Self {
            config,
            agent_types,
            guard,
            approvals,
            runner,
            events,
            semaphore,
            cancel,
            workspace_dir: workspace_dir.into(),
            state: Mutex::new(SpawnerState::default()),
        }
    }

    /// Spawn a single child. Shorthand for a one-element batch.
    pub fn spawn_one(self: &Arc<Self>, task: SubagentTask) -> Result<String> {
        let mut ids = self.spawn_parallel(vec![task])?;
        ids.pop().ok_or_else(|| {
            OverseerError::Other(anyhow::anyhow!("spawn produced no task id"))
        })
    }

    /// Admit and start a batch of children. All-or-nothing: when any task in
    /// the batch fails admission, none are spawned.
    pub fn spawn_parallel(self: &Arc<Self>, tasks: Vec<SubagentTask>) -> Result<Vec<String>> {
        let mut resolved = Vec::with_capacity(tasks.len());
        for task in &tasks {
            resolved.push(self.agent_types.get(&task.agent_type)?.clone());
        }
        let requested = u32::try_from(tasks.len()).unwrap_or(u32::MAX);

        {
            let mut state = self.lock();
            // Counts the batch into the parallel total on allow.
            self.guard.before_subagent_spawn(requested)?;
            if state.spawned_total.saturating_add(requested) > self.config.max_total_subagents {
                self.guard.after_subagent_finished(requested);
                return Err(SubagentError::TotalCapExceeded {
                    spawned: state.spawned_total,
                    limit: self.config.max_total_subagents,
                }
                .into());
            }
            state.spawned_total += requested;
        }

        let mut ids = Vec::with_capacity(tasks.len());
        for (task, agent_type) in tasks.into_iter().zip(resolved) {
            let task_id = format!("subagent_{}", Uuid::new_v4().simple());
            let cancel = self.cancel.child_token();
            let (done, _) = watch::channel(false);

            self.lock().runs.insert(
                task_id.clone(),
                RunEntry {
                    task: task.clone(),
                    status: SubagentStatus::Queued,
                    result: None,
                    collected: false,
                    cancel: cancel.clone(),
                    done,
                },
            );
            self.emit_status(&task_id, SubagentStatus::Queued);
            tracing::info!(
                task_id = %task_id,
                agent_type = %task.agent_type,
                parent = %task.parent_run_id,
                "subagent queued"
            );

            let spawner = Arc::clone(self);
            let id = task_id.clone();
            tokio::spawn(async move {
                spawner.run_child(id, task, agent_type, cancel).await;
            });
            ids.push(task_id);
        }
        Ok(ids)
    }

    async fn run_child(
        self: Arc<Self>,
        task_id: String,
        task: SubagentTask,
        agent_type: AgentType,
        cancel: CancellationToken,
    ) {
        let acquired = tokio::select! {
            () = cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        };
        // Cancelled (or shut down) while still queued.
        let Some(_permit) = acquired else {
            self.finish(&task_id, SubagentResult::cancelled(&task_id));
            return;
        };

        self.set_status(&task_id, SubagentStatus::Running);
        tracing::info!(task_id = %task_id, "subagent running");

        // Fresh guard one level down so sibling budgets stay independent.
        let child_guard = self.guard.child();
        let mut ctx = ExecutionContext::new(&task_id, self.workspace_dir.clone())
            .with_cancel(cancel.clone());
        if let Some(tools) = &agent_type.allowed_tools {
            ctx = ctx.with_allowed_tools(tools.iter().cloned().collect());
        }

        let run = self
            .runner
            .run(&task, &agent_type, &child_guard, &self.approvals, &ctx);
        tokio::pin!(run);
        let result = tokio::select! {
            () = cancel.cancelled() => {
                // In-flight work is allowed to finish; the runner observes
                // the context token between tool calls and returns promptly.
                let _ = run.as_mut().await;
                SubagentResult::cancelled(&task_id)
            }
            outcome = &mut run => match outcome {
                Ok(outcome) => SubagentResult {
                    task_id: task_id.clone(),
                    status: SubagentStatus::Completed,
                    output: outcome.output,
                    error: None,
                    tool_calls: outcome.tool_calls,
                    tokens_used: outcome.tokens_used,
                },
                Err(e) => SubagentResult {
                    task_id: task_id.clone(),
                    status: SubagentStatus::Failed,
                    output: String::new(),
                    error: Some(e.to_string()),
                    tool_calls: 0,
                    tokens_used: 0,
                },
            },
        };
        self.finish(&task_id, result);
    }

    /// Record the terminal state, release the guard slot, and wake waiters.
    fn finish(&self, task_id: &str, result: SubagentResult) {
        let status = result.status;
        {
            let mut state = self.lock();
            if let Some(entry) = state.runs.get_mut(task_id) {
                entry.status = status;
                entry.result = Some(result);
                // send_replace stores the value even with no receiver alive,
                // so a waiter that subscribes later still sees completion.
                entry.done.send_replace(true);
            }
        }
        self.guard.after_subagent_finished(1);
        self.emit_status(task_id, status);
        tracing::info!(task_id = %task_id, status = %status, "subagent finished");
    }

    fn set_status(&self, task_id: &str, status: SubagentStatus) {
        if let Some(entry) = self.lock().runs.get_mut(task_id) {
            entry.status = status;
        }
        self.emit_status(task_id, status);
    }

    fn emit_status(&self, task_id: &str, status: SubagentStatus) {
        self.events.emit(OrchestratorEvent::SubagentStatusChanged {
            task_id: task_id.to_string(),
            status: status.to_string(),
        });
    }

    /// Wait for one child to reach a terminal state and collect its result.
    /// Each result is handed out exactly once.
    pub async fn wait(&self, task_id: &str) -> Result<SubagentResult> {
        let mut done = {
            let state = self.lock();
            let entry = state.runs.get(task_id).ok_or_else(|| not_found(task_id))?;
            entry.done.subscribe()
        };
        if done.wait_for(|finished| *finished).await.is_err() {
            return Err(not_found(task_id).into());
        }

        let mut state = self.lock();
        let entry = state.runs.get_mut(task_id).ok_or_else(|| not_found(task_id))?;
        if entry.collected {
            return Err(SubagentError::ResultAlreadyCollected {
                task_id: task_id.to_string(),
            }
            .into());
        }
        match entry.result.clone() {
            Some(result) => {
                entry.collected = true;
                Ok(result)
            }
            None => Err(not_found(task_id).into()),
        }
    }

    /// Collect a batch of results in the order the ids were submitted.
    /// Ids are validated up front so a bad id fails the call before any
    /// result in the batch has been consumed.
    pub async fn wait_all(&self, task_ids: &[String]) -> Result<Vec<SubagentResult>> {
        {
            let state = self.lock();
            for task_id in task_ids {
                if !state.runs.contains_key(task_id.as_str()) {
                    return Err(not_found(task_id).into());
                }
            }
        }

        let mut results = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            results.push(self.wait(task_id).await?);
        }
        Ok(results)
    }

    /// Cancel one child. Queued children never start; running children stop
    /// at their next await point.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let state = self.lock();
        let entry = state.runs.get(task_id).ok_or_else(|| not_found(task_id))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Cancel every child that has not yet finished. Idempotent.
    pub fn cancel_all(&self) {
        let tokens: Vec<CancellationToken> = {
            let state = self.lock();
            state
                .runs
                .values()
                .filter(|entry| !entry.status.is_terminal())
                .map(|entry| entry.cancel.clone())
                .collect()
        };
        for token in tokens {
            token.cancel();
        }
    }

    pub fn spawned_total(&self) -> u32 {
        self.lock().spawned_total
    }

    /// Current view of every run, sorted by task id.
    pub fn snapshots(&self) -> Vec<SubagentSnapshot> {
        let state = self.lock();
        let mut snapshots: Vec<SubagentSnapshot> = state
            .runs
            .iter()
            .map(|(task_id, entry)| SubagentSnapshot {
                task_id: task_id.clone(),
                agent_type: entry.task.agent_type.clone(),
                description: entry.task.description.clone(),
                status: entry.status,
                tool_calls: entry.result.as_ref().map_or(0, |r| r.tool_calls),
                tokens_used: entry.result.as_ref().map_or(0, |r| r.tokens_used),
            })
            .collect();
        snapshots.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        snapshots
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpawnerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn not_found(task_id: &str) -> SubagentError {
    SubagentError::RunNotFound {
        task_id: task_id.to_string(),
    }
}
