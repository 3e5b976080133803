use crate::error::ApprovalError;
use crate::events::{EventBus, OrchestratorEvent};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ── Types ────────────────────────────────────────────────────────────────────

/// Observable view of an outstanding approval, for a supervising UI.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApprovalSnapshot {
    pub approval_id: String,
    pub key: String,
    pub tool_name: String,
    pub args: Value,
    pub created_at: String,
}

struct PendingEntry {
    key: String,
    tool_name: String,
    args: Value,
    created_at: String,
    tx: oneshot::Sender<bool>,
}

#[derive(Default)]
struct ApprovalState {
    /// Outstanding requests keyed by manager-assigned id.
    pending: HashMap<String, PendingEntry>,
    /// Correlation key -> pending ids, in arrival order.
    by_key: HashMap<String, Vec<String>>,
    /// Decisions that arrived before their request. Last write wins.
    stored: HashMap<String, bool>,
}

// ── Manager ──────────────────────────────────────────────────────────────────

/// Race-free human-in-the-loop arbitration for concurrent tool calls.
///
/// A decision may legitimately arrive before or after the corresponding
/// request: `resolve_by_key` answers waiting requests when they exist and
/// otherwise records a stored decision that the next `request` with the same
/// correlation key consumes without suspending.
pub struct ApprovalManager {
    state: Mutex<ApprovalState>,
    events: EventBus,
}

impl ApprovalManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: Mutex::new(ApprovalState::default()),
            events,
        }
    }

    /// Ask for a decision on `key`. Returns immediately when a stored
    /// decision exists; otherwise suspends until `resolve`/`resolve_by_key`
    /// answers or `cancel` fires (cancellation denies).
    pub async fn request(
        &self,
        key: &str,
        tool_name: &str,
        args: &Value,
        cancel: &CancellationToken,
    ) -> bool {
        let (approval_id, rx) = {
            let mut state = self.lock();

            if let Some(decision) = state.stored.remove(key) {
                tracing::debug!(key, decision, "approval answered from stored decision");
                return decision;
            }

            let approval_id = format!("approval_{}", Uuid::new_v4().simple());
            let (tx, rx) = oneshot::channel();
            state.pending.insert(
                approval_id.clone(),
                PendingEntry {
                    key: key.to_string(),
                    tool_name: tool_name.to_string(),
                    args: args.clone(),
                    created_at: Utc::now().to_rfc3339(),
                    tx,
                },
            );
            state
                .by_key
                .entry(key.to_string())
                .or_default()
                .push(approval_id.clone());
            (approval_id, rx)
        };

        self.events.emit(OrchestratorEvent::ApprovalRequested {
            approval_id: approval_id.clone(),
            key: key.to_string(),
            tool_name: tool_name.to_string(),
        });

        tokio::select! {
            decision = rx => decision.unwrap_or(false),
            () = cancel.cancelled() => {
                self.remove_pending(&approval_id);
                tracing::debug!(key, "approval request cancelled; treated as denied");
                false
            }
        }
    }

    /// Resolve exactly one pending approval by its manager-assigned id.
    pub fn resolve(&self, approval_id: &str, approved: bool) -> Result<(), ApprovalError> {
        let entry = {
            let mut state = self.lock();
            let Some(entry) = state.pending.remove(approval_id) else {
                return Err(ApprovalError::UnknownId {
                    id: approval_id.to_string(),
                });
            };
            detach_id(&mut state.by_key, &entry.key, approval_id);
            entry
        };

        self.deliver(entry, approved);
        Ok(())
    }

    /// Resolve every pending approval under `key`, or store the decision for
    /// a future request when none is waiting. Repeated early decisions for
    /// the same key keep only the most recent one.
    pub fn resolve_by_key(&self, key: &str, approved: bool) {
        let entries: Vec<PendingEntry> = {
            let mut state = self.lock();
            match state.by_key.remove(key) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| state.pending.remove(id))
                    .collect(),
                None => {
                    state.stored.insert(key.to_string(), approved);
                    tracing::debug!(key, approved, "decision stored ahead of request");
                    return;
                }
            }
        };

        for entry in entries {
            self.deliver(entry, approved);
        }
    }

    /// Deny every outstanding approval and drop stored decisions. Idempotent;
    /// leaves the manager empty.
    pub fn cancel_all(&self, reason: &str) {
        let entries: Vec<PendingEntry> = {
            let mut state = self.lock();
            state.by_key.clear();
            state.stored.clear();
            state.pending.drain().map(|(_, entry)| entry).collect()
        };

        if !entries.is_empty() {
            tracing::info!(reason, count = entries.len(), "denying all pending approvals");
        }
        for entry in entries {
            self.deliver(entry, false);
        }
    }

    pub fn list_pending(&self) -> Vec<PendingApprovalSnapshot> {
        let state = self.lock();
        let mut snapshots: Vec<PendingApprovalSnapshot> = state
            .pending
            .iter()
            .map(|(id, entry)| PendingApprovalSnapshot {
                approval_id: id.clone(),
                key: entry.key.clone(),
                tool_name: entry.tool_name.clone(),
                args: entry.args.clone(),
                created_at: entry.created_at.clone(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    /// Whether an early decision is waiting for `key`. Test/diagnostic aid.
    pub fn has_stored_decision(&self, key: &str) -> bool {
        self.lock().stored.contains_key(key)
    }

    fn deliver(&self, entry: PendingEntry, approved: bool) {
        // The waiter may have been cancelled; a failed send is fine.
        let _ = entry.tx.send(approved);
        self.events.emit(OrchestratorEvent::ApprovalResolved {
            key: entry.key,
            approved,
        });
    }

    fn remove_pending(&self, approval_id: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.pending.remove(approval_id) {
            detach_id(&mut state.by_key, &entry.key, approval_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ApprovalState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// Oneshot senders are not Debug; summarize the state instead.
impl std::fmt::Debug for ApprovalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ApprovalManager")
            .field("pending", &state.pending.len())
            .field("stored", &state.stored.len())
            .finish_non_exhaustive()
    }
}

fn detach_id(by_key: &mut HashMap<String, Vec<String>>, key: &str, approval_id: &str) {
    if let Some(ids) = by_key.get_mut(key) {
        ids.retain(|id| id != approval_id);
        if ids.is_empty() {
            by_key.remove(key);
        }
    }
}
