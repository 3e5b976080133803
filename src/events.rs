use serde::Serialize;
use tokio::sync::broadcast;

/// Default bound for the event channel. Slow subscribers lag rather than
/// block producers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications emitted by the orchestration core for supervising UIs.
///
/// A bounded broadcast channel replaces callback fan-out so ordering and
/// backpressure are explicit: each subscriber owns its own receiver and
/// observes events in emission order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    ApprovalRequested {
        approval_id: String,
        key: String,
        tool_name: String,
    },
    ApprovalResolved {
        key: String,
        approved: bool,
    },
    GuardDenied {
        reason: String,
    },
    SubagentStatusChanged {
        task_id: String,
        status: String,
    },
}

/// Shared emitter handle. Cloning is cheap; all clones feed the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Events with no live subscriber are dropped silently.
    pub fn emit(&self, event: OrchestratorEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
