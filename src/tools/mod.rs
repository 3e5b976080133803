pub mod pipeline;
pub mod registry;
pub mod traits;
pub mod types;

pub use pipeline::{
    ApprovalHook, CheckpointEntry, CheckpointStore, HookDecision, RetryPolicy, RiskLevel,
    ToolCache, ToolHook, ToolPipeline,
};
pub use registry::ToolRegistry;
pub use traits::{ExecutionContext, Tool, ToolFlags};
pub use types::{ToolCallRequest, ToolResult, ToolSpec, argument_fingerprint};
