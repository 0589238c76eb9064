//! Shared data model for the orchestration layers.

pub mod graph;
pub mod intent;
pub mod task;
pub mod tool;

pub use graph::{GraphIndex, TaskEdge, TaskGraph};
pub use intent::{ClarificationRound, Constraint, Intent, IntentId, IntentType};
pub use task::{
    Artifact, ArtifactMetadata, ArtifactType, ExecutionResult, ParallelExecutionResult,
    TaskMetadata, TaskNode, TaskStatus,
};
pub use tool::{
    ExecutionId, ExecutionState, ResourceUsage, ToolOutput, ToolRequest, ToolResult,
    TrackedExecution,
};
