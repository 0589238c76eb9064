//! Task and execution-result data model.
//!
//! A [`TaskNode`] is the atomic unit of work the execution layer hands to
//! an agent. Nodes are owned by a [`crate::core::TaskGraph`]; their status
//! is mutated by the execution layer as work proceeds, never by the
//! planning layer after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::intent::IntentId;

/// Task status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet started.
    #[default]
    Pending,
    /// Currently being executed by an agent.
    Running,
    /// Completed successfully.
    Completed,
    /// Failed with an error.
    Failed,
    /// Cannot proceed until something external changes.
    Blocked,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

/// Typed provenance metadata attached to a task node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskMetadata {
    /// The intent this task was decomposed from, if any.
    pub intent_id: Option<IntentId>,
    /// Id of the task this node was split from during replanning.
    pub split_from: Option<String>,
    /// 1-based index among sibling split parts.
    pub part_index: Option<u32>,
}

/// A single executable task in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Identifier, unique within its graph.
    pub id: String,
    /// Name of the agent responsible for this task.
    pub agent: String,
    /// What the task should accomplish; used as the base prompt.
    pub description: String,
    /// Ids of tasks that must complete before this one starts.
    pub dependencies: Vec<String>,
    /// Estimated token cost of executing this task.
    pub estimated_tokens: u32,
    /// Current execution status.
    pub status: TaskStatus,
    /// Scheduling priority; lower runs earlier among ready tasks.
    pub priority: u32,
    /// Provenance metadata.
    pub metadata: TaskMetadata,
}

impl TaskNode {
    /// Create a pending task with no dependencies.
    pub fn new(id: &str, agent: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            agent: agent.to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            estimated_tokens: 0,
            status: TaskStatus::Pending,
            priority: 0,
            metadata: TaskMetadata::default(),
        }
    }

    /// Set the dependency list.
    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Set the estimated token cost.
    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.estimated_tokens = tokens;
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Kind of output an agent produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Code,
    Document,
    TestReport,
    Log,
    Generic,
}

/// Provenance for a produced artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Task that produced the artifact.
    pub task_id: String,
    /// Agent that produced the artifact.
    pub agent: String,
    /// Tokens consumed producing it.
    pub tokens_used: u32,
    /// When it was produced.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock generation time in milliseconds.
    pub generation_time_ms: u64,
}

/// Output produced by a successful task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Kind of output.
    pub artifact_type: ArtifactType,
    /// The produced content.
    pub content: String,
    /// Provenance metadata.
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    /// Create an artifact stamped with the current time.
    pub fn new(artifact_type: ArtifactType, content: &str, task_id: &str, agent: &str) -> Self {
        Self {
            artifact_type,
            content: content.to_string(),
            metadata: ArtifactMetadata {
                task_id: task_id.to_string(),
                agent: agent.to_string(),
                tokens_used: 0,
                timestamp: Utc::now(),
                generation_time_ms: 0,
            },
        }
    }
}

/// Outcome of one task's full attempt sequence (not one attempt).
///
/// Terminal once returned: the execution layer accumulates retries and
/// errors internally and hands back exactly one of these per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The task this result belongs to.
    pub task_id: String,
    /// Whether any attempt succeeded.
    pub success: bool,
    /// Artifacts produced by the successful attempt, if any.
    pub artifacts: Vec<Artifact>,
    /// Number of retries consumed (0 = first attempt succeeded).
    pub retry_count: u32,
    /// The prompt as it stood for the final attempt, including any
    /// retry-strategy markers appended along the way.
    pub final_prompt: String,
    /// Error messages from failed attempts, oldest first.
    pub errors: Vec<String>,
}

impl ExecutionResult {
    /// Build a failure result with a single error and no attempts made.
    pub fn failed(task_id: &str, prompt: &str, error: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: false,
            artifacts: Vec::new(),
            retry_count: 0,
            final_prompt: prompt.to_string(),
            errors: vec![error.to_string()],
        }
    }
}

/// Aggregate outcome of a batch execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelExecutionResult {
    /// Individual task results; completion order is not guaranteed.
    pub results: Vec<ExecutionResult>,
    /// Number of successful tasks.
    pub completed_count: usize,
    /// Number of failed tasks.
    pub failed_count: usize,
    /// Wall-clock duration of the whole batch in milliseconds.
    pub total_execution_time_ms: u64,
}
