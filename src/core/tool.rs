//! Tool-call data model.
//!
//! A [`ToolRequest`] is caller-owned and immutable; the tool layer wraps
//! each attempt sequence into a [`ToolResult`]. Exit codes 403 (forbidden)
//! and 500 (exhausted retries or timeout) are reserved sentinel values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exit code for requests rejected by the allow/block policy.
pub const EXIT_FORBIDDEN: i32 = 403;

/// Exit code for requests that exhausted their retry budget or timed out.
pub const EXIT_EXHAUSTED: i32 = 500;

/// Default per-request timeout in milliseconds.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

/// A request to execute a sandboxed tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Name of the tool to invoke.
    pub tool: String,
    /// Tool-specific arguments.
    pub args: serde_json::Value,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
}

impl ToolRequest {
    /// Create a request with the default timeout.
    pub fn new(tool: &str, args: serde_json::Value) -> Self {
        Self {
            tool: tool.to_string(),
            args,
            timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
        }
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Resources consumed by a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceUsage {
    /// CPU time in milliseconds.
    pub cpu_time_ms: u64,
    /// Peak memory in bytes.
    pub memory_bytes: u64,
}

/// What an injected tool executor hands back on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The tool's output.
    pub output: String,
    /// Resources the invocation consumed.
    pub resource_usage: ResourceUsage,
}

impl ToolOutput {
    /// Wrap plain output with zeroed resource usage.
    pub fn new(output: &str) -> Self {
        Self {
            output: output.to_string(),
            resource_usage: ResourceUsage::default(),
        }
    }
}

/// Outcome of one tool attempt sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether any attempt succeeded.
    pub success: bool,
    /// Tool output on success, or the final error text on failure.
    pub output: String,
    /// Wall-clock duration of the whole sequence in milliseconds.
    pub execution_time_ms: u64,
    /// Resources consumed by the final attempt.
    pub resource_usage: ResourceUsage,
    /// Exit code; 403 and 500 are reserved sentinels.
    pub exit_code: Option<i32>,
}

impl ToolResult {
    /// Build the 403 short-circuit result for a rejected request.
    pub fn forbidden(reason: &str) -> Self {
        Self {
            success: false,
            output: reason.to_string(),
            execution_time_ms: 0,
            resource_usage: ResourceUsage::default(),
            exit_code: Some(EXIT_FORBIDDEN),
        }
    }
}

/// Unique identifier for a tracked tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Create a new unique execution identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a tracked tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionState {
    /// Whether this state counts as in-flight.
    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionState::Pending | ExecutionState::Running)
    }
}

/// Bookkeeping entry for an in-flight or finished tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedExecution {
    /// Generated execution id.
    pub id: ExecutionId,
    /// Tool being invoked.
    pub tool: String,
    /// Current lifecycle state.
    pub state: ExecutionState,
    /// When tracking began.
    pub started_at: DateTime<Utc>,
}
