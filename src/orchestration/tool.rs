//! L3 tool layer: policy-gated, tracked, retrying tool invocation.
//!
//! Requests pass an allow/block policy check before anything runs; a
//! rejected request short-circuits with exit code 403 and zero elapsed
//! time. Accepted requests are tracked through a lifecycle map and retried
//! with exponential backoff and jitter until the budget runs out, at which
//! point the result carries exit code 500.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::tool::{
    ExecutionId, ExecutionState, ToolOutput, ToolRequest, ToolResult, TrackedExecution,
    EXIT_EXHAUSTED,
};
use crate::error::{Error, Result};

/// The sandbox backend the tool layer drives. One call is one attempt.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one attempt of a tool request.
    async fn execute(&self, request: &ToolRequest) -> Result<ToolOutput>;
}

/// Source of backoff jitter, injectable so tests stay deterministic.
pub trait JitterSource: Send + Sync {
    /// A sample in `[0, 1)`.
    fn sample(&self) -> f64;
}

/// Thread-local RNG jitter for production use.
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Constant jitter for tests.
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Allow/block policy and retry limits for tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPolicy {
    /// Tools permitted to run; `None` means unrestricted.
    pub allowed_tools: Option<Vec<String>>,
    /// Tools never permitted to run; wins over the allow list.
    pub blocked_tools: Vec<String>,
    /// Retries after the first failed attempt.
    pub max_backoff_retries: u32,
    /// Backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            allowed_tools: None,
            blocked_tools: Vec::new(),
            max_backoff_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

/// Outcome of validating a request against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// Whether the request may run.
    pub valid: bool,
    /// Why not, when it may not.
    pub errors: Vec<String>,
}

/// L3: sandboxed tool execution with policy gating and backoff retries.
pub struct ToolLayer {
    policy: ToolPolicy,
    executor: Arc<dyn ToolExecutor>,
    jitter: Arc<dyn JitterSource>,
    executions: Arc<RwLock<HashMap<ExecutionId, TrackedExecution>>>,
}

impl ToolLayer {
    /// Create a tool layer with production jitter.
    pub fn new(policy: ToolPolicy, executor: Arc<dyn ToolExecutor>) -> Self {
        Self::with_jitter(policy, executor, Arc::new(ThreadRngJitter))
    }

    /// Create a tool layer with an injected jitter source.
    pub fn with_jitter(
        policy: ToolPolicy,
        executor: Arc<dyn ToolExecutor>,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self {
            policy,
            executor,
            jitter,
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The layer's policy.
    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Whether a tool passes the allow/block policy. Block wins.
    pub fn is_tool_permitted(&self, tool: &str) -> bool {
        if self.policy.blocked_tools.iter().any(|t| t == tool) {
            return false;
        }
        match &self.policy.allowed_tools {
            Some(allowed) => allowed.iter().any(|t| t == tool),
            None => true,
        }
    }

    /// Validate a request against the policy without running it.
    pub fn validate_request(&self, request: &ToolRequest) -> ValidationOutcome {
        let mut errors = Vec::new();
        if request.tool.trim().is_empty() {
            errors.push("tool name must not be empty".to_string());
        }
        if request.timeout_ms == 0 {
            errors.push("timeout must be greater than zero".to_string());
        }
        if !request.tool.trim().is_empty() && !self.is_tool_permitted(&request.tool) {
            errors.push(format!("tool '{}' is not permitted", request.tool));
        }
        ValidationOutcome {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Backoff before retry number `attempt` (0-based), with jitter.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = if attempt >= 63 {
            self.policy.max_backoff_ms
        } else {
            self.policy
                .initial_backoff_ms
                .saturating_mul(1u64 << attempt)
                .min(self.policy.max_backoff_ms)
        };
        let jittered = base as f64 * (1.0 + self.jitter.sample() * 0.3);
        Duration::from_millis(jittered as u64)
    }

    /// Run a request to a terminal result.
    ///
    /// Invalid requests short-circuit to a 403 result. Valid requests are
    /// tracked and attempted up to `1 + max_backoff_retries` times with
    /// backoff between failures; exhaustion or timeout yields exit 500.
    pub async fn execute(&self, request: &ToolRequest) -> ToolResult {
        let validation = self.validate_request(request);
        if !validation.valid {
            warn!(tool = %request.tool, "request rejected by policy");
            return ToolResult::forbidden(&validation.errors.join("; "));
        }

        let id = self.track(request).await;
        self.set_state(id, ExecutionState::Running).await;
        let started = Instant::now();
        let timeout = Duration::from_millis(request.timeout_ms);
        let mut last_error = String::new();

        for attempt in 0..=self.policy.max_backoff_retries {
            if attempt > 0 {
                tokio::time::sleep(self.calculate_backoff(attempt - 1)).await;
            }
            let outcome = match tokio::time::timeout(timeout, self.executor.execute(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(timeout)),
            };
            match outcome {
                Ok(output) => {
                    debug!(tool = %request.tool, id = %id.short(), attempt, "tool succeeded");
                    self.set_state(id, ExecutionState::Completed).await;
                    return ToolResult {
                        success: true,
                        output: output.output,
                        execution_time_ms: started.elapsed().as_millis() as u64,
                        resource_usage: output.resource_usage,
                        exit_code: Some(0),
                    };
                }
                Err(e) => {
                    warn!(tool = %request.tool, id = %id.short(), attempt, error = %e, "tool attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        self.set_state(id, ExecutionState::Failed).await;
        ToolResult {
            success: false,
            output: last_error,
            execution_time_ms: started.elapsed().as_millis() as u64,
            resource_usage: Default::default(),
            exit_code: Some(EXIT_EXHAUSTED),
        }
    }

    /// Run requests strictly in order, collecting every result.
    pub async fn execute_sequence(&self, requests: &[ToolRequest]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.execute(request).await);
        }
        results
    }

    /// Tracking entry for one execution, if known.
    pub async fn get_execution(&self, id: ExecutionId) -> Option<TrackedExecution> {
        self.executions.read().await.get(&id).cloned()
    }

    /// Executions currently pending or running.
    pub async fn get_active_executions(&self) -> Vec<TrackedExecution> {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| e.state.is_active())
            .cloned()
            .collect()
    }

    /// Mark an execution failed. Returns whether it was active.
    ///
    /// Best-effort: the underlying attempt is not interrupted, but the
    /// tracking entry stops counting as active.
    pub async fn abort_execution(&self, id: ExecutionId) -> bool {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&id) {
            Some(entry) if entry.state.is_active() => {
                entry.state = ExecutionState::Failed;
                true
            }
            _ => false,
        }
    }

    async fn track(&self, request: &ToolRequest) -> ExecutionId {
        let entry = TrackedExecution {
            id: ExecutionId::new(),
            tool: request.tool.clone(),
            state: ExecutionState::Pending,
            started_at: chrono::Utc::now(),
        };
        let id = entry.id;
        self.executions.write().await.insert(id, entry);
        id
    }

    /// Terminal states stick: a finished or aborted entry is never
    /// resurrected by a late transition.
    async fn set_state(&self, id: ExecutionId, state: ExecutionState) {
        if let Some(entry) = self.executions.write().await.get_mut(&id) {
            if entry.state.is_active() {
                entry.state = state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tool::EXIT_FORBIDDEN;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails a scripted number of times per tool name, then succeeds.
    struct FlakyTool {
        failures: Mutex<HashMap<String, u32>>,
        calls: AtomicU32,
    }

    impl FlakyTool {
        fn new(failures: &[(&str, u32)]) -> Self {
            Self {
                failures: Mutex::new(
                    failures
                        .iter()
                        .map(|(t, n)| (t.to_string(), *n))
                        .collect(),
                ),
                calls: AtomicU32::new(0),
            }
        }

        fn reliable() -> Self {
            Self::new(&[])
        }
    }

    #[async_trait]
    impl ToolExecutor for FlakyTool {
        async fn execute(&self, request: &ToolRequest) -> Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            let left = failures.entry(request.tool.clone()).or_insert(0);
            if *left > 0 {
                *left -= 1;
                return Err(Error::Tool(format!("{} crashed", request.tool)));
            }
            Ok(ToolOutput::new(&format!("{} ok", request.tool)))
        }
    }

    struct HangingTool;

    #[async_trait]
    impl ToolExecutor for HangingTool {
        async fn execute(&self, _request: &ToolRequest) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::new("never"))
        }
    }

    /// Succeeds, but only after a delay long enough to abort first.
    struct SlowTool;

    #[async_trait]
    impl ToolExecutor for SlowTool {
        async fn execute(&self, request: &ToolRequest) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(ToolOutput::new(&format!("{} ok", request.tool)))
        }
    }

    fn fast_policy() -> ToolPolicy {
        ToolPolicy {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..ToolPolicy::default()
        }
    }

    fn layer_with(policy: ToolPolicy, executor: Arc<dyn ToolExecutor>) -> ToolLayer {
        ToolLayer::with_jitter(policy, executor, Arc::new(FixedJitter(0.0)))
    }

    // ========== Policy Tests ==========

    #[test]
    fn test_unrestricted_policy_permits_everything() {
        let layer = layer_with(ToolPolicy::default(), Arc::new(FlakyTool::reliable()));
        assert!(layer.is_tool_permitted("file_read"));
        assert!(layer.is_tool_permitted("anything"));
    }

    #[test]
    fn test_allow_list_restricts() {
        let layer = layer_with(
            ToolPolicy {
                allowed_tools: Some(vec!["file_read".to_string()]),
                ..ToolPolicy::default()
            },
            Arc::new(FlakyTool::reliable()),
        );
        assert!(layer.is_tool_permitted("file_read"));
        assert!(!layer.is_tool_permitted("shell"));
    }

    #[test]
    fn test_block_list_wins_over_allow_list() {
        let layer = layer_with(
            ToolPolicy {
                allowed_tools: Some(vec!["shell".to_string()]),
                blocked_tools: vec!["shell".to_string()],
                ..ToolPolicy::default()
            },
            Arc::new(FlakyTool::reliable()),
        );
        assert!(!layer.is_tool_permitted("shell"));
    }

    #[test]
    fn test_validate_request_errors() {
        let layer = layer_with(
            ToolPolicy {
                blocked_tools: vec!["rm".to_string()],
                ..ToolPolicy::default()
            },
            Arc::new(FlakyTool::reliable()),
        );

        let outcome = layer.validate_request(&ToolRequest::new("", json!({})));
        assert!(!outcome.valid);
        assert!(outcome.errors[0].contains("must not be empty"));

        let outcome =
            layer.validate_request(&ToolRequest::new("rm", json!({})).with_timeout_ms(0));
        assert!(!outcome.valid);
        assert_eq!(outcome.errors.len(), 2);

        let outcome = layer.validate_request(&ToolRequest::new("ls", json!({})));
        assert!(outcome.valid);
    }

    // ========== Backoff Tests ==========

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let layer = layer_with(
            ToolPolicy {
                initial_backoff_ms: 100,
                max_backoff_ms: 10_000,
                ..ToolPolicy::default()
            },
            Arc::new(FlakyTool::reliable()),
        );
        assert_eq!(layer.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(layer.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(layer.calculate_backoff(2), Duration::from_millis(400));
        assert_eq!(layer.calculate_backoff(10), Duration::from_millis(10_000));
        // Huge attempt numbers never overflow.
        assert_eq!(layer.calculate_backoff(200), Duration::from_millis(10_000));
    }

    #[test]
    fn test_backoff_jitter_scales_up_to_thirty_percent() {
        let layer = ToolLayer::with_jitter(
            ToolPolicy {
                initial_backoff_ms: 100,
                ..ToolPolicy::default()
            },
            Arc::new(FlakyTool::reliable()),
            Arc::new(FixedJitter(1.0)),
        );
        assert_eq!(layer.calculate_backoff(0), Duration::from_millis(130));
    }

    // ========== Execution Tests ==========

    #[tokio::test]
    async fn test_forbidden_request_short_circuits() {
        let tool = Arc::new(FlakyTool::reliable());
        let layer = layer_with(
            ToolPolicy {
                blocked_tools: vec!["rm".to_string()],
                ..fast_policy()
            },
            tool.clone(),
        );

        let result = layer.execute(&ToolRequest::new("rm", json!({}))).await;

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(EXIT_FORBIDDEN));
        assert_eq!(result.execution_time_ms, 0);
        // The backend was never invoked.
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
        // Nothing was tracked either.
        assert!(layer.get_active_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let layer = layer_with(fast_policy(), Arc::new(FlakyTool::reliable()));
        let result = layer
            .execute(&ToolRequest::new("file_read", json!({"path": "x"})))
            .await;

        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "file_read ok");
        assert!(layer.get_active_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_retries_with_backoff_then_succeeds() {
        let tool = Arc::new(FlakyTool::new(&[("flaky", 2)]));
        let layer = layer_with(fast_policy(), tool.clone());
        let result = layer.execute(&ToolRequest::new("flaky", json!({}))).await;

        assert!(result.success);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_exit_500() {
        let tool = Arc::new(FlakyTool::new(&[("broken", 99)]));
        let layer = layer_with(fast_policy(), tool.clone());
        let result = layer.execute(&ToolRequest::new("broken", json!({}))).await;

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(EXIT_EXHAUSTED));
        assert!(result.output.contains("broken crashed"));
        // Initial attempt plus the full retry budget.
        assert_eq!(tool.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_timeout_exit_500() {
        let layer = layer_with(
            ToolPolicy {
                max_backoff_retries: 0,
                ..fast_policy()
            },
            Arc::new(HangingTool),
        );
        let result = layer
            .execute(&ToolRequest::new("slow", json!({})).with_timeout_ms(20))
            .await;

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(EXIT_EXHAUSTED));
        assert!(result.output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_execute_sequence_order() {
        let layer = layer_with(fast_policy(), Arc::new(FlakyTool::reliable()));
        let requests = vec![
            ToolRequest::new("first", json!({})),
            ToolRequest::new("second", json!({})),
        ];
        let results = layer.execute_sequence(&requests).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].output, "first ok");
        assert_eq!(results[1].output, "second ok");
    }

    // ========== Tracking Tests ==========

    #[tokio::test]
    async fn test_active_executions_while_running() {
        let layer = Arc::new(layer_with(
            ToolPolicy {
                max_backoff_retries: 0,
                ..fast_policy()
            },
            Arc::new(HangingTool),
        ));

        let runner = layer.clone();
        let handle = tokio::spawn(async move {
            runner
                .execute(&ToolRequest::new("slow", json!({})).with_timeout_ms(100))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let active = layer.get_active_executions().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tool, "slow");
        assert_eq!(active[0].state, ExecutionState::Running);

        let result = handle.await.unwrap();
        assert!(!result.success);
        assert!(layer.get_active_executions().await.is_empty());
    }

    #[tokio::test]
    async fn test_abort_execution() {
        let layer = Arc::new(layer_with(
            ToolPolicy {
                max_backoff_retries: 0,
                ..fast_policy()
            },
            Arc::new(HangingTool),
        ));

        let runner = layer.clone();
        let handle = tokio::spawn(async move {
            runner
                .execute(&ToolRequest::new("slow", json!({})).with_timeout_ms(100))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let active = layer.get_active_executions().await;
        let id = active[0].id;

        assert!(layer.abort_execution(id).await);
        assert!(layer.get_active_executions().await.is_empty());
        // Aborting twice is a no-op.
        assert!(!layer.abort_execution(id).await);

        handle.abort();
    }

    #[tokio::test]
    async fn test_abort_sticks_after_late_success() {
        let layer = Arc::new(layer_with(
            ToolPolicy {
                max_backoff_retries: 0,
                ..fast_policy()
            },
            Arc::new(SlowTool),
        ));

        let runner = layer.clone();
        let handle = tokio::spawn(async move {
            runner
                .execute(&ToolRequest::new("slow", json!({})).with_timeout_ms(5_000))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = layer.get_active_executions().await[0].id;
        assert!(layer.abort_execution(id).await);

        // The in-flight attempt still finishes and reports success, but
        // the aborted tracking entry is not resurrected.
        let result = handle.await.unwrap();
        assert!(result.success);
        let tracked = layer.get_execution(id).await.unwrap();
        assert_eq!(tracked.state, ExecutionState::Failed);
    }

    #[tokio::test]
    async fn test_abort_unknown_execution() {
        let layer = layer_with(fast_policy(), Arc::new(FlakyTool::reliable()));
        assert!(!layer.abort_execution(ExecutionId::new()).await);
    }
}
