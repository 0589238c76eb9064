//! L2 execution layer: runs tasks through an injected agent executor.
//!
//! Each task gets a bounded attempt sequence with per-attempt timeouts and
//! a rotating retry strategy appended to the prompt. Batches run with
//! bounded concurrency; dependency-aware batches run in waves, releasing a
//! task only once every prerequisite has succeeded.

use async_trait::async_trait;
use futures::stream::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::LayerConfig;
use crate::core::task::{Artifact, ExecutionResult, ParallelExecutionResult, TaskNode};
use crate::error::{Error, Result};

/// Prompt amendments cycled through on successive retries. Once the list
/// is exhausted the last strategy repeats.
pub const DEFAULT_RETRY_STRATEGIES: &[&str] = &[
    "restate the requirements",
    "simplify the approach",
    "decompose into smaller steps",
];

/// The agent backend the execution layer drives.
///
/// One call is one attempt; retries and timeouts live in the layer, not
/// the implementation.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Execute one attempt of a task with the given prompt, returning the
    /// artifacts it produced.
    async fn execute(&self, task: &TaskNode, prompt: &str) -> Result<Vec<Artifact>>;
}

/// Per-call overrides for the layer's configured limits.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Retry budget; falls back to the layer config.
    pub max_retries: Option<u32>,
    /// Per-attempt timeout in milliseconds; falls back to the layer config.
    pub timeout_ms: Option<u64>,
    /// Concurrency cap for batch calls; falls back to the layer config.
    pub max_concurrency: Option<usize>,
    /// Retry strategies; falls back to [`DEFAULT_RETRY_STRATEGIES`].
    pub retry_strategies: Option<Vec<String>>,
}

/// L2: retrying, timeout-bounded, concurrency-capped task execution.
pub struct ExecutionLayer {
    config: LayerConfig,
    executor: Arc<dyn AgentExecutor>,
}

impl ExecutionLayer {
    /// Create an execution layer over an agent backend.
    pub fn new(config: LayerConfig, executor: Arc<dyn AgentExecutor>) -> Self {
        Self { config, executor }
    }

    /// The layer's configuration.
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    fn retry_budget(&self, options: &ExecuteOptions) -> u32 {
        options.max_retries.unwrap_or(self.config.max_retries)
    }

    fn attempt_timeout(&self, options: &ExecuteOptions) -> Duration {
        Duration::from_millis(options.timeout_ms.unwrap_or(self.config.timeout_ms))
    }

    fn concurrency_cap(&self, options: &ExecuteOptions) -> usize {
        options
            .max_concurrency
            .unwrap_or(self.config.max_concurrency)
            .max(1)
    }

    /// Run one task to a terminal result.
    ///
    /// Attempts the task up to `1 + max_retries` times. Each retry appends
    /// a strategy marker to the prompt so the agent sees what changed;
    /// attempts that outlive the timeout are recorded as timed out.
    pub async fn execute(&self, task: &TaskNode, options: &ExecuteOptions) -> ExecutionResult {
        let max_retries = self.retry_budget(options);
        let timeout = self.attempt_timeout(options);
        let default_strategies: Vec<String> = DEFAULT_RETRY_STRATEGIES
            .iter()
            .map(|s| s.to_string())
            .collect();
        let strategies = options.retry_strategies.as_ref().unwrap_or(&default_strategies);

        let mut prompt = task.description.clone();
        let mut errors = Vec::new();
        let mut retry_count = 0u32;

        loop {
            let attempt = self.executor.execute(task, &prompt);
            let outcome = match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(timeout)),
            };

            match outcome {
                Ok(artifacts) => {
                    debug!(task = %task.id, retries = retry_count, "task succeeded");
                    return ExecutionResult {
                        task_id: task.id.clone(),
                        success: true,
                        artifacts,
                        retry_count,
                        final_prompt: prompt,
                        errors,
                    };
                }
                Err(e) => {
                    warn!(task = %task.id, attempt = retry_count + 1, error = %e, "attempt failed");
                    errors.push(e.to_string());
                    if retry_count >= max_retries {
                        return ExecutionResult {
                            task_id: task.id.clone(),
                            success: false,
                            artifacts: Vec::new(),
                            retry_count,
                            final_prompt: prompt,
                            errors,
                        };
                    }
                    retry_count += 1;
                    let strategy = if strategies.is_empty() {
                        ""
                    } else {
                        let idx = ((retry_count - 1) as usize).min(strategies.len() - 1);
                        strategies[idx].as_str()
                    };
                    prompt.push_str(&format!("\n[retry {}: {}]", retry_count, strategy));
                }
            }
        }
    }

    /// Run a batch of independent tasks with bounded concurrency.
    pub async fn execute_parallel(
        &self,
        tasks: &[TaskNode],
        options: &ExecuteOptions,
    ) -> ParallelExecutionResult {
        let started = Instant::now();
        let cap = self.concurrency_cap(options);

        let mut results: Vec<ExecutionResult> = futures::stream::iter(
            tasks.iter().map(|task| self.execute(task, options)),
        )
        .buffer_unordered(cap)
        .collect()
        .await;

        // Stable report order regardless of completion order.
        let order: HashMap<&str, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();
        results.sort_by_key(|r| order.get(r.task_id.as_str()).copied().unwrap_or(usize::MAX));

        Self::summarize(results, started)
    }

    /// Run a batch of interdependent tasks in waves.
    ///
    /// A task is released only once every dependency named in `deps` has
    /// finished successfully. Tasks left unreleasable (their prerequisites
    /// failed or are missing) are reported as failures without running.
    pub async fn execute_with_dependencies(
        &self,
        tasks: &[TaskNode],
        deps: &HashMap<String, Vec<String>>,
        options: &ExecuteOptions,
    ) -> ParallelExecutionResult {
        let started = Instant::now();
        let cap = self.concurrency_cap(options);

        let mut remaining: Vec<&TaskNode> = tasks.iter().collect();
        let mut satisfied: HashSet<String> = HashSet::new();
        let mut results: Vec<ExecutionResult> = Vec::with_capacity(tasks.len());

        loop {
            let (wave, rest): (Vec<&TaskNode>, Vec<&TaskNode>) =
                remaining.into_iter().partition(|task| {
                    deps.get(&task.id)
                        .map(|d| d.iter().all(|dep| satisfied.contains(dep)))
                        .unwrap_or(true)
                });
            remaining = rest;

            if wave.is_empty() {
                break;
            }
            debug!(wave_size = wave.len(), pending = remaining.len(), "dispatching wave");

            let mut in_flight = futures::stream::iter(
                wave.iter().map(|task| self.execute(task, options)),
            )
            .buffer_unordered(cap);
            while let Some(result) = in_flight.next().await {
                if result.success {
                    satisfied.insert(result.task_id.clone());
                }
                results.push(result);
            }
        }

        // Whatever is left can never run: a prerequisite failed or does
        // not exist.
        for task in remaining {
            warn!(task = %task.id, "dependencies unsatisfiable");
            results.push(ExecutionResult::failed(
                &task.id,
                &task.description,
                "Dependency resolution failed",
            ));
        }

        // Stable report order.
        let order: HashMap<&str, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();
        results.sort_by_key(|r| order.get(r.task_id.as_str()).copied().unwrap_or(usize::MAX));

        Self::summarize(results, started)
    }

    fn summarize(results: Vec<ExecutionResult>, started: Instant) -> ParallelExecutionResult {
        let completed_count = results.iter().filter(|r| r.success).count();
        let failed_count = results.len() - completed_count;
        ParallelExecutionResult {
            results,
            completed_count,
            failed_count,
            total_execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Artifacts from all successful results, in result order.
    pub fn collect_artifacts(batch: &ParallelExecutionResult) -> Vec<&Artifact> {
        batch
            .results
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.artifacts.iter())
            .collect()
    }

    /// Whether the batch both completed and failed at least one task.
    pub fn is_partial_success(batch: &ParallelExecutionResult) -> bool {
        batch.completed_count > 0 && batch.failed_count > 0
    }

    /// Map failed result ids back to the tasks that produced them.
    pub fn get_failed_tasks<'a>(
        batch: &ParallelExecutionResult,
        tasks: &'a [TaskNode],
    ) -> Vec<&'a TaskNode> {
        let failed: HashSet<&str> = batch
            .results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.task_id.as_str())
            .collect();
        tasks.iter().filter(|t| failed.contains(t.id.as_str())).collect()
    }
}
