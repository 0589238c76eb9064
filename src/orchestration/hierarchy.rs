//! The four-layer pipeline as one facade.
//!
//! A [`Hierarchy`] wires the intent, planning, and execution layers to a
//! shared escalation manager and runs a request end to end. The
//! backward-compatible flat path skips L0 and L1 and feeds hand-built
//! tasks straight into the execution layer.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::HierarchyConfig;
use crate::core::intent::Intent;
use crate::core::task::{ParallelExecutionResult, TaskNode};
use crate::error::{Error, Result};
use crate::orchestration::escalation::{
    EscalationContext, EscalationEvent, EscalationHandler, EscalationManager, Layer,
};
use crate::orchestration::executor::{AgentExecutor, ExecuteOptions, ExecutionLayer};
use crate::orchestration::intent::{ClarificationProvider, IntentConfig, IntentLayer};
use crate::orchestration::planner::{DecompositionResult, PlannerConfig, PlanningLayer};

/// Everything one hierarchical run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The parsed (and possibly clarified) intent.
    pub intent: Intent,
    /// The planned graph.
    pub decomposition: DecompositionResult,
    /// The batch execution result; empty when planning failed.
    pub execution: ParallelExecutionResult,
    /// Escalations decided during the run.
    pub escalations: Vec<EscalationEvent>,
}

/// The assembled four-layer orchestrator.
pub struct Hierarchy {
    config: HierarchyConfig,
    intent: IntentLayer,
    planner: PlanningLayer,
    executor: ExecutionLayer,
    escalation: EscalationManager,
}

impl Hierarchy {
    /// Assemble a hierarchy from a validated config and injected backends.
    pub fn new(
        config: HierarchyConfig,
        agent_executor: Arc<dyn AgentExecutor>,
        handler: Arc<dyn EscalationHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let execution_config = config
            .layer(2)
            .cloned()
            .ok_or_else(|| Error::Config("missing execution layer config".to_string()))?;
        Ok(Self {
            intent: IntentLayer::new(IntentConfig::default()),
            planner: PlanningLayer::new(PlannerConfig::default()),
            executor: ExecutionLayer::new(execution_config, agent_executor),
            escalation: EscalationManager::new(config.escalation_policy.clone(), handler),
            config,
        })
    }

    /// The hierarchy's configuration.
    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// The escalation manager, for history queries.
    pub fn escalation(&self) -> &EscalationManager {
        &self.escalation
    }

    /// Run one request through all four layers.
    ///
    /// Parses the input, clarifies it when a provider is supplied and
    /// confidence is short, plans the task graph, and executes it with
    /// dependency ordering. Failures along the way are evaluated for
    /// escalation; the run itself completes with whatever it has.
    pub async fn run(
        &mut self,
        input: &str,
        clarifier: Option<&dyn ClarificationProvider>,
    ) -> Result<RunOutcome> {
        if self.config.is_flat_mode() {
            return Err(Error::Config(
                "hierarchy is in flat mode; use run_flat".to_string(),
            ));
        }
        info!(input_len = input.len(), "starting hierarchical run");

        // L0: parse and, when possible, clarify.
        let mut intent = self.intent.parse_intent(input, None).intent;
        if intent.needs_clarification {
            match clarifier {
                Some(provider) => {
                    let rounds = self.intent.run_clarification_loop(&mut intent, provider).await;
                    debug!(intent = %intent.id.short(), rounds, "clarification finished");
                }
                None => {
                    // No one to ask; proceed with what we have.
                    intent.needs_clarification = false;
                }
            }
        }

        let mut escalations = Vec::new();
        if intent.confidence < self.config.escalation_policy.thresholds.confidence_threshold {
            if let Some(event) = self
                .escalation
                .evaluate_escalation(
                    Layer::Intent,
                    &intent.id.to_string(),
                    &format!("confidence {:.2} below threshold", intent.confidence),
                    0,
                    EscalationContext {
                        operation: "parse_intent".to_string(),
                        detail: Some(intent.raw_input.clone()),
                    },
                )
                .await
            {
                escalations.push(event);
            }
        }

        // L1: decompose.
        let decomposition = self.planner.decompose(&intent);
        if !decomposition.architecture_validated {
            if let Some(event) = self
                .escalation
                .evaluate_escalation(
                    Layer::Planning,
                    &format!("plan-{}", intent.id.short()),
                    &decomposition.validation_errors.join("; "),
                    0,
                    EscalationContext {
                        operation: "decompose".to_string(),
                        detail: None,
                    },
                )
                .await
            {
                escalations.push(event);
            }
            return Ok(RunOutcome {
                intent,
                decomposition,
                execution: ParallelExecutionResult {
                    results: Vec::new(),
                    completed_count: 0,
                    failed_count: 0,
                    total_execution_time_ms: 0,
                },
                escalations,
            });
        }

        // L2: execute with dependency ordering.
        let deps: HashMap<String, Vec<String>> = decomposition
            .graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.dependencies.clone()))
            .collect();
        let execution = self
            .executor
            .execute_with_dependencies(
                &decomposition.graph.nodes,
                &deps,
                &ExecuteOptions::default(),
            )
            .await;

        for result in execution.results.iter().filter(|r| !r.success) {
            let error = result.errors.last().cloned().unwrap_or_default();
            if let Some(event) = self
                .escalation
                .evaluate_escalation(
                    Layer::Execution,
                    &result.task_id,
                    &error,
                    result.retry_count,
                    EscalationContext {
                        operation: "execute".to_string(),
                        detail: None,
                    },
                )
                .await
            {
                escalations.push(event);
            }
        }

        info!(
            completed = execution.completed_count,
            failed = execution.failed_count,
            escalations = escalations.len(),
            "hierarchical run finished"
        );
        Ok(RunOutcome {
            intent,
            decomposition,
            execution,
            escalations,
        })
    }

    /// Run hand-built tasks straight through the execution layer.
    ///
    /// Available in flat mode and, for hierarchical configs, when
    /// backward compatibility is switched on.
    pub async fn run_flat(&self, tasks: &[TaskNode]) -> Result<ParallelExecutionResult> {
        if !self.config.is_flat_mode() && !self.config.backward_compatibility_mode {
            return Err(Error::Config(
                "flat execution requires flat mode or backward_compatibility_mode".to_string(),
            ));
        }
        let deps: HashMap<String, Vec<String>> = tasks
            .iter()
            .map(|n| (n.id.clone(), n.dependencies.clone()))
            .collect();
        Ok(self
            .executor
            .execute_with_dependencies(tasks, &deps, &ExecuteOptions::default())
            .await)
    }
}
