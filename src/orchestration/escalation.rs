//! Cross-layer escalation: decides when a failure leaves its layer.
//!
//! The manager inspects failures against the configured policy and emits
//! at most one [`EscalationEvent`] per task. Events name the layer the
//! failure should move to; failures that no layer can absorb are flagged
//! for a human instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{EscalationMode, EscalationPolicy};
use crate::error::Result;

/// Error fragments that always route a failure to a human.
const HUMAN_KEYWORDS: &[&str] = &[
    "permission",
    "unauthorized",
    "forbidden",
    "access denied",
    "security",
    "cost limit",
    "budget exceeded",
];

/// The four layers of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Intent,
    Planning,
    Execution,
    Tool,
}

impl Layer {
    /// Numeric level, 0 at the top.
    pub fn level(&self) -> u8 {
        match self {
            Layer::Intent => 0,
            Layer::Planning => 1,
            Layer::Execution => 2,
            Layer::Tool => 3,
        }
    }

    /// Layer for a numeric level, if valid.
    pub fn from_level(level: u8) -> Option<Layer> {
        match level {
            0 => Some(Layer::Intent),
            1 => Some(Layer::Planning),
            2 => Some(Layer::Execution),
            3 => Some(Layer::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Layer::Intent => "intent",
            Layer::Planning => "planning",
            Layer::Execution => "execution",
            Layer::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

/// Where an escalated failure should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTarget {
    /// A layer above the failing one.
    Layer(Layer),
    /// No layer can absorb this; a human must decide.
    Human,
}

impl EscalationTarget {
    /// Numeric level of the target; -1 for a human.
    pub fn as_level(&self) -> i8 {
        match self {
            EscalationTarget::Layer(layer) => layer.level() as i8,
            EscalationTarget::Human => -1,
        }
    }
}

/// Free-form context attached to an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EscalationContext {
    /// The operation that was running when the failure happened.
    pub operation: String,
    /// Extra detail, if any.
    pub detail: Option<String>,
}

/// A single escalation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    /// The layer the failure happened in.
    pub layer: Layer,
    /// The task that failed.
    pub task_id: String,
    /// The error text that triggered escalation.
    pub error: String,
    /// Retries consumed before escalating.
    pub retry_count: u32,
    /// Where the failure should move.
    pub suggested_next_layer: EscalationTarget,
    /// Whether a human must be pulled in regardless of the target.
    pub requires_human: bool,
    /// What was running at the time.
    pub context: EscalationContext,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

/// Receiver of escalation decisions.
///
/// Implementations route events to whatever surface the embedding
/// application has; the manager never blocks on them failing.
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    /// An escalation was decided.
    async fn on_escalation(&self, event: &EscalationEvent) -> Result<()>;

    /// An escalation needs a human.
    async fn on_human_required(&self, event: &EscalationEvent) -> Result<()>;
}

/// Per-layer counters over the escalation history.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EscalationStats {
    /// Events per originating layer.
    pub by_layer: HashMap<Layer, usize>,
    /// Events that required a human.
    pub human_required: usize,
    /// Mean retry count across all events.
    pub avg_retry_count: f64,
}

/// Decides, records, and forwards escalations.
pub struct EscalationManager {
    policy: EscalationPolicy,
    handler: Arc<dyn EscalationHandler>,
    escalated: HashSet<String>,
    history: Vec<EscalationEvent>,
}

impl EscalationManager {
    /// Create a manager over a policy and a handler.
    pub fn new(policy: EscalationPolicy, handler: Arc<dyn EscalationHandler>) -> Self {
        Self {
            policy,
            handler,
            escalated: HashSet::new(),
            history: Vec::new(),
        }
    }

    /// The manager's policy.
    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Decide whether a failure escalates, and record the event if so.
    ///
    /// At most one event is ever emitted per task id; later failures of
    /// the same task return `None`. The handler is notified but its
    /// errors are swallowed, escalation bookkeeping never fails.
    pub async fn evaluate_escalation(
        &mut self,
        layer: Layer,
        task_id: &str,
        error: &str,
        retry_count: u32,
        context: EscalationContext,
    ) -> Option<EscalationEvent> {
        if self.escalated.contains(task_id) {
            debug!(task = task_id, "already escalated, skipping");
            return None;
        }
        if !self.should_escalate(error, retry_count) {
            return None;
        }

        let requires_human = self.requires_human(layer, error, retry_count);
        let event = EscalationEvent {
            layer,
            task_id: task_id.to_string(),
            error: error.to_string(),
            retry_count,
            suggested_next_layer: Self::next_layer(layer),
            requires_human,
            context,
            timestamp: Utc::now(),
        };

        self.escalated.insert(task_id.to_string());
        self.history.push(event.clone());
        self.notify(&event).await;
        Some(event)
    }

    /// Re-stamp and forward an already-decided event to its target layer.
    ///
    /// Only events targeting a layer are forwarded; a human-bound event
    /// is rejected outright, with no history entry and no handler call.
    pub async fn escalate(&mut self, mut event: EscalationEvent) -> bool {
        if !matches!(event.suggested_next_layer, EscalationTarget::Layer(_)) {
            debug!(task = %event.task_id, "human-bound event rejected, not forwarded");
            return false;
        }
        event.timestamp = Utc::now();
        self.history.push(event.clone());
        self.notify(&event).await;
        true
    }

    /// Whether a failing operation may keep retrying in its own layer.
    pub fn can_retry_at_current_layer(&self, retry_count: u32) -> bool {
        match self.policy.mode {
            EscalationMode::Manual => false,
            EscalationMode::Auto => true,
            EscalationMode::ThresholdBased => {
                retry_count < self.policy.thresholds.max_retries_per_layer
            }
        }
    }

    fn should_escalate(&self, error: &str, retry_count: u32) -> bool {
        let lower = error.to_lowercase();
        if self
            .policy
            .auto_escalate_on
            .iter()
            .any(|kw| lower.contains(&kw.to_lowercase()))
        {
            return true;
        }
        if lower.contains("confidence") {
            return true;
        }
        retry_count >= self.policy.thresholds.max_retries_per_layer
    }

    fn requires_human(&self, layer: Layer, error: &str, retry_count: u32) -> bool {
        if layer == Layer::Intent {
            // Nothing sits above intent but the user.
            return true;
        }
        if retry_count >= self.policy.thresholds.max_retries_per_layer * 2 {
            return true;
        }
        let lower = error.to_lowercase();
        HUMAN_KEYWORDS.iter().any(|kw| lower.contains(kw))
    }

    fn next_layer(layer: Layer) -> EscalationTarget {
        match layer {
            Layer::Execution => EscalationTarget::Layer(Layer::Planning),
            Layer::Planning => EscalationTarget::Layer(Layer::Intent),
            Layer::Intent | Layer::Tool => EscalationTarget::Human,
        }
    }

    async fn notify(&self, event: &EscalationEvent) {
        if let Err(e) = self.handler.on_escalation(event).await {
            warn!(task = %event.task_id, error = %e, "escalation handler failed");
        }
        if event.requires_human {
            if let Err(e) = self.handler.on_human_required(event).await {
                warn!(task = %event.task_id, error = %e, "human-required handler failed");
            }
        }
    }

    /// Every recorded event, oldest first.
    pub fn history(&self) -> &[EscalationEvent] {
        &self.history
    }

    /// Events that originated in a given layer.
    pub fn events_for_layer(&self, layer: Layer) -> Vec<&EscalationEvent> {
        self.history.iter().filter(|e| e.layer == layer).collect()
    }

    /// Events for a given task.
    pub fn events_for_task(&self, task_id: &str) -> Vec<&EscalationEvent> {
        self.history.iter().filter(|e| e.task_id == task_id).collect()
    }

    /// Events that require a human.
    pub fn human_required_events(&self) -> Vec<&EscalationEvent> {
        self.history.iter().filter(|e| e.requires_human).collect()
    }

    /// Aggregate counters over the history.
    pub fn stats(&self) -> EscalationStats {
        let mut by_layer: HashMap<Layer, usize> = HashMap::new();
        for event in &self.history {
            *by_layer.entry(event.layer).or_insert(0) += 1;
        }
        let human_required = self.history.iter().filter(|e| e.requires_human).count();
        let avg_retry_count = if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().map(|e| e.retry_count as f64).sum::<f64>()
                / self.history.len() as f64
        };
        EscalationStats {
            by_layer,
            human_required,
            avg_retry_count,
        }
    }

    /// Drop all history and allow previously-escalated tasks to escalate
    /// again.
    pub fn clear_history(&mut self) {
        debug!(events = self.history.len(), "clearing escalation history");
        self.history.clear();
        self.escalated.clear();
    }
}
