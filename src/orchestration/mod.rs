//! The four orchestration layers and the escalation manager that
//! connects them.

pub mod escalation;
pub mod executor;
pub mod hierarchy;
pub mod intent;
pub mod planner;
pub mod tool;

pub use escalation::{
    EscalationContext, EscalationEvent, EscalationHandler, EscalationManager, EscalationStats,
    EscalationTarget, Layer,
};
pub use executor::{
    AgentExecutor, ExecuteOptions, ExecutionLayer, DEFAULT_RETRY_STRATEGIES,
};
pub use hierarchy::{Hierarchy, RunOutcome};
pub use intent::{
    ClarificationProvider, IntentConfig, IntentLayer, ParseContext, ParseOutcome, ParsingMetadata,
};
pub use planner::{DecompositionResult, PlannerConfig, PlanningLayer};
pub use tool::{
    FixedJitter, JitterSource, ThreadRngJitter, ToolExecutor, ToolLayer, ToolPolicy,
    ValidationOutcome,
};
