//! strata — a four-layer hierarchical orchestrator for agent workloads.
//!
//! Requests flow down through four layers: the intent layer (L0) turns
//! free text into a scored [`core::Intent`], the planning layer (L1)
//! decomposes it into a dependency [`core::TaskGraph`], the execution
//! layer (L2) runs tasks through an injected [`orchestration::AgentExecutor`]
//! with retries and bounded concurrency, and the tool layer (L3) gates
//! sandboxed tool calls behind an allow/block policy. Failures flow back
//! up through the [`orchestration::EscalationManager`], which routes each
//! one to the layer able to absorb it, or to a human when none can.
//!
//! [`orchestration::Hierarchy`] assembles the whole pipeline; the flat
//! path ([`orchestration::Hierarchy::run_flat`]) preserves direct task
//! execution for callers that predate the hierarchy.

pub mod config;
pub mod core;
pub mod error;
pub mod orchestration;

pub use config::{
    EscalationMode, EscalationPolicy, EscalationThresholds, HierarchyConfig, LayerConfig,
    ObservabilityLevel,
};
pub use error::{Error, Result};
pub use orchestration::{Hierarchy, RunOutcome};
