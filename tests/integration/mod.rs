//! Integration suite: exercises the layers together rather than in
//! isolation. Fixtures provide scriptable agent and tool backends so
//! every scenario is deterministic.

mod fixtures;

mod escalation_flow;
mod pipeline_e2e;
