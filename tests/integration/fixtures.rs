//! Shared fixtures for the integration suite: scriptable agent and tool
//! backends, a recording escalation handler, and graph builders.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, Once};

use strata::core::{Artifact, ArtifactType, TaskNode, ToolOutput, ToolRequest};
use strata::error::{Error, Result};
use strata::orchestration::{
    AgentExecutor, ClarificationProvider, EscalationEvent, EscalationHandler, ToolExecutor,
};
use strata::core::Intent;

static TRACING: Once = Once::new();

/// Install the test tracing subscriber once per process. Honors
/// `RUST_LOG`; output is captured per test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Agent backend that fails a scripted number of times per task id and
/// succeeds afterwards.
pub struct MockAgentExecutor {
    failures: Mutex<HashMap<String, u32>>,
    pub calls: AtomicU32,
}

impl MockAgentExecutor {
    pub fn new(failures: &[(&str, u32)]) -> Self {
        Self {
            failures: Mutex::new(
                failures
                    .iter()
                    .map(|(id, n)| (id.to_string(), *n))
                    .collect(),
            ),
            calls: AtomicU32::new(0),
        }
    }

    pub fn reliable() -> Self {
        Self::new(&[])
    }

    /// Fail a task forever with a fixed error text.
    pub fn always_failing(task_id: &str) -> Self {
        Self::new(&[(task_id, u32::MAX)])
    }
}

#[async_trait]
impl AgentExecutor for MockAgentExecutor {
    async fn execute(&self, task: &TaskNode, _prompt: &str) -> Result<Vec<Artifact>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().unwrap();
        let left = failures.entry(task.id.clone()).or_insert(0);
        if *left > 0 {
            if *left != u32::MAX {
                *left -= 1;
            }
            return Err(Error::Executor(format!("agent failure on {}", task.id)));
        }
        Ok(vec![Artifact::new(
            ArtifactType::Generic,
            &format!("artifact from {}", task.id),
            &task.id,
            &task.agent,
        )])
    }
}

/// Tool backend that echoes the request, failing a scripted number of
/// times per tool name first.
pub struct MockToolExecutor {
    failures: Mutex<HashMap<String, u32>>,
    pub calls: AtomicU32,
}

impl MockToolExecutor {
    pub fn new(failures: &[(&str, u32)]) -> Self {
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

    pub fn reliable() -> Self {
        Self::new(&[])
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, request: &ToolRequest) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().unwrap();
        let left = failures.entry(request.tool.clone()).or_insert(0);
        if *left > 0 {
            *left -= 1;
            return Err(Error::Tool(format!("{} failed", request.tool)));
        }
        Ok(ToolOutput::new(&format!("{} executed", request.tool)))
    }
}

/// Escalation handler that records everything it is told.
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<EscalationEvent>>,
    pub human_events: Mutex<Vec<EscalationEvent>>,
}

#[async_trait]
impl EscalationHandler for RecordingHandler {
    async fn on_escalation(&self, event: &EscalationEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn on_human_required(&self, event: &EscalationEvent) -> Result<()> {
        self.human_events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Clarifier that always answers with the same text.
pub struct ScriptedClarifier {
    pub answer: String,
}

impl ScriptedClarifier {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
        }
    }
}

#[async_trait]
impl ClarificationProvider for ScriptedClarifier {
    async fn answer(&self, _intent: &Intent, _question: &str) -> String {
        self.answer.clone()
    }
}

/// Build a task with dependencies in one call.
pub fn task_with_deps(id: &str, deps: &[&str]) -> TaskNode {
    TaskNode::new(id, "mercury", &format!("do {}", id)).with_dependencies(deps)
}
