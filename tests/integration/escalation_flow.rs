//! Escalation behavior across the layer boundary.

use std::sync::Arc;

use strata::config::{EscalationPolicy, HierarchyConfig};
use strata::core::ToolRequest;
use strata::orchestration::{
    EscalationContext, EscalationManager, EscalationTarget, FixedJitter, Hierarchy, Layer,
    ToolLayer, ToolPolicy,
};

use crate::fixtures::{init_tracing, MockAgentExecutor, MockToolExecutor, RecordingHandler};

fn ctx(operation: &str) -> EscalationContext {
    EscalationContext {
        operation: operation.to_string(),
        detail: None,
    }
}

#[tokio::test]
async fn test_execution_timeout_escalates_to_planning_and_human() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut manager = EscalationManager::new(EscalationPolicy::default(), handler.clone());

    let event = manager
        .evaluate_escalation(
            Layer::Execution,
            "implement",
            "timeout",
            6,
            ctx("execute"),
        )
        .await
        .unwrap();

    assert_eq!(event.layer, Layer::Execution);
    assert_eq!(event.suggested_next_layer, EscalationTarget::Layer(Layer::Planning));
    // Six retries against a threshold of three pulls in a human too.
    assert!(event.requires_human);
    assert_eq!(handler.events.lock().unwrap().len(), 1);
    assert_eq!(handler.human_events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_tool_permission_failure_routes_to_human() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut manager = EscalationManager::new(EscalationPolicy::default(), handler.clone());

    // A permission error alone is not an escalation trigger; it only
    // classifies one that the retry threshold has already warranted.
    let early = manager
        .evaluate_escalation(
            Layer::Tool,
            "shell-call",
            "permission denied: /etc/passwd",
            0,
            ctx("shell"),
        )
        .await;
    assert!(early.is_none());

    let event = manager
        .evaluate_escalation(
            Layer::Tool,
            "shell-call",
            "permission denied: /etc/passwd",
            3,
            ctx("shell"),
        )
        .await
        .unwrap();

    assert_eq!(event.suggested_next_layer, EscalationTarget::Human);
    assert!(event.requires_human);
    assert_eq!(event.suggested_next_layer.as_level(), -1);
}

#[tokio::test]
async fn test_each_task_escalates_at_most_once() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut manager = EscalationManager::new(EscalationPolicy::default(), handler.clone());

    for retry in [3, 4, 5] {
        manager
            .evaluate_escalation(Layer::Execution, "repeat-offender", "timeout", retry, ctx("x"))
            .await;
    }

    assert_eq!(manager.history().len(), 1);
    assert_eq!(handler.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_hierarchy_run_records_escalations_for_failures() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut hierarchy = Hierarchy::new(
        HierarchyConfig::default(),
        Arc::new(MockAgentExecutor::always_failing("review")),
        handler.clone(),
    )
    .unwrap();

    let outcome = hierarchy
        .run("review the api changes for the auth service", None)
        .await
        .unwrap();

    assert_eq!(outcome.execution.failed_count, 1);
    let events = handler.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].layer, Layer::Execution);
    assert_eq!(events[0].task_id, "review");
    assert_eq!(
        events[0].suggested_next_layer,
        EscalationTarget::Layer(Layer::Planning)
    );
}

#[tokio::test]
async fn test_tool_layer_failures_surface_for_escalation() {
    init_tracing();
    // The tool layer reports exhaustion via exit 500; the caller feeds
    // that into the manager as a tool-layer failure.
    let layer = ToolLayer::with_jitter(
        ToolPolicy {
            max_backoff_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..ToolPolicy::default()
        },
        Arc::new(MockToolExecutor::new(&[("broken", 99)])),
        Arc::new(FixedJitter(0.0)),
    );
    let result = layer
        .execute(&ToolRequest::new("broken", serde_json::json!({})))
        .await;
    assert_eq!(result.exit_code, Some(500));

    let handler = Arc::new(RecordingHandler::default());
    let mut manager = EscalationManager::new(EscalationPolicy::default(), handler.clone());
    let error = format!("tool execution failure: {}", result.output);
    let event = manager
        .evaluate_escalation(Layer::Tool, "broken-call", &error, 1, ctx("broken"))
        .await
        .unwrap();

    assert_eq!(event.suggested_next_layer, EscalationTarget::Human);
}

#[tokio::test]
async fn test_stats_aggregate_across_layers() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut manager = EscalationManager::new(EscalationPolicy::default(), handler);

    manager
        .evaluate_escalation(Layer::Execution, "a", "timeout", 2, ctx("execute"))
        .await;
    manager
        .evaluate_escalation(Layer::Planning, "b", "replan failure", 0, ctx("replan"))
        .await;
    manager
        .evaluate_escalation(Layer::Tool, "c", "access denied", 4, ctx("shell"))
        .await;

    let stats = manager.stats();
    assert_eq!(stats.by_layer[&Layer::Execution], 1);
    assert_eq!(stats.by_layer[&Layer::Planning], 1);
    assert_eq!(stats.by_layer[&Layer::Tool], 1);
    assert_eq!(stats.human_required, 1);
    assert!((stats.avg_retry_count - 2.0).abs() < f64::EPSILON);
}
