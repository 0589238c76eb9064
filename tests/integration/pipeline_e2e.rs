//! End-to-end pipeline coverage: intent in, artifacts out.

use std::sync::Arc;

use strata::config::HierarchyConfig;
use strata::core::{IntentType, TaskStatus, ToolRequest};
use strata::orchestration::{
    ExecutionLayer, FixedJitter, Hierarchy, IntentLayer, PlannerConfig, PlanningLayer, ToolLayer,
    ToolPolicy,
};
use strata::Error;

use crate::fixtures::{
    init_tracing, task_with_deps, MockAgentExecutor, MockToolExecutor, RecordingHandler,
    ScriptedClarifier,
};

#[tokio::test]
async fn test_create_request_flows_through_all_layers() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut hierarchy = Hierarchy::new(
        HierarchyConfig::default(),
        Arc::new(MockAgentExecutor::reliable()),
        handler.clone(),
    )
    .unwrap();

    let outcome = hierarchy
        .run("create a robust api service for user management", None)
        .await
        .unwrap();

    // L0 recognized the request.
    assert_eq!(outcome.intent.parsed_type, IntentType::Create);
    assert!(outcome.intent.confidence >= 0.5);

    // L1 produced the four-step plan with a linear dependency chain.
    let graph = &outcome.decomposition.graph;
    assert_eq!(graph.len(), 4);
    assert!(outcome.decomposition.architecture_validated);
    assert_eq!(graph.node("design").unwrap().dependencies, vec!["spec"]);
    assert_eq!(
        graph.critical_path,
        vec!["spec", "design", "implement", "test"]
    );

    // L2 executed everything.
    assert_eq!(outcome.execution.completed_count, 4);
    assert_eq!(outcome.execution.failed_count, 0);
    let artifacts = ExecutionLayer::collect_artifacts(&outcome.execution);
    assert_eq!(artifacts.len(), 4);

    // Nothing escalated.
    assert!(outcome.escalations.is_empty());
    assert!(handler.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_vague_request_is_clarified_before_planning() {
    init_tracing();
    let mut hierarchy = Hierarchy::new(
        HierarchyConfig::default(),
        Arc::new(MockAgentExecutor::reliable()),
        Arc::new(RecordingHandler::default()),
    )
    .unwrap();

    let clarifier = ScriptedClarifier::new("the billing importer specifically");
    let outcome = hierarchy
        .run("hm, that thing", Some(&clarifier))
        .await
        .unwrap();

    // Clarification rounds were recorded on the intent itself.
    assert!(!outcome.intent.clarification_history.is_empty());
    assert!(!outcome.intent.needs_clarification);
    // The fallback plan still ran to completion.
    assert_eq!(outcome.execution.failed_count, 0);
}

#[tokio::test]
async fn test_failed_task_blocks_downstream_and_escalates() {
    init_tracing();
    let handler = Arc::new(RecordingHandler::default());
    let mut hierarchy = Hierarchy::new(
        HierarchyConfig::default(),
        Arc::new(MockAgentExecutor::always_failing("implement")),
        handler.clone(),
    )
    .unwrap();

    let outcome = hierarchy
        .run("create a new api endpoint for billing", None)
        .await
        .unwrap();

    // spec and design succeed; implement fails; test never runs.
    assert_eq!(outcome.execution.completed_count, 2);
    assert_eq!(outcome.execution.failed_count, 2);
    let test_result = outcome
        .execution
        .results
        .iter()
        .find(|r| r.task_id == "test")
        .unwrap();
    assert_eq!(test_result.errors, vec!["Dependency resolution failed"]);

    // The failures reached the escalation manager.
    assert!(!outcome.escalations.is_empty());
    assert!(!handler.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_flat_mode_preserves_direct_execution() {
    init_tracing();
    let hierarchy = Hierarchy::new(
        HierarchyConfig::flat(),
        Arc::new(MockAgentExecutor::reliable()),
        Arc::new(RecordingHandler::default()),
    )
    .unwrap();

    let tasks = vec![
        task_with_deps("fetch", &[]),
        task_with_deps("transform", &["fetch"]),
        task_with_deps("store", &["transform"]),
    ];
    let batch = hierarchy.run_flat(&tasks).await.unwrap();

    assert_eq!(batch.completed_count, 3);
    assert_eq!(batch.failed_count, 0);
}

#[tokio::test]
async fn test_hierarchical_run_rejected_in_flat_mode() {
    init_tracing();
    let mut hierarchy = Hierarchy::new(
        HierarchyConfig::flat(),
        Arc::new(MockAgentExecutor::reliable()),
        Arc::new(RecordingHandler::default()),
    )
    .unwrap();

    assert!(matches!(
        hierarchy.run("build something", None).await,
        Err(Error::Config(_))
    ));
}

#[test]
fn test_oversized_plan_is_rejected_with_empty_graph() {
    init_tracing();
    let planner = PlanningLayer::new(PlannerConfig {
        max_tasks_per_graph: 3,
        ..PlannerConfig::default()
    });
    let layer = IntentLayer::with_defaults();
    let intent = layer
        .parse_intent("create a service for orders", None)
        .intent;

    let result = planner.decompose(&intent);

    assert!(!result.architecture_validated);
    assert!(result.graph.is_empty());
    assert!(result.validation_errors[0].contains("Too many tasks"));
}

#[test]
fn test_replan_splits_oversized_task() {
    init_tracing();
    let planner = PlanningLayer::new(PlannerConfig::default());
    let layer = IntentLayer::with_defaults();
    let intent = layer
        .parse_intent("create a service for orders", None)
        .intent;
    let first = planner.decompose(&intent);

    let replanned = planner.replan(&first, "implement", "token limit exceeded");

    assert_eq!(replanned.replan_count, 1);
    assert_eq!(
        replanned.graph.node("implement").unwrap().status,
        TaskStatus::Failed
    );
    // Half the token estimate each, wired into the old task's place.
    let part = replanned.graph.node("implement-part-1").unwrap();
    assert_eq!(part.estimated_tokens, 1000);
    assert_eq!(part.dependencies, vec!["design"]);
    assert!(replanned
        .graph
        .node("test")
        .unwrap()
        .dependencies
        .contains(&"implement-part-2".to_string()));
}

#[tokio::test]
async fn test_tool_policy_gates_and_executes() {
    init_tracing();
    let backend = Arc::new(MockToolExecutor::reliable());
    let layer = ToolLayer::with_jitter(
        ToolPolicy {
            allowed_tools: Some(vec!["file_read".to_string(), "file_write".to_string()]),
            blocked_tools: vec!["shell".to_string()],
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..ToolPolicy::default()
        },
        backend.clone(),
        Arc::new(FixedJitter(0.0)),
    );

    let allowed = layer
        .execute(&ToolRequest::new("file_read", serde_json::json!({"path": "x"})))
        .await;
    assert!(allowed.success);
    assert_eq!(allowed.exit_code, Some(0));

    let blocked = layer
        .execute(&ToolRequest::new("shell", serde_json::json!({"cmd": "ls"})))
        .await;
    assert!(!blocked.success);
    assert_eq!(blocked.exit_code, Some(403));

    let unknown = layer
        .execute(&ToolRequest::new("network", serde_json::json!({})))
        .await;
    assert!(!unknown.success);
    assert_eq!(unknown.exit_code, Some(403));

    // Only the permitted request reached the backend.
    assert_eq!(backend.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tool_retries_recover_transient_failures() {
    init_tracing();
    let backend = Arc::new(MockToolExecutor::new(&[("flaky", 2)]));
    let layer = ToolLayer::with_jitter(
        ToolPolicy {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..ToolPolicy::default()
        },
        backend.clone(),
        Arc::new(FixedJitter(0.0)),
    );

    let result = layer
        .execute(&ToolRequest::new("flaky", serde_json::json!({})))
        .await;

    assert!(result.success);
    assert_eq!(backend.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
}
