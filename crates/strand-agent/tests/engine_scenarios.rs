use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use strand_agent::graph::{GraphExecutor, RunStart, SharedMemory, ValidatedGraph};
use strand_agent::graph::executor::ExecutorSettings;
use strand_agent::invoker::{FunctionRegistry, NodeContext, NodeInvoker, NodeRouter, ScriptedInvoker};
use strand_agent::sandbox::Sandbox;
use strand_core::error::ErrorCategory;
use strand_core::types::{DecisionKind, NodeResult, RunId, RunStatus};
use strand_core::{EdgeSpec, GraphSpec, LoopConfig, NodeSpec};
use strand_test_utils::{
    linear_graph, BrokenRecorder, CountingInvoker, FailingInvoker, ReadingInvoker,
    RecordingRecorder,
};

fn executor(graph: GraphSpec, invoker: Arc<dyn NodeInvoker>) -> GraphExecutor {
    let graph = ValidatedGraph::new(graph, &Sandbox::default(), None).unwrap();
    GraphExecutor::new(graph, invoker).with_settings(ExecutorSettings {
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
    })
}

fn fresh(node_id: &str) -> RunStart {
    RunStart::Fresh {
        node_id: node_id.to_string(),
        input: HashMap::new(),
    }
}

#[tokio::test]
async fn failing_first_node_is_attempted_exactly_three_times() {
    let counting = Arc::new(CountingInvoker::new(Arc::new(FailingInvoker::new(["a"]))));
    let result = executor(linear_graph(), counting.clone())
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(counting.calls("a"), 3);
    assert_eq!(counting.calls("b"), 0);
    assert_eq!(counting.calls("c"), 0);
    let error = result.error.unwrap();
    assert!(error.starts_with("node failure"), "{}", error);
    assert!(error.contains("'a'"));
    assert!(error.contains("3 attempt(s)"));
}

#[tokio::test]
async fn invoker_errors_are_retried_like_failures() {
    let counting = Arc::new(CountingInvoker::new(Arc::new(
        FailingInvoker::new(["b"]).erroring(),
    )));
    let result = executor(linear_graph(), counting.clone())
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;

    assert!(!result.success);
    assert_eq!(counting.calls("a"), 1);
    assert_eq!(counting.calls("b"), 3);
    assert_eq!(result.path, vec!["a", "b"]);
}

#[tokio::test]
async fn linear_graph_succeeds() {
    let recorder = Arc::new(RecordingRecorder::new());
    let result = executor(linear_graph(), Arc::new(ScriptedInvoker::new()))
        .with_recorder(recorder.clone())
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;

    assert!(result.success);
    assert_eq!(result.steps_executed, 3);
    assert_eq!(result.path, vec!["a", "b", "c"]);

    let recorded = recorder.decisions();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded, result.decisions);
    assert!(matches!(
        recorded[0].kind,
        DecisionKind::EdgeTraversed { ref source, ref target, .. } if source == "a" && target == "b"
    ));
}

#[tokio::test]
async fn broken_recorder_does_not_abort_run() {
    let result = executor(linear_graph(), Arc::new(ScriptedInvoker::new()))
        .with_recorder(Arc::new(BrokenRecorder))
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;
    assert!(result.success);
    assert_eq!(result.decisions.len(), 2);
}

#[tokio::test]
async fn reading_outside_scope_fails_with_permission_error() {
    let graph = GraphSpec::new("perm", "a")
        .with_node(NodeSpec::new("a", "A").with_inputs(["x"]).terminal());
    let counting = Arc::new(CountingInvoker::new(Arc::new(ReadingInvoker::new(["y"]))));
    let memory = SharedMemory::from_map(HashMap::from([("y".to_string(), json!("secret"))]));

    let result = executor(graph, counting.clone())
        .execute(RunId::new(), "start", fresh("a"), &memory)
        .await;

    assert!(!result.success);
    assert_eq!(counting.calls("a"), 1, "permission errors are not retried");
    let error = result.error.unwrap();
    assert!(error.starts_with(&ErrorCategory::Permission.to_string()), "{}", error);
    assert!(error.contains("node 'a' may not read key 'y'"));
}

#[tokio::test]
async fn dead_end_on_non_terminal_node() {
    let graph = GraphSpec::new("dead", "a")
        .with_node(NodeSpec::new("a", "A"))
        .with_node(NodeSpec::new("b", "B").terminal())
        .with_edge(EdgeSpec::conditional("a", "b", "go == True"));
    let result = executor(graph, Arc::new(ScriptedInvoker::new()))
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.error.unwrap();
    assert!(error.starts_with("dead end"), "{}", error);
    assert!(error.contains("'a'"));
}

#[tokio::test]
async fn cycle_hits_iteration_ceiling() {
    let graph = GraphSpec::new("loop", "a")
        .with_node(NodeSpec::new("a", "A"))
        .with_node(NodeSpec::new("done", "Done").terminal())
        .with_edge(EdgeSpec::always("a", "a"))
        .with_edge(EdgeSpec::conditional("a", "done", "False").with_priority(1))
        .with_loop_config(LoopConfig {
            max_iterations: 4,
            ..LoopConfig::default()
        });
    let counting = Arc::new(CountingInvoker::new(Arc::new(ScriptedInvoker::new())));
    let result = executor(graph, counting.clone())
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;

    assert_eq!(counting.calls("a"), 4);
    assert_eq!(result.steps_executed, 4);
    let error = result.error.unwrap();
    assert!(error.starts_with("loop limit exceeded"), "{}", error);
    assert!(error.contains("max_iterations"));
}

#[tokio::test]
async fn tool_call_ceiling_is_loop_limit_not_node_failure() {
    let mut graph = GraphSpec::new("tools", "a").with_node(NodeSpec::new("a", "A").terminal());
    graph.loop_config.max_tool_calls_per_turn = 2;
    let mut chatty = NodeResult::success(HashMap::new());
    chatty.tool_calls = 3;
    let counting = Arc::new(CountingInvoker::new(Arc::new(
        ScriptedInvoker::new().with_results("a", vec![chatty]),
    )));

    let result = executor(graph, counting.clone())
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;

    assert_eq!(counting.calls("a"), 1);
    let error = result.error.unwrap();
    assert!(error.contains("max_tool_calls_per_turn"));
    assert!(!error.starts_with("node failure"));
}

#[tokio::test]
async fn equal_priority_prefers_first_declared_edge() {
    let graph = GraphSpec::new("tie", "a")
        .with_node(NodeSpec::new("a", "A"))
        .with_node(NodeSpec::new("left", "Left").terminal())
        .with_node(NodeSpec::new("right", "Right").terminal())
        .with_edge(EdgeSpec::always("a", "left").with_priority(3))
        .with_edge(EdgeSpec::always("a", "right").with_priority(3));
    let result = executor(graph, Arc::new(ScriptedInvoker::new()))
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;
    assert_eq!(result.path, vec!["a", "left"]);
}

#[tokio::test]
async fn malicious_condition_blocks_edge_without_crashing() {
    let graph = GraphSpec::new("escape", "a")
        .with_node(NodeSpec::new("a", "A"))
        .with_node(NodeSpec::new("pwned", "Pwned").terminal())
        .with_node(NodeSpec::new("safe", "Safe").terminal())
        .with_edge(
            EdgeSpec::conditional("a", "pwned", "output.__class__.__mro__[-1].__subclasses__()")
                .with_priority(10),
        )
        .with_edge(EdgeSpec::always("a", "safe"));
    let bus = Arc::new(strand_core::EventBus::new(64));
    let mut rx = bus.subscribe();

    let result = executor(graph, Arc::new(ScriptedInvoker::new()))
        .with_event_bus(bus.clone())
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;
    assert_eq!(result.path, vec!["a", "safe"]);

    let mut condition_errors = 0;
    while let Ok(event) = rx.try_recv() {
        if let strand_core::types::ExecutionEvent::ConditionError { edge_id, .. } = event {
            assert_eq!(edge_id, "a->pwned");
            condition_errors += 1;
        }
    }
    assert_eq!(condition_errors, 1);
}

#[tokio::test]
async fn metrics_aggregate_per_model() {
    let graph = GraphSpec::new("m", "a")
        .with_node(NodeSpec::new("a", "A").with_max_retries(2))
        .with_node(NodeSpec::new("b", "B").terminal())
        .with_edge(EdgeSpec::on_success("a", "b"));
    let invoker = ScriptedInvoker::new()
        .with_results(
            "a",
            vec![
                NodeResult::failure("flaky").with_usage("small", 10, 0, 0.001),
                NodeResult::success(HashMap::new()).with_usage("small", 20, 5, 0.002),
            ],
        )
        .with_results(
            "b",
            vec![NodeResult::success(HashMap::new()).with_usage("large", 100, 50, 0.1)],
        );

    let result = executor(graph, Arc::new(invoker))
        .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
        .await;

    assert!(result.success);
    assert_eq!(result.metrics.total_tokens, 185);
    assert_eq!(result.metrics.per_model["small"].calls, 2);
    assert_eq!(result.metrics.per_model["large"].output_tokens, 50);
    assert!((result.metrics.total_cost_usd - 0.103).abs() < 1e-9);
}

#[tokio::test]
async fn mutating_a_read_value_does_not_change_memory() {
    let functions = FunctionRegistry::new()
        .with("mutate", |ctx: &NodeContext| {
            let mut doc = ctx.memory().read("doc")?.unwrap_or_default();
            doc["nested"]["list"] = json!(["changed"]);
            Ok(NodeResult::success(HashMap::new()))
        })
        .with("check", |ctx: &NodeContext| {
            let doc = ctx.memory().read("doc")?.unwrap_or_default();
            Ok(NodeResult::success(HashMap::new()).with_value("list", doc["nested"]["list"].clone()))
        });
    let graph = GraphSpec::new("iso", "m")
        .with_node(NodeSpec::function("m", "mutate").with_outputs(["doc"]))
        .with_node(NodeSpec::function("c", "check").with_outputs(["list"]).terminal())
        .with_edge(EdgeSpec::on_success("m", "c"));
    let memory = SharedMemory::from_map(HashMap::from([(
        "doc".to_string(),
        json!({"nested": {"list": ["original"]}}),
    )]));

    let result = executor(graph, Arc::new(NodeRouter::new(functions)))
        .execute(RunId::new(), "start", fresh("m"), &memory)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output["list"], json!(["original"]));
}
