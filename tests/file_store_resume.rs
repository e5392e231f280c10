use std::sync::Arc;

use serde_json::json;

use strand_agent::graph::executor::ExecutorSettings;
use strand_agent::{
    GraphExecutor, GraphRuntime, Sandbox, ScriptedInvoker, TriggerRequest, ValidatedGraph,
};
use strand_core::traits::RunStore;
use strand_core::types::{DecisionKind, RunStatus};
use strand_core::{EdgeSpec, EntryPointSpec, GraphSpec, NodeSpec};
use strand_store::FileStore;

fn review_graph() -> GraphSpec {
    GraphSpec::new("review", "draft")
        .with_node(NodeSpec::new("draft", "Draft").with_outputs(["draft"]))
        .with_node(NodeSpec::new("review", "Review").with_outputs(["approved"]))
        .with_node(NodeSpec::new("publish", "Publish").with_outputs(["published"]))
        .with_edge(EdgeSpec::on_success("draft", "review"))
        .with_edge(EdgeSpec::on_success("review", "publish"))
        .with_terminal("publish")
        .with_pause("review")
        .with_entry_point("resume_review", "review")
}

const SCRIPT: &str = r#"{
    "draft": {"success": true, "output": {"draft": "v1"}},
    "review": {"success": true, "output": {"approved": true}},
    "publish": {"success": true, "output": {"published": "v1"}}
}"#;

/// A fresh runtime over the same storage root, as a new process would build.
fn runtime(store: Arc<FileStore>) -> GraphRuntime {
    let graph = ValidatedGraph::new(review_graph(), &Sandbox::default(), None).unwrap();
    let executor = GraphExecutor::new(graph, Arc::new(ScriptedInvoker::from_json(SCRIPT).unwrap()))
        .with_recorder(Arc::new(store.decision_recorder()))
        .with_settings(ExecutorSettings {
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        });
    GraphRuntime::new(executor)
        .with_entry_point(EntryPointSpec::resume("resume_review", "review"))
        .with_store(store)
}

#[tokio::test]
async fn paused_run_resumes_from_disk_in_a_new_runtime() {
    let dir = tempfile::tempdir().unwrap();

    let paused = {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        runtime(store)
            .trigger_and_wait(
                TriggerRequest::new("start").with_value("topic", json!("graphs")),
                None,
            )
            .await
            .unwrap()
            .unwrap()
    };
    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(paused.paused_at(), Some("review"));

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let record = store.load_run(&paused.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Paused);
    let state = record.session_state.unwrap();
    assert_eq!(state.memory["draft"], json!("v1"));
    assert_eq!(state.memory["topic"], json!("graphs"));

    let finished = runtime(store.clone())
        .trigger_and_wait(
            TriggerRequest::new("resume_review")
                .with_session(state)
                .with_value("reviewer", json!("sam")),
            None,
        )
        .await
        .unwrap()
        .unwrap();

    assert!(finished.success, "{:?}", finished.error);
    assert_eq!(finished.run_id, paused.run_id);
    assert_eq!(finished.path, vec!["draft", "review", "publish"]);
    assert_eq!(finished.output["reviewer"], json!("sam"));
    assert_eq!(finished.output["published"], json!("v1"));

    let record = store.load_run(&paused.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(record.session_state.is_none());
    assert!(record.finished_at.is_some());

    let decisions = store.decision_recorder().read(&paused.run_id).await.unwrap();
    let targets: Vec<&str> = decisions
        .iter()
        .filter_map(|d| match d.kind {
            DecisionKind::EdgeTraversed { ref target, .. } => Some(target.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(targets, vec!["review", "publish"]);
    assert!(!dir.path().join(format!("runs/{}.lock", paused.run_id)).exists());
}

#[tokio::test]
async fn listing_shows_every_run_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let rt = runtime(store.clone());

    let first = rt
        .trigger_and_wait(TriggerRequest::new("start"), None)
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = rt
        .trigger_and_wait(TriggerRequest::new("start"), None)
        .await
        .unwrap()
        .unwrap();

    let runs = store.list_runs().await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run_id, second.run_id);
    assert_eq!(runs[1].run_id, first.run_id);
    assert!(runs.iter().all(|r| r.status == RunStatus::Paused));
}
