//! Mocks and graph fixtures shared by the Strand test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use strand_agent::invoker::{NodeContext, NodeInvoker};
use strand_core::error::{Result, StrandError};
use strand_core::traits::{DecisionRecorder, RunStore};
use strand_core::types::{Decision, NodeResult, RunId, RunRecord};
use strand_core::{EdgeSpec, GraphSpec, NodeSpec};

// ---------------------------------------------------------------------------
// Invokers
// ---------------------------------------------------------------------------

/// Wraps another invoker and counts invocations per node id.
pub struct CountingInvoker {
    inner: Arc<dyn NodeInvoker>,
    calls: Mutex<HashMap<String, u32>>,
}

impl CountingInvoker {
    pub fn new(inner: Arc<dyn NodeInvoker>) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, node_id: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

impl NodeInvoker for CountingInvoker {
    fn invoke<'a>(
        &'a self,
        node: &'a NodeSpec,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeResult>> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(node.id.clone())
            .or_insert(0) += 1;
        self.inner.invoke(node, ctx)
    }
}

/// Fails the listed nodes on every attempt and succeeds everywhere else.
pub struct FailingInvoker {
    failing: Vec<String>,
    as_error: bool,
}

impl FailingInvoker {
    /// Failing nodes report `success == false`.
    pub fn new<I, S>(failing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: failing.into_iter().map(Into::into).collect(),
            as_error: false,
        }
    }

    /// Failing nodes return `Err` instead of an unsuccessful result.
    pub fn erroring(mut self) -> Self {
        self.as_error = true;
        self
    }
}

impl NodeInvoker for FailingInvoker {
    fn invoke<'a>(
        &'a self,
        node: &'a NodeSpec,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(async move {
            if !self.failing.contains(&node.id) {
                return Ok(NodeResult::success(HashMap::new()));
            }
            let message = format!("{} failed on attempt {}", node.id, ctx.attempt());
            if self.as_error {
                Err(StrandError::Invocation(message))
            } else {
                Ok(NodeResult::failure(message))
            }
        })
    }
}

/// Reads the given keys through the node's memory view, then succeeds.
///
/// Useful for exercising read permissions.
pub struct ReadingInvoker {
    keys: Vec<String>,
}

impl ReadingInvoker {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl NodeInvoker for ReadingInvoker {
    fn invoke<'a>(
        &'a self,
        _node: &'a NodeSpec,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(async move {
            let mut output = HashMap::new();
            for key in &self.keys {
                if let Some(value) = ctx.memory().read(key)? {
                    output.insert(format!("seen_{}", key), value);
                }
            }
            Ok(NodeResult::success(output))
        })
    }
}

/// Sleeps before succeeding.
pub struct SlowInvoker {
    delay: Duration,
}

impl SlowInvoker {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl NodeInvoker for SlowInvoker {
    fn invoke<'a>(
        &'a self,
        _node: &'a NodeSpec,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(NodeResult::success(HashMap::new()))
        })
    }
}

// ---------------------------------------------------------------------------
// Recorders and stores
// ---------------------------------------------------------------------------

/// Keeps every decision in memory.
#[derive(Default)]
pub struct RecordingRecorder {
    decisions: Mutex<Vec<Decision>>,
}

impl RecordingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions.lock().unwrap().clone()
    }
}

impl DecisionRecorder for RecordingRecorder {
    fn record(&self, decision: &Decision) -> BoxFuture<'_, Result<()>> {
        self.decisions.lock().unwrap().push(decision.clone());
        Box::pin(async { Ok(()) })
    }
}

/// Fails every write.
pub struct BrokenRecorder;

impl DecisionRecorder for BrokenRecorder {
    fn record(&self, _decision: &Decision) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(StrandError::Storage("recorder offline".into())) })
    }
}

/// In-memory `RunStore`.
#[derive(Default)]
pub struct MemoryStore {
    graphs: Mutex<HashMap<String, GraphSpec>>,
    runs: Mutex<HashMap<RunId, RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryStore {
    fn save_graph(&self, graph: &GraphSpec) -> BoxFuture<'_, Result<()>> {
        self.graphs
            .lock()
            .unwrap()
            .insert(graph.id.clone(), graph.clone());
        Box::pin(async { Ok(()) })
    }

    fn load_graph(&self, graph_id: &str) -> BoxFuture<'_, Result<Option<GraphSpec>>> {
        let graph = self.graphs.lock().unwrap().get(graph_id).cloned();
        Box::pin(async move { Ok(graph) })
    }

    fn save_run(&self, record: &RunRecord) -> BoxFuture<'_, Result<()>> {
        self.runs
            .lock()
            .unwrap()
            .insert(record.run_id.clone(), record.clone());
        Box::pin(async { Ok(()) })
    }

    fn load_run(&self, run_id: &RunId) -> BoxFuture<'_, Result<Option<RunRecord>>> {
        let record = self.runs.lock().unwrap().get(run_id).cloned();
        Box::pin(async move { Ok(record) })
    }

    fn list_runs(&self) -> BoxFuture<'_, Result<Vec<RunRecord>>> {
        let mut runs: Vec<RunRecord> = self.runs.lock().unwrap().values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Box::pin(async move { Ok(runs) })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// `a -> b -> c`, all `ON_SUCCESS`, `c` terminal, three attempts per node.
pub fn linear_graph() -> GraphSpec {
    GraphSpec::new("linear", "a")
        .with_node(NodeSpec::new("a", "A").with_max_retries(3))
        .with_node(NodeSpec::new("b", "B").with_max_retries(3))
        .with_node(NodeSpec::new("c", "C").with_max_retries(3))
        .with_edge(EdgeSpec::on_success("a", "b"))
        .with_edge(EdgeSpec::on_success("b", "c"))
        .with_terminal("c")
}

/// `draft -> review -> publish` where `review` is a pause node and
/// `resume_review` is the matching resume entry point.
pub fn review_graph() -> GraphSpec {
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
