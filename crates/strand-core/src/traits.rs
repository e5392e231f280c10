use futures::future::BoxFuture;

use crate::error::Result;
use crate::graph::GraphSpec;
use crate::types::*;

/// A callable tool a node may declare and invoke.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (as declared on a node's `tools`).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Audit trail of significant choices made during a run.
///
/// Callers log and drop recording errors; a failed write never aborts a run.
pub trait DecisionRecorder: Send + Sync + 'static {
    fn record(&self, decision: &Decision) -> BoxFuture<'_, Result<()>>;
}

/// Persistence backend for graphs, runs and session state.
pub trait RunStore: Send + Sync + 'static {
    fn save_graph(&self, graph: &GraphSpec) -> BoxFuture<'_, Result<()>>;

    fn load_graph(&self, graph_id: &str) -> BoxFuture<'_, Result<Option<GraphSpec>>>;

    /// Save (create or overwrite) a run record.
    fn save_run(&self, record: &RunRecord) -> BoxFuture<'_, Result<()>>;

    fn load_run(&self, run_id: &RunId) -> BoxFuture<'_, Result<Option<RunRecord>>>;

    /// All stored runs, most recently started first.
    fn list_runs(&self) -> BoxFuture<'_, Result<Vec<RunRecord>>>;
}

/// Recorder that discards every decision.
pub struct NullRecorder;

impl DecisionRecorder for NullRecorder {
    fn record(&self, _decision: &Decision) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
