//! Multi-entry dispatch: resolves entry points, gives each run its Shared
//! Memory according to the entry point's isolation level, and runs it as an
//! independent tokio task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use strand_core::error::{Result, StrandError};
use strand_core::traits::RunStore;
use strand_core::types::{ExecutionResult, RunId, RunRecord, RunStatus, SessionState};
use strand_core::{EntryPointSpec, IsolationLevel};

use crate::graph::executor::{GraphExecutor, RunStart};
use crate::graph::memory::SharedMemory;

/// Entry point name that maps to the graph's `entry_node` when nothing
/// else claims it.
pub const DEFAULT_ENTRY: &str = "start";

/// A request to start or resume a run.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub entry_point: String,
    pub input: HashMap<String, serde_json::Value>,
    pub session_state: Option<SessionState>,
}

impl TriggerRequest {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            input: HashMap::new(),
            session_state: None,
        }
    }

    pub fn with_input(mut self, input: HashMap<String, serde_json::Value>) -> Self {
        self.input = input;
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }

    pub fn with_session(mut self, state: SessionState) -> Self {
        self.session_state = Some(state);
        self
    }
}

/// A run in flight.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    task: JoinHandle<ExecutionResult>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to stop.
    pub async fn wait(self) -> Result<ExecutionResult> {
        self.task
            .await
            .map_err(|e| StrandError::RunTask(e.to_string()))
    }
}

struct Inner {
    executor: GraphExecutor,
    entry_points: HashMap<String, EntryPointSpec>,
    store: Option<Arc<dyn RunStore>>,
    /// Memory carried between runs of `Shared`/`Synchronized` entry points.
    shared: Mutex<HashMap<String, HashMap<String, serde_json::Value>>>,
    /// One async lock per `Synchronized` entry point.
    serial: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Records of runs started by this runtime.
    records: Mutex<HashMap<RunId, RunRecord>>,
}

/// Owns a validated graph and its executor, and dispatches triggers.
///
/// Runs execute concurrently as independent tasks and share no mutable
/// state except the per-entry-point memory of shared isolation levels.
#[derive(Clone)]
pub struct GraphRuntime {
    inner: Arc<Inner>,
    wait_timeout: Duration,
}

impl GraphRuntime {
    pub fn new(executor: GraphExecutor) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                entry_points: HashMap::new(),
                store: None,
                shared: Mutex::new(HashMap::new()),
                serial: Mutex::new(HashMap::new()),
                records: Mutex::new(HashMap::new()),
            }),
            wait_timeout: Duration::from_secs(300),
        }
    }

    /// Register an entry point. Must be called before the first trigger.
    pub fn with_entry_point(mut self, spec: EntryPointSpec) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.entry_points.insert(spec.id.clone(), spec);
        } else {
            warn!(entry_point = %spec.id, "Runtime already shared, entry point ignored");
        }
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.store = Some(store);
        } else {
            warn!("Runtime already shared, store ignored");
        }
        self
    }

    /// Default bound for [`trigger_and_wait`](Self::trigger_and_wait).
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.inner.executor
    }

    /// Resolve an entry point id.
    ///
    /// Registered entry points come first, then the graph's own
    /// `entry_points` (as manual starts), then [`DEFAULT_ENTRY`].
    pub fn resolve_entry(&self, id: &str) -> Result<EntryPointSpec> {
        if let Some(spec) = self.inner.entry_points.get(id) {
            return Ok(spec.clone());
        }
        let graph = self.inner.executor.graph();
        if let Some(node) = graph.entry_points.get(id) {
            return Ok(EntryPointSpec::new(id, node.clone()));
        }
        if id == DEFAULT_ENTRY {
            return Ok(EntryPointSpec::new(id, graph.entry_node.clone()));
        }
        Err(StrandError::EntryPointNotFound(id.to_string()))
    }

    /// Start a run and return immediately.
    pub async fn trigger(&self, request: TriggerRequest) -> Result<RunHandle> {
        let spec = self.resolve_entry(&request.entry_point)?;

        let (run_id, start) = match request.session_state {
            Some(state) if spec.trigger_type.is_resume() => (
                state.run_id.clone(),
                RunStart::Resume {
                    state,
                    input: request.input,
                },
            ),
            other => {
                if other.is_some() {
                    warn!(
                        entry_point = %spec.id,
                        "Session state supplied to a non-resume entry point, ignoring it"
                    );
                }
                (
                    RunId::new(),
                    RunStart::Fresh {
                        node_id: spec.entry_node.clone(),
                        input: request.input,
                    },
                )
            }
        };

        let mut record = match self.get_run(&run_id).await? {
            Some(existing) => existing,
            None => RunRecord::started(
                run_id.clone(),
                self.inner.executor.graph().id.clone(),
                spec.id.clone(),
            ),
        };
        record.status = RunStatus::Running;
        self.save_record(&record).await?;

        info!(
            run_id = %run_id,
            entry_point = %spec.id,
            isolation = ?spec.isolation_level,
            "Run triggered"
        );

        let inner = Arc::clone(&self.inner);
        let task_run_id = run_id.clone();
        let task = tokio::spawn(async move {
            inner.run(task_run_id, spec, start, record).await
        });

        Ok(RunHandle { run_id, task })
    }

    /// Start a run and wait for it to stop.
    ///
    /// Returns `Ok(None)` if `timeout` (or the runtime default) elapses
    /// first. The run is not cancelled and can be inspected later with
    /// [`get_run`](Self::get_run).
    pub async fn trigger_and_wait(
        &self,
        request: TriggerRequest,
        timeout: Option<Duration>,
    ) -> Result<Option<ExecutionResult>> {
        let handle = self.trigger(request).await?;
        let run_id = handle.run_id.clone();
        let timeout = timeout.unwrap_or(self.wait_timeout);
        match tokio::time::timeout(timeout, handle.task).await {
            Ok(joined) => joined
                .map(Some)
                .map_err(|e| StrandError::RunTask(e.to_string())),
            Err(_) => {
                info!(run_id = %run_id, timeout_ms = timeout.as_millis() as u64, "Wait timed out, run continues");
                Ok(None)
            }
        }
    }

    /// The record of a run, from this runtime or the configured store.
    pub async fn get_run(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let cached = self
            .inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        match self.inner.store {
            Some(ref store) => store.load_run(run_id).await,
            None => Ok(None),
        }
    }

    /// Current shared memory of an entry point with a shared isolation level.
    pub fn shared_memory(&self, entry_point: &str) -> HashMap<String, serde_json::Value> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entry_point)
            .cloned()
            .unwrap_or_default()
    }

    async fn save_record(&self, record: &RunRecord) -> Result<()> {
        self.inner.save_record(record).await
    }
}

impl Inner {
    async fn run(
        &self,
        run_id: RunId,
        spec: EntryPointSpec,
        start: RunStart,
        mut record: RunRecord,
    ) -> ExecutionResult {
        let _serial = match spec.isolation_level {
            IsolationLevel::Synchronized => {
                let lock = self.serial_lock(&spec.id);
                debug!(run_id = %run_id, entry_point = %spec.id, "Waiting for entry point lock");
                Some(lock.lock_owned().await)
            }
            IsolationLevel::Isolated | IsolationLevel::Shared => None,
        };

        let memory = match spec.isolation_level {
            IsolationLevel::Isolated => SharedMemory::new(),
            IsolationLevel::Shared | IsolationLevel::Synchronized => {
                SharedMemory::from_map(self.shared_snapshot(&spec.id))
            }
        };

        let result = self
            .executor
            .execute(run_id.clone(), &spec.id, start, &memory)
            .await;

        if spec.isolation_level != IsolationLevel::Isolated {
            self.shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(spec.id.clone(), memory.snapshot());
        }

        record.finish(&result);
        if let Err(e) = self.save_record(&record).await {
            warn!(run_id = %run_id, error = %e, "Failed to persist run record");
        }
        result
    }

    fn serial_lock(&self, entry_point: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(entry_point.to_string()).or_default())
    }

    fn shared_snapshot(&self, entry_point: &str) -> HashMap<String, serde_json::Value> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entry_point)
            .cloned()
            .unwrap_or_default()
    }

    async fn save_record(&self, record: &RunRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.run_id.clone(), record.clone());
        match self.store {
            Some(ref store) => store.save_run(record).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::validate::ValidatedGraph;
    use crate::invoker::{FunctionRegistry, NodeContext, NodeRouter};
    use crate::sandbox::Sandbox;
    use serde_json::json;
    use strand_core::types::NodeResult;
    use strand_core::{EdgeSpec, GraphSpec, NodeSpec};

    fn counter_graph() -> GraphSpec {
        GraphSpec::new("counter", "inc")
            .with_node(
                NodeSpec::function("inc", "increment")
                    .with_inputs(["count"])
                    .with_outputs(["count"])
                    .terminal(),
            )
            .with_entry_point("again", "inc")
    }

    fn runtime(graph: GraphSpec) -> GraphRuntime {
        let functions = FunctionRegistry::new().with("increment", |ctx: &NodeContext| {
            let count = ctx
                .memory()
                .read("count")?
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            Ok(NodeResult::success(HashMap::new()).with_value("count", json!(count + 1)))
        });
        let graph = ValidatedGraph::new(graph, &Sandbox::default(), None).unwrap();
        GraphRuntime::new(GraphExecutor::new(graph, Arc::new(NodeRouter::new(functions))))
    }

    #[test]
    fn test_entry_resolution_order() {
        let rt = runtime(counter_graph()).with_entry_point(EntryPointSpec::resume("again", "inc"));
        assert!(rt.resolve_entry("again").unwrap().trigger_type.is_resume());
        assert_eq!(rt.resolve_entry("start").unwrap().entry_node, "inc");
        assert!(matches!(
            rt.resolve_entry("missing"),
            Err(StrandError::EntryPointNotFound(_))
        ));

        let plain = runtime(counter_graph());
        let ep = plain.resolve_entry("again").unwrap();
        assert!(!ep.trigger_type.is_resume());
    }

    #[tokio::test]
    async fn test_isolated_runs_start_fresh() {
        let rt = runtime(counter_graph());
        for _ in 0..2 {
            let result = rt
                .trigger_and_wait(TriggerRequest::new("start"), None)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(result.output["count"], json!(1));
        }
    }

    #[tokio::test]
    async fn test_shared_runs_carry_memory() {
        let rt = runtime(counter_graph()).with_entry_point(
            EntryPointSpec::new("shared", "inc").with_isolation(IsolationLevel::Shared),
        );
        for expected in 1..=3 {
            let result = rt
                .trigger_and_wait(TriggerRequest::new("shared"), None)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(result.output["count"], json!(expected));
        }
        assert_eq!(rt.shared_memory("shared")["count"], json!(3));
    }

    #[tokio::test]
    async fn test_synchronized_runs_do_not_lose_updates() {
        let rt = runtime(counter_graph()).with_entry_point(
            EntryPointSpec::new("sync", "inc").with_isolation(IsolationLevel::Synchronized),
        );
        let mut handles = vec![];
        for _ in 0..8 {
            handles.push(rt.trigger(TriggerRequest::new("sync")).await.unwrap());
        }
        for handle in handles {
            assert!(handle.wait().await.unwrap().success);
        }
        assert_eq!(rt.shared_memory("sync")["count"], json!(8));
    }

    #[tokio::test]
    async fn test_session_state_ignored_on_fresh_entry() {
        let rt = runtime(counter_graph());
        let state = SessionState {
            run_id: RunId::from_string("old"),
            paused_at: "inc".into(),
            memory: HashMap::from([("count".to_string(), json!(41))]),
            path: vec![],
            paused_at_time: chrono::Utc::now(),
        };
        let result = rt
            .trigger_and_wait(TriggerRequest::new("start").with_session(state), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.output["count"], json!(1));
        assert_ne!(result.run_id.as_str(), "old");
    }

    #[tokio::test]
    async fn test_get_run_after_completion() {
        let rt = runtime(counter_graph());
        let handle = rt.trigger(TriggerRequest::new("start")).await.unwrap();
        let run_id = handle.run_id().clone();
        handle.wait().await.unwrap();
        let record = rt.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
        assert_eq!(record.path, vec!["inc"]);
        assert_eq!(record.graph_id, "counter");
    }

    #[tokio::test]
    async fn test_unknown_entry_point() {
        let rt = runtime(
            counter_graph().with_edge(EdgeSpec::always("inc", "inc").with_id("self")),
        );
        let err = rt.trigger(TriggerRequest::new("nope")).await.unwrap_err();
        assert!(matches!(err, StrandError::EntryPointNotFound(ref id) if id == "nope"));
    }
}
