use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use strand_core::config::EngineConfig;
use strand_core::error::{LoopLimitKind, Result, StrandError};
use strand_core::event::EventBus;
use strand_core::traits::{DecisionRecorder, NullRecorder};
use strand_core::types::{
    DecisionKind, ExecutionEvent, ExecutionResult, NodeResult, RunId, RunMetrics, RunStatus,
    SessionState,
};
use strand_core::{EdgeCondition, EdgeSpec, NodeSpec};
use strand_tools::ToolRegistry;

use super::memory::SharedMemory;
use super::routing::{condition_context, select_edge};
use super::validate::ValidatedGraph;
use crate::invoker::{DecisionLog, NodeContext, NodeInvoker};
use crate::sandbox::{Context, Sandbox};

/// Retry pacing between failed attempts.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ExecutorSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            initial_backoff_ms: config.retry_initial_backoff_ms,
            max_backoff_ms: config.retry_max_backoff_ms,
        }
    }
}

/// Where a run begins.
#[derive(Debug, Clone)]
pub enum RunStart {
    /// Execute `node_id` first with `input` merged into memory.
    Fresh {
        node_id: String,
        input: HashMap<String, serde_json::Value>,
    },
    /// Rehydrate memory from `state`, merge `input`, and execute the node
    /// the run paused in front of.
    Resume {
        state: SessionState,
        input: HashMap<String, serde_json::Value>,
    },
}

enum Stop {
    Completed,
    Paused(String),
}

#[derive(Default)]
struct Progress {
    path: Vec<String>,
    steps: usize,
    metrics: RunMetrics,
}

/// Drives one run of a validated graph.
///
/// Node execution is strictly sequential. Each step invokes the node,
/// retries failed attempts with backoff, writes the node's output to
/// Shared Memory, and follows the best satisfied outgoing edge.
pub struct GraphExecutor {
    graph: ValidatedGraph,
    invoker: Arc<dyn NodeInvoker>,
    sandbox: Sandbox,
    tools: Option<Arc<ToolRegistry>>,
    recorder: Arc<dyn DecisionRecorder>,
    event_bus: Option<Arc<EventBus>>,
    settings: ExecutorSettings,
}

impl GraphExecutor {
    pub fn new(graph: ValidatedGraph, invoker: Arc<dyn NodeInvoker>) -> Self {
        Self {
            graph,
            invoker,
            sandbox: Sandbox::default(),
            tools: None,
            recorder: Arc::new(NullRecorder),
            event_bus: None,
            settings: ExecutorSettings::default(),
        }
    }

    pub fn with_sandbox(mut self, sandbox: Sandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn DecisionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn graph(&self) -> &ValidatedGraph {
        &self.graph
    }

    /// Execute a run until it completes, pauses or fails.
    ///
    /// `memory` belongs to this run for the duration of the call. Failures
    /// never surface as `Err`; they are reported in the returned result.
    pub async fn execute(
        &self,
        run_id: RunId,
        entry_point: &str,
        start: RunStart,
        memory: &SharedMemory,
    ) -> ExecutionResult {
        let started = Instant::now();
        let decisions = Arc::new(DecisionLog::new(run_id.clone(), Arc::clone(&self.recorder)));
        let mut progress = Progress::default();

        let first = match start {
            RunStart::Fresh { node_id, input } => {
                memory.merge(input);
                node_id
            }
            RunStart::Resume { state, input } => {
                info!(
                    run_id = %run_id,
                    node_id = %state.paused_at,
                    keys = state.memory.len(),
                    "Resuming paused run"
                );
                memory.restore(state.memory);
                memory.merge(input);
                progress.path = state.path;
                state.paused_at
            }
        };

        self.emit(ExecutionEvent::RunStarted {
            run_id: run_id.clone(),
            entry_point: entry_point.to_string(),
            node_id: first.clone(),
        });
        info!(run_id = %run_id, graph_id = %self.graph.id, entry_point, node_id = %first, "Run started");

        let outcome = self
            .run_loop(&run_id, first, memory, &mut progress, &decisions)
            .await;

        let mut result = ExecutionResult {
            run_id: run_id.clone(),
            status: RunStatus::Failed,
            success: false,
            output: memory.snapshot(),
            steps_executed: progress.steps,
            path: progress.path,
            metrics: progress.metrics,
            error: None,
            session_state: None,
            decisions: decisions.entries(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        match outcome {
            Ok(Stop::Completed) => {
                result.status = RunStatus::Succeeded;
                result.success = true;
                info!(
                    run_id = %run_id,
                    steps = result.steps_executed,
                    total_tokens = result.metrics.total_tokens,
                    elapsed_ms = result.duration_ms,
                    "Run completed"
                );
                self.emit(ExecutionEvent::RunCompleted {
                    run_id,
                    steps: result.steps_executed,
                    total_tokens: result.metrics.total_tokens,
                    total_cost_usd: result.metrics.total_cost_usd,
                });
            }
            Ok(Stop::Paused(node_id)) => {
                result.status = RunStatus::Paused;
                result.success = true;
                result.session_state = Some(SessionState {
                    run_id: run_id.clone(),
                    paused_at: node_id.clone(),
                    memory: result.output.clone(),
                    path: result.path.clone(),
                    paused_at_time: Utc::now(),
                });
                info!(run_id = %run_id, node_id = %node_id, "Run paused");
                self.emit(ExecutionEvent::RunPaused { run_id, node_id });
            }
            Err(e) => {
                let report = e.report();
                error!(run_id = %run_id, category = %e.category(), error = %e, "Run failed");
                result.error = Some(report.clone());
                self.emit(ExecutionEvent::RunFailed {
                    run_id,
                    error: report,
                });
            }
        }

        result
    }

    async fn run_loop(
        &self,
        run_id: &RunId,
        mut current: String,
        memory: &SharedMemory,
        progress: &mut Progress,
        decisions: &Arc<DecisionLog>,
    ) -> Result<Stop> {
        let limits = self.graph.loop_config;

        loop {
            let node = self
                .graph
                .node(&current)
                .ok_or_else(|| StrandError::NodeNotFound(current.clone()))?;

            if progress.steps >= limits.max_iterations {
                return Err(StrandError::LoopLimit {
                    node: node.id.clone(),
                    limit: LoopLimitKind::Iterations,
                    value: progress.steps + 1,
                    max: limits.max_iterations,
                });
            }

            info!(run_id = %run_id, node_id = %node.id, node_type = %node.node_type, "Executing node");
            let (result, attempts) = self
                .run_node(run_id, node, memory, progress, decisions)
                .await?;
            progress.path.push(node.id.clone());
            progress.steps += 1;

            if result.success {
                self.write_outputs(node, &result, memory)?;
                if self.graph.is_terminal(&node.id) {
                    debug!(run_id = %run_id, node_id = %node.id, "Terminal node reached");
                    return Ok(Stop::Completed);
                }
            }

            let outgoing: Vec<&EdgeSpec> = self
                .graph
                .outgoing(&node.id)
                .filter(|e| result.success || matches!(e.condition, EdgeCondition::OnFailure))
                .collect();

            let context = if outgoing
                .iter()
                .any(|e| matches!(e.condition, EdgeCondition::Conditional { .. }))
            {
                condition_context(&result, &memory.snapshot())
            } else {
                Context::new()
            };

            let chosen = select_edge(
                outgoing.iter().copied(),
                result.success,
                &self.sandbox,
                &context,
                |edge, e| {
                    self.emit(ExecutionEvent::ConditionError {
                        run_id: run_id.clone(),
                        edge_id: edge.id.clone(),
                        expr: edge.condition.expr().unwrap_or_default().to_string(),
                        error: e.to_string(),
                    })
                },
            );

            let edge = match chosen {
                Some(edge) => edge,
                None if result.success => {
                    return Err(StrandError::DeadEnd {
                        node: node.id.clone(),
                    })
                }
                None => {
                    return Err(StrandError::NodeFailed {
                        node: node.id.clone(),
                        attempts,
                        message: result
                            .error
                            .unwrap_or_else(|| "node reported failure".to_string()),
                    })
                }
            };

            self.traverse(run_id, edge, memory, progress.steps, decisions)
                .await;

            if self.graph.is_pause(&edge.target) {
                return Ok(Stop::Paused(edge.target.clone()));
            }
            current = edge.target.clone();
        }
    }

    /// Invoke a node until an attempt succeeds or its attempts run out.
    ///
    /// Returns the last attempt's result and the number of attempts made.
    async fn run_node(
        &self,
        run_id: &RunId,
        node: &NodeSpec,
        memory: &SharedMemory,
        progress: &mut Progress,
        decisions: &Arc<DecisionLog>,
    ) -> Result<(NodeResult, u32)> {
        let attempts = node.attempts();
        let node_start = Instant::now();
        let mut last = NodeResult::failure("node was not attempted");
        let mut made = 0;

        for attempt in 1..=attempts {
            made = attempt;
            self.emit(ExecutionEvent::NodeStarted {
                run_id: run_id.clone(),
                node_id: node.id.clone(),
                attempt,
            });

            let mut ctx = NodeContext::new(run_id.clone(), node.clone(), memory.view_for(node))
                .with_attempt(attempt)
                .with_step(progress.steps)
                .with_decisions(Arc::clone(decisions));
            if let Some(ref tools) = self.tools {
                ctx = ctx.with_tools(Arc::clone(tools));
            }

            let attempt_start = Instant::now();
            let outcome = self.invoker.invoke(node, &ctx).await;

            last = match outcome {
                Ok(mut result) => {
                    if result.latency_ms == 0 {
                        result.latency_ms = attempt_start.elapsed().as_millis() as u64;
                    }
                    result.tool_calls = result.tool_calls.max(ctx.tool_calls());
                    progress.metrics.absorb(&result);
                    self.check_turn_limits(node, &result)?;
                    result
                }
                Err(e) if !e.is_retryable() => {
                    warn!(run_id = %run_id, node_id = %node.id, attempt, error = %e, "Fatal node error");
                    return Err(e);
                }
                Err(e) => NodeResult::failure(e.to_string()),
            };

            if last.success {
                break;
            }

            let message = last.error.clone().unwrap_or_default();
            if attempt < attempts {
                let backoff = retry_backoff(attempt, &self.settings);
                warn!(
                    run_id = %run_id,
                    node_id = %node.id,
                    attempt,
                    max_attempts = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %message,
                    "Node attempt failed, retrying"
                );
                self.emit(ExecutionEvent::NodeRetry {
                    run_id: run_id.clone(),
                    node_id: node.id.clone(),
                    attempt,
                    error: message,
                });
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            } else {
                warn!(run_id = %run_id, node_id = %node.id, attempts, error = %message, "Node failed");
            }
        }

        self.emit(ExecutionEvent::NodeCompleted {
            run_id: run_id.clone(),
            node_id: node.id.clone(),
            success: last.success,
            attempts: made,
            latency_ms: node_start.elapsed().as_millis() as u64,
        });
        Ok((last, made))
    }

    fn check_turn_limits(&self, node: &NodeSpec, result: &NodeResult) -> Result<()> {
        let limits = &self.graph.loop_config;
        if result.tool_calls > limits.max_tool_calls_per_turn {
            return Err(StrandError::LoopLimit {
                node: node.id.clone(),
                limit: LoopLimitKind::ToolCallsPerTurn,
                value: result.tool_calls,
                max: limits.max_tool_calls_per_turn,
            });
        }
        if result.history_len > limits.max_history_size {
            return Err(StrandError::LoopLimit {
                node: node.id.clone(),
                limit: LoopLimitKind::HistorySize,
                value: result.history_len,
                max: limits.max_history_size,
            });
        }
        Ok(())
    }

    /// Write the node's output keys that its write scope allows.
    fn write_outputs(&self, node: &NodeSpec, result: &NodeResult, memory: &SharedMemory) -> Result<()> {
        let view = memory.view_for(node);
        for (key, value) in &result.output {
            if view.can_write(key) {
                view.write(key, value.clone())?;
            } else {
                debug!(node_id = %node.id, key = %key, "Dropping undeclared output key");
            }
        }
        Ok(())
    }

    async fn traverse(
        &self,
        run_id: &RunId,
        edge: &EdgeSpec,
        memory: &SharedMemory,
        step: usize,
        decisions: &DecisionLog,
    ) {
        info!(
            run_id = %run_id,
            edge_id = %edge.id,
            from = %edge.source,
            to = %edge.target,
            "Following edge"
        );
        for (target_key, source_key) in &edge.input_mapping {
            match memory.get(source_key) {
                Some(value) => memory.insert(target_key.clone(), value),
                None => debug!(
                    edge_id = %edge.id,
                    source_key = %source_key,
                    "Input mapping source missing, skipped"
                ),
            }
        }
        decisions
            .record(
                step,
                DecisionKind::EdgeTraversed {
                    edge_id: edge.id.clone(),
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                },
            )
            .await;
        self.emit(ExecutionEvent::EdgeTraversed {
            run_id: run_id.clone(),
            edge_id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
        });
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(event);
        }
    }
}

/// Exponential backoff with 0.8x to 1.2x jitter. `attempt` is 1-based.
fn retry_backoff(attempt: u32, settings: &ExecutorSettings) -> Duration {
    if settings.initial_backoff_ms == 0 {
        return Duration::ZERO;
    }
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let ms = settings
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(settings.max_backoff_ms);
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::ScriptedInvoker;
    use serde_json::json;
    use strand_core::GraphSpec;

    fn no_backoff() -> ExecutorSettings {
        ExecutorSettings {
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    fn executor(graph: GraphSpec, invoker: ScriptedInvoker) -> GraphExecutor {
        let graph = ValidatedGraph::new(graph, &Sandbox::default(), None).unwrap();
        GraphExecutor::new(graph, Arc::new(invoker)).with_settings(no_backoff())
    }

    fn fresh(node_id: &str) -> RunStart {
        RunStart::Fresh {
            node_id: node_id.to_string(),
            input: HashMap::new(),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let settings = ExecutorSettings {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        };
        let first = retry_backoff(1, &settings).as_millis();
        assert!((80..=120).contains(&first));
        let third = retry_backoff(3, &settings).as_millis();
        assert!((320..=480).contains(&third));
        let capped = retry_backoff(20, &settings).as_millis();
        assert!(capped <= 1200);
        assert!(retry_backoff(5, &no_backoff()).is_zero());
    }

    #[tokio::test]
    async fn test_conditional_branch_and_input_mapping() {
        let graph = GraphSpec::new("g", "score")
            .with_node(NodeSpec::new("score", "Score").with_outputs(["result"]))
            .with_node(NodeSpec::new("high", "High").terminal())
            .with_node(NodeSpec::new("low", "Low").terminal())
            .with_edge(
                EdgeSpec::conditional("score", "high", "result > 10 and result < 50")
                    .with_priority(1)
                    .with_mapping("value", "result"),
            )
            .with_edge(EdgeSpec::always("score", "low"));
        let invoker = ScriptedInvoker::new().with_results(
            "score",
            vec![NodeResult::success(HashMap::new()).with_value("result", json!(42))],
        );

        let memory = SharedMemory::new();
        let result = executor(graph, invoker)
            .execute(RunId::from_string("r1"), "start", fresh("score"), &memory)
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.path, vec!["score", "high"]);
        assert_eq!(result.output["value"], json!(42));
        assert_eq!(result.decisions.len(), 1);
    }

    #[tokio::test]
    async fn test_undeclared_output_key_is_dropped() {
        let graph = GraphSpec::new("g", "a")
            .with_node(NodeSpec::new("a", "A").with_outputs(["kept"]).terminal());
        let invoker = ScriptedInvoker::new().with_results(
            "a",
            vec![NodeResult::success(HashMap::new())
                .with_value("kept", json!(1))
                .with_value("stray", json!(2))],
        );
        let memory = SharedMemory::new();
        let result = executor(graph, invoker)
            .execute(RunId::new(), "start", fresh("a"), &memory)
            .await;
        assert!(result.success);
        assert!(memory.contains_key("kept"));
        assert!(!memory.contains_key("stray"));
    }

    #[tokio::test]
    async fn test_failure_routing_follows_on_failure_edge() {
        let graph = GraphSpec::new("g", "a")
            .with_node(NodeSpec::new("a", "A").with_max_retries(2))
            .with_node(NodeSpec::new("ok", "Ok").terminal())
            .with_node(NodeSpec::new("recover", "Recover").terminal())
            .with_edge(EdgeSpec::on_success("a", "ok"))
            .with_edge(EdgeSpec::always("a", "ok").with_id("always"))
            .with_edge(EdgeSpec::on_failure("a", "recover"));
        let invoker =
            ScriptedInvoker::new().with_results("a", vec![NodeResult::failure("nope")]);

        let result = executor(graph, invoker)
            .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
            .await;
        assert!(result.success);
        assert_eq!(result.path, vec!["a", "recover"]);
    }

    #[tokio::test]
    async fn test_terminal_node_ignores_outgoing_edges() {
        let graph = GraphSpec::new("g", "a")
            .with_node(NodeSpec::new("a", "A").terminal())
            .with_node(NodeSpec::new("b", "B"))
            .with_edge(EdgeSpec::always("a", "b"));
        let result = executor(graph, ScriptedInvoker::new())
            .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
            .await;
        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.steps_executed, 1);
    }

    #[tokio::test]
    async fn test_history_ceiling_is_loop_limit() {
        let mut graph = GraphSpec::new("g", "a").with_node(NodeSpec::new("a", "A").terminal());
        graph.loop_config.max_history_size = 5;
        let mut big = NodeResult::success(HashMap::new());
        big.history_len = 6;
        let invoker = ScriptedInvoker::new().with_results("a", vec![big]);

        let result = executor(graph, invoker)
            .execute(RunId::new(), "start", fresh("a"), &SharedMemory::new())
            .await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with("loop limit exceeded"));
        assert!(error.contains("max_history_size"));
    }

    #[tokio::test]
    async fn test_unknown_start_node_fails() {
        let graph = GraphSpec::new("g", "a").with_node(NodeSpec::new("a", "A").terminal());
        let result = executor(graph, ScriptedInvoker::new())
            .execute(RunId::new(), "start", fresh("nowhere"), &SharedMemory::new())
            .await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.unwrap().contains("nowhere"));
    }
}
