//! Node logic: the collaborator the engine hands each node to, and the
//! per-attempt context it receives.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use strand_core::error::{Result, StrandError};
use strand_core::traits::{DecisionRecorder, NullRecorder};
use strand_core::types::{
    Decision, DecisionKind, NodeResult, RunId, ToolContext, ToolDefinition, ToolResult,
};
use strand_core::{NodeSpec, NodeType};
use strand_tools::ToolRegistry;

use crate::graph::memory::MemoryView;

/// Runs the logic behind a node and reports the outcome.
///
/// `Err` and `Ok` with `success == false` are both treated as a failed
/// attempt and retried. Permission errors from the memory view end the run.
pub trait NodeInvoker: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        node: &'a NodeSpec,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeResult>>;
}

/// Decisions recorded during one run, forwarded to a recorder as they happen.
pub struct DecisionLog {
    run_id: RunId,
    recorder: Arc<dyn DecisionRecorder>,
    entries: Mutex<Vec<Decision>>,
}

impl DecisionLog {
    pub fn new(run_id: RunId, recorder: Arc<dyn DecisionRecorder>) -> Self {
        Self {
            run_id,
            recorder,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Record a decision. A recorder failure is logged and otherwise ignored.
    pub async fn record(&self, step: usize, kind: DecisionKind) {
        let decision = Decision::new(self.run_id.clone(), step, kind);
        if let Err(e) = self.recorder.record(&decision).await {
            warn!(run_id = %self.run_id, error = %e, "Failed to record decision");
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(decision);
    }

    pub fn entries(&self) -> Vec<Decision> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Everything one node attempt may use.
pub struct NodeContext {
    run_id: RunId,
    node: NodeSpec,
    memory: MemoryView,
    attempt: u32,
    step: usize,
    tools: Option<Arc<ToolRegistry>>,
    decisions: Arc<DecisionLog>,
    tool_calls: AtomicUsize,
}

impl NodeContext {
    pub fn new(run_id: RunId, node: NodeSpec, memory: MemoryView) -> Self {
        let decisions = Arc::new(DecisionLog::new(run_id.clone(), Arc::new(NullRecorder)));
        Self {
            run_id,
            node,
            memory,
            attempt: 1,
            step: 0,
            tools: None,
            decisions,
            tool_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_decisions(mut self, decisions: Arc<DecisionLog>) -> Self {
        self.decisions = decisions;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn node(&self) -> &NodeSpec {
        &self.node
    }

    pub fn memory(&self) -> &MemoryView {
        &self.memory
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Tool calls made through this context so far.
    pub fn tool_calls(&self) -> usize {
        self.tool_calls.load(Ordering::Relaxed)
    }

    /// Definitions of the node's declared tools that are registered.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .as_ref()
            .map(|t| t.definitions_for(&self.node))
            .unwrap_or_default()
    }

    /// Execute one of the node's declared tools.
    pub async fn execute_tool(&self, name: &str, input: serde_json::Value) -> Result<ToolResult> {
        if !self.node.declares_tool(name) {
            return Err(StrandError::ToolNotDeclared {
                tool: name.to_string(),
                node: self.node.id.clone(),
            });
        }
        let registry = self
            .tools
            .as_ref()
            .ok_or_else(|| StrandError::ToolNotFound(name.to_string()))?;

        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        let ctx = ToolContext {
            run_id: self.run_id.clone(),
            node_id: self.node.id.clone(),
        };
        let result = registry.execute(name, input, ctx).await;
        let is_error = result.as_ref().map_or(true, |r| r.is_error);
        self.decisions
            .record(
                self.step,
                DecisionKind::ToolExecuted {
                    node_id: self.node.id.clone(),
                    tool: name.to_string(),
                    is_error,
                },
            )
            .await;
        result
    }
}

/// A deterministic node function.
pub type NodeFn = Arc<dyn Fn(&NodeContext) -> Result<NodeResult> + Send + Sync>;

/// Named Rust functions that `Function` nodes are bound to.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, NodeFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&NodeContext) -> Result<NodeResult> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&NodeContext) -> Result<NodeResult> + Send + Sync + 'static,
    {
        self.register(name, f);
        self
    }

    pub fn get(&self, name: &str) -> Option<NodeFn> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Dispatches each node to the logic for its `NodeType`.
///
/// `Function` nodes call into the [`FunctionRegistry`]. Model-backed kinds
/// go to the configured model invoker.
#[derive(Clone, Default)]
pub struct NodeRouter {
    functions: FunctionRegistry,
    model: Option<Arc<dyn NodeInvoker>>,
}

impl NodeRouter {
    pub fn new(functions: FunctionRegistry) -> Self {
        Self {
            functions,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn NodeInvoker>) -> Self {
        self.model = Some(model);
        self
    }
}

impl NodeInvoker for NodeRouter {
    fn invoke<'a>(
        &'a self,
        node: &'a NodeSpec,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(async move {
            match node.node_type {
                NodeType::Function => {
                    let Some(name) = node.function.as_deref() else {
                        return Err(StrandError::Invocation(format!(
                            "function node '{}' names no function",
                            node.id
                        )));
                    };
                    let f = self.functions.get(name).ok_or_else(|| {
                        StrandError::Invocation(format!(
                            "no function '{}' registered for node '{}'",
                            name, node.id
                        ))
                    })?;
                    debug!(node_id = %node.id, function = name, "Calling node function");
                    f(ctx)
                }
                NodeType::LlmGenerate | NodeType::LlmToolUse | NodeType::EventLoop => {
                    let model = self.model.as_ref().ok_or_else(|| {
                        StrandError::Invocation(format!(
                            "no model invoker configured for {} node '{}'",
                            node.node_type, node.id
                        ))
                    })?;
                    model.invoke(node, ctx).await
                }
            }
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Many(Vec<NodeResult>),
    One(NodeResult),
}

/// Replays canned results per node id.
///
/// Each node's results are handed out in order; the last one repeats once
/// the rest are used up. Nodes without a script succeed with empty output.
#[derive(Default)]
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<NodeResult>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(self, node_id: impl Into<String>, results: Vec<NodeResult>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id.into(), results.into());
        self
    }

    /// Parse a script of the form `{"node_id": result | [result, ...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, ScriptEntry> = serde_json::from_str(json)?;
        let scripts = raw
            .into_iter()
            .map(|(id, entry)| {
                let results = match entry {
                    ScriptEntry::Many(results) => results.into(),
                    ScriptEntry::One(result) => VecDeque::from([result]),
                };
                (id, results)
            })
            .collect();
        Ok(Self {
            scripts: Mutex::new(scripts),
        })
    }

    fn next(&self, node_id: &str) -> Option<NodeResult> {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = scripts.get_mut(node_id)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl NodeInvoker for ScriptedInvoker {
    fn invoke<'a>(
        &'a self,
        node: &'a NodeSpec,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(async move {
            Ok(self
                .next(&node.id)
                .unwrap_or_else(|| NodeResult::success(HashMap::new())))
        })
    }
}
