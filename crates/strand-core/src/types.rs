use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ready,
    Running,
    Succeeded,
    Failed,
    Paused,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Ready | Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Token counts reported by a model-backed node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Outcome of one attempt at a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeResult {
    pub success: bool,
    /// Output payload; keys listed in the node's `output_keys` are written to Shared Memory.
    #[serde(default)]
    pub output: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tool calls made during this turn.
    #[serde(default)]
    pub tool_calls: usize,
    /// Conversation history retained by the node at the end of this turn.
    #[serde(default)]
    pub history_len: usize,
}

impl NodeResult {
    pub fn success(output: HashMap<String, serde_json::Value>) -> Self {
        Self {
            success: true,
            output,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Set a single output value.
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.output.insert(key.into(), value);
        self
    }

    /// Attribute token usage and cost to a model.
    pub fn with_usage(
        mut self,
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> Self {
        self.model = Some(model.into());
        self.tokens = TokenUsage {
            input_tokens,
            output_tokens,
        };
        self.cost_usd = cost_usd;
        self
    }
}

/// Aggregated usage for one model across a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Run-level token and cost totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_latency_ms: u64,
    pub per_model: BTreeMap<String, ModelUsage>,
}

impl RunMetrics {
    /// Fold one attempt's metrics into the totals.
    pub fn absorb(&mut self, result: &NodeResult) {
        self.total_tokens += result.tokens.total();
        self.total_cost_usd += result.cost_usd;
        self.total_latency_ms += result.latency_ms;
        if let Some(ref model) = result.model {
            let usage = self.per_model.entry(model.clone()).or_default();
            usage.calls += 1;
            usage.input_tokens += result.tokens.input_tokens;
            usage.output_tokens += result.tokens.output_tokens;
            usage.cost_usd += result.cost_usd;
        }
    }
}

/// Snapshot that lets a paused run continue later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub run_id: RunId,
    /// Node the run stopped in front of.
    pub paused_at: String,
    /// Full Shared Memory contents at the moment of pause.
    pub memory: HashMap<String, serde_json::Value>,
    /// Nodes executed before the pause, in order.
    #[serde(default)]
    pub path: Vec<String>,
    pub paused_at_time: DateTime<Utc>,
}

/// Kind of significant choice made during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionKind {
    ToolExecuted {
        node_id: String,
        tool: String,
        is_error: bool,
    },
    EdgeTraversed {
        edge_id: String,
        source: String,
        target: String,
    },
}

/// A recorded decision for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub run_id: RunId,
    pub step: usize,
    #[serde(flatten)]
    pub kind: DecisionKind,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn new(run_id: RunId, step: usize, kind: DecisionKind) -> Self {
        Self {
            run_id,
            step,
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Result of executing a graph run to a stopping point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: RunId,
    pub status: RunStatus,
    pub success: bool,
    /// Final Shared Memory contents.
    pub output: HashMap<String, serde_json::Value>,
    pub steps_executed: usize,
    /// Node ids in execution order.
    pub path: Vec<String>,
    pub metrics: RunMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<SessionState>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn paused_at(&self) -> Option<&str> {
        self.session_state.as_ref().map(|s| s.paused_at.as_str())
    }
}

/// Persisted record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub graph_id: String,
    pub entry_point: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps_executed: usize,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub metrics: RunMetrics,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub output: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<SessionState>,
}

impl RunRecord {
    /// A record for a run that has been accepted but not yet finished.
    pub fn started(run_id: RunId, graph_id: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            run_id,
            graph_id: graph_id.into(),
            entry_point: entry_point.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            steps_executed: 0,
            path: vec![],
            metrics: RunMetrics::default(),
            decisions: vec![],
            output: HashMap::new(),
            error: None,
            session_state: None,
        }
    }

    /// Fill the record from a finished execution.
    pub fn finish(&mut self, result: &ExecutionResult) {
        self.status = result.status;
        self.finished_at = Some(Utc::now());
        self.steps_executed = result.steps_executed;
        self.path = result.path.clone();
        self.metrics = result.metrics.clone();
        self.decisions = result.decisions.clone();
        self.output = result.output.clone();
        self.error = result.error.clone();
        self.session_state = result.session_state.clone();
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition handed to model-backed nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_id: RunId,
    pub node_id: String,
}

/// Execution event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run accepted and about to execute its first node.
    RunStarted {
        run_id: RunId,
        entry_point: String,
        node_id: String,
    },
    /// A node attempt is starting.
    NodeStarted {
        run_id: RunId,
        node_id: String,
        attempt: u32,
    },
    /// A node attempt failed and will be retried.
    NodeRetry {
        run_id: RunId,
        node_id: String,
        attempt: u32,
        error: String,
    },
    /// A node finished (after any retries).
    NodeCompleted {
        run_id: RunId,
        node_id: String,
        success: bool,
        attempts: u32,
        latency_ms: u64,
    },
    /// An edge was selected.
    EdgeTraversed {
        run_id: RunId,
        edge_id: String,
        source: String,
        target: String,
    },
    /// A condition expression was rejected and treated as false.
    ConditionError {
        run_id: RunId,
        edge_id: String,
        expr: String,
        error: String,
    },
    /// Run paused in front of a pause node.
    RunPaused { run_id: RunId, node_id: String },
    /// Run reached a terminal node.
    RunCompleted {
        run_id: RunId,
        steps: usize,
        total_tokens: u64,
        total_cost_usd: f64,
    },
    /// Run failed.
    RunFailed { run_id: RunId, error: String },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeRetry { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::EdgeTraversed { run_id, .. }
            | Self::ConditionError { run_id, .. }
            | Self::RunPaused { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. } => run_id,
        }
    }

    /// Whether this event ends the run's event stream.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::RunPaused { .. } | Self::RunCompleted { .. } | Self::RunFailed { .. }
        )
    }
}
