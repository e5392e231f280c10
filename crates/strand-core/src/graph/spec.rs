use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::edge::EdgeSpec;
use super::node::NodeSpec;
use crate::error::{Result, StrandError};

/// Per-run loop ceilings. Exceeding any of them fails the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Maximum node executions in one run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Maximum tool calls a node may make in one turn.
    #[serde(default = "default_max_tool_calls_per_turn")]
    pub max_tool_calls_per_turn: usize,
    /// Maximum conversation history a node may retain.
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
}

fn default_max_iterations() -> usize {
    100
}

fn default_max_tool_calls_per_turn() -> usize {
    10
}

fn default_max_history_size() -> usize {
    200
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_calls_per_turn: default_max_tool_calls_per_turn(),
            max_history_size: default_max_history_size(),
        }
    }
}

/// Immutable description of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub id: String,
    #[serde(default)]
    pub goal_id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub entry_node: String,
    /// Named ways to start or resume a run: name -> node id.
    #[serde(default)]
    pub entry_points: BTreeMap<String, String>,
    #[serde(default)]
    pub terminal_nodes: Vec<String>,
    #[serde(default)]
    pub pause_nodes: Vec<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    /// Model used by nodes that do not override it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub loop_config: LoopConfig,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl GraphSpec {
    /// Create a graph with the given id and entry node and no nodes yet.
    pub fn new(id: impl Into<String>, entry_node: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal_id: String::new(),
            version: default_version(),
            description: String::new(),
            entry_node: entry_node.into(),
            entry_points: BTreeMap::new(),
            terminal_nodes: vec![],
            pause_nodes: vec![],
            nodes: vec![],
            edges: vec![],
            default_model: None,
            max_tokens: default_max_tokens(),
            loop_config: LoopConfig::default(),
        }
    }

    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: EdgeSpec) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_entry_point(mut self, name: impl Into<String>, node_id: impl Into<String>) -> Self {
        self.entry_points.insert(name.into(), node_id.into());
        self
    }

    pub fn with_terminal(mut self, node_id: impl Into<String>) -> Self {
        self.terminal_nodes.push(node_id.into());
        self
    }

    pub fn with_pause(mut self, node_id: impl Into<String>) -> Self {
        self.pause_nodes.push(node_id.into());
        self
    }

    pub fn with_loop_config(mut self, loop_config: LoopConfig) -> Self {
        self.loop_config = loop_config;
        self
    }

    /// Parse a graph from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(StrandError::from)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(StrandError::from)
    }

    /// Get a node by id.
    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a EdgeSpec> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Whether completing this node ends the run successfully.
    pub fn is_terminal(&self, node_id: &str) -> bool {
        self.terminal_nodes.iter().any(|t| t == node_id)
            || self.node(node_id).is_some_and(|n| n.terminal)
    }

    pub fn is_pause(&self, node_id: &str) -> bool {
        self.pause_nodes.iter().any(|p| p == node_id)
    }
}

/// How a trigger through an entry point begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fresh start invoked by an operator.
    #[default]
    Manual,
    /// Fresh start invoked by an API caller.
    Api,
    /// Fresh start invoked by an incoming webhook.
    Webhook,
    /// Fresh start invoked by a timer.
    Timer,
    /// Continues a paused run from its session state.
    Resume,
}

impl TriggerType {
    pub fn is_resume(&self) -> bool {
        matches!(self, Self::Resume)
    }
}

/// How runs started through one entry point share Shared Memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Every run gets fresh memory.
    #[default]
    Isolated,
    /// Runs start from, and write back to, the entry point's shared snapshot.
    Shared,
    /// As `Shared`, with runs through the entry point executed one at a time.
    Synchronized,
}

/// A named starting location into a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPointSpec {
    pub id: String,
    pub name: String,
    pub entry_node: String,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub isolation_level: IsolationLevel,
}

impl EntryPointSpec {
    pub fn new(id: impl Into<String>, entry_node: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            entry_node: entry_node.into(),
            trigger_type: TriggerType::Manual,
            isolation_level: IsolationLevel::Isolated,
        }
    }

    /// A resume-type entry point.
    pub fn resume(id: impl Into<String>, entry_node: impl Into<String>) -> Self {
        Self::new(id, entry_node).with_trigger(TriggerType::Resume)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_trigger(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }

    pub fn with_isolation(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GraphSpec {
        GraphSpec::new("g", "a")
            .with_node(NodeSpec::new("a", "A"))
            .with_node(NodeSpec::new("b", "B"))
            .with_node(NodeSpec::new("c", "C").terminal())
            .with_edge(EdgeSpec::on_success("a", "b"))
            .with_edge(EdgeSpec::on_failure("a", "c"))
            .with_edge(EdgeSpec::always("b", "c"))
            .with_pause("b")
    }

    #[test]
    fn test_outgoing_in_declaration_order() {
        let g = sample();
        let ids: Vec<&str> = g.outgoing("a").map(|e| e.target.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(g.outgoing("c").count(), 0);
    }

    #[test]
    fn test_terminal_from_flag_or_list() {
        let g = sample().with_terminal("b");
        assert!(g.is_terminal("b"));
        assert!(g.is_terminal("c"));
        assert!(!g.is_terminal("a"));
        assert!(g.is_pause("b"));
    }

    #[test]
    fn test_json_roundtrip() {
        let g = sample().with_entry_point("resume_b", "b");
        let json = g.to_json_pretty().unwrap();
        let parsed = GraphSpec::from_json(&json).unwrap();
        assert_eq!(parsed, g);
    }

    #[test]
    fn test_minimal_json_defaults() {
        let g = GraphSpec::from_json(
            r#"{"id": "g", "entry_node": "a", "nodes": [{"id": "a", "name": "A"}]}"#,
        )
        .unwrap();
        assert_eq!(g.version, "1.0.0");
        assert_eq!(g.loop_config.max_iterations, 100);
        assert!(g.edges.is_empty());
    }

    #[test]
    fn test_entry_point_builders() {
        let ep = EntryPointSpec::resume("resume_review", "review")
            .with_isolation(IsolationLevel::Synchronized);
        assert!(ep.trigger_type.is_resume());
        assert_eq!(ep.name, "resume_review");
        assert_eq!(ep.isolation_level, IsolationLevel::Synchronized);
        assert!(!EntryPointSpec::new("start", "a").trigger_type.is_resume());
    }
}
