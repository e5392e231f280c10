use serde::{Deserialize, Serialize};

/// Behaviour category of a node.
///
/// The executor matches on this exhaustively, so adding a kind is a
/// compile-time-checked change at every dispatch point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Single model call producing text.
    #[default]
    LlmGenerate,
    /// Model call that may invoke the node's declared tools.
    LlmToolUse,
    /// Deterministic Rust function.
    Function,
    /// Long-running model/tool loop that may span many turns.
    EventLoop,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LlmGenerate => "llm_generate",
            Self::LlmToolUse => "llm_tool_use",
            Self::Function => "function",
            Self::EventLoop => "event_loop",
        };
        f.write_str(s)
    }
}

/// A node in the workflow graph.
///
/// Input/output keys define which Shared Memory keys the node may read and
/// write; they become the permission scope of the node's memory view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique identifier for this node.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub node_type: NodeType,
    /// Keys this node may read. Empty means unrestricted.
    #[serde(default)]
    pub input_keys: Vec<String>,
    /// Keys this node may write. Empty means unrestricted.
    #[serde(default)]
    pub output_keys: Vec<String>,
    /// Tool names available to this node.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Total attempts before the node is treated as failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Name of the registered function for `Function` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Optional system prompt for model-backed nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Model override for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub client_facing: bool,
    #[serde(default)]
    pub terminal: bool,
}

fn default_max_retries() -> u32 {
    3
}

impl NodeSpec {
    /// Create a new node with minimal configuration.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            node_type: NodeType::default(),
            input_keys: vec![],
            output_keys: vec![],
            tools: vec![],
            max_retries: default_max_retries(),
            function: None,
            system_prompt: None,
            model: None,
            client_facing: false,
            terminal: false,
        }
    }

    /// Create a `Function` node bound to a registered function name.
    pub fn function(id: impl Into<String>, function: impl Into<String>) -> Self {
        let id = id.into();
        let mut node = Self::new(id.clone(), id);
        node.node_type = NodeType::Function;
        node.function = Some(function.into());
        node
    }

    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input keys.
    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the output keys.
    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the system prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn client_facing(mut self) -> Self {
        self.client_facing = true;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Attempts the executor makes before giving up. Never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn declares_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let node = NodeSpec::new("n1", "Research")
            .with_type(NodeType::LlmToolUse)
            .with_prompt("You are a researcher.")
            .with_inputs(["topic"])
            .with_outputs(["findings"])
            .with_tools(["web_search"])
            .with_max_retries(5);

        assert_eq!(node.id, "n1");
        assert_eq!(node.name, "Research");
        assert_eq!(node.node_type, NodeType::LlmToolUse);
        assert_eq!(node.system_prompt.as_deref(), Some("You are a researcher."));
        assert_eq!(node.input_keys, vec!["topic"]);
        assert_eq!(node.output_keys, vec!["findings"]);
        assert!(node.declares_tool("web_search"));
        assert!(!node.declares_tool("bash"));
        assert_eq!(node.max_retries, 5);
    }

    #[test]
    fn test_attempts_never_zero() {
        let node = NodeSpec::new("n", "n").with_max_retries(0);
        assert_eq!(node.attempts(), 1);
    }

    #[test]
    fn test_deserialize_defaults() {
        let node: NodeSpec = serde_json::from_str(r#"{"id": "a", "name": "A"}"#).unwrap();
        assert_eq!(node.node_type, NodeType::LlmGenerate);
        assert_eq!(node.max_retries, 3);
        assert!(!node.terminal);
        assert!(node.input_keys.is_empty());
    }

    #[test]
    fn test_function_node() {
        let node: NodeSpec =
            serde_json::from_str(r#"{"id": "sum", "name": "Sum", "node_type": "function", "function": "add"}"#)
                .unwrap();
        assert_eq!(node.node_type, NodeType::Function);
        assert_eq!(node.function.as_deref(), Some("add"));
        assert_eq!(NodeSpec::function("sum", "add"), NodeSpec { name: "sum".into(), ..node });
    }
}
