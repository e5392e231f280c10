use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use strand_core::error::{Result, StrandError};
use strand_core::graph::{GraphSpec, NodeSpec};
use strand_core::traits::Tool;
use strand_core::types::{ToolContext, ToolDefinition, ToolResult};

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tools, sorted by name.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Definitions for the tools a node declares, skipping unknown names.
    pub fn definitions_for(&self, node: &NodeSpec) -> Vec<ToolDefinition> {
        node.tools
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Tool names declared by nodes of `graph` that are not registered.
    pub fn missing_for(&self, graph: &GraphSpec) -> Vec<(String, String)> {
        graph
            .nodes
            .iter()
            .flat_map(|n| n.tools.iter().map(move |t| (n.id.clone(), t.clone())))
            .filter(|(_, tool)| !self.contains(tool))
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| StrandError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());
        debug!(tool = name, node_id = %ctx.node_id, "Executing tool");

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = name, timeout_secs = tool.timeout_secs(), "Tool timed out");
                Err(StrandError::ToolTimeout {
                    tool: name.to_string(),
                    timeout_secs: tool.timeout_secs(),
                })
            }
        }
    }
}
