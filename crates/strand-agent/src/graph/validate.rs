use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, warn};

use strand_core::error::{Result, StrandError};
use strand_core::{EdgeCondition, GraphSpec, NodeType};
use strand_tools::ToolRegistry;

use crate::sandbox::Sandbox;

/// Outcome of checking a graph definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Structural problems. Any entry makes the graph unrunnable.
    pub errors: Vec<String>,
    /// Suspicious but runnable constructs.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a graph for dangling references, duplicate ids and missing
/// entry/terminal/pause nodes.
///
/// When a tool registry is given, tools declared by nodes but not
/// registered are errors as well. Conditions that do not parse are
/// warnings: such an edge never fires, the rest of the graph still runs.
pub fn validate(
    graph: &GraphSpec,
    sandbox: &Sandbox,
    tools: Option<&ToolRegistry>,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let errors = &mut report.errors;

    if graph.nodes.is_empty() {
        errors.push("graph has no nodes".to_string());
    }

    let mut node_ids = HashSet::new();
    for node in &graph.nodes {
        if node.id.is_empty() {
            errors.push("node with empty id".to_string());
        }
        if !node_ids.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id '{}'", node.id));
        }
        if node.node_type == NodeType::Function && node.function.is_none() {
            errors.push(format!("function node '{}' names no function", node.id));
        }
    }

    let exists = |id: &str| node_ids.contains(id);

    if !exists(graph.entry_node.as_str()) {
        errors.push(format!("entry node '{}' does not exist", graph.entry_node));
    }
    for (name, target) in &graph.entry_points {
        if !exists(target.as_str()) {
            errors.push(format!(
                "entry point '{}' references missing node '{}'",
                name, target
            ));
        }
    }
    for id in &graph.terminal_nodes {
        if !exists(id.as_str()) {
            errors.push(format!("terminal node '{}' does not exist", id));
        }
    }
    for id in &graph.pause_nodes {
        if !exists(id.as_str()) {
            errors.push(format!("pause node '{}' does not exist", id));
        }
    }

    let mut edge_ids = HashSet::new();
    for edge in &graph.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            errors.push(format!("duplicate edge id '{}'", edge.id));
        }
        if !exists(edge.source.as_str()) {
            errors.push(format!(
                "edge '{}' has missing source '{}'",
                edge.id, edge.source
            ));
        }
        if !exists(edge.target.as_str()) {
            errors.push(format!(
                "edge '{}' has missing target '{}'",
                edge.id, edge.target
            ));
        }
        if let EdgeCondition::Conditional { expr } = &edge.condition {
            if !expr.trim().is_empty() {
                if let Err(e) = sandbox.parse(expr) {
                    report
                        .warnings
                        .push(format!("edge '{}' condition does not parse: {}", edge.id, e));
                }
            }
        }
    }

    let limits = &graph.loop_config;
    if limits.max_iterations == 0 {
        errors.push("loop_config.max_iterations must be at least 1".to_string());
    }

    if let Some(registry) = tools {
        for (node, tool) in registry.missing_for(graph) {
            errors.push(format!("node '{}' declares unregistered tool '{}'", node, tool));
        }
    }

    if graph.terminal_nodes.is_empty() && !graph.nodes.iter().any(|n| n.terminal) {
        report
            .warnings
            .push("graph declares no terminal node".to_string());
    }
    for id in unreachable(graph) {
        report
            .warnings
            .push(format!("node '{}' is unreachable from any entry point", id));
    }

    report
}

/// Node ids not reachable from the entry node or any named entry point.
fn unreachable(graph: &GraphSpec) -> Vec<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = std::iter::once(graph.entry_node.as_str())
        .chain(graph.entry_points.values().map(String::as_str))
        .collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(next) = adjacency.get(id) {
            queue.extend(next.iter().copied());
        }
    }

    graph
        .nodes
        .iter()
        .filter(|n| !seen.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

/// A graph that has passed validation. The executor and runtime accept
/// nothing else.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    graph: Arc<GraphSpec>,
    warnings: Arc<[String]>,
}

impl ValidatedGraph {
    pub fn new(
        graph: GraphSpec,
        sandbox: &Sandbox,
        tools: Option<&ToolRegistry>,
    ) -> Result<Self> {
        let report = validate(&graph, sandbox, tools);
        if !report.is_valid() {
            return Err(StrandError::InvalidGraph(report.errors));
        }
        for warning in &report.warnings {
            warn!(graph_id = %graph.id, "{}", warning);
        }
        debug!(
            graph_id = %graph.id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Graph validated"
        );
        Ok(Self {
            graph: Arc::new(graph),
            warnings: report.warnings.into(),
        })
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn spec(&self) -> &GraphSpec {
        &self.graph
    }

    pub fn into_inner(self) -> GraphSpec {
        Arc::try_unwrap(self.graph).unwrap_or_else(|shared| GraphSpec::clone(&shared))
    }
}

impl Deref for ValidatedGraph {
    type Target = GraphSpec;

    fn deref(&self) -> &GraphSpec {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::routing::select_edge;
    use strand_core::{EdgeSpec, NodeSpec};

    fn linear() -> GraphSpec {
        GraphSpec::new("g", "a")
            .with_node(NodeSpec::new("a", "A"))
            .with_node(NodeSpec::new("b", "B"))
            .with_node(NodeSpec::new("c", "C"))
            .with_edge(EdgeSpec::on_success("a", "b"))
            .with_edge(EdgeSpec::on_success("b", "c"))
            .with_terminal("c")
    }

    fn check(graph: &GraphSpec) -> ValidationReport {
        validate(graph, &Sandbox::default(), None)
    }

    #[test]
    fn test_valid_linear_graph() {
        let report = check(&linear());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_dangling_edge_target() {
        let graph = linear().with_edge(EdgeSpec::always("c", "ghost"));
        let report = check(&graph);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("missing target 'ghost'"));
    }

    #[test]
    fn test_missing_entry_terminal_and_pause() {
        let mut graph = linear().with_terminal("nope").with_pause("gone");
        graph.entry_node = "missing".into();
        let report = check(&graph);
        assert!(report.errors.iter().any(|e| e.contains("entry node 'missing'")));
        assert!(report.errors.iter().any(|e| e.contains("terminal node 'nope'")));
        assert!(report.errors.iter().any(|e| e.contains("pause node 'gone'")));
    }

    #[test]
    fn test_entry_point_must_reference_node() {
        let graph = linear().with_entry_point("resume", "zzz");
        let report = check(&graph);
        assert!(report.errors[0].contains("entry point 'resume'"));
    }

    #[test]
    fn test_duplicate_ids() {
        let graph = linear()
            .with_node(NodeSpec::new("a", "Again"))
            .with_edge(EdgeSpec::on_success("a", "b"));
        let report = check(&graph);
        assert!(report.errors.iter().any(|e| e.contains("duplicate node id 'a'")));
        assert!(report.errors.iter().any(|e| e.contains("duplicate edge id 'a->b'")));
    }

    #[test]
    fn test_unparseable_condition_is_warning() {
        let graph = linear().with_edge(
            EdgeSpec::conditional("a", "c", "score >")
                .with_id("bad")
                .with_priority(5),
        );
        let report = check(&graph);
        assert!(report.is_valid(), "{:?}", report.errors);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("edge 'bad' condition does not parse"));

        // Only the malformed edge is blocked; its sibling still routes.
        let graph = ValidatedGraph::new(graph, &Sandbox::default(), None).unwrap();
        let mut rejected = vec![];
        let chosen = select_edge(
            graph.edges.iter().filter(|e| e.source == "a"),
            true,
            &Sandbox::default(),
            &crate::sandbox::Context::new(),
            |edge, _| rejected.push(edge.id.clone()),
        )
        .unwrap();
        assert_eq!(chosen.target, "b");
        assert_eq!(rejected, vec!["bad".to_string()]);
    }

    #[test]
    fn test_empty_condition_is_accepted() {
        let graph = linear().with_edge(EdgeSpec::conditional("a", "c", "").with_id("empty"));
        assert!(check(&graph).is_valid());
    }

    #[test]
    fn test_unreachable_node_is_warning() {
        let graph = linear().with_node(NodeSpec::new("island", "Island"));
        let report = check(&graph);
        assert!(report.is_valid());
        assert_eq!(
            report.warnings,
            vec!["node 'island' is unreachable from any entry point".to_string()]
        );
    }

    #[test]
    fn test_function_node_needs_function_name() {
        let graph = linear().with_node(NodeSpec::new("f", "F").with_type(NodeType::Function));
        let report = check(&graph);
        assert!(report.errors.iter().any(|e| e.contains("function node 'f'")));
    }

    #[test]
    fn test_unregistered_tool_with_registry() {
        let mut graph = linear();
        graph.nodes[0].tools = vec!["search".into()];
        let registry = ToolRegistry::new();
        assert!(check(&graph).is_valid());
        let report = validate(&graph, &Sandbox::default(), Some(&registry));
        assert!(report.errors[0].contains("unregistered tool 'search'"));
    }

    #[test]
    fn test_validated_graph_rejects_invalid() {
        let graph = linear().with_edge(EdgeSpec::always("ghost", "a"));
        let err = ValidatedGraph::new(graph, &Sandbox::default(), None).unwrap_err();
        assert!(matches!(err, StrandError::InvalidGraph(_)));
        assert_eq!(err.category(), strand_core::error::ErrorCategory::GraphDefinition);
    }

    #[test]
    fn test_validated_graph_derefs_to_spec() {
        let validated = ValidatedGraph::new(linear(), &Sandbox::default(), None).unwrap();
        assert_eq!(validated.entry_node, "a");
        assert!(validated.is_terminal("c"));
        assert_eq!(validated.into_inner().id, "g");
    }
}
