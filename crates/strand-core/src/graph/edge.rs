use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An edge connecting two nodes in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Condition that must be true to traverse this edge.
    #[serde(default)]
    pub condition: EdgeCondition,
    /// Higher priority wins when several edges are satisfied.
    #[serde(default)]
    pub priority: i32,
    /// `target_key -> source_key` renames applied to Shared Memory on traversal.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, String>,
}

/// Condition for traversing an edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Always traverse this edge.
    #[default]
    Always,
    /// Traverse only if the source node succeeded.
    OnSuccess,
    /// Traverse only if the source node failed.
    OnFailure,
    /// Traverse if the expression evaluates truthy in the condition sandbox.
    /// An empty expression is treated as true.
    Conditional {
        #[serde(default)]
        expr: String,
    },
}

impl EdgeCondition {
    /// The expression text of a conditional edge.
    pub fn expr(&self) -> Option<&str> {
        match self {
            Self::Conditional { expr } => Some(expr),
            _ => None,
        }
    }
}

impl EdgeSpec {
    fn build(source: String, target: String, condition: EdgeCondition) -> Self {
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            condition,
            priority: 0,
            input_mapping: BTreeMap::new(),
        }
    }

    /// Create an unconditional edge.
    pub fn always(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::build(source.into(), target.into(), EdgeCondition::Always)
    }

    /// Create an edge that fires on success.
    pub fn on_success(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::build(source.into(), target.into(), EdgeCondition::OnSuccess)
    }

    /// Create an edge that fires on failure.
    pub fn on_failure(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::build(source.into(), target.into(), EdgeCondition::OnFailure)
    }

    /// Create a conditional edge.
    pub fn conditional(
        source: impl Into<String>,
        target: impl Into<String>,
        expr: impl Into<String>,
    ) -> Self {
        Self::build(
            source.into(),
            target.into(),
            EdgeCondition::Conditional { expr: expr.into() },
        )
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Copy `source_key` into `target_key` when this edge is traversed.
    pub fn with_mapping(mut self, target_key: impl Into<String>, source_key: impl Into<String>) -> Self {
        self.input_mapping.insert(target_key.into(), source_key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_builders() {
        let e = EdgeSpec::always("a", "b");
        assert_eq!(e.source, "a");
        assert_eq!(e.target, "b");
        assert_eq!(e.id, "a->b");
        assert!(matches!(e.condition, EdgeCondition::Always));

        let e = EdgeSpec::on_success("a", "c");
        assert!(matches!(e.condition, EdgeCondition::OnSuccess));

        let e = EdgeSpec::on_failure("a", "d").with_priority(3).with_id("fail");
        assert!(matches!(e.condition, EdgeCondition::OnFailure));
        assert_eq!(e.priority, 3);
        assert_eq!(e.id, "fail");
    }

    #[test]
    fn test_conditional_expr() {
        let e = EdgeSpec::conditional("a", "b", "score > 5");
        assert_eq!(e.condition.expr(), Some("score > 5"));
        assert_eq!(EdgeCondition::OnSuccess.expr(), None);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let edge = EdgeSpec::conditional("a", "b", r#"status == "ok""#)
            .with_priority(2)
            .with_mapping("draft", "text");
        let json = serde_json::to_string(&edge).unwrap();
        let parsed: EdgeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, edge);
    }

    #[test]
    fn test_default_condition_is_always() {
        let edge: EdgeSpec =
            serde_json::from_str(r#"{"id": "e", "source": "a", "target": "b"}"#).unwrap();
        assert_eq!(edge.condition, EdgeCondition::Always);
        assert_eq!(edge.priority, 0);
        assert!(edge.input_mapping.is_empty());
    }
}
