//! Edge selection after a node completes.

use std::collections::HashMap;

use tracing::{debug, warn};

use strand_core::{EdgeCondition, EdgeSpec, NodeResult};

use crate::sandbox::{Context, Sandbox, SandboxError, Value};

/// Variables visible to a conditional edge.
///
/// Memory keys and output keys are bound at the top level, with output
/// taking precedence. `output` and `memory` hold the two maps whole and
/// `success` is the node's outcome.
pub fn condition_context(
    result: &NodeResult,
    memory: &HashMap<String, serde_json::Value>,
) -> Context {
    let mut context = Context::with_capacity(memory.len() + result.output.len() + 3);
    for (key, value) in memory.iter().chain(result.output.iter()) {
        context.insert(key.clone(), Value::from_json(value));
    }
    context.insert("output".to_string(), json_map(&result.output));
    context.insert("memory".to_string(), json_map(memory));
    context.insert("success".to_string(), Value::Bool(result.success));
    context
}

fn json_map(map: &HashMap<String, serde_json::Value>) -> Value {
    Value::Dict(
        map.iter()
            .map(|(k, v)| (Value::Str(k.clone()), Value::from_json(v)))
            .collect(),
    )
}

/// Whether `condition` holds for a node that finished with `success`.
///
/// Only conditional edges consult the sandbox; its errors are returned so
/// the caller can report them before treating the edge as not taken.
pub fn should_traverse(
    condition: &EdgeCondition,
    success: bool,
    sandbox: &Sandbox,
    context: &Context,
) -> Result<bool, SandboxError> {
    match condition {
        EdgeCondition::Always => Ok(true),
        EdgeCondition::OnSuccess => Ok(success),
        EdgeCondition::OnFailure => Ok(!success),
        EdgeCondition::Conditional { expr } => {
            sandbox.evaluate(expr, context).map(|v| v.truthy())
        }
    }
}

/// Pick the satisfied edge with the highest priority. Equal priorities go
/// to the edge declared first.
///
/// `on_rejected` is called for every conditional edge whose expression
/// could not be evaluated; such edges count as not satisfied.
pub fn select_edge<'g, I, F>(
    edges: I,
    success: bool,
    sandbox: &Sandbox,
    context: &Context,
    mut on_rejected: F,
) -> Option<&'g EdgeSpec>
where
    I: IntoIterator<Item = &'g EdgeSpec>,
    F: FnMut(&EdgeSpec, &SandboxError),
{
    let mut best: Option<&EdgeSpec> = None;
    for edge in edges {
        let satisfied = match should_traverse(&edge.condition, success, sandbox, context) {
            Ok(satisfied) => satisfied,
            Err(e) => {
                warn!(edge_id = %edge.id, error = %e, "Condition rejected, treating as false");
                on_rejected(edge, &e);
                false
            }
        };
        debug!(edge_id = %edge.id, satisfied, priority = edge.priority, "Edge evaluated");
        if satisfied && best.map_or(true, |b| edge.priority > b.priority) {
            best = Some(edge);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn test_unconditional_kinds() {
        let sandbox = Sandbox::default();
        for success in [true, false] {
            assert!(should_traverse(&EdgeCondition::Always, success, &sandbox, &ctx()).unwrap());
            assert_eq!(
                should_traverse(&EdgeCondition::OnSuccess, success, &sandbox, &ctx()).unwrap(),
                success
            );
            assert_eq!(
                should_traverse(&EdgeCondition::OnFailure, success, &sandbox, &ctx()).unwrap(),
                !success
            );
        }
    }

    #[test]
    fn test_context_output_overrides_memory() {
        let memory = HashMap::from([
            ("score".to_string(), json!(1)),
            ("topic".to_string(), json!("rust")),
        ]);
        let result = NodeResult::success(HashMap::new()).with_value("score", json!(9));
        let context = condition_context(&result, &memory);
        let sandbox = Sandbox::default();

        assert!(sandbox.check("score == 9", &context));
        assert!(sandbox.check("memory['score'] == 1", &context));
        assert!(sandbox.check("output['score'] == 9 and topic == 'rust'", &context));
        assert!(sandbox.check("success", &context));
    }

    #[test]
    fn test_higher_priority_wins() {
        let edges = vec![
            EdgeSpec::always("a", "low").with_priority(1),
            EdgeSpec::always("a", "high").with_priority(5),
            EdgeSpec::on_failure("a", "never").with_priority(10),
        ];
        let chosen = select_edge(&edges, true, &Sandbox::default(), &ctx(), |_, _| {}).unwrap();
        assert_eq!(chosen.target, "high");
    }

    #[test]
    fn test_tie_goes_to_declaration_order() {
        let edges = vec![
            EdgeSpec::always("a", "first").with_priority(2),
            EdgeSpec::always("a", "second").with_priority(2),
        ];
        let chosen = select_edge(&edges, true, &Sandbox::default(), &ctx(), |_, _| {}).unwrap();
        assert_eq!(chosen.target, "first");
    }

    #[test]
    fn test_rejected_condition_reported_and_skipped() {
        let edges = vec![
            EdgeSpec::conditional("a", "escape", "output.__class__").with_priority(9),
            EdgeSpec::always("a", "safe"),
        ];
        let mut rejected = vec![];
        let chosen = select_edge(&edges, true, &Sandbox::default(), &ctx(), |edge, e| {
            rejected.push((edge.id.clone(), e.clone()))
        })
        .unwrap();
        assert_eq!(chosen.target, "safe");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "a->escape");
    }

    #[test]
    fn test_nothing_satisfied() {
        let edges = vec![
            EdgeSpec::on_failure("a", "b"),
            EdgeSpec::conditional("a", "c", "missing_name > 3"),
        ];
        assert!(select_edge(&edges, true, &Sandbox::default(), &ctx(), |_, _| {}).is_none());
    }

    #[test]
    fn test_empty_condition_is_satisfied() {
        let edges = vec![EdgeSpec::conditional("a", "b", "")];
        assert!(select_edge(&edges, false, &Sandbox::default(), &ctx(), |_, _| {}).is_some());
    }
}
