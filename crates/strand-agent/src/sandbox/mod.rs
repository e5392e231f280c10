//! Restricted interpreter for edge condition expressions.
//!
//! Conditions are authored alongside the graph and are treated as untrusted.
//! The language is a small Python-like expression grammar: literals,
//! container displays and comprehensions, arithmetic, comparison, boolean
//! and ternary operators, name lookup, subscripting and slicing, and calls
//! to a fixed table of built-in functions and container methods.
//!
//! Evaluation is default-deny. The evaluator matches exhaustively over the
//! closed [`ast::Expr`] type; constructs outside the language (`lambda`,
//! `:=`, unpacking, `await`, `yield`) parse into their own variants and are
//! refused there. Attribute access is only possible as an allowed method
//! call, and any attribute name with a leading underscore is refused before
//! its receiver is evaluated.

pub mod ast;
mod builtins;
mod eval;
mod lexer;
mod parser;
mod value;

use std::collections::HashMap;

use thiserror::Error;

use strand_core::config::SandboxConfig;

pub use value::Value;

/// Why a condition could not be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("syntax error at offset {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("name '{0}' is not defined")]
    UnknownName(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("division by zero")]
    ZeroDivision,

    #[error("limit exceeded: {0}")]
    Limit(String),
}

/// Variable context an expression is evaluated against.
pub type Context = HashMap<String, Value>;

/// Condition evaluator with fixed resource limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sandbox {
    limits: SandboxConfig,
}

impl Sandbox {
    pub fn new(limits: SandboxConfig) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SandboxConfig {
        &self.limits
    }

    /// Parse without evaluating.
    pub fn parse(&self, expr: &str) -> Result<ast::Expr, SandboxError> {
        let len = expr.chars().count();
        if len > self.limits.max_expression_len {
            return Err(SandboxError::Limit(format!(
                "expression is {} characters, limit is {}",
                len, self.limits.max_expression_len
            )));
        }
        let tree = parser::parse(expr, self.limits.max_depth)?;
        if tree.depth() > self.limits.max_depth {
            return Err(SandboxError::Limit(format!(
                "expression nesting exceeds {}",
                self.limits.max_depth
            )));
        }
        Ok(tree)
    }

    /// Evaluate `expr` against `context`. An empty expression is `True`.
    pub fn evaluate(&self, expr: &str, context: &Context) -> Result<Value, SandboxError> {
        if expr.trim().is_empty() {
            return Ok(Value::Bool(true));
        }
        let tree = self.parse(expr)?;
        eval::Evaluator::new(context, &self.limits).evaluate(&tree)
    }

    /// Evaluate against a JSON context.
    pub fn evaluate_json(
        &self,
        expr: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<Value, SandboxError> {
        let context: Context = context
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();
        self.evaluate(expr, &context)
    }

    /// Truthiness of `expr`, with every error folded into `false`.
    pub fn check(&self, expr: &str, context: &Context) -> bool {
        self.evaluate(expr, context)
            .map(|v| v.truthy())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_empty_expression_is_true() {
        let sandbox = Sandbox::default();
        assert!(sandbox.check("", &Context::new()));
        assert!(sandbox.check("   ", &Context::new()));
    }

    #[test]
    fn test_range_condition() {
        let sandbox = Sandbox::default();
        let expr = "result > 10 and result < 50";
        assert!(sandbox.check(expr, &ctx(&[("result", Value::Int(42))])));
        assert!(!sandbox.check(expr, &ctx(&[("result", Value::Int(60))])));
    }

    #[test]
    fn test_errors_fold_to_false() {
        let sandbox = Sandbox::default();
        assert!(!sandbox.check("missing > 1", &Context::new()));
        assert!(!sandbox.check("1 / 0", &Context::new()));
        assert!(!sandbox.check("(", &Context::new()));
    }

    #[test]
    fn test_expression_length_limit() {
        let sandbox = Sandbox::new(SandboxConfig {
            max_expression_len: 10,
            ..SandboxConfig::default()
        });
        assert!(matches!(
            sandbox.evaluate("1 + 1 + 1 + 1", &Context::new()),
            Err(SandboxError::Limit(_))
        ));
    }

    #[test]
    fn test_tree_depth_limit() {
        let sandbox = Sandbox::new(SandboxConfig {
            max_depth: 16,
            ..SandboxConfig::default()
        });
        let long_sum = vec!["1"; 40].join(" + ");
        assert!(matches!(
            sandbox.evaluate(&long_sum, &Context::new()),
            Err(SandboxError::Limit(_))
        ));
    }

    #[test]
    fn test_evaluate_json_context() {
        let sandbox = Sandbox::default();
        let mut context = HashMap::new();
        context.insert("output".to_string(), serde_json::json!({"score": 0.9}));
        let value = sandbox
            .evaluate_json("output['score'] >= 0.8", &context)
            .unwrap();
        assert_eq!(value, Value::Bool(true));
    }
}
