use std::collections::HashMap;

use serde_json::json;

use strand_agent::sandbox::{Context, Sandbox, SandboxError, Value};

fn context() -> Context {
    let mut ctx = Context::new();
    ctx.insert(
        "output".to_string(),
        Value::from_json(&json!({"score": 0.9, "tags": ["a", "b"]})),
    );
    ctx.insert("result".to_string(), Value::Int(42));
    ctx.insert("name".to_string(), Value::Str("strand".into()));
    ctx
}

const ESCAPES: &[&str] = &[
    "output.__class__.__mro__[-1].__subclasses__()",
    "output.__class__",
    "().__class__.__bases__[0].__subclasses__()",
    "name.__len__()",
    "result.real",
    "__import__('os').system('id')",
    "eval('1 + 1')",
    "exec('x = 1')",
    "compile('1', 'f', 'eval')",
    "open('/etc/passwd').read()",
    "getattr(output, '__class__')",
    "globals()",
    "locals()['result']",
    "vars()",
    "type(output)",
    "(lambda: 1)()",
    "[x := 5]",
    "print(result)",
    "name.format(output)",
    "name.__class__.__base__",
    "{**output}",
    "breakpoint()",
    "await result",
    "(yield)",
    "output['tags'].append('c')",
    "output['tags'].pop()",
    "import os",
];

#[test]
fn escape_attempts_are_rejected_and_never_true() {
    let sandbox = Sandbox::default();
    let ctx = context();
    for expr in ESCAPES {
        assert!(
            sandbox.evaluate(expr, &ctx).is_err(),
            "expected rejection for {:?}",
            expr
        );
        assert!(!sandbox.check(expr, &ctx), "expected false for {:?}", expr);
    }
}

#[test]
fn escape_attempts_leave_context_untouched() {
    let sandbox = Sandbox::default();
    let ctx = context();
    let before = ctx.clone();
    for expr in ESCAPES {
        let _ = sandbox.evaluate(expr, &ctx);
    }
    assert_eq!(ctx, before);
}

#[test]
fn resource_exhaustion_is_bounded() {
    let sandbox = Sandbox::default();
    let ctx = context();
    for expr in [
        "'a' * 10 ** 9",
        "[0] * 10 ** 9",
        "len(range(10 ** 12))",
        "list(range(10 ** 9))",
        "2 ** 10 ** 10",
        "[[y for y in range(1000)] for x in range(1000)]",
        "len([[0] * 10000] * 10000) > 0",
        "len([[[0] * 100] * 100] * 10000) > 0",
        "[[0] * 9000 for _ in range(1000)]",
    ] {
        assert!(
            matches!(sandbox.evaluate(expr, &ctx), Err(SandboxError::Limit(_))),
            "expected limit for {:?}",
            expr
        );
    }

    // Repeating an empty sequence finishes at once however large the count.
    for expr in ["[] * 9223372036854775807 == []", "() * 9223372036854775807 == ()"] {
        assert!(sandbox.check(expr, &ctx), "{:?} should hold", expr);
    }

    let deep = format!("{}1{}", "(".repeat(500), ")".repeat(500));
    assert!(matches!(
        sandbox.evaluate(&deep, &ctx),
        Err(SandboxError::Limit(_))
    ));
}

#[test]
fn allowed_language_still_works() {
    let sandbox = Sandbox::default();
    let ctx = context();
    for expr in [
        "result > 10 and result < 50",
        "output['score'] >= 0.8",
        "'a' in output['tags']",
        "len(output['tags']) == 2",
        "name.upper() == 'STRAND'",
        "sorted([3, 1, 2]) == [1, 2, 3]",
        "sum(x * 2 for x in range(4)) == 12",
        "{k: v for k, v in [('a', 1)]}['a'] == 1",
        "max(1, 2, 3) if result else 0",
        "not (result is None)",
        "name[1:3] == 'tr'",
        "abs(-3) == 3 and round(2.5) == 2",
    ] {
        assert!(sandbox.check(expr, &ctx), "expected true for {:?}", expr);
    }
}

#[test]
fn comprehension_variables_do_not_leak() {
    let sandbox = Sandbox::default();
    let mut json_ctx = HashMap::new();
    json_ctx.insert("x".to_string(), json!(7));
    let value = sandbox
        .evaluate_json("[x for x in range(3)] and x == 7", &json_ctx)
        .unwrap();
    assert_eq!(value, Value::Bool(true));
}
