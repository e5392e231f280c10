//! Syntax tree for condition expressions.
//!
//! The tree covers the full expression grammar, including constructs the
//! evaluator refuses (`lambda`, `:=`, starred arguments, `await`, `yield`).
//! Parsing them into dedicated variants keeps the refusal in one exhaustive
//! match instead of scattered parser checks.

use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),

    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),

    ListComp {
        element: Box<Expr>,
        clauses: Vec<Clause>,
    },
    SetComp {
        element: Box<Expr>,
        clauses: Vec<Clause>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        clauses: Vec<Clause>,
    },
    Generator {
        element: Box<Expr>,
        clauses: Vec<Clause>,
    },

    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Chained comparison: `a < b <= c`.
    Compare {
        left: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },

    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Index>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },

    // Parsed, never evaluated.
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    NamedExpr {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Starred(Box<Expr>),
    Await(Box<Expr>),
    Yield(Option<Box<Expr>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Item(Expr),
    Slice {
        lower: Option<Expr>,
        upper: Option<Expr>,
        step: Option<Expr>,
    },
}

/// One `for target in iter if cond...` clause of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub target: Target,
    pub iter: Expr,
    pub conditions: Vec<Expr>,
}

/// Comprehension loop target: a name or a (nested) tuple of names.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl Expr {
    /// Height of the tree. Iterative so that a pathologically deep tree
    /// cannot exhaust the stack while being measured.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((expr, depth)) = stack.pop() {
            max = max.max(depth);
            expr.for_each_child(&mut |child| stack.push((child, depth + 1)));
        }
        max
    }

    fn for_each_child<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        match self {
            Expr::Literal(_) | Expr::Name(_) | Expr::Yield(None) => {}
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => items.iter().for_each(f),
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    f(k);
                    f(v);
                }
            }
            Expr::ListComp { element, clauses: cs }
            | Expr::SetComp { element, clauses: cs }
            | Expr::Generator { element, clauses: cs } => {
                f(element);
                visit_clauses(cs, f);
            }
            Expr::DictComp {
                key,
                value,
                clauses: cs,
            } => {
                f(key);
                f(value);
                visit_clauses(cs, f);
            }
            Expr::BoolOp { values, .. } => values.iter().for_each(f),
            Expr::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            Expr::Unary { operand, .. } => f(operand),
            Expr::Compare { left, rest } => {
                f(left);
                rest.iter().for_each(|(_, e)| f(e));
            }
            Expr::IfElse { test, body, orelse } => {
                f(test);
                f(body);
                f(orelse);
            }
            Expr::Attribute { value, .. } => f(value),
            Expr::Subscript { value, index } => {
                f(value);
                match index.as_ref() {
                    Index::Item(e) => f(e),
                    Index::Slice { lower, upper, step } => {
                        [lower, upper, step].into_iter().flatten().for_each(f)
                    }
                }
            }
            Expr::Call { func, args, kwargs } => {
                f(func);
                args.iter().for_each(&mut *f);
                kwargs.iter().for_each(|(_, e)| f(e));
            }
            Expr::Lambda { body, .. } => f(body),
            Expr::NamedExpr { target, value } => {
                f(target);
                f(value);
            }
            Expr::Starred(e) | Expr::Await(e) | Expr::Yield(Some(e)) => f(e),
        }
    }
}

fn visit_clauses<'a>(clauses: &'a [Clause], f: &mut dyn FnMut(&'a Expr)) {
    for clause in clauses {
        f(&clause.iter);
        clause.conditions.iter().for_each(&mut *f);
    }
}
