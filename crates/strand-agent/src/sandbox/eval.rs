use std::cmp::Ordering;

use strand_core::config::SandboxConfig;

use super::ast::{BinOp, BoolOp, Clause, CmpOp, Expr, Index, Target, UnaryOp};
use super::builtins;
use super::value::{cells, contains, dict_get, dict_insert, set_insert, Num, Value};
use super::{Context, SandboxError};

type Result<T> = std::result::Result<T, SandboxError>;

/// Comprehension-local bindings layered over the caller's context.
type Locals = Context;

pub(crate) struct Evaluator<'a> {
    globals: &'a Context,
    limits: &'a SandboxConfig,
    steps: usize,
    max_steps: usize,
    /// Cells allocated by every value built so far, nested elements included.
    allocated: usize,
    max_allocated: usize,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(globals: &'a Context, limits: &'a SandboxConfig) -> Self {
        Self {
            globals,
            limits,
            steps: 0,
            max_steps: limits.max_collection_len.saturating_mul(10),
            allocated: 0,
            max_allocated: limits.max_collection_len.saturating_mul(10),
        }
    }

    pub(crate) fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        self.eval(expr, &Locals::new())
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(SandboxError::Limit(format!(
                "evaluation exceeded {} steps",
                self.max_steps
            )));
        }
        Ok(())
    }

    /// Charge a freshly built value against the allocation budget.
    fn charge(&mut self, value: Value) -> Result<Value> {
        self.allocated = self.allocated.saturating_add(value.size());
        if self.allocated > self.max_allocated {
            return Err(SandboxError::Limit(format!(
                "evaluation allocated more than {} cells",
                self.max_allocated
            )));
        }
        Ok(value)
    }

    fn eval(&mut self, expr: &Expr, locals: &Locals) -> Result<Value> {
        self.tick()?;
        let value = self.eval_inner(expr, locals)?;
        if allocates(expr) {
            self.charge(value)
        } else {
            Ok(value)
        }
    }

    fn eval_inner(&mut self, expr: &Expr, locals: &Locals) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self.lookup(name, locals),

            Expr::List(items) => Ok(Value::List(self.eval_all(items, locals)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.eval_all(items, locals)?)),
            Expr::Set(items) => {
                let mut set = Vec::with_capacity(items.len());
                for item in self.eval_all(items, locals)? {
                    item.require_hashable()?;
                    set_insert(&mut set, item);
                }
                Ok(Value::Set(set))
            }
            Expr::Dict(pairs) => {
                let mut dict = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval(k, locals)?;
                    key.require_hashable()?;
                    let value = self.eval(v, locals)?;
                    dict_insert(&mut dict, key, value);
                }
                Ok(Value::Dict(dict))
            }

            Expr::ListComp { element, clauses } | Expr::Generator { element, clauses } => {
                let limit = self.limits.max_collection_len;
                let mut out = Vec::new();
                self.comprehend(clauses, locals, &mut |ev, scope| {
                    let item = ev.eval(element, scope)?;
                    out.push(ev.charge(item)?);
                    check_len(out.len(), limit)
                })?;
                Ok(Value::List(out))
            }
            Expr::SetComp { element, clauses } => {
                let limit = self.limits.max_collection_len;
                let mut out = Vec::new();
                self.comprehend(clauses, locals, &mut |ev, scope| {
                    let item = ev.eval(element, scope)?;
                    item.require_hashable()?;
                    set_insert(&mut out, ev.charge(item)?);
                    check_len(out.len(), limit)
                })?;
                Ok(Value::Set(out))
            }
            Expr::DictComp {
                key,
                value,
                clauses,
            } => {
                let limit = self.limits.max_collection_len;
                let mut out = Vec::new();
                self.comprehend(clauses, locals, &mut |ev, scope| {
                    let k = ev.eval(key, scope)?;
                    k.require_hashable()?;
                    let v = ev.eval(value, scope)?;
                    dict_insert(&mut out, ev.charge(k)?, ev.charge(v)?);
                    check_len(out.len(), limit)
                })?;
                Ok(Value::Dict(out))
            }

            Expr::BoolOp { op, values } => {
                let mut last = Value::None;
                for operand in values {
                    last = self.eval(operand, locals)?;
                    let decided = match op {
                        BoolOp::And => !last.truthy(),
                        BoolOp::Or => last.truthy(),
                    };
                    if decided {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Binary { left, op, right } => {
                let l = self.eval(left, locals)?;
                let r = self.eval(right, locals)?;
                binary(*op, &l, &r, self.limits)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, locals)?;
                unary(*op, &value)
            }
            Expr::Compare { left, rest } => {
                let mut current = self.eval(left, locals)?;
                for (op, next) in rest {
                    let right = self.eval(next, locals)?;
                    if !compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test, locals)?.truthy() {
                    self.eval(body, locals)
                } else {
                    self.eval(orelse, locals)
                }
            }

            Expr::Attribute { attr, .. } => {
                check_attribute(attr)?;
                Err(SandboxError::Rejected(format!(
                    "attribute '{}' may only be used as a method call",
                    attr
                )))
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value, locals)?;
                match index.as_ref() {
                    Index::Item(key) => {
                        let key = self.eval(key, locals)?;
                        item(&container, &key)
                    }
                    Index::Slice { lower, upper, step } => {
                        let lower = self.slice_bound(lower.as_ref(), locals)?;
                        let upper = self.slice_bound(upper.as_ref(), locals)?;
                        let step = self.slice_bound(step.as_ref(), locals)?;
                        slice(&container, lower, upper, step)
                    }
                }
            }
            Expr::Call { func, args, kwargs } => self.call(func, args, kwargs, locals),

            Expr::Lambda { .. } => Err(refused("lambda expressions")),
            Expr::NamedExpr { .. } => Err(refused("assignment expressions")),
            Expr::Starred(_) => Err(refused("argument unpacking")),
            Expr::Await(_) => Err(refused("await")),
            Expr::Yield(_) => Err(refused("yield")),
        }
    }

    fn lookup(&self, name: &str, locals: &Locals) -> Result<Value> {
        if let Some(value) = locals.get(name).or_else(|| self.globals.get(name)) {
            return Ok(value.clone());
        }
        if builtins::is_builtin(name) {
            return Err(SandboxError::Rejected(format!(
                "built-in '{}' may only be called",
                name
            )));
        }
        Err(SandboxError::UnknownName(name.to_string()))
    }

    fn eval_all(&mut self, items: &[Expr], locals: &Locals) -> Result<Vec<Value>> {
        items.iter().map(|e| self.eval(e, locals)).collect()
    }

    fn slice_bound(&mut self, bound: Option<&Expr>, locals: &Locals) -> Result<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr, locals)? {
            Value::None => Ok(None),
            other => other.as_int().map(Some).ok_or_else(|| {
                SandboxError::Type("slice indices must be integers or None".to_string())
            }),
        }
    }

    fn call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        locals: &Locals,
    ) -> Result<Value> {
        match func {
            Expr::Name(name) => {
                if !builtins::is_builtin(name) {
                    return Err(SandboxError::Rejected(format!(
                        "call to '{}' is not allowed",
                        name
                    )));
                }
                let call = self.eval_args(name, args, kwargs, locals)?;
                builtins::call_builtin(call, self.limits)
            }
            Expr::Attribute { value, attr } => {
                check_attribute(attr)?;
                let receiver = self.eval(value, locals)?;
                let call = self.eval_args(attr, args, kwargs, locals)?;
                builtins::call_method(&receiver, call, self.limits)
            }
            _ => Err(SandboxError::Rejected(
                "only built-in functions and allowed methods may be called".to_string(),
            )),
        }
    }

    fn eval_args(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        locals: &Locals,
    ) -> Result<builtins::Args> {
        let positional = self.eval_all(args, locals)?;
        let mut named = Vec::with_capacity(kwargs.len());
        for (key, expr) in kwargs {
            named.push((key.clone(), self.eval(expr, locals)?));
        }
        Ok(builtins::Args::new(name, positional, named))
    }

    /// Run `emit` once per combination produced by `clauses`. Each iteration
    /// binds its loop variables into a private copy of the enclosing scope.
    fn comprehend(
        &mut self,
        clauses: &[Clause],
        locals: &Locals,
        emit: &mut dyn FnMut(&mut Self, &Locals) -> Result<()>,
    ) -> Result<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            return emit(self, locals);
        };
        let items = self.eval(&clause.iter, locals)?.iterate()?;
        'items: for item in items {
            self.tick()?;
            let mut scope = locals.clone();
            bind(&clause.target, item, &mut scope)?;
            for condition in &clause.conditions {
                if !self.eval(condition, &scope)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(rest, &scope, emit)?;
        }
        Ok(())
    }
}

/// Displays and operators build new values. Comprehensions charge per
/// element as they go; calls return copies of what they were given.
fn allocates(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::List(_) | Expr::Tuple(_) | Expr::Set(_) | Expr::Dict(_) | Expr::Binary { .. }
    )
}

fn refused(what: &str) -> SandboxError {
    SandboxError::Rejected(format!("{} are not allowed", what))
}

fn check_attribute(attr: &str) -> Result<()> {
    if attr.starts_with('_') {
        return Err(SandboxError::Rejected(format!(
            "access to private attribute '{}'",
            attr
        )));
    }
    Ok(())
}

pub(crate) fn check_len(len: usize, limit: usize) -> Result<()> {
    if len > limit {
        return Err(SandboxError::Limit(format!(
            "collection of {} elements exceeds {}",
            len, limit
        )));
    }
    Ok(())
}

fn bind(target: &Target, value: Value, scope: &mut Locals) -> Result<()> {
    match target {
        Target::Name(name) => {
            scope.insert(name.clone(), value);
            Ok(())
        }
        Target::Tuple(targets) => {
            let items = value.iterate()?;
            if items.len() != targets.len() {
                return Err(SandboxError::InvalidValue(format!(
                    "expected {} values to unpack, got {}",
                    targets.len(),
                    items.len()
                )));
            }
            for (t, v) in targets.iter().zip(items) {
                bind(t, v, scope)?;
            }
            Ok(())
        }
    }
}

fn item(container: &Value, key: &Value) -> Result<Value> {
    match container {
        Value::List(items) | Value::Tuple(items) => {
            let index = sequence_index(key, items.len(), container.type_name())?;
            Ok(items[index].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let index = sequence_index(key, chars.len(), "str")?;
            Ok(Value::Str(chars[index].to_string()))
        }
        Value::Dict(pairs) => {
            key.require_hashable()?;
            dict_get(pairs, key)
                .cloned()
                .ok_or_else(|| SandboxError::Key(key.repr()))
        }
        other => Err(SandboxError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn sequence_index(key: &Value, len: usize, type_name: &str) -> Result<usize> {
    let i = key.as_int().ok_or_else(|| {
        SandboxError::Type(format!(
            "{} indices must be integers, not {}",
            type_name,
            key.type_name()
        ))
    })?;
    let len = len as i64;
    let normalized = if i < 0 { i + len } else { i };
    if (0..len).contains(&normalized) {
        Ok(normalized as usize)
    } else {
        Err(SandboxError::Index(format!("{} index out of range", type_name)))
    }
}

fn slice(
    container: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Value> {
    let pick = |len: usize| slice_indices(len, lower, upper, step);
    match container {
        Value::List(items) => Ok(Value::List(pick(items.len())?.into_iter().map(|i| items[i].clone()).collect())),
        Value::Tuple(items) => Ok(Value::Tuple(pick(items.len())?.into_iter().map(|i| items[i].clone()).collect())),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(pick(chars.len())?.into_iter().map(|i| chars[i]).collect()))
        }
        other => Err(SandboxError::Type(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

/// Indices selected by `[lower:upper:step]` over a sequence of `len`.
fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(SandboxError::InvalidValue(
            "slice step cannot be zero".to_string(),
        ));
    }
    let len = len as i64;
    let normalize = |v: i64, lo: i64, hi: i64| {
        let v = if v < 0 { v.saturating_add(len) } else { v };
        v.clamp(lo, hi)
    };
    let (start, stop) = if step > 0 {
        (
            lower.map_or(0, |v| normalize(v, 0, len)),
            upper.map_or(len, |v| normalize(v, 0, len)),
        )
    } else {
        (
            lower.map_or(len - 1, |v| normalize(v, -1, len - 1)),
            upper.map_or(-1, |v| normalize(v, -1, len - 1)),
        )
    };

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(out)
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg => match value.as_num() {
            Some(Num::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
            Some(Num::Float(f)) => Ok(Value::Float(-f)),
            None => Err(bad_operand("unary -", value)),
        },
        UnaryOp::Pos => match value.as_num() {
            Some(Num::Int(i)) => Ok(Value::Int(i)),
            Some(Num::Float(f)) => Ok(Value::Float(f)),
            None => Err(bad_operand("unary +", value)),
        },
        UnaryOp::Invert => match value.as_int() {
            Some(i) => Ok(Value::Int(!i)),
            None => Err(bad_operand("unary ~", value)),
        },
    }
}

fn bad_operand(op: &str, value: &Value) -> SandboxError {
    SandboxError::Type(format!(
        "bad operand type for {}: '{}'",
        op,
        value.type_name()
    ))
}

fn overflow() -> SandboxError {
    SandboxError::Limit("integer overflow".to_string())
}

fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::MatMul => "@",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::LShift => "<<",
        BinOp::RShift => ">>",
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> SandboxError {
    SandboxError::Type(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        symbol(op),
        left.type_name(),
        right.type_name()
    ))
}

pub(crate) fn binary(op: BinOp, left: &Value, right: &Value, limits: &SandboxConfig) -> Result<Value> {
    let limit = limits.max_collection_len;
    match (op, left, right) {
        (BinOp::MatMul, _, _) => Err(SandboxError::Rejected(
            "operator '@' is not allowed".to_string(),
        )),

        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len(), limit)?;
            Ok(Value::Str(format!("{}{}", a, b)))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            check_len(cells(a).saturating_add(cells(b)), limit)?;
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            check_len(cells(a).saturating_add(cells(b)), limit)?;
            Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }

        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let times = repeat_count(n, s.len(), limit)?;
            Ok(Value::Str(s.repeat(times)))
        }
        (BinOp::Mul, Value::List(v), n) | (BinOp::Mul, n, Value::List(v)) if n.as_int().is_some() => {
            let times = repeat_count(n, cells(v), limit)?;
            Ok(Value::List(repeat(v, times)))
        }
        (BinOp::Mul, Value::Tuple(v), n) | (BinOp::Mul, n, Value::Tuple(v)) if n.as_int().is_some() => {
            let times = repeat_count(n, cells(v), limit)?;
            Ok(Value::Tuple(repeat(v, times)))
        }

        (BinOp::Sub, Value::Set(a), Value::Set(b)) => Ok(Value::Set(
            a.iter().filter(|x| !contains(b, x)).cloned().collect(),
        )),
        (BinOp::BitAnd, Value::Set(a), Value::Set(b)) => Ok(Value::Set(
            a.iter().filter(|x| contains(b, x)).cloned().collect(),
        )),
        (BinOp::BitOr, Value::Set(a), Value::Set(b)) => {
            let mut out = a.clone();
            for x in b {
                set_insert(&mut out, x.clone());
            }
            Ok(Value::Set(out))
        }
        (BinOp::BitXor, Value::Set(a), Value::Set(b)) => Ok(Value::Set(
            a.iter()
                .filter(|x| !contains(b, x))
                .chain(b.iter().filter(|x| !contains(a, x)))
                .cloned()
                .collect(),
        )),

        (BinOp::BitAnd, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a & b)),
        (BinOp::BitOr, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a | b)),
        (BinOp::BitXor, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a ^ b)),

        _ => match (left.as_num(), right.as_num()) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => int_arith(op, a, b),
            (Some(a), Some(b)) => float_arith(op, a.as_f64(), b.as_f64())
                .ok_or_else(|| unsupported(op, left, right))?,
            _ => Err(unsupported(op, left, right)),
        },
    }
}

/// Repetition count for `seq * n`, where `unit` is the size of one copy of
/// the sequence. An empty sequence repeats zero times whatever `n` is.
fn repeat_count(n: &Value, unit: usize, limit: usize) -> Result<usize> {
    if unit == 0 {
        return Ok(0);
    }
    let times = usize::try_from(n.as_int().unwrap_or(0).max(0)).unwrap_or(usize::MAX);
    check_len(unit.saturating_mul(times), limit)?;
    Ok(times)
}

fn repeat(items: &[Value], times: usize) -> Vec<Value> {
    if items.is_empty() || times == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(items.len().saturating_mul(times));
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<Value> {
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(SandboxError::ZeroDivision);
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(SandboxError::ZeroDivision);
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(SandboxError::ZeroDivision);
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(SandboxError::ZeroDivision);
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::LShift => {
            if b < 0 {
                return Err(SandboxError::InvalidValue("negative shift count".to_string()));
            }
            if b >= 64 {
                return if a == 0 { Ok(Value::Int(0)) } else { Err(overflow()) };
            }
            let shifted = a << b;
            if shifted >> b != a {
                return Err(overflow());
            }
            shifted
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(SandboxError::InvalidValue("negative shift count".to_string()));
            }
            if b >= 64 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            }
        }
        BinOp::MatMul => {
            return Err(SandboxError::Rejected(
                "operator '@' is not allowed".to_string(),
            ))
        }
    };
    Ok(Value::Int(value))
}

/// Float arithmetic. `None` for operators that have no float meaning.
fn float_arith(op: BinOp, a: f64, b: f64) -> Option<Result<Value>> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Some(Err(SandboxError::ZeroDivision));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Some(Err(SandboxError::ZeroDivision));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Some(Err(SandboxError::ZeroDivision));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Some(Err(SandboxError::ZeroDivision));
            }
            a.powf(b)
        }
        BinOp::MatMul
        | BinOp::BitAnd
        | BinOp::BitOr
        | BinOp::BitXor
        | BinOp::LShift
        | BinOp::RShift => return None,
    };
    Some(Ok(Value::Float(value)))
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    let ordered = |test: fn(Ordering) -> bool| -> Result<bool> {
        if let (Value::Set(a), Value::Set(b)) = (left, right) {
            return Ok(set_order(a, b).is_some_and(test));
        }
        left.py_cmp(right).map(test)
    };
    match op {
        CmpOp::Eq => Ok(left.py_eq(right)),
        CmpOp::NotEq => Ok(!left.py_eq(right)),
        CmpOp::Lt => ordered(|o| o == Ordering::Less),
        CmpOp::LtE => ordered(|o| o != Ordering::Greater),
        CmpOp::Gt => ordered(|o| o == Ordering::Greater),
        CmpOp::GtE => ordered(|o| o != Ordering::Less),
        CmpOp::In => membership(right, left),
        CmpOp::NotIn => membership(right, left).map(|found| !found),
        CmpOp::Is => Ok(identical(left, right)),
        CmpOp::IsNot => Ok(!identical(left, right)),
    }
}

/// Subset ordering between two sets, `None` when neither contains the other.
fn set_order(a: &[Value], b: &[Value]) -> Option<Ordering> {
    let a_in_b = a.iter().all(|x| contains(b, x));
    let b_in_a = b.iter().all(|x| contains(a, x));
    match (a_in_b, b_in_a) {
        (true, true) => Some(Ordering::Equal),
        (true, false) => Some(Ordering::Less),
        (false, true) => Some(Ordering::Greater),
        (false, false) => None,
    }
}

/// `is` only has meaning for the singletons `None`, `True` and `False`.
fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => false,
    }
}

pub(crate) fn membership(container: &Value, needle: &Value) -> Result<bool> {
    match container {
        Value::Str(haystack) => match needle {
            Value::Str(sub) => Ok(haystack.contains(sub.as_str())),
            other => Err(SandboxError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => Ok(contains(items, needle)),
        Value::Dict(pairs) => Ok(dict_get(pairs, needle).is_some()),
        other => Err(SandboxError::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}
