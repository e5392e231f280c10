//! The fixed tables of callable built-ins and container methods.
//!
//! Anything not matched here is refused.

use std::cmp::Ordering;

use strand_core::config::SandboxConfig;

use super::ast::BinOp;
use super::eval::{binary, check_len, membership};
use super::value::{contains, dict_get, dict_insert, format_float, set_insert, Value};
use super::SandboxError;

type Result<T> = std::result::Result<T, SandboxError>;

const BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "float", "int", "len", "list", "max", "min",
    "range", "reversed", "round", "set", "sorted", "str", "sum", "tuple", "zip",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Evaluated arguments of one call.
pub(crate) struct Args {
    name: String,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    pub(crate) fn new(name: &str, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            name: name.to_string(),
            positional,
            keywords,
        }
    }

    fn arity(&self, min: usize, max: usize) -> Result<()> {
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("{}", min)
            } else {
                format!("{} to {}", min, max)
            };
            return Err(SandboxError::Type(format!(
                "{}() takes {} positional argument(s) but {} were given",
                self.name, expected, n
            )));
        }
        Ok(())
    }

    /// Remove and return a keyword argument.
    fn keyword(&mut self, key: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == key)?;
        Some(self.keywords.remove(index).1)
    }

    /// Positional argument `index`, falling back to keyword `key`.
    fn take(&mut self, index: usize, key: &str) -> Option<Value> {
        match self.positional.get(index) {
            Some(v) => Some(v.clone()),
            None => self.keyword(key),
        }
    }

    /// Fail if any keyword argument was not consumed.
    fn finish(&self) -> Result<()> {
        match self.keywords.first() {
            Some((key, _)) => Err(SandboxError::Type(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.name, key
            ))),
            None => Ok(()),
        }
    }

    fn first(&self) -> &Value {
        &self.positional[0]
    }
}

fn expect_int(value: &Value, what: &str) -> Result<i64> {
    value.as_int().ok_or_else(|| {
        SandboxError::Type(format!(
            "{} must be an integer, not '{}'",
            what,
            value.type_name()
        ))
    })
}

fn expect_str<'v>(value: &'v Value, what: &str) -> Result<&'v str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(SandboxError::Type(format!(
            "{} must be str, not '{}'",
            what,
            other.type_name()
        ))),
    }
}

pub(crate) fn call_builtin(mut args: Args, limits: &SandboxConfig) -> Result<Value> {
    let limit = limits.max_collection_len;
    let name = args.name.clone();
    let result = match name.as_str() {
        "len" => {
            args.arity(1, 1)?;
            Value::Int(args.first().len()? as i64)
        }
        "bool" => {
            args.arity(0, 1)?;
            Value::Bool(args.positional.first().is_some_and(Value::truthy))
        }
        "int" => {
            args.arity(0, 1)?;
            match args.positional.first() {
                None => Value::Int(0),
                Some(v) => to_int(v)?,
            }
        }
        "float" => {
            args.arity(0, 1)?;
            match args.positional.first() {
                None => Value::Float(0.0),
                Some(v) => to_float(v)?,
            }
        }
        "str" => {
            args.arity(0, 1)?;
            Value::Str(args.positional.first().map(Value::to_display).unwrap_or_default())
        }
        "list" => {
            args.arity(0, 1)?;
            Value::List(iterate_opt(args.positional.first())?)
        }
        "tuple" => {
            args.arity(0, 1)?;
            Value::Tuple(iterate_opt(args.positional.first())?)
        }
        "set" => {
            args.arity(0, 1)?;
            to_set(iterate_opt(args.positional.first())?)?
        }
        "dict" => {
            args.arity(0, 1)?;
            let mut pairs = match args.positional.first() {
                None => Vec::new(),
                Some(Value::Dict(d)) => d.clone(),
                Some(other) => pairs_from(other)?,
            };
            for (k, v) in args.keywords.drain(..) {
                dict_insert(&mut pairs, Value::Str(k), v);
            }
            Value::Dict(pairs)
        }
        "min" | "max" => {
            let default = args.keyword("default");
            let items = if args.positional.len() == 1 {
                args.first().iterate()?
            } else {
                args.positional.clone()
            };
            let want = if args.name == "min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            match extreme(items, want)? {
                Some(v) => v,
                None => default.ok_or_else(|| {
                    SandboxError::InvalidValue(format!("{}() arg is an empty sequence", args.name))
                })?,
            }
        }
        "sum" => {
            args.arity(1, 2)?;
            let start = args.take(1, "start").unwrap_or(Value::Int(0));
            if matches!(start, Value::Str(_)) {
                return Err(SandboxError::Type(
                    "sum() can't sum strings, use ''.join(seq) instead".to_string(),
                ));
            }
            let mut total = start;
            for item in args.first().iterate()? {
                total = binary(BinOp::Add, &total, &item, limits)?;
            }
            total
        }
        "abs" => {
            args.arity(1, 1)?;
            match args.first() {
                Value::Float(f) => Value::Float(f.abs()),
                other => Value::Int(
                    expect_int(other, "abs() argument")?
                        .checked_abs()
                        .ok_or_else(|| SandboxError::Limit("integer overflow".to_string()))?,
                ),
            }
        }
        "round" => {
            args.arity(1, 2)?;
            let ndigits = args.take(1, "ndigits").filter(|v| !matches!(v, Value::None));
            round(args.first(), ndigits.as_ref())?
        }
        "all" => {
            args.arity(1, 1)?;
            Value::Bool(args.first().iterate()?.iter().all(Value::truthy))
        }
        "any" => {
            args.arity(1, 1)?;
            Value::Bool(args.first().iterate()?.iter().any(Value::truthy))
        }
        "sorted" => {
            args.arity(1, 1)?;
            let reverse = args.keyword("reverse").is_some_and(|v| v.truthy());
            let mut items = args.first().iterate()?;
            sort(&mut items, reverse)?;
            Value::List(items)
        }
        "reversed" => {
            args.arity(1, 1)?;
            match args.first() {
                Value::Set(_) => {
                    return Err(SandboxError::Type("'set' object is not reversible".to_string()))
                }
                other => {
                    let mut items = other.iterate()?;
                    items.reverse();
                    Value::List(items)
                }
            }
        }
        "enumerate" => {
            args.arity(1, 2)?;
            let start = match args.take(1, "start") {
                Some(v) => expect_int(&v, "enumerate() start")?,
                None => 0,
            };
            let items = args.first().iterate()?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let index = start
                    .checked_add(i as i64)
                    .ok_or_else(|| SandboxError::Limit("integer overflow".to_string()))?;
                out.push(Value::Tuple(vec![Value::Int(index), item]));
            }
            Value::List(out)
        }
        "zip" => {
            let columns: Vec<Vec<Value>> = args
                .positional
                .iter()
                .map(Value::iterate)
                .collect::<Result<_>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Value::List(
                (0..rows)
                    .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            )
        }
        "range" => {
            let ints: Vec<i64> = args
                .positional
                .iter()
                .map(|v| expect_int(v, "range() argument"))
                .collect::<Result<_>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => {
                    args.arity(1, 3)?;
                    return Err(SandboxError::Type("range() expects 1 to 3 arguments".to_string()));
                }
            };
            range(start, stop, step, limit)?
        }
        other => {
            return Err(SandboxError::Rejected(format!(
                "call to '{}' is not allowed",
                other
            )))
        }
    };
    args.finish()?;
    Ok(result)
}

fn iterate_opt(value: Option<&Value>) -> Result<Vec<Value>> {
    value.map_or(Ok(Vec::new()), Value::iterate)
}

fn to_set(items: Vec<Value>) -> Result<Value> {
    let mut set = Vec::with_capacity(items.len());
    for item in items {
        item.require_hashable()?;
        set_insert(&mut set, item);
    }
    Ok(Value::Set(set))
}

fn pairs_from(value: &Value) -> Result<Vec<(Value, Value)>> {
    let mut pairs = Vec::new();
    for item in value.iterate()? {
        let kv = item.iterate()?;
        let [k, v] = <[Value; 2]>::try_from(kv).map_err(|kv| {
            SandboxError::InvalidValue(format!(
                "dictionary update sequence element has length {}; 2 is required",
                kv.len()
            ))
        })?;
        k.require_hashable()?;
        dict_insert(&mut pairs, k, v);
    }
    Ok(pairs)
}

fn to_int(value: &Value) -> Result<Value> {
    match value {
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(SandboxError::InvalidValue(format!(
                    "cannot convert float {} to integer",
                    format_float(*f)
                )));
            }
            let truncated = f.trunc();
            if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
                return Err(SandboxError::Limit("integer overflow".to_string()));
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| {
                SandboxError::InvalidValue(format!(
                    "invalid literal for int() with base 10: {}",
                    value.repr()
                ))
            }),
        other => other.as_int().map(Value::Int).ok_or_else(|| {
            SandboxError::Type(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn to_float(value: &Value) -> Result<Value> {
    match value {
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            SandboxError::InvalidValue(format!(
                "could not convert string to float: {}",
                value.repr()
            ))
        }),
        other => other
            .as_num()
            .map(|n| Value::Float(n.as_f64()))
            .ok_or_else(|| {
                SandboxError::Type(format!(
                    "float() argument must be a string or a number, not '{}'",
                    other.type_name()
                ))
            }),
    }
}

/// First element ordering `want` against all others.
fn extreme(items: Vec<Value>, want: Ordering) -> Result<Option<Value>> {
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) => {
                if item.py_cmp(&current)? == want {
                    Some(item)
                } else {
                    Some(current)
                }
            }
        };
    }
    Ok(best)
}

fn sort(items: &mut [Value], reverse: bool) -> Result<()> {
    let mut error = None;
    items.sort_by(|a, b| {
        let ordering = if reverse { b.py_cmp(a) } else { a.py_cmp(b) };
        ordering.unwrap_or_else(|e| {
            error.get_or_insert(e);
            Ordering::Equal
        })
    });
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Round half to even, matching the language's `round()`.
fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

fn round(value: &Value, ndigits: Option<&Value>) -> Result<Value> {
    match (value, ndigits) {
        (Value::Float(f), None) => to_int(&Value::Float(round_half_even(*f))),
        (Value::Float(f), Some(n)) => {
            let n = expect_int(n, "ndigits")?.clamp(-308, 308) as i32;
            let factor = 10f64.powi(n);
            Ok(Value::Float(round_half_even(f * factor) / factor))
        }
        (other, _) => Ok(Value::Int(expect_int(other, "round() argument")?)),
    }
}

fn range(start: i64, stop: i64, step: i64, limit: usize) -> Result<Value> {
    if step == 0 {
        return Err(SandboxError::InvalidValue(
            "range() arg 3 must not be zero".to_string(),
        ));
    }
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let count = if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    };
    check_len(usize::try_from(count).unwrap_or(usize::MAX), limit)?;
    Ok(Value::List(
        (0..count)
            .map(|i| Value::Int((start + i * step) as i64))
            .collect(),
    ))
}

pub(crate) fn call_method(receiver: &Value, mut args: Args, limits: &SandboxConfig) -> Result<Value> {
    let result = match receiver {
        Value::Str(s) => str_method(s, &mut args, limits)?,
        Value::List(items) | Value::Tuple(items) => sequence_method(receiver, items, &mut args)?,
        Value::Dict(pairs) => dict_method(pairs, &mut args)?,
        Value::Set(items) => set_method(items, &mut args)?,
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) => None,
    };
    match result {
        Some(value) => {
            args.finish()?;
            Ok(value)
        }
        None => Err(SandboxError::Rejected(format!(
            "method '{}' is not allowed on '{}'",
            args.name,
            receiver.type_name()
        ))),
    }
}

fn str_method(s: &str, args: &mut Args, limits: &SandboxConfig) -> Result<Option<Value>> {
    let name = args.name.clone();
    let value = match name.as_str() {
        "lower" => {
            args.arity(0, 0)?;
            Value::Str(s.to_lowercase())
        }
        "upper" => {
            args.arity(0, 0)?;
            Value::Str(s.to_uppercase())
        }
        "strip" | "lstrip" | "rstrip" => {
            args.arity(0, 1)?;
            let chars = match args.take(0, "chars") {
                None | Some(Value::None) => None,
                Some(v) => Some(expect_str(&v, "strip chars")?.to_string()),
            };
            let matches = |c: char| match chars {
                Some(ref set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let out = match name.as_str() {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Value::Str(out.to_string())
        }
        "split" => {
            args.arity(0, 2)?;
            let sep = args.take(0, "sep").filter(|v| !matches!(v, Value::None));
            let maxsplit = match args.take(1, "maxsplit") {
                Some(v) => expect_int(&v, "maxsplit")?,
                None => -1,
            };
            let parts = match sep {
                Some(sep) => split_on(s, expect_str(&sep, "separator")?, maxsplit)?,
                None => split_whitespace(s, maxsplit),
            };
            check_len(parts.len(), limits.max_collection_len)?;
            Value::List(parts.into_iter().map(Value::Str).collect())
        }
        "join" => {
            args.arity(1, 1)?;
            let parts = args
                .first()
                .iterate()?
                .iter()
                .map(|v| expect_str(v, "sequence item").map(str::to_string))
                .collect::<Result<Vec<_>>>()?;
            let joined = parts.join(s);
            check_len(joined.len(), limits.max_collection_len)?;
            Value::Str(joined)
        }
        "startswith" | "endswith" => {
            args.arity(1, 1)?;
            let candidates = match args.first() {
                Value::Tuple(items) => items.clone(),
                other => vec![other.clone()],
            };
            let mut found = false;
            for candidate in &candidates {
                let affix = expect_str(candidate, "prefix")?;
                found |= if args.name == "startswith" {
                    s.starts_with(affix)
                } else {
                    s.ends_with(affix)
                };
            }
            Value::Bool(found)
        }
        "replace" => {
            args.arity(2, 3)?;
            let old = expect_str(&args.positional[0], "old")?.to_string();
            let new = expect_str(&args.positional[1], "new")?.to_string();
            let count = match args.take(2, "count") {
                Some(v) => expect_int(&v, "count")?,
                None => -1,
            };
            let occurrences = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(old.as_str()).count()
            };
            let replaced = if count < 0 { occurrences } else { occurrences.min(count as usize) };
            let grown = new.len().saturating_sub(old.len()).saturating_mul(replaced);
            check_len(s.len().saturating_add(grown), limits.max_collection_len)?;
            Value::Str(if count < 0 {
                s.replace(old.as_str(), &new)
            } else {
                s.replacen(old.as_str(), &new, count as usize)
            })
        }
        "find" => {
            args.arity(1, 1)?;
            let sub = expect_str(args.first(), "substring")?;
            Value::Int(
                s.find(sub)
                    .map_or(-1, |byte| s[..byte].chars().count() as i64),
            )
        }
        "count" => {
            args.arity(1, 1)?;
            let sub = expect_str(args.first(), "substring")?;
            let n = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub).count()
            };
            Value::Int(n as i64)
        }
        "title" => {
            args.arity(0, 0)?;
            let mut out = String::with_capacity(s.len());
            let mut in_word = false;
            for c in s.chars() {
                if c.is_alphabetic() {
                    if in_word {
                        out.extend(c.to_lowercase());
                    } else {
                        out.extend(c.to_uppercase());
                    }
                    in_word = true;
                } else {
                    out.push(c);
                    in_word = false;
                }
            }
            Value::Str(out)
        }
        "capitalize" => {
            args.arity(0, 0)?;
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            Value::Str(out)
        }
        "isdigit" | "isalpha" | "isalnum" | "isspace" => {
            args.arity(0, 0)?;
            let test: fn(char) -> bool = match name.as_str() {
                "isdigit" => |c| c.is_numeric(),
                "isalpha" => |c| c.is_alphabetic(),
                "isalnum" => |c| c.is_alphanumeric(),
                _ => |c| c.is_whitespace(),
            };
            Value::Bool(!s.is_empty() && s.chars().all(test))
        }
        "islower" | "isupper" => {
            args.arity(0, 0)?;
            let lower = args.name == "islower";
            let cased = s.chars().any(|c| c.is_lowercase() || c.is_uppercase());
            let consistent = s
                .chars()
                .all(|c| if lower { !c.is_uppercase() } else { !c.is_lowercase() });
            Value::Bool(cased && consistent)
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn split_on(s: &str, sep: &str, maxsplit: i64) -> Result<Vec<String>> {
    if sep.is_empty() {
        return Err(SandboxError::InvalidValue("empty separator".to_string()));
    }
    Ok(if maxsplit < 0 {
        s.split(sep).map(str::to_string).collect()
    } else {
        s.splitn(maxsplit as usize + 1, sep)
            .map(str::to_string)
            .collect()
    })
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest.to_string());
                break;
            }
        }
    }
    parts
}

fn sequence_method(receiver: &Value, items: &[Value], args: &mut Args) -> Result<Option<Value>> {
    let name = args.name.clone();
    let value = match name.as_str() {
        "index" => {
            args.arity(1, 1)?;
            let needle = args.first();
            match items.iter().position(|v| v.py_eq(needle)) {
                Some(i) => Value::Int(i as i64),
                None => {
                    return Err(SandboxError::InvalidValue(format!(
                        "{} is not in {}",
                        needle.repr(),
                        receiver.type_name()
                    )))
                }
            }
        }
        "count" => {
            args.arity(1, 1)?;
            let needle = args.first();
            Value::Int(items.iter().filter(|v| v.py_eq(needle)).count() as i64)
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn dict_method(pairs: &[(Value, Value)], args: &mut Args) -> Result<Option<Value>> {
    let name = args.name.clone();
    let value = match name.as_str() {
        "get" => {
            args.arity(1, 2)?;
            let key = args.first();
            key.require_hashable()?;
            match dict_get(pairs, key) {
                Some(v) => v.clone(),
                None => args.positional.get(1).cloned().unwrap_or(Value::None),
            }
        }
        "keys" => {
            args.arity(0, 0)?;
            Value::List(pairs.iter().map(|(k, _)| k.clone()).collect())
        }
        "values" => {
            args.arity(0, 0)?;
            Value::List(pairs.iter().map(|(_, v)| v.clone()).collect())
        }
        "items" => {
            args.arity(0, 0)?;
            Value::List(
                pairs
                    .iter()
                    .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            )
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn set_method(items: &[Value], args: &mut Args) -> Result<Option<Value>> {
    let name = args.name.clone();
    let others = |args: &Args| -> Result<Vec<Vec<Value>>> {
        args.positional.iter().map(Value::iterate).collect()
    };
    let value = match name.as_str() {
        "union" => {
            let mut out = items.to_vec();
            for other in others(args)? {
                for item in other {
                    item.require_hashable()?;
                    set_insert(&mut out, item);
                }
            }
            Value::Set(out)
        }
        "intersection" => {
            let others = others(args)?;
            Value::Set(
                items
                    .iter()
                    .filter(|x| others.iter().all(|o| contains(o, x)))
                    .cloned()
                    .collect(),
            )
        }
        "difference" => {
            let others = others(args)?;
            Value::Set(
                items
                    .iter()
                    .filter(|x| !others.iter().any(|o| contains(o, x)))
                    .cloned()
                    .collect(),
            )
        }
        "issubset" | "issuperset" => {
            args.arity(1, 1)?;
            let other = args.first().iterate()?;
            let subset = args.name == "issubset";
            Value::Bool(if subset {
                items.iter().all(|x| contains(&other, x))
            } else {
                other.iter().all(|x| contains(items, x))
            })
        }
        "isdisjoint" => {
            args.arity(1, 1)?;
            let other = args.first();
            let mut disjoint = true;
            for x in items {
                disjoint &= !membership(other, x)?;
            }
            Value::Bool(disjoint)
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::super::{Context, Sandbox};
    use super::*;

    fn ok(src: &str) -> Value {
        Sandbox::default()
            .evaluate(src, &Context::new())
            .unwrap_or_else(|e| panic!("{}: {}", src, e))
    }

    fn err(src: &str) -> SandboxError {
        Sandbox::default()
            .evaluate(src, &Context::new())
            .expect_err(src)
    }

    #[test]
    fn test_conversions() {
        assert_eq!(ok("int('42')"), Value::Int(42));
        assert_eq!(ok("int(3.9)"), Value::Int(3));
        assert_eq!(ok("int(-3.9)"), Value::Int(-3));
        assert_eq!(ok("float('2.5')"), Value::Float(2.5));
        assert_eq!(ok("str(1.0)"), Value::Str("1.0".into()));
        assert_eq!(ok("str(None)"), Value::Str("None".into()));
        assert_eq!(ok("bool([])"), Value::Bool(false));
        assert_eq!(ok("list('ab')"), ok("['a', 'b']"));
        assert_eq!(ok("dict([('a', 1)], b=2)"), ok("{'a': 1, 'b': 2}"));
        assert!(matches!(err("int('x')"), SandboxError::InvalidValue(_)));
        assert!(matches!(err("int([])"), SandboxError::Type(_)));
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(ok("len({'a': 1, 'b': 2})"), Value::Int(2));
        assert_eq!(ok("min([3, 1, 2])"), Value::Int(1));
        assert_eq!(ok("max(3, 7, 5)"), Value::Int(7));
        assert_eq!(ok("max([], default=0)"), Value::Int(0));
        assert_eq!(ok("sum([1, 2.5])"), Value::Float(3.5));
        assert_eq!(ok("sum([1, 2], 10)"), Value::Int(13));
        assert_eq!(ok("abs(-4)"), Value::Int(4));
        assert_eq!(ok("all([1, True])"), Value::Bool(true));
        assert_eq!(ok("any([0, ''])"), Value::Bool(false));
        assert!(matches!(err("min([])"), SandboxError::InvalidValue(_)));
        assert!(matches!(err("sum(['a'], '')"), SandboxError::Type(_)));
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(ok("round(2.5)"), Value::Int(2));
        assert_eq!(ok("round(3.5)"), Value::Int(4));
        assert_eq!(ok("round(-0.5)"), Value::Int(0));
        assert_eq!(ok("round(1.234, 2)"), Value::Float(1.23));
        assert_eq!(ok("round(7)"), Value::Int(7));
    }

    #[test]
    fn test_sequences() {
        assert_eq!(ok("sorted([3, 1, 2])"), ok("[1, 2, 3]"));
        assert_eq!(ok("sorted('cab', reverse=True)"), ok("['c', 'b', 'a']"));
        assert_eq!(ok("reversed((1, 2))"), ok("[2, 1]"));
        assert_eq!(ok("enumerate(['a'], 1)"), ok("[(1, 'a')]"));
        assert_eq!(ok("zip([1, 2, 3], 'ab')"), ok("[(1, 'a'), (2, 'b')]"));
        assert_eq!(ok("range(2, 10, 3)"), ok("[2, 5, 8]"));
        assert_eq!(ok("range(3, 0, -1)"), ok("[3, 2, 1]"));
        assert!(matches!(err("sorted([1, 'a'])"), SandboxError::Type(_)));
        assert!(matches!(err("range(100000)"), SandboxError::Limit(_)));
        assert!(matches!(err("range(1, 2, 0)"), SandboxError::InvalidValue(_)));
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(ok("'  Hi  '.strip().lower()"), Value::Str("hi".into()));
        assert_eq!(ok("'xxhixx'.strip('x')"), Value::Str("hi".into()));
        assert_eq!(ok("'a,b,,c'.split(',')"), ok("['a', 'b', '', 'c']"));
        assert_eq!(ok("' a  b c '.split()"), ok("['a', 'b', 'c']"));
        assert_eq!(ok("'a b c'.split(None, 1)"), ok("['a', 'b c']"));
        assert_eq!(ok("'-'.join(['a', 'b'])"), Value::Str("a-b".into()));
        assert_eq!(ok("'report.pdf'.endswith(('.doc', '.pdf'))"), Value::Bool(true));
        assert_eq!(ok("'aaa'.replace('a', 'b', 2)"), Value::Str("bba".into()));
        assert_eq!(ok("'héllo'.find('l')"), Value::Int(2));
        assert_eq!(ok("'hello world'.title()"), Value::Str("Hello World".into()));
        assert_eq!(ok("'hELLO'.capitalize()"), Value::Str("Hello".into()));
        assert_eq!(ok("'123'.isdigit()"), Value::Bool(true));
        assert_eq!(ok("''.isdigit()"), Value::Bool(false));
        assert!(matches!(err("'a'.format(1)"), SandboxError::Rejected(_)));
        assert!(matches!(err("'a'.upper(1)"), SandboxError::Type(_)));
    }

    #[test]
    fn test_container_methods() {
        assert_eq!(ok("{'a': 1}.get('a')"), Value::Int(1));
        assert_eq!(ok("{'a': 1}.get('b', 5)"), Value::Int(5));
        assert_eq!(ok("{'a': 1}.get('b')"), Value::None);
        assert_eq!(ok("{'a': 1}.items()"), ok("[('a', 1)]"));
        assert_eq!(ok("[1, 2, 2].count(2)"), Value::Int(2));
        assert_eq!(ok("(5, 6).index(6)"), Value::Int(1));
        assert_eq!(ok("{1, 2}.union([3])"), ok("{1, 2, 3}"));
        assert_eq!(ok("{1, 2}.intersection({2, 3})"), ok("{2}"));
        assert_eq!(ok("{1, 2}.difference({2})"), ok("{1}"));
        assert_eq!(ok("{1}.issubset([1, 2])"), Value::Bool(true));
        assert!(matches!(err("[1].pop()"), SandboxError::Rejected(_)));
        assert!(matches!(err("{'a': 1}.update({})"), SandboxError::Rejected(_)));
        assert!(matches!(err("(1).bit_length()"), SandboxError::Rejected(_)));
        assert!(matches!(err("[1].index(9)"), SandboxError::InvalidValue(_)));
    }

    #[test]
    fn test_unexpected_keyword() {
        assert!(matches!(err("len([1], x=1)"), SandboxError::Type(_)));
    }
}
