//! Tree-walking evaluator and built-in functions.

use super::parser::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::{ExpressionError, MAX_STEPS, MAX_VALUE_BYTES};
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

const BUILTINS: &[&str] = &[
    "abs",
    "bool",
    "ceil",
    "contains",
    "endsWith",
    "every",
    "filter",
    "find",
    "floor",
    "isNull",
    "join",
    "keys",
    "len",
    "lower",
    "map",
    "max",
    "merge",
    "min",
    "number",
    "reduce",
    "round",
    "some",
    "split",
    "startsWith",
    "string",
    "sum",
    "trim",
    "upper",
    "values",
];

/// Size charged for every value node on top of its string contents.
const NODE_BYTES: usize = std::mem::size_of::<Value>();

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Converts a computed number into a JSON value, preferring integers.
pub(crate) fn number_value(n: f64) -> Result<Value, ExpressionError> {
    if !n.is_finite() {
        return Err(ExpressionError::NonFiniteNumber);
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Ok(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or(ExpressionError::NonFiniteNumber)
}

/// JavaScript-style truthiness.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Equality that treats `1` and `1.0` as equal, recursively.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| loose_eq(value, other)))
        }
        _ => a == b,
    }
}

/// Renders a value as text: strings verbatim, everything else as JSON.
pub(crate) fn stringify(value: &Value) -> String {
    text(value).into_owned()
}

fn text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

/// Approximate in-memory size of a value, or `None` once it passes `limit`.
fn footprint(value: &Value, limit: usize) -> Option<usize> {
    let mut total = 0usize;
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        total += NODE_BYTES;
        match value {
            Value::String(s) => total += s.len(),
            Value::Array(items) => pending.extend(items),
            Value::Object(map) => {
                for (key, value) in map {
                    total += key.len();
                    pending.push(value);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
        if total > limit {
            return None;
        }
    }
    Some(total)
}

fn too_large() -> ExpressionError {
    ExpressionError::ValueTooLarge {
        limit: MAX_VALUE_BYTES,
    }
}

/// Deducts the size of `value` from the remaining budget.
fn charge(remaining: &mut usize, value: &Value) -> Result<(), ExpressionError> {
    let used = footprint(value, *remaining).ok_or_else(too_large)?;
    *remaining -= used;
    Ok(())
}

/// Fails if a collection holding `values` would exceed the value budget.
fn ensure_fits<'v>(values: impl IntoIterator<Item = &'v Value>) -> Result<(), ExpressionError> {
    let mut remaining = MAX_VALUE_BYTES - NODE_BYTES;
    for value in values {
        charge(&mut remaining, value)?;
    }
    Ok(())
}

/// Fails if a string of `len` bytes would exceed the value budget.
fn ensure_text_fits(len: usize) -> Result<(), ExpressionError> {
    if len.saturating_add(NODE_BYTES) > MAX_VALUE_BYTES {
        return Err(too_large());
    }
    Ok(())
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) struct Evaluator<'a> {
    input: &'a Value,
    frames: Vec<Vec<(String, Value)>>,
    steps: u64,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(input: &'a Value) -> Self {
        Self {
            input,
            frames: Vec::new(),
            steps: 0,
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, ExpressionError> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(ExpressionError::BudgetExceeded { limit: MAX_STEPS });
        }

        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self.lookup(name),
            Expr::Member { object, property } => {
                let object = self.eval(object)?;
                Ok(member(&object, property))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                index_value(&object, &index)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&operand))),
                    UnaryOp::Neg => number_value(-as_number(&operand, "-")?),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match (op, truthy(&left)) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let test = self.eval(test)?;
                if truthy(&test) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Array(items) => {
                let mut remaining = MAX_VALUE_BYTES - NODE_BYTES;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.eval(item)?;
                    charge(&mut remaining, &value)?;
                    values.push(value);
                }
                Ok(Value::Array(values))
            }
            Expr::Object(entries) => {
                let mut remaining = MAX_VALUE_BYTES - NODE_BYTES;
                let mut map = Map::new();
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    charge(&mut remaining, &value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Call { function, args } => self.call(function, args),
            Expr::Lambda { .. } => Err(type_error(
                "a lambda can only be passed to map, filter, find, some, every or reduce",
            )),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ExpressionError> {
        for frame in self.frames.iter().rev() {
            if let Some((_, value)) = frame.iter().find(|(param, _)| param == name) {
                return Ok(value.clone());
            }
        }
        if name == "input" {
            return Ok(self.input.clone());
        }
        Err(ExpressionError::UnknownIdentifier {
            name: name.to_string(),
        })
    }

    fn apply(&mut self, lambda: &Expr, args: Vec<Value>) -> Result<Value, ExpressionError> {
        let Expr::Lambda { params, body } = lambda else {
            return Err(type_error("expected a lambda such as `x => x.value`"));
        };
        let mut args = args.into_iter();
        let frame = params
            .iter()
            .map(|param| (param.clone(), args.next().unwrap_or(Value::Null)))
            .collect();
        self.frames.push(frame);
        let result = self.eval(body);
        self.frames.pop();
        result
    }

    fn call(&mut self, function: &str, args: &[Expr]) -> Result<Value, ExpressionError> {
        match function {
            "map" | "filter" | "find" | "some" | "every" => {
                arity(function, args, 2, 2)?;
                let items = self.eval_array(function, &args[0])?;
                self.iterate(function, items, &args[1])
            }
            "reduce" => {
                arity(function, args, 3, 3)?;
                let items = self.eval_array(function, &args[0])?;
                let mut acc = self.eval(&args[2])?;
                for (index, item) in items.into_iter().enumerate() {
                    acc = self.apply(&args[1], vec![acc, item, Value::from(index)])?;
                    ensure_fits([&acc])?;
                }
                Ok(acc)
            }
            _ => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                builtin(function, &values)
            }
        }
    }

    fn eval_array(&mut self, function: &str, expr: &Expr) -> Result<Vec<Value>, ExpressionError> {
        match self.eval(expr)? {
            Value::Array(items) => Ok(items),
            other => Err(type_error(format!(
                "{function} expects an array, got {}",
                type_name(&other)
            ))),
        }
    }

    fn iterate(
        &mut self,
        function: &str,
        items: Vec<Value>,
        lambda: &Expr,
    ) -> Result<Value, ExpressionError> {
        let mut mapped = Vec::new();
        let mut remaining = MAX_VALUE_BYTES - NODE_BYTES;
        for (index, item) in items.into_iter().enumerate() {
            let result = self.apply(lambda, vec![item.clone(), Value::from(index)])?;
            match function {
                "map" => {
                    charge(&mut remaining, &result)?;
                    mapped.push(result);
                }
                "filter" if truthy(&result) => mapped.push(item),
                "find" if truthy(&result) => return Ok(item),
                "some" if truthy(&result) => return Ok(Value::Bool(true)),
                "every" if !truthy(&result) => return Ok(Value::Bool(false)),
                _ => {}
            }
        }
        Ok(match function {
            "find" => Value::Null,
            "some" => Value::Bool(false),
            "every" => Value::Bool(true),
            _ => Value::Array(mapped),
        })
    }
}

fn type_error(message: impl Into<String>) -> ExpressionError {
    ExpressionError::Type {
        message: message.into(),
    }
}

fn arity<T>(function: &str, args: &[T], min: usize, max: usize) -> Result<(), ExpressionError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else if max == usize::MAX {
        format!("at least {min}")
    } else {
        format!("{min} to {max}")
    };
    Err(ExpressionError::Arity {
        function: function.to_string(),
        expected,
        found: args.len(),
    })
}

fn as_number(value: &Value, context: &str) -> Result<f64, ExpressionError> {
    value
        .as_f64()
        .ok_or_else(|| type_error(format!("{context} expects a number, got {}", type_name(value))))
}

fn as_str<'v>(value: &'v Value, context: &str) -> Result<&'v str, ExpressionError> {
    value
        .as_str()
        .ok_or_else(|| type_error(format!("{context} expects a string, got {}", type_name(value))))
}

fn member(object: &Value, property: &str) -> Value {
    match object {
        Value::Object(map) => map.get(property).cloned().unwrap_or(Value::Null),
        Value::Array(items) if property == "length" => Value::from(items.len()),
        Value::Array(items) => property
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index).cloned())
            .unwrap_or(Value::Null),
        Value::String(s) if property == "length" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, ExpressionError> {
    match (object, index) {
        (Value::Array(items), Value::Number(n)) => {
            let position = n.as_f64().unwrap_or(-1.0);
            if position < 0.0 || position.fract() != 0.0 {
                return Ok(Value::Null);
            }
            let position = position as usize;
            Ok(items.get(position).cloned().unwrap_or(Value::Null))
        }
        (Value::String(s), Value::Number(n)) => Ok(n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| s.chars().nth(i))
            .map_or(Value::Null, |c| Value::String(c.to_string()))),
        (_, Value::String(key)) => Ok(member(object, key)),
        (Value::Null, _) => Ok(Value::Null),
        (object, index) => Err(type_error(format!(
            "cannot index {} with {}",
            type_name(object),
            type_name(index)
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = compare(left, right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::LtEq => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (left, right) {
            (Value::Number(_), Value::Number(_)) => {
                number_value(as_number(left, "+")? + as_number(right, "+")?)
            }
            (Value::String(_), _) | (_, Value::String(_)) => {
                let (left, right) = (text(left), text(right));
                ensure_text_fits(left.len() + right.len())?;
                let mut joined = String::with_capacity(left.len() + right.len());
                joined.push_str(&left);
                joined.push_str(&right);
                Ok(Value::String(joined))
            }
            (Value::Array(a), Value::Array(b)) => {
                ensure_fits(a.iter().chain(b))?;
                Ok(Value::Array(a.iter().chain(b).cloned().collect()))
            }
            _ => Err(type_error(format!(
                "cannot add {} and {}",
                type_name(left),
                type_name(right)
            ))),
        },
        BinaryOp::Sub => number_value(as_number(left, "-")? - as_number(right, "-")?),
        BinaryOp::Mul => number_value(as_number(left, "*")? * as_number(right, "*")?),
        BinaryOp::Div | BinaryOp::Rem => {
            let symbol = if op == BinaryOp::Div { "/" } else { "%" };
            let divisor = as_number(right, symbol)?;
            if divisor == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            let dividend = as_number(left, symbol)?;
            if op == BinaryOp::Div {
                number_value(dividend / divisor)
            } else {
                number_value(dividend % divisor)
            }
        }
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let (a, b) = (as_number(left, "comparison")?, as_number(right, "comparison")?);
            a.partial_cmp(&b)
                .ok_or_else(|| type_error("cannot compare NaN"))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(type_error(format!(
            "cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn numbers(function: &str, values: &[Value]) -> Result<Vec<f64>, ExpressionError> {
    // A single array argument is spread, so both `max(xs)` and `max(a, b)` work.
    let values = match values {
        [Value::Array(items)] => items.as_slice(),
        other => other,
    };
    values.iter().map(|value| as_number(value, function)).collect()
}

fn builtin(function: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match function {
        "len" => {
            arity(function, args, 1, 1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => Err(type_error(format!("len expects a string, array or object, got {}", type_name(other)))),
            }
        }
        "keys" | "values" => {
            arity(function, args, 1, 1)?;
            let Value::Object(map) = &args[0] else {
                return Err(type_error(format!(
                    "{function} expects an object, got {}",
                    type_name(&args[0])
                )));
            };
            Ok(Value::Array(if function == "keys" {
                map.keys().cloned().map(Value::String).collect()
            } else {
                map.values().cloned().collect()
            }))
        }
        "contains" => {
            arity(function, args, 2, 2)?;
            match (&args[0], &args[1]) {
                (Value::String(haystack), Value::String(needle)) => {
                    Ok(Value::Bool(haystack.contains(needle.as_str())))
                }
                (Value::Array(items), needle) => {
                    Ok(Value::Bool(items.iter().any(|item| loose_eq(item, needle))))
                }
                (Value::Object(map), Value::String(key)) => Ok(Value::Bool(map.contains_key(key))),
                (Value::Null, _) => Ok(Value::Bool(false)),
                (haystack, _) => Err(type_error(format!(
                    "contains expects a string, array or object, got {}",
                    type_name(haystack)
                ))),
            }
        }
        "startsWith" | "endsWith" => {
            arity(function, args, 2, 2)?;
            let s = as_str(&args[0], function)?;
            let affix = as_str(&args[1], function)?;
            Ok(Value::Bool(if function == "startsWith" {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            }))
        }
        "lower" => {
            arity(function, args, 1, 1)?;
            Ok(Value::String(as_str(&args[0], function)?.to_lowercase()))
        }
        "upper" => {
            arity(function, args, 1, 1)?;
            Ok(Value::String(as_str(&args[0], function)?.to_uppercase()))
        }
        "trim" => {
            arity(function, args, 1, 1)?;
            Ok(Value::String(as_str(&args[0], function)?.trim().to_string()))
        }
        "split" => {
            arity(function, args, 2, 2)?;
            let s = as_str(&args[0], function)?;
            let separator = as_str(&args[1], function)?;
            let parts = if separator.is_empty() {
                s.chars().count() + 2
            } else {
                s.matches(separator).count() + 1
            };
            ensure_text_fits(s.len().saturating_add(parts.saturating_mul(NODE_BYTES)))?;
            Ok(Value::Array(
                s.split(separator)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        "join" => {
            arity(function, args, 1, 2)?;
            let Value::Array(items) = &args[0] else {
                return Err(type_error(format!(
                    "join expects an array, got {}",
                    type_name(&args[0])
                )));
            };
            let separator = match args.get(1) {
                Some(separator) => as_str(separator, function)?,
                None => ",",
            };
            let parts: Vec<Cow<'_, str>> = items.iter().map(text).collect();
            let len = parts.iter().map(|part| part.len()).sum::<usize>()
                + separator.len() * parts.len().saturating_sub(1);
            ensure_text_fits(len)?;
            Ok(Value::String(parts.join(separator)))
        }
        "number" => {
            arity(function, args, 1, 1)?;
            match &args[0] {
                Value::Number(_) => Ok(args[0].clone()),
                Value::Bool(b) => Ok(Value::from(u8::from(*b))),
                Value::String(s) => {
                    let parsed = s.trim().parse::<f64>().map_err(|_| {
                        type_error(format!("cannot convert \"{s}\" to a number"))
                    })?;
                    number_value(parsed)
                }
                other => Err(type_error(format!(
                    "cannot convert {} to a number",
                    type_name(other)
                ))),
            }
        }
        "string" => {
            arity(function, args, 1, 1)?;
            Ok(Value::String(stringify(&args[0])))
        }
        "bool" => {
            arity(function, args, 1, 1)?;
            Ok(Value::Bool(truthy(&args[0])))
        }
        "isNull" => {
            arity(function, args, 1, 1)?;
            Ok(Value::Bool(args[0].is_null()))
        }
        "sum" => {
            arity(function, args, 1, usize::MAX)?;
            number_value(numbers(function, args)?.into_iter().sum())
        }
        "min" | "max" => {
            arity(function, args, 1, usize::MAX)?;
            let values = numbers(function, args)?;
            let picked = values.into_iter().reduce(|a, b| {
                if function == "min" { a.min(b) } else { a.max(b) }
            });
            picked.map_or(Ok(Value::Null), number_value)
        }
        "abs" | "round" | "floor" | "ceil" => {
            arity(function, args, 1, 1)?;
            let n = as_number(&args[0], function)?;
            number_value(match function {
                "abs" => n.abs(),
                "round" => n.round(),
                "floor" => n.floor(),
                _ => n.ceil(),
            })
        }
        "merge" => {
            arity(function, args, 1, usize::MAX)?;
            let mut merged = Map::new();
            for arg in args {
                match arg {
                    Value::Object(map) => {
                        merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    Value::Null => {}
                    other => {
                        return Err(type_error(format!(
                            "merge expects objects, got {}",
                            type_name(other)
                        )));
                    }
                }
            }
            ensure_fits(merged.values())?;
            Ok(Value::Object(merged))
        }
        other => Err(ExpressionError::UnknownFunction {
            name: other.to_string(),
        }),
    }
}
