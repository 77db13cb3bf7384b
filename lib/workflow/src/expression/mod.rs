//! Sandboxed expression language for condition and transform nodes.
//!
//! Expressions are parsed into an AST and interpreted over `serde_json`
//! values. Nothing outside the expression is reachable: the only free
//! variable is `input`, and calls are limited to a fixed set of built-in
//! functions.
//!
//! Supported syntax:
//! - literals: numbers, `'single'` or `"double"` quoted strings, `true`,
//!   `false`, `null`, arrays `[a, b]` and objects `{ key: value }`
//! - member access `input.user.name`, indexing `input.items[0]`
//! - arithmetic `+ - * / %`, comparison `< <= > >=`, equality `== !=`
//!   (`===` and `!==` are accepted as aliases)
//! - logic `&& || !` and the conditional `test ? a : b`
//! - lambdas `x => ...` and `(acc, x) => ...` as arguments to `map`,
//!   `filter`, `find`, `some`, `every` and `reduce`
//!
//! Member access on a missing key or on `null` yields `null`.

mod eval;
mod lexer;
mod parser;

use serde_json::Value;
use std::fmt;

/// Longest accepted expression source, in bytes.
pub const MAX_SOURCE_LEN: usize = 4096;

/// Deepest accepted nesting of the syntax tree.
pub const MAX_DEPTH: usize = 64;

/// Deepest accepted height of the syntax tree, counting every operand of an
/// operator chain such as `a + b + c`.
pub const MAX_HEIGHT: usize = 256;

/// Evaluation steps allowed for a single evaluation.
pub const MAX_STEPS: u64 = 100_000;

/// Largest value an evaluation may build, as an approximate in-memory size
/// in bytes.
pub const MAX_VALUE_BYTES: usize = 16 * 1024 * 1024;

/// Errors from parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// The source exceeds [`MAX_SOURCE_LEN`].
    TooLong { len: usize, max: usize },
    /// The source is not a valid expression.
    Syntax { position: usize, message: String },
    /// The expression nests deeper than [`MAX_DEPTH`], or its tree is
    /// taller than [`MAX_HEIGHT`].
    TooDeep { max: usize },
    /// A name other than `input` or a lambda parameter was referenced.
    UnknownIdentifier { name: String },
    /// A function outside the built-in set was called.
    UnknownFunction { name: String },
    /// A built-in was called with the wrong number of arguments.
    Arity {
        function: String,
        expected: String,
        found: usize,
    },
    /// An operation was applied to a value of the wrong type.
    Type { message: String },
    /// Division or remainder by zero.
    DivisionByZero,
    /// A computation produced NaN or infinity.
    NonFiniteNumber,
    /// Evaluation took more than [`MAX_STEPS`] steps.
    BudgetExceeded { limit: u64 },
    /// A built value would exceed [`MAX_VALUE_BYTES`].
    ValueTooLarge { limit: usize },
    /// A boolean was required but another type was produced.
    NotBoolean { found: &'static str },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong { len, max } => {
                write!(f, "expression is {len} bytes long, the limit is {max}")
            }
            Self::Syntax { position, message } => {
                write!(f, "syntax error at offset {position}: {message}")
            }
            Self::TooDeep { max } => write!(f, "expression nests deeper than {max} levels"),
            Self::UnknownIdentifier { name } => write!(f, "unknown identifier '{name}'"),
            Self::UnknownFunction { name } => write!(f, "unknown function '{name}'"),
            Self::Arity {
                function,
                expected,
                found,
            } => write!(
                f,
                "{function} takes {expected} argument(s), {found} given"
            ),
            Self::Type { message } => write!(f, "type error: {message}"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::NonFiniteNumber => write!(f, "result is not a finite number"),
            Self::BudgetExceeded { limit } => {
                write!(f, "evaluation exceeded {limit} steps")
            }
            Self::ValueTooLarge { limit } => {
                write!(f, "value would exceed {limit} bytes")
            }
            Self::NotBoolean { found } => write!(f, "expected a boolean, got {found}"),
        }
    }
}

impl std::error::Error for ExpressionError {}

/// A parsed expression, ready to evaluate any number of times.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: parser::Expr,
}

impl Expression {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is too long, nests too deeply, is not
    /// syntactically valid, or calls an unknown function.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ExpressionError::TooLong {
                len: source.len(),
                max: MAX_SOURCE_LEN,
            });
        }
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// Returns the source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression with `input` bound to the given value.
    ///
    /// # Errors
    ///
    /// Returns an error on type mismatches, unknown identifiers or division by
    /// zero, when the step budget runs out, or when a built value grows past
    /// [`MAX_VALUE_BYTES`].
    pub fn evaluate(&self, input: &Value) -> Result<Value, ExpressionError> {
        eval::Evaluator::new(input).eval(&self.ast)
    }

    /// Evaluates the expression and requires a boolean result.
    ///
    /// No truthiness coercion is applied.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::NotBoolean`] if the result is not a boolean,
    /// or any evaluation error.
    pub fn evaluate_bool(&self, input: &Value) -> Result<bool, ExpressionError> {
        match self.evaluate(input)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::NotBoolean {
                found: eval::type_name(&other),
            }),
        }
    }
}

/// Parses and evaluates `source` in one step.
///
/// # Errors
///
/// Returns any parse or evaluation error.
pub fn evaluate(source: &str, input: &Value) -> Result<Value, ExpressionError> {
    Expression::parse(source)?.evaluate(input)
}

/// Renders a value as text: strings verbatim, everything else as JSON.
#[must_use]
pub fn stringify(value: &Value) -> String {
    eval::stringify(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(source: &str, input: Value) -> Value {
        evaluate(source, &input).expect("evaluate")
    }

    #[test]
    fn arithmetic_over_input() {
        assert_eq!(eval("input.n + 1", json!({"n": 1})), json!(2));
        assert_eq!(eval("input.price * input.qty", json!({"price": 2.5, "qty": 4})), json!(10));
        assert_eq!(eval("7 % 4 - -1", json!(null)), json!(4));
        assert_eq!(eval("1 / 4", json!(null)), json!(0.25));
    }

    #[test]
    fn comparisons_and_logic() {
        let input = json!({"score": 80, "tier": "gold"});
        assert_eq!(eval("input.score > 50 && input.tier == 'gold'", input.clone()), json!(true));
        assert_eq!(eval("input.score <= 50 || !(input.tier != 'gold')", input), json!(true));
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(eval("input.name || 'anonymous'", json!({})), json!("anonymous"));
        assert_eq!(eval("input.name && upper(input.name)", json!({"name": "ada"})), json!("ADA"));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            eval("'Hello, ' + input.name + '! You have ' + input.count", json!({"name": "Ada", "count": 3})),
            json!("Hello, Ada! You have 3")
        );
    }

    #[test]
    fn conditional_expression() {
        assert_eq!(eval("input.n > 0 ? 'positive' : 'non-positive'", json!({"n": -2})), json!("non-positive"));
    }

    #[test]
    fn object_and_array_construction() {
        assert_eq!(
            eval("{ total: input.a + input.b, parts: [input.a, input.b] }", json!({"a": 1, "b": 2})),
            json!({"total": 3, "parts": [1, 2]})
        );
    }

    #[test]
    fn higher_order_builtins() {
        let input = json!({"items": [
            {"name": "apple", "price": 3},
            {"name": "pear", "price": 5},
            {"name": "plum", "price": 1}
        ]});
        assert_eq!(eval("map(input.items, x => x.name)", input.clone()), json!(["apple", "pear", "plum"]));
        assert_eq!(eval("len(filter(input.items, x => x.price > 2))", input.clone()), json!(2));
        assert_eq!(eval("reduce(input.items, (acc, x) => acc + x.price, 0)", input.clone()), json!(9));
        assert_eq!(eval("find(input.items, x => startsWith(x.name, 'pl')).price", input.clone()), json!(1));
        assert_eq!(eval("some(input.items, x => x.price > 4)", input.clone()), json!(true));
        assert_eq!(eval("every(input.items, x => x.price > 4)", input), json!(false));
    }

    #[test]
    fn lambda_parameters_shadow_input() {
        assert_eq!(eval("map([1, 2], input => input * 10)", json!({"ignored": true})), json!([10, 20]));
    }

    #[test]
    fn string_and_collection_builtins() {
        let input = json!({"text": "  Hello World  ", "tags": ["a", "b"], "meta": {"x": 1, "y": 2}});
        assert_eq!(eval("lower(trim(input.text))", input.clone()), json!("hello world"));
        assert_eq!(eval("contains(input.tags, 'b')", input.clone()), json!(true));
        assert_eq!(eval("contains(input.meta, 'z')", input.clone()), json!(false));
        assert_eq!(eval("keys(input.meta)", input.clone()), json!(["x", "y"]));
        assert_eq!(eval("sum(values(input.meta))", input.clone()), json!(3));
        assert_eq!(eval("join(input.tags, '-')", input.clone()), json!("a-b"));
        assert_eq!(eval("max(3, 9, 4)", input.clone()), json!(9));
        assert_eq!(eval("merge(input.meta, { y: 5 })", input), json!({"x": 1, "y": 5}));
    }

    #[test]
    fn conversions() {
        assert_eq!(eval("number('42') + 1", json!(null)), json!(43));
        assert_eq!(eval("string(12)", json!(null)), json!("12"));
        assert_eq!(eval("bool(input.missing)", json!({})), json!(false));
        assert_eq!(eval("isNull(input.missing)", json!({})), json!(true));
    }

    #[test]
    fn evaluate_bool_rejects_non_booleans() {
        let expr = Expression::parse("input.count").expect("parse");
        assert_eq!(
            expr.evaluate_bool(&json!({"count": 1})),
            Err(ExpressionError::NotBoolean { found: "number" })
        );
        let expr = Expression::parse("input.count > 0").expect("parse");
        assert_eq!(expr.evaluate_bool(&json!({"count": 1})), Ok(true));
    }

    #[test]
    fn runtime_errors() {
        assert_eq!(evaluate("input.n / 0", &json!({"n": 1})), Err(ExpressionError::DivisionByZero));
        assert_eq!(
            evaluate("process", &json!({})),
            Err(ExpressionError::UnknownIdentifier { name: "process".to_string() })
        );
        assert!(matches!(evaluate("input.missing.field + 1", &json!({})), Err(ExpressionError::Type { .. })));
        assert!(matches!(evaluate("len(1, 2)", &json!({})), Err(ExpressionError::Arity { .. })));
        assert!(matches!(evaluate("x => x", &json!({})), Err(ExpressionError::Type { .. })));
    }

    #[test]
    fn source_length_is_bounded() {
        let source = "1+".repeat(MAX_SOURCE_LEN) + "1";
        assert!(matches!(Expression::parse(&source), Err(ExpressionError::TooLong { .. })));
    }

    #[test]
    fn step_budget_stops_runaway_evaluation() {
        let source = "map(input, a => map(input, b => map(input, c => a + b + c)))";
        let input = Value::Array((0..100).map(Value::from).collect());
        assert_eq!(
            evaluate(source, &input),
            Err(ExpressionError::BudgetExceeded { limit: MAX_STEPS })
        );
    }

    #[test]
    fn doubling_string_stops_at_value_budget() {
        let source = "reduce(split('aaaaaaaaaaaaaaaaaaaaaaaaa', ''), (acc, x) => acc + acc, 'xx')";
        assert_eq!(
            evaluate(source, &json!(null)),
            Err(ExpressionError::ValueTooLarge { limit: MAX_VALUE_BYTES })
        );
    }

    #[test]
    fn doubling_array_stops_at_value_budget() {
        let source = "reduce(split('aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa', ''), (acc, x) => [acc, acc], 1)";
        assert_eq!(
            evaluate(source, &json!(null)),
            Err(ExpressionError::ValueTooLarge { limit: MAX_VALUE_BYTES })
        );
        let source = "reduce(split('aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa', ''), (acc, x) => acc + acc, [1])";
        assert_eq!(
            evaluate(source, &json!(null)),
            Err(ExpressionError::ValueTooLarge { limit: MAX_VALUE_BYTES })
        );
    }

    #[test]
    fn wide_map_stops_at_value_budget() {
        let input = json!({"items": (0..20_000).collect::<Vec<_>>()});
        let source = format!("map(input.items, i => '{}')", "x".repeat(1000));
        assert_eq!(
            evaluate(&source, &input),
            Err(ExpressionError::ValueTooLarge { limit: MAX_VALUE_BYTES })
        );
        assert_eq!(
            evaluate("join(map(input.items, i => 'ab'), '')", &input).map(|v| len(&v)),
            Ok(40_000)
        );
    }

    #[test]
    fn long_operator_chains_parse() {
        let terms: Vec<String> = (0..100).map(|i| format!("input.v{i}")).collect();
        let source = terms.join(" + ' ' + ");
        let input: serde_json::Map<String, Value> =
            (0..100).map(|i| (format!("v{i}"), json!("w"))).collect();
        let result = evaluate(&source, &Value::Object(input)).expect("evaluate");
        assert_eq!(len(&result), 199);

        let flags = vec!["input.ok"; 80].join(" && ");
        assert_eq!(evaluate(&flags, &json!({"ok": true})), Ok(json!(true)));
    }

    fn len(value: &Value) -> usize {
        value.as_str().map_or(0, str::len)
    }
}
