//! `{{path.to.field}}` placeholder substitution.
//!
//! Placeholders are resolved against a JSON scope by dot-path. A path is first
//! looked up directly in the scope; if that fails and it starts with `input.`,
//! the remainder is looked up instead, so `{{input.topic}}` and `{{topic}}`
//! both read the `topic` field of the node input. Placeholders that cannot be
//! resolved are left in the output exactly as written.

use crate::expression::stringify;
use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const INPUT_PREFIX: &str = "input";

/// Renders a template against `scope`.
#[must_use]
pub fn render(template: &str, scope: &Value) -> String {
    render_with(template, scope, |text| text.to_string())
}

/// Renders a template, passing each substituted value through `escape`.
///
/// Literal template text is never escaped.
#[must_use]
pub fn render_with(template: &str, scope: &Value, escape: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        let placeholder = &rest[start..start + OPEN.len() + end + CLOSE.len()];
        let path = after_open[..end].trim();
        match resolve(scope, path) {
            Some(value) => out.push_str(&escape(&stringify(value))),
            None => out.push_str(placeholder),
        }
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

/// Resolves a dot-path placeholder against the scope, with the `input.` alias.
#[must_use]
pub fn resolve<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    lookup_path(scope, path).or_else(|| {
        if path == INPUT_PREFIX {
            return Some(scope);
        }
        let remainder = path.strip_prefix(INPUT_PREFIX)?.strip_prefix('.')?;
        lookup_path(scope, remainder)
    })
}

/// Follows a dot-separated path through objects and arrays.
///
/// Numeric segments index into arrays.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| {
        let segment = segment.trim();
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

/// Escapes text for inclusion in HTML.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
