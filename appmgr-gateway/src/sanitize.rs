//! Markup neutralization for JSON travelling through the gateway.
//!
//! Only string leaves are rewritten. Object keys, numbers, booleans and null
//! pass through untouched, and the tree keeps its exact shape.

use serde_json::Value;

/// Characters replaced by HTML entities, in application order.
const ENTITIES: [(char, &str); 7] = [
    ('<', "&lt;"),
    ('>', "&gt;"),
    ('(', "&#40;"),
    (')', "&#41;"),
    ('\'', "&#39;"),
    ('"', "&quot;"),
    ('%', "&#37;"),
];

/// Return a sanitized copy of `value`.
///
/// The pipeline sanitizes each inbound and outbound value exactly once.
#[must_use]
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(fields) => Value::Object(
            fields.into_iter().map(|(key, v)| (key, sanitize(v))).collect(),
        ),
        other => other,
    }
}

/// Replace every escapable character in `input` with its entity.
#[must_use]
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match ENTITIES.iter().find(|(raw, _)| *raw == c) {
            Some((_, entity)) => out.push_str(entity),
            None => out.push(c),
        }
    }
    out
}
