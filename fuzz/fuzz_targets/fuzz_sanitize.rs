//! Fuzz target: JSON sanitization.
//!
//! Any JSON document must sanitize without panicking, keep its top-level
//! kind, and come out free of the characters the sanitizer escapes.

#![no_main]

use appmgr_gateway::sanitize::sanitize;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fn assert_clean(value: &Value) {
    match value {
        Value::String(s) => assert!(
            !s.contains(['<', '>', '(', ')', '\'', '"', '%']),
            "unescaped markup survived: {s:?}"
        ),
        Value::Array(items) => items.iter().for_each(assert_clean),
        Value::Object(fields) => fields.values().for_each(assert_clean),
        _ => {}
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let was_object = value.is_object();
    let clean = sanitize(value);
    assert_eq!(clean.is_object(), was_object);
    assert_clean(&clean);
});
