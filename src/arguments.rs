//! Tool-call argument handling.
//!
//! A buffer counts as complete only when it parses as a JSON object. A truncated
//! object is never valid JSON, so a successful parse can't be premature.

use serde_json::{Map, Value};

pub type Arguments = Map<String, Value>;

/// Parses trimmed text as a JSON object; arrays, scalars and partial input are `None`.
pub fn parse_arguments_object(text: &str) -> Option<Arguments> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Deterministic serialization with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

pub fn canonical_arguments(arguments: &Arguments) -> String {
    let mut out = String::new();
    write_object(arguments, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already serialize deterministically.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &Arguments, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        if let Some(v) = map.get(key) {
            write_canonical(v, out);
        }
    }
    out.push('}');
}
