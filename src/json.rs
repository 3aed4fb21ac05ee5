//! Recursive search helpers over `serde_json::Value`.
//!
//! Report and model files are loosely structured, so callers look keys up
//! wherever they occur instead of binding to a fixed schema.

use std::path::Path;

use serde_json::Value;

/// Depth-first search for the first value stored under `key`.
///
/// Object keys are checked before descending into children, matching the
/// order the report files are usually laid out in.
pub fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found);
            }
            map.values().find_map(|child| find_key(child, key))
        }
        Value::Array(items) => items.iter().find_map(|item| find_key(item, key)),
        _ => None,
    }
}

/// Every value stored under `key`, at any depth.
pub fn find_all_keys<'a>(value: &'a Value, key: &str) -> Vec<&'a Value> {
    let mut found = Vec::new();
    collect_keys(value, key, &mut found);
    found
}

fn collect_keys<'a>(value: &'a Value, key: &str, found: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (k, child) in map {
                if k == key {
                    found.push(child);
                }
                collect_keys(child, key, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_keys(item, key, found);
            }
        }
        _ => {}
    }
}

/// `value[key]` as a string slice.
pub fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// `value[key]` as an array slice, empty when absent or not an array.
pub fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Model expressions are either a string or an array of lines.
pub fn joined_text(value: &Value, separator: &str) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(separator),
        ),
        _ => None,
    }
}

/// Parse JSON text, tolerating a UTF-8 BOM.
pub fn parse(text: &str) -> serde_json::Result<Value> {
    serde_json::from_str(text.strip_prefix('\u{FEFF}').unwrap_or(text))
}

/// Read and parse a JSON file; the error is a display string for diagnostics.
pub fn read_file(path: &Path) -> Result<Value, String> {
    let text = crate::util::read_text_with_fallback(path).map_err(|e| e.to_string())?;
    parse(&text).map_err(|e| e.to_string())
}
