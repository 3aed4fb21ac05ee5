//! Human-readable page and object names derived from artifact paths and content.

use serde_json::Value;

use crate::util::title_case;

const NAME_KEYS: &[&str] = &["title", "name", "displayName", "caption", "label"];

fn file_stem(entry: &str) -> &str {
    let file = entry.rsplit('/').next().unwrap_or(entry);
    file.rsplit_once('.').map_or(file, |(stem, _)| stem)
}

/// Page identifier of an entry; this is the deduplication scope for facts.
pub fn page_name(entry: &str) -> String {
    let parts: Vec<&str> = entry.split('/').collect();
    if let Some(index) = parts.iter().position(|p| *p == "sections") {
        if let Some(section) = parts.get(index + 1) {
            if let Ok(n) = section.parse::<usize>() {
                return format!("Page {}", n + 1);
            }
            if section.contains("ReportSection") {
                let digits: String = section.chars().filter(|c| c.is_ascii_digit()).collect();
                return if digits.is_empty() {
                    "Report Page 1".to_string()
                } else {
                    format!("Report Page {}", digits)
                };
            }
            return format!("Page ({})", title_case(&section.replace('_', " ")));
        }
    }

    let lower = entry.to_lowercase();
    if lower.contains("bookmark") {
        "Bookmarks".to_string()
    } else if lower.contains("filter") {
        "Filters Panel".to_string()
    } else if lower.contains("mobile") {
        "Mobile Layout".to_string()
    } else {
        format!("Section ({})", file_stem(entry))
    }
}

fn is_meaningful(text: &str) -> bool {
    let lower = text.to_lowercase();
    text.chars().count() > 1
        && !text.chars().all(|c| c.is_ascii_digit())
        && !["guid", "uuid", "id:", "{"].iter().any(|m| lower.contains(m))
}

fn first_visual_type(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(t)) = map.get("visualType") {
                return Some(t.as_str());
            }
            map.values().find_map(first_visual_type)
        }
        Value::Array(items) => items.iter().find_map(first_visual_type),
        _ => None,
    }
}

fn first_display_name(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => {
            for key in NAME_KEYS {
                if let Some(Value::String(text)) = map.get(*key) {
                    if is_meaningful(text) {
                        return Some(text.as_str());
                    }
                }
            }
            map.values().find_map(first_display_name)
        }
        Value::Array(items) => items.iter().find_map(first_display_name),
        _ => None,
    }
}

/// `"<name> (<Type>)"`, `"<Type> Visual"` or `"<name>"`, else `Object (<stem>)`.
pub fn object_name(content: Option<&Value>, entry: &str) -> String {
    let Some(value) = content else {
        return format!("Object ({})", file_stem(entry));
    };

    let visual_type = first_visual_type(value).map(|t| title_case(&t.replace("visual", "")));
    let name = first_display_name(value);

    match (name, visual_type) {
        (Some(name), Some(t)) if !t.is_empty() => format!("{} ({})", name, t),
        (Some(name), _) => name.to_string(),
        (None, Some(t)) if !t.is_empty() => format!("{} Visual", t),
        _ => format!("Object ({})", file_stem(entry)),
    }
}
