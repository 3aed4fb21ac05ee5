//! Measure definitions: external measure files plus calculated columns of the model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use walkdir::WalkDir;

use crate::diagnostics::DiagnosticSink;
use crate::json;
use crate::model::schema::ModelSchema;
use crate::util::{decode_utf8_ignoring_errors, find_ci_from};

const COMPONENT: &str = "measures";

/// Extensions read from the external measures folder.
pub const MEASURE_FILE_EXTENSIONS: &[&str] = &["dax", "txt", "sql", "json", "xml", "measure"];

const FALLBACK_KEYWORDS: &[&str] = &["CALCULATE", "SUM", "FILTER", "VAR", "RETURN"];

/// Measure header: `MEASURE 'Table'[Name] =`, anchored at a `MEASURE` keyword.
static MEASURE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^MEASURE\s+(?:'[^']*')?\[?([^\]]+?)\]?\s*=\s*").unwrap()
});

/// Measure name -> expression text. Later inserts overwrite earlier ones.
pub type MeasureDefinitions = BTreeMap<String, String>;

/// First directory under the model root whose name contains `folder_name`.
pub fn find_measures_folder(model_root: &Path, folder_name: &str) -> Option<PathBuf> {
    let marker = folder_name.to_lowercase();
    WalkDir::new(model_root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .find(|e| {
            e.file_name()
                .to_str()
                .map_or(false, |name| name.to_lowercase().contains(&marker))
        })
        .map(|e| e.into_path())
}

/// Extract `MEASURE ... = expr` definitions from DAX script text.
///
/// Each expression runs up to the next `MEASURE` keyword or end of input.
pub fn extract_script_measures(text: &str) -> Vec<(String, String)> {
    let mut starts = Vec::new();
    let mut from = 0;
    while let Some(pos) = find_ci_from(text, "MEASURE", from) {
        starts.push(pos);
        from = pos + "MEASURE".len();
    }

    let mut measures = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let Some(header) = MEASURE_HEADER.captures(&text[start..]) else {
            continue;
        };
        let header_end = start + header.get(0).map_or(0, |m| m.end());
        let name = header
            .get(1)
            .map(|m| m.as_str().trim().trim_matches(|c| c == '[' || c == ']').trim())
            .unwrap_or_default();

        // The expression ends at the next MEASURE past the header
        let end = starts[i + 1..]
            .iter()
            .copied()
            .find(|&s| s > header_end)
            .unwrap_or(text.len());
        let expression = text[header_end..end].trim();

        if !name.is_empty() && !expression.is_empty() {
            measures.push((name.to_string(), expression.to_string()));
        }
    }
    measures
}

/// Recursive search for `{name, expression}` objects in measure JSON.
pub fn extract_json_measures(value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            let name = json::str_field(value, "name").or_else(|| json::str_field(value, "Name"));
            let expression = map.get("expression").or_else(|| map.get("Expression"));
            if let (Some(name), Some(expression)) = (name, expression) {
                if let Some(text) = json::joined_text(expression, " ") {
                    out.push((name.to_string(), text));
                }
            }
            for child in map.values() {
                extract_json_measures(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                extract_json_measures(item, out);
            }
        }
        _ => {}
    }
}

/// All three extraction methods for one file's content.
pub fn extract_measures_from_text(text: &str, file_stem: &str) -> Vec<(String, String)> {
    let mut measures = extract_script_measures(text);

    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = json::parse(trimmed) {
            extract_json_measures(&value, &mut measures);
        }
    }

    if measures.is_empty() && trimmed.len() > 10 {
        let upper = trimmed.to_uppercase();
        if FALLBACK_KEYWORDS.iter().any(|k| upper.contains(k)) {
            measures.push((file_stem.to_string(), trimmed.to_string()));
        }
    }
    measures
}

/// Read every measure file under `folder`, in sorted path order.
pub fn load_external_measures(folder: &Path, sink: &mut dyn DiagnosticSink) -> MeasureDefinitions {
    let mut definitions = MeasureDefinitions::new();
    let mut files = 0usize;

    for entry in WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let is_measure_file = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| {
                MEASURE_FILE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
            });
        if !is_measure_file {
            continue;
        }

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                sink.warn(
                    COMPONENT,
                    format!("Cannot read measure file {}: {}", path.display(), e),
                );
                continue;
            }
        };
        files += 1;
        let text = decode_utf8_ignoring_errors(&bytes);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        for (name, expression) in extract_measures_from_text(&text, stem) {
            definitions.insert(name, expression);
        }
    }

    sink.info(
        COMPONENT,
        format!(
            "Loaded {} external measures from {} files in {}",
            definitions.len(),
            files,
            folder.display()
        ),
    );
    definitions
}

/// Calculated columns of every loaded table; expression arrays joined by newlines.
pub fn model_measures(schema: &ModelSchema) -> MeasureDefinitions {
    let mut definitions = MeasureDefinitions::new();
    for table in &schema.tables {
        for column in table.column_definitions() {
            if json::str_field(column, "type") != Some("calculated") {
                continue;
            }
            let (Some(name), Some(expression)) = (
                json::str_field(column, "name"),
                column.get("expression").and_then(|e| json::joined_text(e, "\n")),
            ) else {
                continue;
            };
            definitions.insert(name.to_string(), expression);
        }
    }
    definitions
}

/// External definitions first, then model definitions on top.
pub fn load_measure_definitions(
    schema: &ModelSchema,
    measures_folder_name: &str,
    sink: &mut dyn DiagnosticSink,
) -> MeasureDefinitions {
    let mut definitions = match find_measures_folder(&schema.root, measures_folder_name) {
        Some(folder) => load_external_measures(&folder, sink),
        None => {
            sink.debug(
                COMPONENT,
                format!("No '{}' folder under {}", measures_folder_name, schema.root.display()),
            );
            MeasureDefinitions::new()
        }
    };

    let model = model_measures(schema);
    sink.info(
        COMPONENT,
        format!("Found {} calculated columns in model tables", model.len()),
    );
    definitions.extend(model);
    definitions
}
