//! Relationship, sort-by and row-level-security sweeps over model metadata.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::diagnostics::DiagnosticSink;
use crate::json;
use crate::model::schema::{FieldKey, ModelSchema};

const COMPONENT: &str = "relationships";

const RELATIONSHIP_ANNOTATION: &str = "TabularEditor_Relationships";

/// `'Table'[Column]` inside an RLS filter expression.
static RLS_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'([^']*)'\[([^\]]*)\]").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub from: FieldKey,
    pub to: FieldKey,
}

impl Relationship {
    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            from: FieldKey::new(
                json::str_field(value, "fromTable")?,
                json::str_field(value, "fromColumn")?,
            ),
            to: FieldKey::new(
                json::str_field(value, "toTable")?,
                json::str_field(value, "toColumn")?,
            ),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelationshipScan {
    pub relationships: Vec<Relationship>,
    pub files_scanned: usize,
}

impl RelationshipScan {
    pub fn found(&self) -> bool {
        !self.relationships.is_empty()
    }

    /// Both ends of every relationship.
    pub fn fields(&self) -> BTreeSet<FieldKey> {
        self.relationships
            .iter()
            .flat_map(|r| [r.from.clone(), r.to.clone()])
            .collect()
    }
}

/// Search every `.json`/`.bim` file under the model root for relationship records.
pub fn find_relationships(model_root: &Path, sink: &mut dyn DiagnosticSink) -> RelationshipScan {
    let mut scan = RelationshipScan::default();

    for entry in WalkDir::new(model_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let is_metadata = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| {
                ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("bim")
            });
        if !is_metadata {
            continue;
        }

        let value = match json::read_file(path) {
            Ok(value) => value,
            Err(e) => {
                sink.warn(
                    COMPONENT,
                    format!("Could not read {}: {}", path.display(), e),
                );
                continue;
            }
        };
        scan.files_scanned += 1;

        let in_relationships_dir = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.eq_ignore_ascii_case("relationships"));

        let mut records: Vec<&Value> = Vec::new();
        let mut decoded: Vec<Value> = Vec::new();
        if in_relationships_dir && value.is_object() {
            records.push(&value);
        } else {
            if let Some(Value::Array(items)) = json::find_key(&value, "relationships") {
                records.extend(items.iter());
            }
            if let Some(Value::Array(annotations)) = json::find_key(&value, "annotations") {
                for annotation in annotations {
                    if json::str_field(annotation, "name") != Some(RELATIONSHIP_ANNOTATION) {
                        continue;
                    }
                    if let Some(inner) = decode_annotation(annotation.get("value")) {
                        decoded.extend(inner);
                    }
                }
            }
        }

        let before = scan.relationships.len();
        scan.relationships.extend(
            records
                .into_iter()
                .chain(decoded.iter())
                .filter_map(Relationship::from_value),
        );
        let added = scan.relationships.len() - before;
        if added > 0 {
            sink.debug(
                COMPONENT,
                format!("{} relationships in {}", added, path.display()),
            );
        }
    }

    if scan.found() {
        sink.info(
            COMPONENT,
            format!(
                "Found {} relationships in {} files",
                scan.relationships.len(),
                scan.files_scanned
            ),
        );
    } else {
        sink.warn(
            COMPONENT,
            format!(
                "CRITICAL WARNING: no relationships found under {}; key columns may be reported as unused",
                model_root.display()
            ),
        );
    }
    scan
}

/// Annotation values carry relationships as a JSON string, a list of string
/// fragments, or an inline list.
fn decode_annotation(value: Option<&Value>) -> Option<Vec<Value>> {
    match value? {
        Value::String(text) => json::parse(text).ok().map(into_records),
        Value::Array(items) if items.iter().all(Value::is_string) => {
            let text: String = items.iter().filter_map(Value::as_str).collect();
            json::parse(&text).ok().map(into_records)
        }
        Value::Array(items) => Some(items.clone()),
        _ => None,
    }
}

fn into_records(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Columns named as another column's `sortByColumn`.
pub fn find_sort_targets(schema: &ModelSchema) -> BTreeSet<FieldKey> {
    let mut targets = BTreeSet::new();
    for table in &schema.tables {
        for column in table.column_definitions() {
            if let Some(target) = json::str_field(column, "sortByColumn") {
                targets.insert(FieldKey::new(table.name.clone(), target));
            }
        }
    }
    targets
}

/// Columns referenced by row-level-security filters in `<root>/roles/*.json`.
pub fn find_rls_fields(model_root: &Path, sink: &mut dyn DiagnosticSink) -> BTreeSet<FieldKey> {
    let mut fields = BTreeSet::new();
    let pattern = model_root.join("roles").join("*.json");
    let Some(pattern) = pattern.to_str() else {
        return fields;
    };
    let Ok(paths) = glob::glob(pattern) else {
        return fields;
    };

    let mut role_files: Vec<_> = paths.filter_map(|p| p.ok()).collect();
    role_files.sort();
    for path in role_files {
        let value = match json::read_file(&path) {
            Ok(value) => value,
            Err(e) => {
                sink.warn(
                    "rls",
                    format!("Could not read role file {}: {}", path.display(), e),
                );
                continue;
            }
        };

        for permission in json::array_field(&value, "tablePermissions") {
            let Some(expression) = permission
                .get("filterExpression")
                .and_then(|e| json::joined_text(e, "\n"))
            else {
                continue;
            };
            fields.extend(rls_references(&expression));
        }
    }

    if !fields.is_empty() {
        sink.info("rls", format!("Found {} fields used in RLS", fields.len()));
    }
    fields
}

pub fn rls_references(expression: &str) -> Vec<FieldKey> {
    RLS_REFERENCE
        .captures_iter(expression)
        .map(|c| FieldKey::new(&c[1], &c[2]))
        .collect()
}
