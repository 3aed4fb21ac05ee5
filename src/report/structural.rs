//! Structural detection: alias-qualified column references in visual/query JSON.

use std::collections::HashMap;

use serde_json::Value;

use crate::json;
use crate::model::{FieldKey, ModelSchema};
use crate::usage::UsageKind;

const MEASURE_LIST_KEYS: &[&str] = &["Measures", "measures", "Aggregates", "aggregates"];

/// One structurally detected reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralHit {
    pub field: FieldKey,
    pub kind: UsageKind,
    /// `Select.Name`, `Select.Column`, `Where`, `Measures`, ...
    pub context: String,
}

/// `alias -> entity` from every `From` list reachable by the usual paths.
pub fn alias_map(doc: &Value) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    let candidates = [
        doc.get("prototypeQuery").and_then(|q| q.get("From")),
        doc.get("query").and_then(|q| q.get("From")),
        json::find_key(doc, "From"),
    ];
    for from in candidates.into_iter().flatten() {
        let Value::Array(items) = from else {
            continue;
        };
        for item in items {
            if let (Some(name), Some(entity)) =
                (json::str_field(item, "Name"), json::str_field(item, "Entity"))
            {
                aliases
                    .entry(name.to_string())
                    .or_insert_with(|| entity.to_string());
            }
        }
    }
    aliases
}

fn source_alias(value: &Value) -> Option<&str> {
    json::find_key(value, "SourceRef").and_then(|source| json::str_field(source, "Source"))
}

/// Property name: a direct string first, then the first string found below.
fn property_named<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    json::str_field(item, key).or_else(|| json::find_key(item, key).and_then(Value::as_str))
}

/// Resolve `alias.property` against the schema.
fn resolve(
    aliases: &HashMap<String, String>,
    alias: &str,
    property: &str,
    schema: &ModelSchema,
) -> Option<FieldKey> {
    let table = aliases.get(alias)?;
    schema.lookup(table, property)
}

/// Every schema field referenced by `Select`, `Where` and measure lists in `doc`.
pub fn find_structural_references(doc: &Value, schema: &ModelSchema) -> Vec<StructuralHit> {
    let aliases = alias_map(doc);
    let mut hits = Vec::new();

    if let Some(Value::Array(selects)) = json::find_key(doc, "Select") {
        for item in selects {
            if let Some(field) = json::str_field(item, "Name").and_then(|n| schema.lookup_qualified(n)) {
                hits.push(StructuralHit {
                    field,
                    kind: UsageKind::Visualization,
                    context: "Select.Name".to_string(),
                });
            }

            let Some(column) = item.get("Column") else {
                continue;
            };
            let alias = column
                .get("Expression")
                .and_then(|e| e.get("SourceRef"))
                .and_then(|s| json::str_field(s, "Source"));
            let property = json::str_field(column, "Property");
            if let (Some(alias), Some(property)) = (alias, property) {
                if let Some(field) = resolve(&aliases, alias, property, schema) {
                    hits.push(StructuralHit {
                        field,
                        kind: UsageKind::Visualization,
                        context: "Select.Column".to_string(),
                    });
                }
            }
        }
    }

    if let Some(Value::Array(conditions)) = json::find_key(doc, "Where") {
        for item in conditions {
            let Some(alias) = source_alias(item) else {
                continue;
            };
            for key in ["Property", "Column"] {
                let Some(property) = property_named(item, key) else {
                    continue;
                };
                if let Some(field) = resolve(&aliases, alias, property, schema) {
                    hits.push(StructuralHit {
                        field,
                        kind: UsageKind::Filter,
                        context: "Where".to_string(),
                    });
                }
            }
        }
    }

    for key in MEASURE_LIST_KEYS {
        let Some(Value::Array(items)) = json::find_key(doc, key) else {
            continue;
        };
        for item in items {
            let (Some(alias), Some(property)) = (source_alias(item), property_named(item, "Property"))
            else {
                continue;
            };
            if let Some(field) = resolve(&aliases, alias, property, schema) {
                hits.push(StructuralHit {
                    field,
                    kind: UsageKind::Measure,
                    context: key.to_string(),
                });
            }
        }
    }

    hits
}
