//! Collects every output column defined by the SQL models under a root.

use std::path::Path;

use serde::Serialize;

use super::alias::AliasPolicy;
use super::analyzer::SqlStructure;
use super::locate::sql_files;
use crate::diagnostics::DiagnosticSink;
use crate::util::read_text_with_fallback;

const COMPONENT: &str = "collector";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SqlField {
    pub field: String,
    /// File stem of the defining model
    pub source_model: String,
}

impl SqlField {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.source_model, self.field)
    }
}

/// Aliases of the last top-level projection of every `.sql` file.
pub fn collect_sql_fields(
    root: &Path,
    policy: AliasPolicy,
    sink: &mut dyn DiagnosticSink,
) -> Vec<SqlField> {
    if !root.is_dir() {
        sink.warn(COMPONENT, format!("path does not exist: {}", root.display()));
        return Vec::new();
    }

    let files = sql_files(root);
    sink.info(
        COMPONENT,
        format!("found {} .sql files in {}", files.len(), root.display()),
    );

    let mut fields = Vec::new();
    for path in files {
        let model = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let text = match read_text_with_fallback(&path) {
            Ok(text) => text,
            Err(e) => {
                sink.warn(COMPONENT, format!("{}: {}", path.display(), e));
                continue;
            }
        };
        let Some(structure) = SqlStructure::analyze(&text, policy) else {
            continue;
        };
        let Some(block) = structure.blocks.last() else {
            continue;
        };
        fields.extend(block.columns.iter().filter_map(|c| {
            c.alias.as_ref().map(|alias| SqlField {
                field: alias.clone(),
                source_model: model.clone(),
            })
        }));
    }

    sink.info(COMPONENT, format!("collected {} fields", fields.len()));
    fields
}
