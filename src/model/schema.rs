//! Semantic model schema: tables, physical columns, measures, hierarchies

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::config::AuditConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::AuditError;
use crate::json;
use crate::policy::ExclusionPolicy;

const COMPONENT: &str = "schema";

/// `(table, field)` identity.
///
/// Equality, ordering and hashing ignore ASCII case; the stored strings keep
/// the casing they were first seen with.
#[derive(Debug, Clone, Serialize)]
pub struct FieldKey {
    pub table: String,
    pub field: String,
}

impl FieldKey {
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
        }
    }

    /// Parse from "Table.Field"; the table ends at the first dot.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (table, field) = qualified.split_once('.')?;
        if table.is_empty() || field.is_empty() {
            return None;
        }
        Some(Self::new(table, field))
    }

    fn folded(&self) -> (String, String) {
        (self.table.to_ascii_lowercase(), self.field.to_ascii_lowercase())
    }
}

impl PartialEq for FieldKey {
    fn eq(&self, other: &Self) -> bool {
        self.table.eq_ignore_ascii_case(&other.table) && self.field.eq_ignore_ascii_case(&other.field)
    }
}

impl Eq for FieldKey {}

impl Hash for FieldKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl PartialOrd for FieldKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.field)
    }
}

/// One table of the semantic model.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    /// Physical (non-calculated) columns in definition order
    pub columns: Vec<String>,
    /// Columns flagged `calculated`; analysed as measures
    pub measures: Vec<String>,
    /// Columns referenced by hierarchy levels
    pub hierarchy_columns: Vec<String>,
    pub definition_path: PathBuf,
    /// Parsed definition file, kept for the sort-by, measure and alias sweeps
    #[serde(skip)]
    pub definition: Value,
}

impl TableSchema {
    /// Build from a parsed table definition.
    ///
    /// Returns `None` when the table has no physical projection surface.
    pub fn from_definition(
        name: &str,
        definition: Value,
        definition_path: PathBuf,
        policy: &ExclusionPolicy,
    ) -> Option<Self> {
        let column_defs = json::array_field(&definition, "columns");

        if is_calculated_table(&definition) {
            return None;
        }

        let mut columns = Vec::new();
        let mut measures = Vec::new();
        for column in column_defs {
            let Some(column_name) = json::str_field(column, "name") else {
                continue;
            };
            match json::str_field(column, "type") {
                Some("calculated") => measures.push(column_name.to_string()),
                Some("calculatedTableColumn") => {}
                _ => {
                    if !policy.field(column_name).is_excluded()
                        && !columns.iter().any(|c: &String| c.eq_ignore_ascii_case(column_name))
                    {
                        columns.push(column_name.to_string());
                    }
                }
            }
        }

        let mut hierarchy_columns: Vec<String> = Vec::new();
        for hierarchy in json::array_field(&definition, "hierarchies") {
            for level in json::array_field(hierarchy, "levels") {
                if let Some(column) = json::str_field(level, "column") {
                    if !hierarchy_columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                        hierarchy_columns.push(column.to_string());
                    }
                }
            }
        }

        if columns.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            columns,
            measures,
            hierarchy_columns,
            definition_path,
            definition,
        })
    }

    /// Column definition objects of the raw table file.
    pub fn column_definitions(&self) -> &[Value] {
        json::array_field(&self.definition, "columns")
    }

    pub fn has_column(&self, field: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(field))
    }

    pub fn field_keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.columns
            .iter()
            .map(move |c| FieldKey::new(self.name.clone(), c.clone()))
    }
}

/// Every column of the definition is a `calculatedTableColumn`.
pub fn is_calculated_table(definition: &Value) -> bool {
    let column_defs = json::array_field(definition, "columns");
    !column_defs.is_empty()
        && column_defs
            .iter()
            .all(|c| json::str_field(c, "type") == Some("calculatedTableColumn"))
}

/// Why a table folder produced no schema entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Excluded(String),
    MeasuresHolder,
    CalculatedTable,
    DefinitionMissing,
    NoPhysicalColumns,
    Unparseable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedTable {
    pub name: String,
    pub reason: SkipReason,
}

/// All analysable tables of one model snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelSchema {
    pub root: PathBuf,
    pub tables: Vec<TableSchema>,
    pub skipped: Vec<SkippedTable>,
}

impl ModelSchema {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Canonical key for `(table, field)` when both exist in the schema.
    pub fn lookup(&self, table: &str, field: &str) -> Option<FieldKey> {
        let table = self.table(table)?;
        let field = table.columns.iter().find(|c| c.eq_ignore_ascii_case(field))?;
        Some(FieldKey::new(table.name.clone(), field.clone()))
    }

    /// Canonical key for "Table.Field" text.
    pub fn lookup_qualified(&self, qualified: &str) -> Option<FieldKey> {
        let key = FieldKey::parse(qualified)?;
        self.lookup(&key.table, &key.field)
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.lookup(&key.table, &key.field).is_some()
    }

    pub fn all_fields(&self) -> Vec<FieldKey> {
        self.tables.iter().flat_map(|t| t.field_keys()).collect()
    }

    pub fn field_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}

/// Locate the `tables` directory (case-insensitive) directly under the model root.
pub fn find_tables_dir(model_root: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(model_root).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.eq_ignore_ascii_case("tables"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Load every analysable table under `<model_root>/tables/<Table>/<Table>.json`.
///
/// Individual tables fail softly (recorded in [`ModelSchema::skipped`]); a
/// missing tables directory fails the whole load.
pub fn load_schema(
    model_root: &Path,
    config: &AuditConfig,
    sink: &mut dyn DiagnosticSink,
) -> Result<ModelSchema, AuditError> {
    let tables_dir = find_tables_dir(model_root).ok_or_else(|| AuditError::SchemaSourceMissing {
        path: model_root.to_path_buf(),
    })?;
    sink.info(COMPONENT, format!("Found tables folder: {}", tables_dir.display()));

    let policy = ExclusionPolicy::from_config(config);
    let measures_marker = config.measures_folder_name.to_lowercase();

    let mut table_dirs: Vec<PathBuf> = std::fs::read_dir(&tables_dir)
        .map_err(|_| AuditError::SchemaSourceMissing {
            path: model_root.to_path_buf(),
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    table_dirs.sort();
    sink.info(
        COMPONENT,
        format!("Found {} potential table folders", table_dirs.len()),
    );

    let mut schema = ModelSchema {
        root: model_root.to_path_buf(),
        ..Default::default()
    };

    for dir in table_dirs {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        if let Some(reason) = pre_load_skip(&name, &policy, &measures_marker, config) {
            sink.info(COMPONENT, format!("Skipping table '{}': {:?}", name, reason));
            schema.skipped.push(SkippedTable { name, reason });
            continue;
        }

        let definition_path = dir.join(format!("{}.json", name));
        if !definition_path.exists() {
            sink.warn(
                COMPONENT,
                format!(
                    "Definition file '{}.json' not found, skipping folder",
                    name
                ),
            );
            schema.skipped.push(SkippedTable {
                name,
                reason: SkipReason::DefinitionMissing,
            });
            continue;
        }

        let definition = match json::read_file(&definition_path) {
            Ok(value) => value,
            Err(message) => {
                sink.error(
                    COMPONENT,
                    format!(
                        "Cannot process file '{}': {}",
                        definition_path.display(),
                        message
                    ),
                );
                schema.skipped.push(SkippedTable {
                    name,
                    reason: SkipReason::Unparseable(message),
                });
                continue;
            }
        };

        let calculated = is_calculated_table(&definition);
        match TableSchema::from_definition(&name, definition, definition_path, &policy) {
            Some(table) => {
                sink.debug(
                    COMPONENT,
                    format!(
                        "Loaded table '{}' ({} columns, {} measures, {} hierarchy columns)",
                        table.name,
                        table.columns.len(),
                        table.measures.len(),
                        table.hierarchy_columns.len()
                    ),
                );
                schema.tables.push(table);
            }
            None => {
                let reason = if calculated {
                    SkipReason::CalculatedTable
                } else {
                    SkipReason::NoPhysicalColumns
                };
                sink.info(COMPONENT, format!("Skipping table '{}': {:?}", name, reason));
                schema.skipped.push(SkippedTable { name, reason });
            }
        }
    }

    sink.info(
        COMPONENT,
        format!(
            "Loaded {} tables with {} fields",
            schema.tables.len(),
            schema.field_count()
        ),
    );
    Ok(schema)
}

fn pre_load_skip(
    name: &str,
    policy: &ExclusionPolicy,
    measures_marker: &str,
    config: &AuditConfig,
) -> Option<SkipReason> {
    let verdict = policy.table(name);
    if verdict.is_excluded() {
        return Some(SkipReason::Excluded(verdict.reason()));
    }

    let lower = name.to_lowercase();
    if !measures_marker.is_empty() && lower.trim_matches('#').contains(measures_marker) {
        return Some(SkipReason::MeasuresHolder);
    }
    if config
        .calculated_table_markers
        .iter()
        .any(|marker| lower.contains(&marker.to_lowercase()))
    {
        return Some(SkipReason::CalculatedTable);
    }
    None
}
