//! Upstream-layer audit: which fields removed from the reporting layer can
//! also be removed from the models they are selected from.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::config::AuditConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::{AuditError, ErrorReport};
use crate::model::{resolve_warehouse_alias, FieldKey, ModelSchema};
use crate::sql::{
    comment_out_in_file, find_sql_file, line_alias, sql_files, AliasPolicy, CommentMarker, SqlField,
};
use crate::util::{contains_word_ci, read_text_with_fallback, strip_line_comments};

const COMPONENT: &str = "upstream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockingReference {
    /// File name of the model that still needs the field
    pub file: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamCandidate {
    /// Field as it was proposed (`Table.Field` or `model.field`)
    pub field: String,
    pub column: String,
    pub source_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedField {
    pub candidate: UpstreamCandidate,
    pub blocking_files: Vec<String>,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamFailure {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpstreamSummary {
    pub removable: usize,
    pub blocked: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamAudit {
    pub layer_path: PathBuf,
    pub removable: Vec<UpstreamCandidate>,
    pub blocked: Vec<BlockedField>,
    pub errors: Vec<UpstreamFailure>,
    pub summary: UpstreamSummary,
}

impl UpstreamAudit {
    fn new(layer_path: PathBuf) -> Self {
        Self {
            layer_path,
            removable: Vec::new(),
            blocked: Vec::new(),
            errors: Vec::new(),
            summary: UpstreamSummary::default(),
        }
    }

    fn fail(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(UpstreamFailure {
            field: field.into(),
            message: message.into(),
        });
    }

    fn finish(mut self) -> Self {
        self.summary = UpstreamSummary {
            removable: self.removable.len(),
            blocked: self.blocked.len(),
            errors: self.errors.len(),
        };
        self
    }
}

/// Commented and failed field counts of an upstream rewrite.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MutationTally {
    pub commented: usize,
    pub failed: usize,
    pub errors: ErrorReport,
}

fn layer_name(config: &AuditConfig) -> &str {
    config.layer_prefix.trim_end_matches('_')
}

/// Sibling layer directory: `reporting` replaced by the layer name.
pub fn layer_path_for(reporting_root: &Path, config: &AuditConfig) -> Result<PathBuf, AuditError> {
    let text = reporting_root.to_string_lossy();
    if !text.contains("reporting") {
        return Err(AuditError::UpstreamLayerMissing {
            path: reporting_root.to_path_buf(),
        });
    }
    let layer = PathBuf::from(text.replace("reporting", layer_name(config)));
    if !layer.is_dir() {
        return Err(AuditError::UpstreamLayerMissing { path: layer });
    }
    Ok(layer)
}

/// Name of the first upstream-layer model the SQL text `ref()`s.
pub fn find_upstream_model(sql_text: &str, config: &AuditConfig) -> Option<String> {
    let pattern = format!(
        r#"(?i)ref\(['"]({}[^'"]+)['"]\)"#,
        regex::escape(&config.layer_prefix)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(sql_text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

fn ref_patterns(variants: &[String]) -> Vec<Regex> {
    variants
        .iter()
        .filter_map(|v| {
            Regex::new(&format!(
                r#"(?is)ref\s*\(\s*['"]{}['"]\s*\)"#,
                regex::escape(v)
            ))
            .ok()
        })
        .collect()
}

/// Everything under `scan_root` that still needs `column` of `source_model`.
///
/// The model's own file blocks when a line other than the column's defining
/// line mentions it. Any file that `ref()`s the model blocks when it mentions
/// the column at all. `ignore` names a file left out of the scan.
pub fn blocking_references(
    column: &str,
    source_model: &str,
    scan_root: &Path,
    ignore: Option<&str>,
    config: &AuditConfig,
) -> Vec<BlockingReference> {
    let mut variants = vec![source_model.to_string()];
    if let Some(bare) = source_model.strip_prefix(config.layer_prefix.as_str()) {
        variants.push(bare.to_string());
    }
    let refs = ref_patterns(&variants);
    let mut blocking = Vec::new();

    for path in sql_files(scan_root) {
        let name = file_name(&path);
        if ignore.map_or(false, |i| i == name) {
            continue;
        }
        let content = match read_text_with_fallback(&path) {
            Ok(content) => content,
            Err(e) => {
                blocking.push(BlockingReference {
                    file: name,
                    context: format!("Error during analysis: {}", e),
                });
                continue;
            }
        };
        let stripped = strip_line_comments(&content);

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if variants.iter().any(|v| v.eq_ignore_ascii_case(stem)) {
            let internal = stripped.lines().enumerate().find(|(_, line)| {
                !line.trim().is_empty()
                    && !line_alias(line, AliasPolicy::Permissive)
                        .map_or(false, |a| a.eq_ignore_ascii_case(column))
                    && contains_word_ci(line, column)
            });
            if let Some((index, _)) = internal {
                blocking.push(BlockingReference {
                    file: name,
                    context: format!("Blocked by internal dependency on line {}.", index + 1),
                });
                continue;
            }
        }

        if refs.iter().any(|re| re.is_match(&content)) && contains_word_ci(&stripped, column) {
            blocking.push(BlockingReference {
                file: name,
                context: format!("Usage of field '{}' found in a dependent model.", column),
            });
        }
    }
    blocking
}

fn judge(
    audit: &mut UpstreamAudit,
    candidate: UpstreamCandidate,
    reporting_root: &Path,
    reporting_ignore: Option<&str>,
    config: &AuditConfig,
) {
    let mut blocking = blocking_references(
        &candidate.column,
        &candidate.source_model,
        &audit.layer_path,
        None,
        config,
    );
    blocking.extend(blocking_references(
        &candidate.column,
        &candidate.source_model,
        reporting_root,
        reporting_ignore,
        config,
    ));

    if blocking.is_empty() {
        audit.removable.push(candidate);
        return;
    }
    let blocking_files: BTreeSet<String> = blocking.iter().map(|b| b.file.clone()).collect();
    audit.blocked.push(BlockedField {
        candidate,
        blocking_files: blocking_files.into_iter().collect(),
        details: blocking
            .iter()
            .map(|b| format!("{}: {}", b.file, b.context))
            .collect(),
    });
}

fn is_upstream_skipped(column: &str, config: &AuditConfig) -> bool {
    config
        .upstream_skip_fields
        .iter()
        .any(|skip| skip.eq_ignore_ascii_case(column))
}

/// Audit `Table.Field`s commented out of the reporting layer.
pub fn analyze_upstream(
    reporting_root: &Path,
    schema: &ModelSchema,
    fields: &[FieldKey],
    config: &AuditConfig,
    sink: &mut dyn DiagnosticSink,
    progress: &mut dyn FnMut(u8),
) -> Result<UpstreamAudit, AuditError> {
    let layer = layer_path_for(reporting_root, config)?;
    sink.info(
        COMPONENT,
        format!("Auditing {} fields against {}", fields.len(), layer.display()),
    );
    let mut audit = UpstreamAudit::new(layer);

    for (i, key) in fields.iter().enumerate() {
        progress((((i + 1) * 100) / fields.len().max(1)) as u8);
        let qualified = key.to_string();
        if is_upstream_skipped(&key.field, config) {
            sink.debug(COMPONENT, format!("{}: never proposed upstream", qualified));
            continue;
        }

        let alias = match resolve_warehouse_alias(schema, &key.table, config) {
            Ok(alias) => alias,
            Err(e) => {
                audit.fail(qualified, e.to_string());
                continue;
            }
        };
        let reporting_file = match find_sql_file(&alias, reporting_root, config, sink) {
            Ok(path) => path,
            Err(e) => {
                audit.fail(qualified, e.to_string());
                continue;
            }
        };
        let source_model = read_text_with_fallback(&reporting_file)
            .ok()
            .and_then(|text| find_upstream_model(&text, config));
        let Some(source_model) = source_model else {
            audit.fail(
                qualified,
                format!(
                    "Source {} model ref not found in '{}'",
                    layer_name(config),
                    file_name(&reporting_file)
                ),
            );
            continue;
        };

        let candidate = UpstreamCandidate {
            field: qualified,
            column: key.field.clone(),
            source_model,
        };
        let ignore = file_name(&reporting_file);
        judge(&mut audit, candidate, reporting_root, Some(&ignore), config);
    }

    let audit = audit.finish();
    sink.info(
        COMPONENT,
        format!(
            "{} removable, {} blocked, {} errors",
            audit.summary.removable, audit.summary.blocked, audit.summary.errors
        ),
    );
    Ok(audit)
}

/// Audit fields collected straight from the upstream layer (`model.field`).
pub fn audit_model_fields(
    layer_root: &Path,
    reporting_root: &Path,
    fields: &[SqlField],
    config: &AuditConfig,
    sink: &mut dyn DiagnosticSink,
) -> UpstreamAudit {
    let mut audit = UpstreamAudit::new(layer_root.to_path_buf());
    for field in fields {
        if is_upstream_skipped(&field.field, config) {
            continue;
        }
        let candidate = UpstreamCandidate {
            field: field.qualified(),
            column: field.field.clone(),
            source_model: field.source_model.clone(),
        };
        judge(&mut audit, candidate, reporting_root, None, config);
    }
    let audit = audit.finish();
    sink.info(
        COMPONENT,
        format!(
            "{} removable, {} blocked",
            audit.summary.removable, audit.summary.blocked
        ),
    );
    audit
}

/// Comment the removable fields out of their upstream models, one file per model.
pub fn comment_out_upstream(
    audit: &UpstreamAudit,
    config: &AuditConfig,
    marker: &CommentMarker,
    sink: &mut dyn DiagnosticSink,
) -> MutationTally {
    let mut tally = MutationTally::default();
    let mut by_model: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for candidate in &audit.removable {
        by_model
            .entry(candidate.source_model.as_str())
            .or_default()
            .insert(candidate.column.to_lowercase());
    }

    for (model, columns) in by_model {
        let path = match find_sql_file(model, &audit.layer_path, config, sink) {
            Ok(path) => path,
            Err(e) => {
                sink.error(COMPONENT, format!("{}: {}", model, e));
                tally.failed += columns.len();
                tally.errors.record(model, &e, columns.len());
                continue;
            }
        };
        match comment_out_in_file(&path, &columns, marker, config.verify_with_parser, sink) {
            Ok(mutation) => {
                let left = mutation.left_in_place(&columns);
                for column in &left {
                    let err = AuditError::ColumnNotCommented {
                        table: model.to_string(),
                        column: column.alias.clone(),
                        reason: column.reason.clone(),
                    };
                    sink.warn(COMPONENT, err.to_string());
                    tally.errors.record(model, &err, 1);
                }
                tally.commented += columns.len() - left.len();
                tally.failed += left.len();
            }
            Err(e) => {
                sink.error(COMPONENT, format!("{}: {}", model, e));
                tally.failed += columns.len();
                tally.errors.record(model, &e, columns.len());
            }
        }
    }
    tally
}
