//! Analysis pipeline and mutation orchestration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Serialize, Serializer};

use crate::config::AuditConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Recording};
use crate::error::{AuditError, ErrorReport};
use crate::model::{
    find_relationships, find_rls_fields, find_sort_targets, load_measure_definitions,
    load_schema, resolve_warehouse_alias, FieldKey, ModelSchema, SkipReason,
};
use crate::policy::ExclusionPolicy;
use crate::report::scan_reports;
use crate::sql::{
    comment_out_in_file, find_sql_file, AliasPolicy, CommentMarker, SkippedColumn, SqlStructure,
};
use crate::usage::{
    aggregate, apply_composition_check, build_dependencies, close_indirect_usage,
    eligible_unused, AuxiliaryUsage, DependencyGraph, DependencyStats, UsageFact, UsageProfile,
    UsageStatistics,
};
use crate::util::read_text_with_fallback;

const COMPONENT: &str = "audit";

/// Options for one analysis run
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Report archives (`.pbix`) or unpacked report folders
    pub report_paths: Vec<PathBuf>,
    /// Root of the semantic model metadata (holds `tables/`)
    pub model_path: PathBuf,
    /// Root of the SQL models; enables the composition check
    pub sql_path: Option<PathBuf>,
    pub config: AuditConfig,
    /// Attach confidence, line numbers and excerpts to facts
    pub detailed: bool,
}

fn serialize_by_field<S, V>(
    map: &BTreeMap<FieldKey, V>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    serializer.collect_map(map.iter().map(|(k, v)| (k.to_string(), v)))
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutput {
    pub profiles: Vec<UsageProfile>,
    pub facts: Vec<UsageFact>,
    #[serde(serialize_with = "serialize_by_field")]
    pub indirect: BTreeMap<FieldKey, BTreeSet<String>>,
    pub dependencies: DependencyGraph,
    pub relationships_found: bool,
    pub schema: ModelSchema,
    pub errors: ErrorReport,
    pub stats: Option<DependencyStats>,
    pub log: Vec<Diagnostic>,
}

impl AnalysisOutput {
    pub fn statistics(&self) -> UsageStatistics {
        UsageStatistics::from_profiles(&self.profiles)
    }

    pub fn unused_fields(&self) -> Vec<FieldKey> {
        eligible_unused(&self.profiles)
    }

    pub fn profile(&self, key: &FieldKey) -> Option<&UsageProfile> {
        self.profiles.iter().find(|p| &p.field == key)
    }

    pub fn facts_for<'a>(&'a self, key: &'a FieldKey) -> impl Iterator<Item = &'a UsageFact> + 'a {
        self.facts.iter().filter(move |f| &f.field == key)
    }
}

fn record_unparseable_tables(schema: &ModelSchema, errors: &mut ErrorReport) {
    for skipped in &schema.skipped {
        if let SkipReason::Unparseable(message) = &skipped.reason {
            errors.record(
                skipped.name.clone(),
                &AuditError::ArtifactMalformed {
                    name: format!("{}.json", skipped.name),
                    message: message.clone(),
                },
                0,
            );
        }
    }
}

fn composition_check(
    profiles: &mut [UsageProfile],
    schema: &ModelSchema,
    sql_root: &Path,
    config: &AuditConfig,
    sink: &mut dyn DiagnosticSink,
) {
    let mut blocked = 0;
    for table in &schema.tables {
        let has_unused = profiles
            .iter()
            .any(|p| p.field.table.eq_ignore_ascii_case(&table.name) && !p.is_used());
        if !has_unused {
            continue;
        }
        let text = resolve_warehouse_alias(schema, &table.name, config)
            .and_then(|alias| find_sql_file(&alias, sql_root, config, sink))
            .and_then(|path| {
                read_text_with_fallback(&path).map_err(|e| AuditError::MutationWriteFailed {
                    path: path.clone(),
                    source: e,
                })
            });
        match text {
            Ok(text) => blocked += apply_composition_check(profiles, &table.name, &text),
            Err(e) => sink.debug(
                COMPONENT,
                format!("Composition check skipped for '{}': {}", table.name, e),
            ),
        }
    }
    if blocked > 0 {
        sink.info(
            COMPONENT,
            format!("{} unused fields are components of used sibling columns", blocked),
        );
    }
}

/// Run the full analysis. Only a missing model `tables` directory fails the run.
pub fn perform_analysis(
    options: &AnalyzeOptions,
    sink: &mut dyn DiagnosticSink,
    progress: &mut dyn FnMut(u8),
) -> Result<AnalysisOutput> {
    let mut sink = Recording::new(sink);
    let config = &options.config;
    let mut errors = ErrorReport::new();

    progress(0);
    sink.info(
        COMPONENT,
        format!(
            "Analysing {} reports against model {}",
            options.report_paths.len(),
            options.model_path.display()
        ),
    );

    progress(5);
    let schema = load_schema(&options.model_path, config, &mut sink)?;
    if schema.tables.is_empty() {
        sink.warn(COMPONENT, "No tables loaded from the model".to_string());
    }
    record_unparseable_tables(&schema, &mut errors);
    let fields = schema.all_fields();
    sink.info(
        COMPONENT,
        format!("Loaded {} fields from {} tables", fields.len(), schema.tables.len()),
    );

    let sort_targets = find_sort_targets(&schema);
    let rls = find_rls_fields(&options.model_path, &mut sink);

    progress(20);
    let facts = scan_reports(
        &options.report_paths,
        &schema,
        config,
        options.detailed,
        &mut errors,
        &mut sink,
    )
    .into_vec();

    progress(50);
    let definitions = load_measure_definitions(&schema, &config.measures_folder_name, &mut sink);
    let dependencies = build_dependencies(&definitions, &fields);
    let indirect = close_indirect_usage(&facts, &dependencies, &fields);
    sink.info(
        COMPONENT,
        format!(
            "{} measures, {} fields used indirectly",
            definitions.len(),
            indirect.len()
        ),
    );
    let stats = options
        .detailed
        .then(|| DependencyStats::compute(&definitions, &dependencies));

    progress(75);
    let relationships = find_relationships(&options.model_path, &mut sink);

    progress(90);
    let auxiliary = AuxiliaryUsage {
        relationships: relationships.fields(),
        sort_targets,
        rls,
    };
    let mut profiles = aggregate(&schema, &facts, &indirect, &auxiliary, config);
    if let Some(sql_root) = &options.sql_path {
        composition_check(&mut profiles, &schema, sql_root, config, &mut sink);
    }

    progress(100);
    sink.info(
        COMPONENT,
        format!("Analysis complete: {} fields profiled", profiles.len()),
    );

    Ok(AnalysisOutput {
        profiles,
        facts,
        indirect,
        dependencies,
        relationships_found: relationships.found(),
        schema,
        errors,
        stats,
        log: sink.into_log(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub table: String,
    pub alias: Option<String>,
    pub sql_file: Option<PathBuf>,
    pub requested: usize,
    pub commented: Vec<String>,
    /// Requested columns left in place, with the reason
    pub skipped: Vec<SkippedColumn>,
    /// Every requested field was commented out
    pub success: bool,
}

impl TableOutcome {
    fn new(table: &str, requested: usize) -> Self {
        Self {
            table: table.to_string(),
            alias: None,
            sql_file: None,
            requested,
            commented: Vec::new(),
            skipped: Vec::new(),
            success: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MutationOutcome {
    pub tables: Vec<TableOutcome>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Selected fields dropped by the exclusion policy
    pub excluded: usize,
    pub excluded_tables: Vec<String>,
    pub errors: ErrorReport,
}

impl MutationOutcome {
    fn finish(&mut self, outcome: TableOutcome) {
        self.processed += 1;
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.tables.push(outcome);
    }
}

fn apply_table(
    table: &str,
    fields: &[FieldKey],
    schema: &ModelSchema,
    sql_root: &Path,
    config: &AuditConfig,
    marker: &CommentMarker,
    errors: &mut ErrorReport,
    sink: &mut dyn DiagnosticSink,
) -> TableOutcome {
    let mut outcome = TableOutcome::new(table, fields.len());
    let n = fields.len();

    let alias = match resolve_warehouse_alias(schema, table, config) {
        Ok(alias) => alias,
        Err(e) => {
            sink.error(COMPONENT, e.to_string());
            errors.record(table, &e, n);
            return outcome;
        }
    };
    outcome.alias = Some(alias.clone());

    let path = match find_sql_file(&alias, sql_root, config, sink) {
        Ok(path) => path,
        Err(e) => {
            errors.record(table, &e, n);
            return outcome;
        }
    };
    outcome.sql_file = Some(path.clone());

    let text = match read_text_with_fallback(&path) {
        Ok(text) => text,
        Err(e) => {
            let err = AuditError::MutationWriteFailed {
                path: path.clone(),
                source: e,
            };
            sink.error(COMPONENT, err.to_string());
            errors.record(table, &err, n);
            return outcome;
        }
    };
    let Some(structure) = SqlStructure::analyze(&text, AliasPolicy::Permissive) else {
        let err = AuditError::SqlParseFailed {
            path: path.clone(),
            message: "no top-level SELECT found".to_string(),
        };
        sink.error(COMPONENT, err.to_string());
        errors.record(table, &err, n);
        return outcome;
    };

    let aliases = structure.safe_aliases();
    let mut targets = BTreeSet::new();
    for field in fields {
        match aliases.iter().find(|a| a.eq_ignore_ascii_case(&field.field)) {
            Some(alias) => {
                targets.insert(alias.to_lowercase());
            }
            None => {
                let err = AuditError::ColumnMappingMissing {
                    table: table.to_string(),
                    field: field.field.clone(),
                };
                sink.warn(COMPONENT, err.to_string());
                errors.record(table, &err, 1);
            }
        }
    }
    if targets.is_empty() {
        sink.error(
            COMPONENT,
            format!("{}: none of the {} selected fields maps to a SQL column", table, n),
        );
        return outcome;
    }

    match comment_out_in_file(&path, &targets, marker, config.verify_with_parser, sink) {
        Ok(mutation) => {
            let mut commented: Vec<String> = Vec::new();
            for column in &mutation.commented {
                if !commented.iter().any(|c| c.eq_ignore_ascii_case(&column.alias)) {
                    commented.push(column.alias.clone());
                }
            }
            let left = mutation.left_in_place(&targets);
            for column in &left {
                let err = AuditError::ColumnNotCommented {
                    table: table.to_string(),
                    column: column.alias.clone(),
                    reason: column.reason.clone(),
                };
                sink.warn(COMPONENT, err.to_string());
                errors.record(table, &err, 1);
            }
            outcome.commented = commented;
            outcome.success = left.is_empty() && targets.len() == n;
            outcome.skipped = left;
        }
        Err(e) => {
            sink.error(COMPONENT, e.to_string());
            errors.record(table, &e, targets.len());
        }
    }
    outcome
}

/// Comment out the selected fields in their SQL models, one table at a time.
///
/// Files already rewritten stay rewritten when a later table fails.
pub fn apply_changes(
    output: &AnalysisOutput,
    sql_root: &Path,
    selected: &[FieldKey],
    config: &AuditConfig,
    sink: &mut dyn DiagnosticSink,
) -> MutationOutcome {
    let policy = ExclusionPolicy::from_config(config);
    let mut outcome = MutationOutcome::default();
    let mut by_table: BTreeMap<String, Vec<FieldKey>> = BTreeMap::new();
    let mut excluded_tables: BTreeSet<String> = BTreeSet::new();

    for field in selected {
        let verdict = policy.field(&field.field);
        if verdict.is_excluded() {
            sink.info(
                COMPONENT,
                format!("Skipping excluded field '{}' ({})", field, verdict.reason()),
            );
            outcome.excluded += 1;
            continue;
        }
        let verdict = policy.table(&field.table);
        if verdict.is_excluded() {
            sink.info(
                COMPONENT,
                format!("Skipping field of excluded table '{}' ({})", field, verdict.reason()),
            );
            outcome.excluded += 1;
            excluded_tables.insert(field.table.clone());
            continue;
        }
        let table = output
            .schema
            .table(&field.table)
            .map_or_else(|| field.table.clone(), |t| t.name.clone());
        by_table.entry(table).or_default().push(field.clone());
    }

    sink.info(
        COMPONENT,
        format!(
            "{} fields in {} tables to comment out ({} excluded)",
            by_table.values().map(Vec::len).sum::<usize>(),
            by_table.len(),
            outcome.excluded
        ),
    );

    for table in &excluded_tables {
        let mut excluded = TableOutcome::new(table, 0);
        excluded.success = true;
        outcome.finish(excluded);
    }
    outcome.excluded_tables = excluded_tables.into_iter().collect();

    let marker = CommentMarker::now(config.comment_style);
    let mut errors = ErrorReport::new();
    for (table, fields) in &by_table {
        let table_outcome = apply_table(
            table,
            fields,
            &output.schema,
            sql_root,
            config,
            &marker,
            &mut errors,
            sink,
        );
        outcome.finish(table_outcome);
    }
    outcome.errors = errors;

    sink.info(
        COMPONENT,
        format!(
            "Processed {} tables: {} succeeded, {} failed",
            outcome.processed, outcome.succeeded, outcome.failed
        ),
    );
    outcome
}
