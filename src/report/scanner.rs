//! Usage scanner: runs structural and text detection over every scannable entry.

use std::path::Path;

use crate::config::AuditConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::{AuditError, ErrorReport};
use crate::json;
use crate::model::{FieldKey, ModelSchema};
use crate::report::artifacts::{decode_entry, open_report, scannable_entries, ArtifactSource};
use crate::report::locator::{object_name, page_name};
use crate::report::structural::find_structural_references;
use crate::report::text_search::find_text_reference;
use crate::usage::{DetectionMethod, FactDetail, FactSet, UsageFact, UsageKind};

const COMPONENT: &str = "scanner";

pub const HIERARCHY_PAGE: &str = "Model Structure";
pub const HIERARCHY_OBJECT: &str = "Drill-down navigation";

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub entries_scanned: usize,
    pub entries_failed: usize,
    pub structural_hits: usize,
    pub text_hits: usize,
}

pub struct UsageScanner<'a> {
    schema: &'a ModelSchema,
    config: &'a AuditConfig,
    fields: Vec<FieldKey>,
    detailed: bool,
    stats: ScanStats,
}

impl<'a> UsageScanner<'a> {
    pub fn new(schema: &'a ModelSchema, config: &'a AuditConfig, detailed: bool) -> Self {
        Self {
            schema,
            config,
            fields: schema.all_fields(),
            detailed,
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Open and scan one report file or folder. An unreadable report is recorded and skipped.
    pub fn scan_report_path(
        &mut self,
        path: &Path,
        facts: &mut FactSet,
        errors: &mut ErrorReport,
        sink: &mut dyn DiagnosticSink,
    ) {
        let report = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        match open_report(path) {
            Ok(source) => self.scan_source(&report, source.as_ref(), facts, errors, sink),
            Err(e) => {
                sink.error(COMPONENT, format!("Skipping report {}: {}", path.display(), e));
                errors.record(report, &e, 0);
            }
        }
    }

    /// Scan every scannable entry of one report. Failures stay per entry.
    pub fn scan_source(
        &mut self,
        report: &str,
        source: &dyn ArtifactSource,
        facts: &mut FactSet,
        errors: &mut ErrorReport,
        sink: &mut dyn DiagnosticSink,
    ) {
        let entries = scannable_entries(source, self.config);
        sink.info(
            COMPONENT,
            format!("Scanning {} entries of report '{}'", entries.len(), report),
        );

        for entry in entries {
            if let Err(e) = self.scan_entry(report, source, &entry, facts, sink) {
                self.stats.entries_failed += 1;
                sink.warn(COMPONENT, e.to_string());
                errors.record(report, &e, 0);
            }
        }
    }

    fn scan_entry(
        &mut self,
        report: &str,
        source: &dyn ArtifactSource,
        entry: &str,
        facts: &mut FactSet,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<(), AuditError> {
        let bytes = source.read_entry(entry)?;
        let content = decode_entry(&bytes).map_err(|message| AuditError::ArtifactUnreadable {
            name: format!("{}!{}", report, entry),
            message,
        })?;
        self.stats.entries_scanned += 1;

        let page = page_name(entry);
        let locator = format!("{}!{}", report, entry);
        let parsed = json::parse(&content);
        let object = object_name(parsed.as_ref().ok(), entry);

        let mut found = Vec::new();
        let mut malformed = None;
        match &parsed {
            Ok(doc) => {
                for hit in find_structural_references(doc, self.schema) {
                    self.stats.structural_hits += 1;
                    let method = DetectionMethod::JsonStructure(hit.context);
                    let detail = self.detailed.then(|| FactDetail {
                        confidence: method.confidence(),
                        line_number: None,
                        excerpt: None,
                    });
                    found.push((hit.field.clone(), hit.kind, method, detail));
                }
            }
            Err(e) => malformed = Some(e.to_string()),
        }

        for field in &self.fields {
            let Some(hit) = find_text_reference(&content, field, entry) else {
                continue;
            };
            self.stats.text_hits += 1;
            let method = DetectionMethod::TextSearch(hit.variant);
            let detail = self.detailed.then(|| FactDetail {
                confidence: method.confidence(),
                line_number: Some(hit.line_number),
                excerpt: Some(hit.excerpt),
            });
            found.push((field.clone(), hit.kind, method, detail));
        }

        let mut added = 0;
        for (field, kind, method, detail) in found {
            added += usize::from(facts.insert(UsageFact {
                field,
                kind,
                page: page.clone(),
                object: object.clone(),
                locator: locator.clone(),
                report: report.to_string(),
                method,
                detail,
            }));
        }
        if added > 0 {
            sink.debug(COMPONENT, format!("{}: {} new usages on {}", locator, added, page));
        }

        // Text detection above still ran; the structural pass is what was lost
        match malformed {
            Some(message) => Err(AuditError::ArtifactMalformed {
                name: locator,
                message,
            }),
            None => Ok(()),
        }
    }
}

/// Every hierarchy level column as a `Hierarchy` fact.
pub fn hierarchy_facts(schema: &ModelSchema, detailed: bool) -> Vec<UsageFact> {
    let mut facts = Vec::new();
    for table in &schema.tables {
        for column in &table.hierarchy_columns {
            let method = DetectionMethod::HierarchyScan;
            let detail = detailed.then(|| FactDetail {
                confidence: method.confidence(),
                line_number: None,
                excerpt: None,
            });
            facts.push(UsageFact {
                field: FieldKey::new(table.name.clone(), column.clone()),
                kind: UsageKind::Hierarchy,
                page: HIERARCHY_PAGE.to_string(),
                object: HIERARCHY_OBJECT.to_string(),
                locator: format!("{}.json", table.name),
                report: String::new(),
                method,
                detail,
            });
        }
    }
    facts
}

/// Scan all reports in order, then add hierarchy facts. Facts are deduplicated across reports.
pub fn scan_reports(
    report_paths: &[std::path::PathBuf],
    schema: &ModelSchema,
    config: &AuditConfig,
    detailed: bool,
    errors: &mut ErrorReport,
    sink: &mut dyn DiagnosticSink,
) -> FactSet {
    let mut facts = FactSet::new();
    let mut scanner = UsageScanner::new(schema, config, detailed);
    for path in report_paths {
        scanner.scan_report_path(path, &mut facts, errors, sink);
    }
    let stats = scanner.stats();
    sink.info(
        COMPONENT,
        format!(
            "Scanned {} entries ({} failed): {} structural and {} text matches",
            stats.entries_scanned, stats.entries_failed, stats.structural_hits, stats.text_hits
        ),
    );

    let hierarchy = hierarchy_facts(schema, detailed);
    sink.info(
        COMPONENT,
        format!("Found {} hierarchy columns", hierarchy.len()),
    );
    facts.extend(hierarchy);
    facts
}
