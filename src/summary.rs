//! Human-readable result printers

use std::collections::BTreeSet;

use crate::audit::{AnalysisOutput, MutationOutcome};
use crate::error::ErrorReport;
use crate::model::FieldKey;
use crate::sql::SqlField;
use crate::upstream::{MutationTally, UpstreamAudit};
use crate::usage::{UsageFact, UsageKind, UsageProfile};

fn mark(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "-"
    }
}

fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn fragment(label: &str, names: BTreeSet<String>) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    let shown: Vec<&str> = names.iter().take(2).map(String::as_str).collect();
    let mut text = format!("{}: {}", label, shown.join(", "));
    if names.len() > 2 {
        text.push_str(&format!(" +{}", names.len() - 2));
    }
    Some(text)
}

/// One-line digest of where a field is used, at most 58 characters.
pub fn usage_details(profile: &UsageProfile, facts: &[UsageFact]) -> String {
    let of_kind = |kind: UsageKind, page: bool| -> BTreeSet<String> {
        facts
            .iter()
            .filter(|f| f.field == profile.field && f.kind == kind)
            .map(|f| clip(if page { &f.page } else { &f.object }, 15))
            .collect()
    };

    let mut fragments: Vec<String> = Vec::new();
    fragments.extend(fragment("Viz", of_kind(UsageKind::Visualization, true)));
    fragments.extend(fragment("Measure", of_kind(UsageKind::Measure, false)));
    fragments.extend(fragment("Filter", of_kind(UsageKind::Filter, true)));
    if profile.hierarchy {
        fragments.push("Hierarchy: Drill-down".to_string());
    }
    fragments.extend(fragment(
        "->Measure",
        profile
            .indirectly_used_via_measures
            .iter()
            .map(|m| clip(m, 15))
            .collect(),
    ));
    if profile.has_relationship {
        fragments.push("Relationship: FK/PK".to_string());
    }
    if let Some(blocker) = &profile.blocked_by {
        fragments.push(format!("Part of: {}", blocker.field));
    }

    let joined = fragments.join(" | ");
    if joined.is_empty() {
        "No details".to_string()
    } else if joined.chars().count() > 58 {
        format!("{}...", clip(&joined, 55))
    } else {
        joined
    }
}

/// Print the per-field table and the statistics block.
pub fn print_analysis(output: &AnalysisOutput) {
    println!("=== Field Usage Summary ===");
    println!();
    println!(
        "{:<60} {:<5} {:<4} {:<7} {:<6} {:<8} {:<8} {:<9} Details",
        "Field", "Used", "Viz", "Measure", "Filter", "Ind.Meas", "Relation", "Hierarchy"
    );

    let mut current_table: Option<&str> = None;
    for profile in output.profiles.iter().filter(|p| p.excluded.is_none()) {
        if current_table != Some(profile.field.table.as_str()) {
            println!("{}", "-".repeat(120));
            current_table = Some(profile.field.table.as_str());
        }
        println!(
            "{:<60} {:<5} {:<4} {:<7} {:<6} {:<8} {:<8} {:<9} {}",
            profile.field.to_string(),
            mark(profile.is_used()),
            mark(profile.visualization),
            mark(profile.measure),
            mark(profile.filter),
            mark(!profile.indirectly_used_via_measures.is_empty()),
            mark(profile.has_relationship),
            mark(profile.hierarchy),
            usage_details(profile, &output.facts)
        );
    }
    println!();

    let stats = output.statistics();
    println!("--- Statistics ---");
    println!("Analysed fields:        {}", stats.analysed);
    println!(
        "Used fields:            {} ({:.1}%)",
        stats.used, stats.used_percentage
    );
    println!("  In visualizations:    {}", stats.visualization);
    println!("  In measures (direct): {}", stats.measure);
    println!("  In filters:           {}", stats.filter);
    println!("  In hierarchies:       {}", stats.hierarchy);
    println!("  Via measures:         {}", stats.indirect);
    println!("  In relationships:     {}", stats.relationship);
    println!("  As sort targets:      {}", stats.sort_target);
    println!("  In RLS filters:       {}", stats.rls);
    println!("  Sibling components:   {}", stats.blocked);
    println!("Unused fields:          {}", stats.unused);
    if !output.relationships_found {
        println!();
        println!("WARNING: no relationships found in the model; key columns may show as unused");
    }

    if let Some(deps) = &output.stats {
        println!();
        println!("--- Measure Dependencies ---");
        println!(
            "Measures: {} ({} with dependencies, {} isolated)",
            deps.total_measures,
            deps.measures_with_dependencies,
            deps.isolated_measures.len()
        );
        println!(
            "Dependencies per measure: {:.1} average, {} max",
            deps.average_dependencies, deps.max_dependencies
        );
        for (field, count) in &deps.most_referenced_fields {
            println!("  {:<58} {}", field.to_string(), count);
        }
    }

    print_error_report(&output.errors);
}

/// Every fact and indirect reference recorded for one field.
pub fn print_field_details(output: &AnalysisOutput, key: &FieldKey) {
    println!("=== Field: {} ===", key);
    let mut found = false;
    for fact in output.facts_for(key) {
        found = true;
        println!("{}", fact.kind);
        println!("  Page:   {}", fact.page);
        println!("  Object: {}", fact.object);
        println!("  File:   {}", fact.locator);
        println!("  Method: {}", fact.method);
        if let Some(detail) = &fact.detail {
            println!("  Confidence: {}", detail.confidence);
            if let (Some(line), Some(excerpt)) = (detail.line_number, &detail.excerpt) {
                println!("  Line {}: {}", line, excerpt);
            }
        }
    }
    if let Some(profile) = output.profile(key) {
        if !profile.indirectly_used_via_measures.is_empty() {
            found = true;
            println!("Indirect usage via measures:");
            for measure in &profile.indirectly_used_via_measures {
                println!("  -> {}", measure);
            }
        }
        if profile.has_relationship {
            found = true;
            println!("Used as a key in model relationships");
        }
        if let Some(blocker) = &profile.blocked_by {
            found = true;
            println!("Embedded in the definition of {}", blocker);
        }
    }
    if !found {
        println!("Field is not used");
    }
}

pub fn print_error_report(errors: &ErrorReport) {
    if !errors.has_errors() {
        return;
    }
    println!();
    println!("--- Errors ({}) ---", errors.len());
    for (kind, count) in errors.counts_by_kind() {
        println!("  {:<22} {:>3}  {}", kind.to_string(), count, kind.description());
    }
    println!();
    for entry in &errors.entries {
        println!("  {}: {}", entry.table, entry.message);
        if entry.fields_affected > 0 {
            println!("    Affected fields: {}", entry.fields_affected);
        }
    }
    println!("Fields not processed: {}", errors.total_affected_fields());
}

pub fn print_mutation_outcome(outcome: &MutationOutcome) {
    println!("=== Comment-out Summary ===");
    println!("Processed tables: {}", outcome.processed);
    println!("Succeeded:        {}", outcome.succeeded);
    println!("Failed:           {}", outcome.failed);
    println!("Excluded fields:  {}", outcome.excluded);
    println!();
    for table in &outcome.tables {
        let status = if table.success { "OK" } else { "FAILED" };
        let file = table
            .sql_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<7} {:<30} {}", status, table.table, file);
        if !table.commented.is_empty() {
            println!("  commented: {}", table.commented.join(", "));
        }
        for skipped in &table.skipped {
            println!("  kept {}: {}", skipped.alias, skipped.reason);
        }
    }
    print_error_report(&outcome.errors);
}

pub fn print_sql_fields(fields: &[SqlField]) {
    let mut current: Option<&str> = None;
    for field in fields {
        if current != Some(field.source_model.as_str()) {
            println!("{}", field.source_model);
            current = Some(field.source_model.as_str());
        }
        println!("  {}", field.field);
    }
    println!();
    println!("Total: {} fields", fields.len());
}

pub fn print_upstream_audit(audit: &UpstreamAudit) {
    println!("=== Upstream Layer Audit ===");
    println!("Layer: {}", audit.layer_path.display());
    println!();

    println!("Removable ({}):", audit.removable.len());
    if audit.removable.is_empty() {
        println!("  (none)");
    }
    for candidate in &audit.removable {
        println!("  {} (from {})", candidate.field, candidate.source_model);
    }
    println!();

    println!("Blocked ({}):", audit.blocked.len());
    if audit.blocked.is_empty() {
        println!("  (none)");
    }
    for blocked in &audit.blocked {
        println!("  {}", blocked.candidate.field);
        for detail in &blocked.details {
            println!("    {}", detail);
        }
    }

    if !audit.errors.is_empty() {
        println!();
        println!("Errors ({}):", audit.errors.len());
        for failure in &audit.errors {
            println!("  {}: {}", failure.field, failure.message);
        }
    }
}

pub fn print_mutation_tally(tally: &MutationTally) {
    println!();
    println!(
        "Upstream comment-out: {} commented, {} failed",
        tally.commented, tally.failed
    );
    print_error_report(&tally.errors);
}
