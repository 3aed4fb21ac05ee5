//! Integration tests for the analysis pipeline

use pretty_assertions::assert_eq;
use serde_json::json;

use rust_fieldaudit::diagnostics::{count_at_least, Level, NullSink};
use rust_fieldaudit::usage::UsageKind;
use rust_fieldaudit::{perform_analysis, AnalyzeOptions, AuditConfig, ErrorKind, FieldKey};

use crate::common::{analyze, sales_model, table_visual, TestContext};

fn key(qualified: &str) -> FieldKey {
    FieldKey::parse(qualified).unwrap()
}

// ============================================================================
// Usage classification
// ============================================================================

#[test]
fn test_unused_fields_of_sales_model() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));

    assert_eq!(
        output.unused_fields(),
        vec![
            key("Customer.CustomerName"),
            key("Sales.Discount"),
            key("Sales.LegacyCode"),
        ]
    );
}

#[test]
fn test_usage_kinds_are_recorded() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));

    let amount = output.profile(&key("Sales.Amount")).unwrap();
    assert!(amount.visualization);

    let region = output.profile(&key("Customer.Region")).unwrap();
    assert!(region.filter);
    assert!(!region.visualization);

    let customer_key = output.profile(&key("Customer.CustomerKey")).unwrap();
    assert!(customer_key.has_relationship);
    assert!(!customer_key.used_directly());
    assert!(customer_key.is_used());
}

#[test]
fn test_field_used_only_by_measure_is_indirect() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));

    let cost = output.profile(&key("Sales.Cost")).unwrap();
    assert!(!cost.used_directly());
    assert!(cost.indirectly_used_via_measures.contains("Margin"));
    assert!(cost.is_used());
    assert!(output.indirect.contains_key(&key("Sales.Cost")));
}

#[test]
fn test_statistics_match_profiles() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));

    let stats = output.statistics();
    assert_eq!(stats.analysed, 8);
    assert_eq!(stats.unused, 3);
    assert_eq!(stats.used, 5);
    assert_eq!(stats.relationship, 2);
}

#[test]
fn test_facts_deduplicated_per_page() {
    let (ctx, _) = sales_model();
    let visual = table_visual("Sales", "Amount");
    let report = ctx.build_pbix(
        "twice",
        &[
            ("Report/sections/000_Overview/visualContainers/0/config.json", visual.as_str()),
            ("Report/sections/000_Overview/visualContainers/1/config.json", visual.as_str()),
        ],
    );
    let (output, _) = analyze(&ctx.options(vec![report]));

    let amount = key("Sales.Amount");
    let visual_facts: Vec<_> = output
        .facts_for(&amount)
        .filter(|f| f.kind == UsageKind::Visualization)
        .collect();
    assert_eq!(visual_facts.len(), 1);
}

#[test]
fn test_unpacked_report_folder_is_scanned() {
    let (ctx, _) = sales_model();
    ctx.write(
        "unpacked/Report/sections/000_Overview/visualContainers/0/config.json",
        &table_visual("Sales", "Discount"),
    );
    let (output, _) = analyze(&ctx.options(vec![ctx.root.join("unpacked")]));

    assert!(output.profile(&key("Sales.Discount")).unwrap().visualization);
}

// ============================================================================
// Metadata-level usage
// ============================================================================

#[test]
fn test_rls_and_sort_targets_count_as_used() {
    let ctx = TestContext::new();
    ctx.add_table_definition(
        "Calendar",
        json!({
            "name": "Calendar",
            "columns": [
                {"name": "MonthName", "sourceColumn": "month_name", "sortByColumn": "MonthNumber"},
                {"name": "MonthNumber", "sourceColumn": "month_number"},
                {"name": "Owner", "sourceColumn": "owner"},
                {"name": "Spare", "sourceColumn": "spare"}
            ]
        }),
    );
    ctx.add_role("Owners", "Calendar", "'Calendar'[Owner] = USERPRINCIPALNAME()");
    let report = ctx.build_pbix(
        "calendar",
        &[(
            "Report/sections/000_Dates/visualContainers/0/config.json",
            table_visual("Calendar", "MonthName").as_str(),
        )],
    );
    let (output, _) = analyze(&ctx.options(vec![report]));

    assert!(output.profile(&key("Calendar.MonthNumber")).unwrap().sort_target);
    assert!(output.profile(&key("Calendar.Owner")).unwrap().rls_referenced);
    assert_eq!(output.unused_fields(), vec![key("Calendar.Spare")]);
}

#[test]
fn test_missing_relationships_warns() {
    let ctx = TestContext::new();
    ctx.add_table("Sales", &["Amount", "Quantity"]);
    let report = ctx.build_pbix(
        "sales",
        &[(
            "Report/sections/000_Overview/visualContainers/0/config.json",
            table_visual("Sales", "Amount").as_str(),
        )],
    );
    let (output, log) = analyze(&ctx.options(vec![report]));

    assert!(!output.relationships_found);
    assert!(log
        .iter()
        .any(|d| d.level == Level::Warn && d.message.contains("no relationships found")));
    assert_eq!(output.unused_fields(), vec![key("Sales.Quantity")]);
}

#[test]
fn test_hierarchy_levels_are_used() {
    let ctx = TestContext::new();
    ctx.add_table_definition(
        "Geography",
        json!({
            "name": "Geography",
            "columns": [
                {"name": "Country", "sourceColumn": "country"},
                {"name": "City", "sourceColumn": "city"},
                {"name": "Postcode", "sourceColumn": "postcode"}
            ],
            "hierarchies": [{
                "name": "Places",
                "levels": [{"name": "Country", "column": "Country"}, {"name": "City", "column": "City"}]
            }]
        }),
    );
    let (output, _) = analyze(&ctx.options(vec![]));

    assert!(output.profile(&key("Geography.City")).unwrap().hierarchy);
    assert_eq!(output.unused_fields(), vec![key("Geography.Postcode")]);
}

// ============================================================================
// Configuration and exclusions
// ============================================================================

#[test]
fn test_excluded_tables_and_technical_fields() {
    let ctx = TestContext::new();
    ctx.add_table("RefreshDate", &["LastRefresh"]);
    ctx.add_table("Orders", &["OrderNumber", "PartitionDate", "Notes"]);
    let (output, _) = analyze(&ctx.options(vec![]));

    assert!(output.schema.table("RefreshDate").is_none());
    let partition = output.profile(&key("Orders.PartitionDate"));
    assert!(partition.is_none(), "pattern-excluded field should not be loaded");
    assert_eq!(output.statistics().analysed, 2);
}

#[test]
fn test_display_skip_field_never_eligible() {
    let ctx = TestContext::new();
    ctx.add_table("Orders", &["OrderNumber", "TableIndicator"]);
    let (output, _) = analyze(&ctx.options(vec![]));

    let indicator = output.profile(&key("Orders.TableIndicator")).unwrap();
    assert_eq!(indicator.excluded.as_deref(), Some("technical field"));
    assert_eq!(output.unused_fields(), vec![key("Orders.OrderNumber")]);
    assert_eq!(output.statistics().analysed, 1);
}

#[test]
fn test_custom_config_excludes_table() {
    let (ctx, report) = sales_model();
    let mut options = ctx.options(vec![report]);
    options.config = AuditConfig::from_toml_str("tables_to_exclude = [\"Customer\"]").unwrap();
    let (output, _) = analyze(&options);

    assert!(output.schema.table("Customer").is_none());
    assert_eq!(
        output.unused_fields(),
        vec![key("Sales.Discount"), key("Sales.LegacyCode")]
    );
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_missing_tables_directory_fails() {
    let ctx = TestContext::new();
    let options = AnalyzeOptions {
        report_paths: vec![],
        model_path: ctx.model_dir(),
        sql_path: None,
        config: AuditConfig::default(),
        detailed: false,
    };
    let result = perform_analysis(&options, &mut NullSink, &mut |_| {});
    assert!(result.is_err());
}

#[test]
fn test_missing_report_is_recorded_not_fatal() {
    let (ctx, report) = sales_model();
    let missing = ctx.root.join("missing.pbix");
    let (output, log) = analyze(&ctx.options(vec![missing, report]));

    assert!(output.errors.has_errors());
    assert!(output
        .errors
        .entries
        .iter()
        .any(|e| e.kind == ErrorKind::ArtifactUnreadable));
    assert!(count_at_least(&log, Level::Error) >= 1);
    assert_eq!(output.unused_fields().len(), 3);
}

#[test]
fn test_damaged_archive_entry_does_not_hide_the_others() {
    let (ctx, _) = sales_model();
    let report = ctx.build_damaged_pbix(
        "damaged",
        &[
            (
                "Report/sections/000_Overview/visualContainers/0/config.json",
                table_visual("Sales", "Amount").as_str(),
            ),
            (
                "Report/sections/001_Detail/visualContainers/0/config.json",
                r#"{"name": "visual02", "payload": "DAMAGED_ENTRY"}"#,
            ),
        ],
        "DAMAGED_ENTRY",
    );
    let (output, _) = analyze(&ctx.options(vec![report]));

    assert!(output.profile(&key("Sales.Amount")).unwrap().visualization);
    let unreadable: Vec<_> = output
        .errors
        .entries
        .iter()
        .filter(|e| e.kind == ErrorKind::ArtifactUnreadable)
        .collect();
    assert_eq!(unreadable.len(), 1);
    assert!(unreadable[0].message.contains("001_Detail"));
}

#[test]
fn test_malformed_table_definition_is_skipped() {
    let (ctx, report) = sales_model();
    ctx.write("model/tables/Broken/Broken.json", "{ not json");
    let (output, _) = analyze(&ctx.options(vec![report]));

    assert!(output.schema.table("Broken").is_none());
    assert!(output
        .errors
        .entries
        .iter()
        .any(|e| e.table == "Broken" && e.kind == ErrorKind::ArtifactMalformed));
}

// ============================================================================
// Composition check
// ============================================================================

#[test]
fn test_component_of_used_column_is_blocked() {
    let ctx = TestContext::new();
    ctx.add_table("Sales", &["Net", "Tax", "Gross"]);
    ctx.write_sql(
        "DimSales",
        "select\n    net\n    , tax\n    , net + tax as Gross\nfrom {{ ref('marts_sales') }}\n",
    );
    let report = ctx.build_pbix(
        "sales",
        &[(
            "Report/sections/000_Overview/visualContainers/0/config.json",
            table_visual("Sales", "Gross").as_str(),
        )],
    );
    let (output, _) = analyze(&ctx.options(vec![report]));

    let net = output.profile(&key("Sales.Net")).unwrap();
    assert_eq!(net.blocked_by, Some(key("Sales.Gross")));
    assert!(output.unused_fields().is_empty());
    assert_eq!(output.statistics().blocked, 2);
}

#[test]
fn test_detailed_run_attaches_provenance() {
    let (ctx, report) = sales_model();
    let mut options = ctx.options(vec![report]);
    options.detailed = true;
    let (output, _) = analyze(&options);

    assert!(output.facts.iter().all(|f| f.detail.is_some()));
    let stats = output.stats.as_ref().unwrap();
    assert_eq!(stats.total_measures, 1);
    assert_eq!(stats.measures_with_dependencies, 1);
}

#[test]
fn test_output_serializes_to_json() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));

    let value = serde_json::to_value(&output).unwrap();
    assert!(value["indirect"]["Sales.Cost"].is_array());
    assert_eq!(value["profiles"].as_array().unwrap().len(), 8);
}
