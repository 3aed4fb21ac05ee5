//! Integration tests for commenting fields out of SQL models

use pretty_assertions::assert_eq;

use rust_fieldaudit::diagnostics::NullSink;
use rust_fieldaudit::sql::{parses, render_templates, SqlStructure, AliasPolicy};
use rust_fieldaudit::{apply_changes, AuditConfig, ErrorKind, FieldKey};

use crate::common::{analyze, sales_model, CUSTOMER_SQL};

fn key(qualified: &str) -> FieldKey {
    FieldKey::parse(qualified).unwrap()
}

#[test]
fn test_apply_all_unused_fields() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));
    let selected = output.unused_fields();

    let outcome = apply_changes(
        &output,
        &ctx.sql_dir(),
        &selected,
        &AuditConfig::default(),
        &mut NullSink,
    );

    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed, 0);
    assert!(!outcome.errors.has_errors());

    let sales = ctx.read(&ctx.sql_dir().join("DimSales.sql"));
    assert_eq!(sales.matches("{# UNUSED FIELD (script ").count(), 2);
    assert!(sales.contains("    amount\n    , cost\n"));
    assert!(sales.contains(": , discount #}"));
    assert!(sales.contains(": , legacy_code as LegacyCode #}"));

    let structure = SqlStructure::analyze(&sales, AliasPolicy::Permissive).unwrap();
    assert_eq!(structure.safe_aliases(), vec!["amount", "cost", "CustomerKey"]);
    assert!(parses(&render_templates(&sales)).is_ok());
}

#[test]
fn test_apply_leaves_other_lines_untouched() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));

    apply_changes(
        &output,
        &ctx.sql_dir(),
        &[key("Customer.CustomerName")],
        &AuditConfig::default(),
        &mut NullSink,
    );

    let before: Vec<&str> = CUSTOMER_SQL.lines().collect();
    let customer = ctx.read(&ctx.sql_dir().join("DimCustomer.sql"));
    let after: Vec<&str> = customer.lines().collect();
    assert_eq!(before.len(), after.len());
    for (i, (old, new)) in before.iter().zip(&after).enumerate() {
        if i == 2 {
            assert!(new.starts_with("    {# UNUSED FIELD"));
            assert!(new.ends_with("customer_name as CustomerName, #}"));
        } else {
            assert_eq!(old, new);
        }
    }
    assert!(customer.ends_with('\n'));
}

#[test]
fn test_second_run_changes_nothing() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report.clone()]));
    let config = AuditConfig::default();
    apply_changes(
        &output,
        &ctx.sql_dir(),
        &output.unused_fields(),
        &config,
        &mut NullSink,
    );
    let first = ctx.read(&ctx.sql_dir().join("DimSales.sql"));

    let (output, _) = analyze(&ctx.options(vec![report]));
    let outcome = apply_changes(
        &output,
        &ctx.sql_dir(),
        &[key("Sales.Discount")],
        &config,
        &mut NullSink,
    );

    assert_eq!(ctx.read(&ctx.sql_dir().join("DimSales.sql")), first);
    assert!(outcome
        .errors
        .entries
        .iter()
        .all(|e| e.kind == ErrorKind::ColumnMappingMissing));
}

#[test]
fn test_missing_sql_file_fails_only_that_table() {
    let (ctx, report) = sales_model();
    std::fs::remove_file(ctx.sql_dir().join("DimCustomer.sql")).unwrap();
    let (output, _) = analyze(&ctx.options(vec![report]));

    let outcome = apply_changes(
        &output,
        &ctx.sql_dir(),
        &output.unused_fields(),
        &AuditConfig::default(),
        &mut NullSink,
    );

    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors.failed_tables(), vec!["Customer"]);
    assert_eq!(outcome.errors.entries[0].kind, ErrorKind::SqlFileNotFound);
    assert_eq!(outcome.errors.total_affected_fields(), 1);
    assert!(ctx
        .read(&ctx.sql_dir().join("DimSales.sql"))
        .contains("UNUSED FIELD"));
}

#[test]
fn test_excluded_fields_are_not_touched() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));
    let config = AuditConfig::from_toml_str("exclusion_patterns = [\"legacy\"]").unwrap();

    let outcome = apply_changes(
        &output,
        &ctx.sql_dir(),
        &[key("Sales.Discount"), key("Sales.LegacyCode")],
        &config,
        &mut NullSink,
    );

    assert_eq!(outcome.excluded, 1);
    let sales = ctx.read(&ctx.sql_dir().join("DimSales.sql"));
    assert!(sales.contains("\n    , legacy_code as LegacyCode\n"));
    assert!(sales.contains(": , discount #}"));
}

#[test]
fn test_union_model_is_rewritten_in_every_block() {
    let (ctx, report) = sales_model();
    ctx.write_sql(
        "DimCustomer",
        "select\n    customer_key as CustomerKey\n    , customer_name as CustomerName\n    , region as Region\nfrom {{ ref('marts_customer') }}\nunion all\nselect\n    customer_key as CustomerKey\n    , customer_name as CustomerName\n    , region as Region\nfrom {{ ref('marts_prospect') }}\n",
    );
    let (output, _) = analyze(&ctx.options(vec![report]));

    let outcome = apply_changes(
        &output,
        &ctx.sql_dir(),
        &[key("Customer.CustomerName")],
        &AuditConfig::default(),
        &mut NullSink,
    );

    assert_eq!(outcome.succeeded, 1);
    let customer = ctx.read(&ctx.sql_dir().join("DimCustomer.sql"));
    assert_eq!(customer.matches("UNUSED FIELD").count(), 2);
    let structure = SqlStructure::analyze(&customer, AliasPolicy::Permissive).unwrap();
    assert_eq!(structure.blocks.len(), 2);
    for block in &structure.blocks {
        let aliases: Vec<&str> = block.columns.iter().filter_map(|c| c.alias.as_deref()).collect();
        assert_eq!(aliases, vec!["CustomerKey", "Region"]);
    }
}

#[test]
fn test_union_branch_sharing_a_line_keeps_column_in_all_branches() {
    let (ctx, report) = sales_model();
    let union = "select\n    customer_key as CustomerKey\n    , customer_name as CustomerName\n    , region as Region\nfrom {{ ref('marts_customer') }}\nunion all\nselect\n    customer_key as CustomerKey\n    , customer_name as CustomerName, region as Region\nfrom {{ ref('marts_prospect') }}\n";
    ctx.write_sql("DimCustomer", union);
    let (output, _) = analyze(&ctx.options(vec![report]));

    let outcome = apply_changes(
        &output,
        &ctx.sql_dir(),
        &[key("Customer.CustomerName")],
        &AuditConfig::default(),
        &mut NullSink,
    );

    assert_eq!(ctx.read(&ctx.sql_dir().join("DimCustomer.sql")), union);
    assert_eq!(outcome.succeeded, 0);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors.entries.len(), 1);
    assert_eq!(outcome.errors.entries[0].kind, ErrorKind::ColumnNotCommented);
    assert!(outcome.errors.entries[0].message.contains("holds another column"));
}

#[test]
fn test_skipped_column_is_reported_not_counted_as_success() {
    let (ctx, report) = sales_model();
    ctx.write_sql(
        "DimSales",
        "select\n    amount\n    , cost\n    , discount, legacy_code as LegacyCode\n    , customer_key as CustomerKey\nfrom {{ ref('marts_sales') }}\n",
    );
    let (output, _) = analyze(&ctx.options(vec![report]));

    let outcome = apply_changes(
        &output,
        &ctx.sql_dir(),
        &[key("Sales.Discount")],
        &AuditConfig::default(),
        &mut NullSink,
    );

    assert_eq!(outcome.succeeded, 0);
    assert_eq!(outcome.failed, 1);
    let table = &outcome.tables[0];
    assert!(!table.success);
    assert!(table.commented.is_empty());
    assert_eq!(table.skipped[0].alias, "discount");
    assert_eq!(outcome.errors.entries[0].kind, ErrorKind::ColumnNotCommented);
    assert_eq!(outcome.errors.total_affected_fields(), 1);
}

#[test]
fn test_unmapped_fields_are_counted_once() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));

    let outcome = apply_changes(
        &output,
        &ctx.sql_dir(),
        &[key("Sales.Rebate"), key("Sales.Freight"), key("Sales.Duty")],
        &AuditConfig::default(),
        &mut NullSink,
    );

    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors.entries.len(), 3);
    assert_eq!(outcome.errors.total_affected_fields(), 3);
    assert!(outcome
        .errors
        .entries
        .iter()
        .all(|e| e.kind == ErrorKind::ColumnMappingMissing));
}

#[test]
fn test_block_comment_style() {
    let (ctx, report) = sales_model();
    let (output, _) = analyze(&ctx.options(vec![report]));
    let config = AuditConfig::from_toml_str("comment_style = \"block\"").unwrap();

    apply_changes(
        &output,
        &ctx.sql_dir(),
        &[key("Sales.Discount")],
        &config,
        &mut NullSink,
    );

    let sales = ctx.read(&ctx.sql_dir().join("DimSales.sql"));
    assert!(sales.contains("/* UNUSED FIELD (commented by script "));
    assert!(sales.contains(": , discount */"));
}
