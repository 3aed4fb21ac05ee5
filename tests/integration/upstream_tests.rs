//! Integration tests for the upstream-layer audit

use pretty_assertions::assert_eq;

use rust_fieldaudit::diagnostics::NullSink;
use rust_fieldaudit::model::load_schema;
use rust_fieldaudit::sql::{collect_sql_fields, AliasPolicy, CommentMarker};
use rust_fieldaudit::upstream::layer_path_for;
use rust_fieldaudit::{
    analyze_upstream, audit_model_fields, comment_out_upstream, AuditConfig, CommentStyle,
    ErrorKind, FieldKey,
};

use crate::common::TestContext;

const MARTS_SALES: &str = "\
select
    sales_id
    , discount
    , legacy_code as LegacyCode
    , gross - net as Rebate
    , net
    , gross
    , old_flag
from {{ source('erp', 'sales') }}
";

/// Reporting models over `marts_sales`; `DimOrders` still reads LegacyCode.
fn layered_project() -> TestContext {
    let ctx = TestContext::new();
    ctx.add_table("Sales", &["Discount", "LegacyCode", "Net", "Rebate"]);
    ctx.write_sql(
        "DimSales",
        "select\n    discount\n    , LegacyCode\n    , net\n    , Rebate\nfrom {{ ref('marts_sales') }}\n",
    );
    ctx.write_sql(
        "DimOrders",
        "select\n    o.order_id\n    , s.LegacyCode\nfrom {{ ref('marts_orders') }} o\njoin {{ ref('marts_sales') }} s on s.sales_id = o.sales_id\n",
    );
    ctx.write_layer_sql("marts_sales", MARTS_SALES);
    ctx
}

fn fields(names: &[&str]) -> Vec<FieldKey> {
    names.iter().map(|n| FieldKey::parse(n).unwrap()).collect()
}

#[test]
fn test_layer_path_is_sibling_of_reporting() {
    let ctx = layered_project();
    let layer = layer_path_for(&ctx.sql_dir(), &AuditConfig::default()).unwrap();
    assert_eq!(layer, ctx.layer_dir());
}

#[test]
fn test_removable_and_blocked_fields() {
    let ctx = layered_project();
    let config = AuditConfig::default();
    let schema = load_schema(&ctx.model_dir(), &config, &mut NullSink).unwrap();

    let audit = analyze_upstream(
        &ctx.sql_dir(),
        &schema,
        &fields(&["Sales.Discount", "Sales.LegacyCode", "Sales.Net"]),
        &config,
        &mut NullSink,
        &mut |_| {},
    )
    .unwrap();

    let removable: Vec<&str> = audit.removable.iter().map(|c| c.field.as_str()).collect();
    assert_eq!(removable, vec!["Sales.Discount"]);
    assert_eq!(audit.removable[0].source_model, "marts_sales");

    assert_eq!(audit.blocked.len(), 2);
    let legacy = &audit.blocked[0];
    assert_eq!(legacy.candidate.field, "Sales.LegacyCode");
    assert_eq!(legacy.blocking_files, vec!["DimOrders.sql"]);

    let net = &audit.blocked[1];
    assert_eq!(net.blocking_files, vec!["marts_sales.sql"]);
    assert!(net.details[0].contains("internal dependency on line 5"));

    assert_eq!(audit.summary.removable, 1);
    assert_eq!(audit.summary.blocked, 2);
    assert_eq!(audit.summary.errors, 0);
}

#[test]
fn test_unresolvable_field_is_an_error_entry() {
    let ctx = layered_project();
    let config = AuditConfig::default();
    let schema = load_schema(&ctx.model_dir(), &config, &mut NullSink).unwrap();

    let audit = analyze_upstream(
        &ctx.sql_dir(),
        &schema,
        &fields(&["Orders.OrderId"]),
        &config,
        &mut NullSink,
        &mut |_| {},
    )
    .unwrap();

    assert!(audit.removable.is_empty());
    assert_eq!(audit.errors.len(), 1);
    assert_eq!(audit.errors[0].field, "Orders.OrderId");
}

#[test]
fn test_skip_list_fields_are_never_proposed() {
    let ctx = layered_project();
    let config = AuditConfig::default();
    let schema = load_schema(&ctx.model_dir(), &config, &mut NullSink).unwrap();

    let audit = analyze_upstream(
        &ctx.sql_dir(),
        &schema,
        &fields(&["Sales.SourceSystem"]),
        &config,
        &mut NullSink,
        &mut |_| {},
    )
    .unwrap();

    assert!(audit.removable.is_empty());
    assert!(audit.blocked.is_empty());
    assert!(audit.errors.is_empty());
}

#[test]
fn test_comment_out_removable_upstream_fields() {
    let ctx = layered_project();
    let config = AuditConfig::default();
    let schema = load_schema(&ctx.model_dir(), &config, &mut NullSink).unwrap();
    let audit = analyze_upstream(
        &ctx.sql_dir(),
        &schema,
        &fields(&["Sales.Discount", "Sales.LegacyCode"]),
        &config,
        &mut NullSink,
        &mut |_| {},
    )
    .unwrap();

    let marker = CommentMarker::new(CommentStyle::Template, "20260101_120000");
    let tally = comment_out_upstream(&audit, &config, &marker, &mut NullSink);

    assert_eq!(tally.commented, 1);
    assert_eq!(tally.failed, 0);
    let marts = ctx.read(&ctx.layer_dir().join("marts_sales.sql"));
    assert!(marts.contains("    {# UNUSED FIELD (script 20260101_120000): , discount #}\n"));
    assert!(marts.contains("\n    , legacy_code as LegacyCode\n"));
}

#[test]
fn test_upstream_column_on_shared_line_is_reported() {
    let ctx = layered_project();
    let shared = MARTS_SALES.replace("    , discount\n", "    , spare, discount\n");
    ctx.write_layer_sql("marts_sales", &shared);
    let config = AuditConfig::default();
    let schema = load_schema(&ctx.model_dir(), &config, &mut NullSink).unwrap();
    let audit = analyze_upstream(
        &ctx.sql_dir(),
        &schema,
        &fields(&["Sales.Discount"]),
        &config,
        &mut NullSink,
        &mut |_| {},
    )
    .unwrap();
    assert_eq!(audit.removable.len(), 1);

    let marker = CommentMarker::new(CommentStyle::Template, "20260101_120000");
    let tally = comment_out_upstream(&audit, &config, &marker, &mut NullSink);

    assert_eq!(tally.commented, 0);
    assert_eq!(tally.failed, 1);
    assert_eq!(tally.errors.entries.len(), 1);
    assert_eq!(tally.errors.entries[0].kind, ErrorKind::ColumnNotCommented);
    assert_eq!(ctx.read(&ctx.layer_dir().join("marts_sales.sql")), shared);
}

#[test]
fn test_audit_collected_layer_fields() {
    let ctx = layered_project();
    let config = AuditConfig::default();
    let layer = ctx.layer_dir();
    let collected = collect_sql_fields(&layer, AliasPolicy::Permissive, &mut NullSink);
    assert_eq!(collected.len(), 7);

    let audit = audit_model_fields(&layer, &ctx.sql_dir(), &collected, &config, &mut NullSink);

    let removable: Vec<&str> = audit.removable.iter().map(|c| c.field.as_str()).collect();
    assert_eq!(removable, vec!["marts_sales.old_flag"]);
    let blocked: Vec<&str> = audit
        .blocked
        .iter()
        .map(|b| b.candidate.field.as_str())
        .collect();
    assert_eq!(
        blocked,
        vec![
            "marts_sales.sales_id",
            "marts_sales.discount",
            "marts_sales.LegacyCode",
            "marts_sales.Rebate",
            "marts_sales.net",
            "marts_sales.gross",
        ]
    );
}
