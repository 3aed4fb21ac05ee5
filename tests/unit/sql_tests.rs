//! Unit tests for SQL model analysis and rewriting
//!
//! These tests exercise the analyzer and mutation engine on complete dbt-style
//! models rather than single projections.

use std::collections::BTreeSet;
use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use rust_fieldaudit::config::CommentStyle;
use rust_fieldaudit::diagnostics::NullSink;
use rust_fieldaudit::sql::{
    collect_sql_fields, comment_out_columns, comment_out_in_file, find_sql_file, mask,
    verify_rewrite, AliasPolicy, CommentMarker, SqlStructure, Verification,
};
use rust_fieldaudit::{AuditConfig, ErrorKind};

const CTE_MODEL: &str = "\
{{ config(materialized='view', alias='DimCustomer') }}

with src as (
    select id, name, 'x, y' as tag
    from {{ ref('marts_customer') }}
)

select
    id as CustomerId
    , name as CustomerName -- display name
    , tag
from src
";

fn targets(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_lowercase()).collect()
}

fn marker() -> CommentMarker {
    CommentMarker::new(CommentStyle::Template, "20260101_000000")
}

#[test]
fn test_mask_preserves_layout() {
    let masked = mask(CTE_MODEL);
    assert_eq!(masked.code.len(), CTE_MODEL.len());
    assert_eq!(masked.code.lines().count(), CTE_MODEL.lines().count());
    assert!(!masked.code.contains("display name"));
    assert!(!masked.code.contains("x, y"));
    assert!(masked.comment_free.contains("'x, y'"));
}

#[test]
fn test_cte_model_uses_final_projection() {
    let structure = SqlStructure::analyze(CTE_MODEL, AliasPolicy::Permissive).unwrap();
    assert!(!structure.has_top_level_union);
    assert_eq!(
        structure.safe_aliases(),
        vec!["CustomerId", "CustomerName", "tag"]
    );
}

#[test]
fn test_cte_columns_are_never_rewritten() {
    let report = comment_out_columns(CTE_MODEL, &targets(&["name", "CustomerName"]), &marker())
        .unwrap();

    assert_eq!(report.commented_aliases(), targets(&["customername"]));
    assert!(report.text.contains("    select id, name, 'x, y' as tag\n"));
    assert!(report
        .text
        .contains("    {# UNUSED FIELD (script 20260101_000000): , name as CustomerName -- display name #}\n"));
    assert_eq!(report.text.lines().count(), CTE_MODEL.lines().count());
}

#[test]
fn test_rewrite_of_first_column_moves_comma() {
    let report = comment_out_columns(CTE_MODEL, &targets(&["CustomerId"]), &marker()).unwrap();

    assert!(report.text.contains("{# UNUSED FIELD (script 20260101_000000): id as CustomerId #}"));
    assert!(report.text.contains("\n    name as CustomerName -- display name\n"));
    assert_eq!(report.commas_repaired.len(), 1);
    let structure = SqlStructure::analyze(&report.text, AliasPolicy::Permissive).unwrap();
    assert_eq!(structure.safe_aliases(), vec!["CustomerName", "tag"]);
}

#[test]
fn test_keyword_aware_collector_skips_keyword_aliases() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("DimStatus.sql"),
        "select\n    status\n    , case when active then 1 else 0 end\nfrom t\n",
    )
    .unwrap();

    let permissive = collect_sql_fields(dir.path(), AliasPolicy::Permissive, &mut NullSink);
    let strict = collect_sql_fields(dir.path(), AliasPolicy::KeywordAware, &mut NullSink);

    let names = |fields: &[rust_fieldaudit::sql::SqlField]| -> Vec<String> {
        fields.iter().map(|f| f.qualified()).collect()
    };
    assert_eq!(names(&permissive), vec!["DimStatus.status", "DimStatus.end"]);
    assert_eq!(names(&strict), vec!["DimStatus.status"]);
}

#[test]
fn test_find_sql_file_by_config_alias() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("customers");
    fs::create_dir_all(&nested).unwrap();
    let path = nested.join("rpt_customers.sql");
    fs::write(&path, CTE_MODEL).unwrap();

    let found = find_sql_file("DimCustomer", dir.path(), &AuditConfig::default(), &mut NullSink)
        .unwrap();
    assert_eq!(found, path);

    let missing = find_sql_file("DimVendor", dir.path(), &AuditConfig::default(), &mut NullSink);
    assert_eq!(missing.unwrap_err().kind(), ErrorKind::SqlFileNotFound);
}

#[test]
fn test_file_rewrite_and_noop() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("DimCustomer.sql");
    fs::write(&path, CTE_MODEL).unwrap();

    let first = comment_out_in_file(&path, &targets(&["tag"]), &marker(), true, &mut NullSink)
        .unwrap();
    assert!(first.written);
    assert_eq!(first.verification, Verification::Verified);
    let rewritten = fs::read_to_string(&path).unwrap();
    assert!(rewritten.contains("    , name as CustomerName -- display name\n"));

    let second = comment_out_in_file(&path, &targets(&["tag"]), &marker(), true, &mut NullSink)
        .unwrap();
    assert!(!second.written);
    assert!(second.commented.is_empty());
    assert_eq!(fs::read_to_string(&path).unwrap(), rewritten);
}

#[test]
fn test_file_without_select_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("macro.sql");
    fs::write(&path, "{% macro cents(x) %}{{ x }} * 100{% endmacro %}\n").unwrap();

    let result = comment_out_in_file(&path, &targets(&["x"]), &marker(), true, &mut NullSink);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::SqlParseFailed);
}

#[test]
fn test_verification_outcomes() {
    let original = "select\n  a\n  , b\nfrom t";
    assert_eq!(
        verify_rewrite(original, "select\n  a\n\nfrom t"),
        Verification::Verified
    );
    assert!(verify_rewrite(original, "select\n  a,\n  , b\nfrom t").is_broken());
    assert!(matches!(
        verify_rewrite("select ??? from", "select a from t"),
        Verification::Inconclusive(_)
    ));
}
