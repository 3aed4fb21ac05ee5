//! Unit tests for model metadata loading
//!
//! These tests build small model folders on disk and check what the loaders
//! pick up from them.

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use rust_fieldaudit::diagnostics::NullSink;
use rust_fieldaudit::model::{
    find_relationships, load_measure_definitions, load_schema, resolve_warehouse_alias, FieldKey,
    SkipReason,
};
use rust_fieldaudit::usage::{build_dependencies, close_indirect_usage};
use rust_fieldaudit::AuditConfig;

/// Helper to write a file below the model root, creating parent folders
fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn write_table(root: &Path, name: &str, definition: serde_json::Value) {
    write(
        root,
        &format!("tables/{}/{}.json", name, name),
        &definition.to_string(),
    );
}

fn skip_reason(schema: &rust_fieldaudit::model::ModelSchema, name: &str) -> Option<SkipReason> {
    schema
        .skipped
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.reason.clone())
}

#[test]
fn test_load_schema_skip_reasons() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_table(root, "Sales", json!({"columns": [{"name": "Amount"}]}));
    write_table(root, "_Measures", json!({"columns": [{"name": "Dummy"}]}));
    write_table(root, "DateCalc", json!({"columns": [{"name": "Day"}]}));
    write_table(
        root,
        "Params",
        json!({"columns": [{"name": "Value", "type": "calculatedTableColumn"}]}),
    );
    write_table(
        root,
        "Ratios",
        json!({"columns": [{"name": "Ratio", "type": "calculated", "expression": "1"}]}),
    );
    fs::create_dir_all(root.join("tables/Orphan")).unwrap();

    let schema = load_schema(root, &AuditConfig::default(), &mut NullSink).unwrap();

    let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Sales"]);
    assert_eq!(skip_reason(&schema, "_Measures"), Some(SkipReason::MeasuresHolder));
    assert_eq!(skip_reason(&schema, "DateCalc"), Some(SkipReason::CalculatedTable));
    assert_eq!(skip_reason(&schema, "Params"), Some(SkipReason::CalculatedTable));
    assert_eq!(skip_reason(&schema, "Ratios"), Some(SkipReason::NoPhysicalColumns));
    assert_eq!(skip_reason(&schema, "Orphan"), Some(SkipReason::DefinitionMissing));
}

#[test]
fn test_tables_directory_found_case_insensitively() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "Tables/Sales/Sales.json",
        &json!({"columns": [{"name": "Amount"}]}).to_string(),
    );

    let schema = load_schema(dir.path(), &AuditConfig::default(), &mut NullSink).unwrap();
    assert_eq!(schema.all_fields(), vec![FieldKey::new("Sales", "Amount")]);
}

#[test]
fn test_relationships_from_bim_and_annotation() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "model.bim",
        &json!({"model": {"relationships": [
            {"fromTable": "Sales", "fromColumn": "CustomerKey", "toTable": "Customer", "toColumn": "CustomerKey"}
        ]}})
        .to_string(),
    );
    let embedded = json!([
        {"fromTable": "Sales", "fromColumn": "DateKey", "toTable": "Calendar", "toColumn": "DateKey"}
    ])
    .to_string();
    write(
        root,
        "annotations.json",
        &json!({"annotations": [{"name": "TabularEditor_Relationships", "value": embedded}]})
            .to_string(),
    );

    let scan = find_relationships(root, &mut NullSink);

    assert!(scan.found());
    assert_eq!(scan.relationships.len(), 2);
    let fields = scan.fields();
    assert!(fields.contains(&FieldKey::new("Calendar", "DateKey")));
    assert!(fields.contains(&FieldKey::new("sales", "customerkey")));
}

#[test]
fn test_model_measures_override_external_ones() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "measures/sales.dax",
        "MEASURE 'Sales'[Total] = SUM('Sales'[Amount])\n\
         MEASURE 'Sales'[Avg Price] = [Total] / SUM('Sales'[Qty])\n",
    );
    write_table(
        root,
        "Sales",
        json!({"columns": [
            {"name": "Amount"},
            {"name": "Net"},
            {"name": "Qty"},
            {"name": "Total", "type": "calculated", "expression": "SUM('Sales'[Net])"}
        ]}),
    );
    let config = AuditConfig::default();
    let schema = load_schema(root, &config, &mut NullSink).unwrap();

    let definitions = load_measure_definitions(&schema, &config.measures_folder_name, &mut NullSink);
    assert_eq!(definitions.len(), 2);
    assert_eq!(definitions["Total"], "SUM('Sales'[Net])");

    let fields = schema.all_fields();
    let graph = build_dependencies(&definitions, &fields);
    let indirect = close_indirect_usage(&[], &graph, &fields);

    let net = &indirect[&FieldKey::new("Sales", "Net")];
    assert_eq!(
        net.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["Avg Price", "Total"]
    );
    assert!(indirect.contains_key(&FieldKey::new("Sales", "Qty")));
    assert!(!indirect.contains_key(&FieldKey::new("Sales", "Amount")));
}

#[test]
fn test_warehouse_alias_from_partition_source() {
    let dir = TempDir::new().unwrap();
    write_table(
        dir.path(),
        "Customer",
        json!({
            "columns": [{"name": "Name"}],
            "partitions": [{
                "name": "Customer",
                "source": {"type": "m", "expression": [
                    "let",
                    "    Source = Snowflake.Databases(\"acct\"),",
                    "    Table = Source{[Name=\"DimClient\",Kind=\"Table\"]}[Data]",
                    "in",
                    "    Table"
                ]}
            }]
        }),
    );
    write_table(dir.path(), "Product", json!({"columns": [{"name": "Sku"}]}));
    let config = AuditConfig::default();
    let schema = load_schema(dir.path(), &config, &mut NullSink).unwrap();

    assert_eq!(
        resolve_warehouse_alias(&schema, "Customer", &config).unwrap(),
        "DimClient"
    );
    assert_eq!(
        resolve_warehouse_alias(&schema, "Product", &config).unwrap(),
        "DimProduct"
    );
    assert!(resolve_warehouse_alias(&schema, "Missing", &config).is_err());
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fieldaudit.toml");
    fs::write(
        &path,
        "layer_prefix = \"core_\"\nverify_with_parser = false\ndisplay_skip_fields = []\n",
    )
    .unwrap();

    let config = AuditConfig::from_path(&path).unwrap();
    assert_eq!(config.layer_prefix, "core_");
    assert!(!config.verify_with_parser);
    assert!(config.display_skip_fields.is_empty());
    assert_eq!(config.measures_folder_name, "measures");

    let missing = AuditConfig::from_path(&dir.path().join("absent.toml"));
    assert_eq!(
        missing.unwrap_err().kind(),
        rust_fieldaudit::ErrorKind::Config
    );
}
