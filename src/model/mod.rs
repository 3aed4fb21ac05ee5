//! Semantic model metadata

mod auxiliary;
mod measures;
mod schema;
mod source_alias;

pub use auxiliary::{
    find_relationships, find_rls_fields, find_sort_targets, rls_references, Relationship,
    RelationshipScan,
};
pub use measures::{
    extract_measures_from_text, extract_script_measures, find_measures_folder,
    load_external_measures, load_measure_definitions, model_measures, MeasureDefinitions,
};
pub use schema::{
    find_tables_dir, load_schema, FieldKey, ModelSchema, SkipReason, SkippedTable, TableSchema,
};
pub use source_alias::{
    alias_from_partitions, default_alias, resolve_warehouse_alias, strip_model_prefix,
};
