//! Warehouse alias of a model table, read from its partition source expressions.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::json;
use crate::model::schema::{ModelSchema, TableSchema};

/// Tried in order against each partition expression.
static SOURCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)Source\{[^}]*Item\s*=\s*"([^"]+)""#,
        r#"(?i)\[Name\s*=\s*"([^"]+)"\s*,\s*Kind\s*=\s*"Table"\]"#,
        r#"(?i)\[Name\s*=\s*"([^"]+)"\s*,\s*Kind\s*=\s*"View"\]"#,
        r#"(?i)#"(Dim[^"]*)""#,
        r#"(?i)#"(Fact[^"]*)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Alias named by the partition sources, if any.
pub fn alias_from_partitions(table: &TableSchema, config: &AuditConfig) -> Option<String> {
    let expressions: Vec<String> = json::array_field(&table.definition, "partitions")
        .iter()
        .filter_map(|partition| {
            partition
                .get("source")
                .and_then(|source| source.get("expression"))
                .and_then(|expression| json::joined_text(expression, "\n"))
        })
        .collect();

    for expression in &expressions {
        for pattern in SOURCE_PATTERNS.iter() {
            for captures in pattern.captures_iter(expression) {
                let candidate = captures[1].trim();
                let ignored = config
                    .ignored_source_aliases
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(candidate));
                if !candidate.is_empty() && !ignored {
                    return Some(candidate.to_string());
                }
            }
        }
    }
    None
}

/// `Dim<Table>` unless the table name already carries a model prefix.
pub fn default_alias(table_name: &str, config: &AuditConfig) -> String {
    if config
        .model_name_prefixes
        .iter()
        .any(|prefix| table_name.starts_with(prefix.as_str()))
    {
        table_name.to_string()
    } else {
        format!("Dim{}", table_name)
    }
}

/// Resolve the warehouse alias for a table of the loaded schema.
pub fn resolve_warehouse_alias(
    schema: &ModelSchema,
    table_name: &str,
    config: &AuditConfig,
) -> Result<String, AuditError> {
    let table = schema
        .table(table_name)
        .ok_or_else(|| AuditError::AliasNotResolved {
            table: table_name.to_string(),
            message: "table definition not loaded from model".to_string(),
        })?;
    Ok(alias_from_partitions(table, config).unwrap_or_else(|| default_alias(&table.name, config)))
}

/// Model prefixes stripped from an alias: `DimCustomer` -> `Customer`.
pub fn strip_model_prefix<'a>(alias: &'a str, config: &AuditConfig) -> &'a str {
    config
        .model_name_prefixes
        .iter()
        .find_map(|prefix| alias.strip_prefix(prefix.as_str()))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(alias)
}
