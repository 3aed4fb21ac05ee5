//! Audit configuration
//!
//! Loaded from an optional TOML file; every key falls back to the defaults
//! below when absent.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// Comment marker used when a projection line is commented out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentStyle {
    /// `{# ... #}` (dbt/Jinja template comment)
    #[default]
    Template,
    /// `/* ... */`
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Table names excluded from analysis and mutation (case-insensitive exact match)
    pub tables_to_exclude: Vec<String>,
    /// Name fragments that exclude any table or field containing them
    pub exclusion_patterns: Vec<String>,
    /// Folder holding externally authored measures; tables with this name are skipped
    pub measures_folder_name: String,
    /// Table-name fragments marking calculated/derived tables
    pub calculated_table_markers: Vec<String>,
    /// Report entries containing any of these are not scanned
    pub artifact_skip_substrings: Vec<String>,
    /// Technical fields left out of the statistics
    pub display_skip_fields: Vec<String>,
    /// Fields never proposed for upstream-layer removal
    pub upstream_skip_fields: Vec<String>,
    /// Partition source names that are schemas, not warehouse tables
    pub ignored_source_aliases: Vec<String>,
    /// Warehouse model naming prefixes (`Dim`, `Fact`, ...)
    pub model_name_prefixes: Vec<String>,
    /// Upstream layer file prefix (`marts_`)
    pub layer_prefix: String,
    pub comment_style: CommentStyle,
    /// Refuse writes that turn parseable SQL into unparseable SQL
    pub verify_with_parser: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            tables_to_exclude: vec!["RefreshDate".to_string()],
            exclusion_patterns: vec!["partition".to_string(), "refresh".to_string()],
            measures_folder_name: "measures".to_string(),
            calculated_table_markers: vec!["calculat".to_string(), "calc".to_string()],
            artifact_skip_substrings: vec!["bookmark".to_string(), "resources".to_string()],
            display_skip_fields: vec![
                "PartitionDate".to_string(),
                "LastProcessingDate".to_string(),
                "RangeModificationDate".to_string(),
                "TableIndicator".to_string(),
            ],
            upstream_skip_fields: vec![
                "SourceSystem".to_string(),
                "elt_dmr_core".to_string(),
                "elt_dmr_marts".to_string(),
            ],
            ignored_source_aliases: vec![
                "public".to_string(),
                "reporting_fka".to_string(),
                "core_fka".to_string(),
                "marts_fka".to_string(),
            ],
            model_name_prefixes: vec!["Dim".to_string(), "Fact".to_string(), "Bridge".to_string()],
            layer_prefix: "marts_".to_string(),
            comment_style: CommentStyle::Template,
            verify_with_parser: true,
        }
    }
}

impl AuditConfig {
    pub fn from_path(path: &Path) -> Result<Self, AuditError> {
        let text = std::fs::read_to_string(path).map_err(|e| AuditError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&text).map_err(|e| AuditError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self, AuditError> {
        match path {
            Some(p) => Self::from_path(p),
            None => Ok(Self::default()),
        }
    }
}
