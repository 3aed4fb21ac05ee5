//! Error types for rust-fieldaudit

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while auditing a model or rewriting its SQL
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Model root has no 'tables' directory: {path}")]
    SchemaSourceMissing { path: PathBuf },

    #[error("Failed to read report artifact {name}: {message}")]
    ArtifactUnreadable { name: String, message: String },

    #[error("Malformed report artifact {name}: {message}")]
    ArtifactMalformed { name: String, message: String },

    #[error("Could not resolve warehouse alias for table {table}: {message}")]
    AliasNotResolved { table: String, message: String },

    #[error("SQL file not found for alias '{alias}' under {root}")]
    SqlFileNotFound { alias: String, root: PathBuf },

    #[error("Upstream layer directory does not exist: {path}")]
    UpstreamLayerMissing { path: PathBuf },

    #[error("No safe SELECT projection found in {path}: {message}")]
    SqlParseFailed { path: PathBuf, message: String },

    #[error("Field '{field}' of table {table} has no matching SQL column alias")]
    ColumnMappingMissing { table: String, field: String },

    #[error("Column '{column}' of {table} was left in place: {reason}")]
    ColumnNotCommented {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Failed to write SQL file: {path}")]
    MutationWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("ZIP read error: {message}")]
    ArchiveError { message: String },
}

impl From<zip::result::ZipError> for AuditError {
    fn from(err: zip::result::ZipError) -> Self {
        AuditError::ArchiveError {
            message: err.to_string(),
        }
    }
}

impl AuditError {
    /// Taxonomy bucket used by [`ErrorReport`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::SchemaSourceMissing { .. } => ErrorKind::SchemaSourceMissing,
            AuditError::ArtifactUnreadable { .. } | AuditError::ArchiveError { .. } => {
                ErrorKind::ArtifactUnreadable
            }
            AuditError::ArtifactMalformed { .. } => ErrorKind::ArtifactMalformed,
            AuditError::AliasNotResolved { .. } => ErrorKind::AliasNotResolved,
            AuditError::SqlFileNotFound { .. } | AuditError::UpstreamLayerMissing { .. } => {
                ErrorKind::SqlFileNotFound
            }
            AuditError::SqlParseFailed { .. } => ErrorKind::SqlParseFailed,
            AuditError::ColumnMappingMissing { .. } => ErrorKind::ColumnMappingMissing,
            AuditError::ColumnNotCommented { .. } => ErrorKind::ColumnNotCommented,
            AuditError::MutationWriteFailed { .. } => ErrorKind::MutationWriteFailed,
            AuditError::ConfigRead { .. } | AuditError::ConfigParse { .. } => ErrorKind::Config,
        }
    }

    /// Only a missing schema source stops a whole run.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::SchemaSourceMissing
    }
}

/// Field-less error classification, stable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorKind {
    SchemaSourceMissing,
    ArtifactUnreadable,
    ArtifactMalformed,
    AliasNotResolved,
    SqlFileNotFound,
    SqlParseFailed,
    ColumnMappingMissing,
    ColumnNotCommented,
    MutationWriteFailed,
    Config,
}

impl ErrorKind {
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::SchemaSourceMissing => "Model root has no tables directory",
            ErrorKind::ArtifactUnreadable => "Cannot read report artifact",
            ErrorKind::ArtifactMalformed => "Report artifact is not valid JSON",
            ErrorKind::AliasNotResolved => "Cannot find warehouse table alias in model",
            ErrorKind::SqlFileNotFound => "Cannot find corresponding SQL model file",
            ErrorKind::SqlParseFailed => "Cannot find a safe SELECT projection in SQL file",
            ErrorKind::ColumnMappingMissing => "Field does not map to any SQL column alias",
            ErrorKind::ColumnNotCommented => "Column cannot be commented out without breaking the projection",
            ErrorKind::MutationWriteFailed => "Failed to write modified SQL file",
            ErrorKind::Config => "Invalid configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One recovered failure, kept with enough context to reproduce it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub table: String,
    pub kind: ErrorKind,
    pub message: String,
    pub fields_affected: usize,
}

/// Accumulated per-table/per-artifact failures of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorReport {
    pub entries: Vec<ErrorEntry>,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, table: impl Into<String>, error: &AuditError, fields_affected: usize) {
        self.entries.push(ErrorEntry {
            table: table.into(),
            kind: error.kind(),
            message: error.to_string(),
            fields_affected,
        });
    }

    pub fn extend(&mut self, other: ErrorReport) {
        self.entries.extend(other.entries);
    }

    pub fn has_errors(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_affected_fields(&self) -> usize {
        self.entries.iter().map(|e| e.fields_affected).sum()
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.table.as_str()).collect()
    }

    pub fn counts_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }
        counts
    }
}
