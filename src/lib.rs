//! rust-fieldaudit: field-usage audit for Power BI models backed by SQL models
//!
//! This library finds semantic-model fields that no report, measure,
//! relationship or security rule uses, and comments them out of the SQL
//! models that feed the model without breaking the remaining projection.

pub mod audit;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod json;
pub mod model;
pub mod policy;
pub mod report;
pub mod sql;
pub mod summary;
pub mod upstream;
pub mod usage;
pub mod util;

pub use audit::{
    apply_changes, perform_analysis, AnalysisOutput, AnalyzeOptions, MutationOutcome,
    TableOutcome,
};
pub use config::{AuditConfig, CommentStyle};
pub use error::{AuditError, ErrorKind, ErrorReport};
pub use model::FieldKey;
pub use upstream::{analyze_upstream, audit_model_fields, comment_out_upstream, UpstreamAudit};
