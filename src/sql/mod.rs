//! SQL model analysis and safe rewriting
//!
//! Heuristic, line-oriented: a masking lexer plus a paren-depth counter
//! locate the output projection, and only whole lines are ever rewritten.

mod alias;
mod analyzer;
mod collect;
mod lexer;
mod locate;
mod mutation;
mod probe;

pub use alias::{extract_alias, is_sql_keyword, line_alias, normalize_definition, AliasPolicy};
pub use analyzer::{
    has_top_level_union, select_prefix_len, ProjectionBlock, ProjectionColumn, SqlStructure,
};
pub use collect::{collect_sql_fields, SqlField};
pub use lexer::{mask, MaskedSql};
pub use locate::{find_sql_file, fuzzy_patterns, sql_files};
pub use mutation::{
    comment_out_columns, comment_out_in_file, CommentMarker, CommentedColumn, FileMutation,
    MutationReport, NoSafeZone, SkippedColumn,
};
pub use probe::{parses, render_templates, verify_rewrite, Verification};
