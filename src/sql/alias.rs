//! Output-alias extraction for projection column definitions.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How strictly a fallback (non-`AS`) alias token is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AliasPolicy {
    /// Any trailing identifier is accepted, keywords included
    #[default]
    Permissive,
    /// Keywords, trailing underscores and non-identifier tokens are rejected
    KeywordAware,
}

static EXPLICIT_AS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s|\))AS\s+(?:"([^"]+)"|`([^`]+)`|\[([^\]]+)\]|([A-Za-z_][\w$]*))\s*$"#)
        .unwrap()
});

static TRAILING_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:"([^"]+)"|([A-Za-z0-9_]+))\s*$"#).unwrap());

/// Keywords that never name an output column.
pub const SQL_KEYWORDS: &[&str] = &[
    "select", "from", "where", "join", "left", "right", "inner", "outer", "on", "group", "by",
    "order", "having", "as", "case", "when", "then", "else", "end", "and", "or", "not",
    "distinct", "over", "partition", "union", "all", "limit", "offset", "fetch", "cast",
    "convert", "try_cast", "try_convert", "in", "like", "between", "is", "null", "exists",
    "coalesce", "ifnull", "nullif", "sum", "count", "avg", "min", "max", "listagg", "string_agg",
    "rank", "dense_rank", "row_number", "lag", "lead", "first_value", "last_value", "date",
    "timestamp", "date_trunc", "dateadd", "datediff", "year", "month", "day", "current_date",
    "current_timestamp", "concat", "substring", "len", "length", "trim", "lower", "upper",
    "pivot", "unpivot", "with", "values", "true", "false", "using",
];

pub fn is_sql_keyword(token: &str) -> bool {
    SQL_KEYWORDS.contains(&token.to_ascii_lowercase().as_str())
}

fn explicit_alias(definition: &str) -> Option<String> {
    let captures = EXPLICIT_AS.captures(definition)?;
    (1..=4)
        .find_map(|i| captures.get(i))
        .map(|m| m.as_str().trim().to_string())
        .filter(|alias| !alias.is_empty())
}

fn permissive_fallback(definition: &str) -> Option<String> {
    let captures = TRAILING_IDENTIFIER.captures(definition)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().to_string())
}

fn keyword_aware_fallback(definition: &str) -> Option<String> {
    let token = definition.split_whitespace().last()?;
    let token = token.trim_matches(|c| c == '"' || c == ',' || c == '`');
    let token = token.rsplit('.').next().unwrap_or(token).trim_matches('"');

    let valid = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && token.chars().any(|c| c.is_ascii_alphabetic())
        && !token.ends_with('_')
        && !is_sql_keyword(token);
    valid.then(|| token.to_string())
}

/// Remove comments, separating commas and whitespace runs from a definition.
pub fn normalize_definition(definition: &str) -> String {
    let masked = super::lexer::mask(definition).comment_free;
    masked
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(',')
        .trim()
        .to_string()
}

/// Output alias of one column definition, or `None` when it has none under `policy`.
pub fn extract_alias(definition: &str, policy: AliasPolicy) -> Option<String> {
    let text = normalize_definition(definition);
    if text.is_empty() {
        return None;
    }
    explicit_alias(&text).or_else(|| match policy {
        AliasPolicy::Permissive => permissive_fallback(&text),
        AliasPolicy::KeywordAware => keyword_aware_fallback(&text),
    })
}

/// Alias of a single source line, for line-oriented checks.
pub fn line_alias(line: &str, policy: AliasPolicy) -> Option<String> {
    extract_alias(line, policy)
}
