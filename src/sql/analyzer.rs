//! Structural analysis of a SQL model: top-level SELECT projections across CTEs and UNIONs.
//!
//! A paren-depth counter over masked text stands in for a grammar. Only
//! SELECTs that start a line at depth zero are projection candidates; each
//! projection ends at the first depth-zero `FROM` after it.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::alias::{extract_alias, normalize_definition, AliasPolicy};
use super::lexer::{line_of, line_starts, mask, MaskedSql};
use crate::util::{is_word_byte, starts_with_ci};

/// `SELECT` plus modifiers that belong to the keyword, not to the first column.
static SELECT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*select(?:\s+(?:distinct|all)\b)?(?:\s+top\s+\d+\b)?").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionColumn {
    /// Definition text with comments removed and whitespace collapsed
    pub definition: String,
    pub alias: Option<String>,
    pub first_line: usize,
    pub last_line: usize,
}

/// One top-level SELECT projection; lines are 0-based, `end_line` exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionBlock {
    pub start_line: usize,
    pub end_line: usize,
    /// `(line, column)` of the terminating `FROM`, when one was found
    pub from: Option<(usize, usize)>,
    pub columns: Vec<ProjectionColumn>,
}

impl ProjectionBlock {
    /// The FROM keyword shares its line with projection text.
    pub fn from_line_shared(&self) -> Option<usize> {
        match self.from {
            Some((line, _)) if line < self.end_line => Some(line),
            _ => None,
        }
    }

    pub fn column_by_alias(&self, alias: &str) -> Option<&ProjectionColumn> {
        self.columns
            .iter()
            .find(|c| c.alias.as_deref().map_or(false, |a| a.eq_ignore_ascii_case(alias)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlStructure {
    pub line_count: usize,
    pub has_top_level_union: bool,
    /// Every top-level projection, in source order
    pub blocks: Vec<ProjectionBlock>,
}

impl SqlStructure {
    /// `None` when the text has no top-level SELECT: there is no safe zone.
    pub fn analyze(text: &str, policy: AliasPolicy) -> Option<Self> {
        let masked = mask(text);
        Self::analyze_masked(&masked, policy)
    }

    pub fn analyze_masked(masked: &MaskedSql, policy: AliasPolicy) -> Option<Self> {
        let code = masked.code.as_str();
        let starts = line_starts(code);
        let depth_at = depth_at_line_starts(code, &starts);

        let select_lines: Vec<usize> = (0..starts.len())
            .filter(|&i| depth_at[i] == 0 && begins_with_select(line_text(code, &starts, i)))
            .collect();
        if select_lines.is_empty() {
            return None;
        }

        let mut blocks = Vec::with_capacity(select_lines.len());
        for (n, &line) in select_lines.iter().enumerate() {
            let next_select = select_lines.get(n + 1).copied();
            blocks.push(build_block(masked, &starts, line, next_select, policy));
        }

        Some(Self {
            line_count: starts.len(),
            has_top_level_union: has_top_level_union(code),
            blocks,
        })
    }

    /// UNION: every branch. Otherwise only the last top-level SELECT.
    pub fn safe_blocks(&self) -> &[ProjectionBlock] {
        if self.has_top_level_union {
            &self.blocks
        } else {
            &self.blocks[self.blocks.len().saturating_sub(1)..]
        }
    }

    pub fn safe_columns(&self) -> impl Iterator<Item = &ProjectionColumn> {
        self.safe_blocks().iter().flat_map(|b| b.columns.iter())
    }

    /// Aliases of the safe blocks, first occurrence order, case-insensitively unique.
    pub fn safe_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = Vec::new();
        for alias in self.safe_columns().filter_map(|c| c.alias.as_ref()) {
            if !aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
                aliases.push(alias.clone());
            }
        }
        aliases
    }
}

fn line_text<'a>(code: &'a str, starts: &[usize], line: usize) -> &'a str {
    let start = starts[line];
    let end = starts.get(line + 1).map_or(code.len(), |&s| s - 1);
    &code[start..end]
}

fn begins_with_select(line: &str) -> bool {
    let trimmed = line.trim_start();
    starts_with_ci(trimmed, "select")
        && trimmed
            .as_bytes()
            .get(6)
            .map_or(true, |&b| !is_word_byte(b))
}

/// Length of `SELECT [DISTINCT|ALL] [TOP n]` at the start of a line, 0 when absent.
pub fn select_prefix_len(line: &str) -> usize {
    SELECT_PREFIX.find(line).map_or(0, |m| m.end())
}

fn depth_at_line_starts(code: &str, starts: &[usize]) -> Vec<i64> {
    let mut depths = Vec::with_capacity(starts.len());
    let mut depth: i64 = 0;
    let mut next_line = 0;
    for (i, b) in code.bytes().enumerate() {
        while next_line < starts.len() && starts[next_line] == i {
            depths.push(depth);
            next_line += 1;
        }
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
    }
    while depths.len() < starts.len() {
        depths.push(depth);
    }
    depths
}

fn is_word_at(bytes: &[u8], pos: usize, word: &str) -> bool {
    let end = pos + word.len();
    end <= bytes.len()
        && bytes[pos..end].eq_ignore_ascii_case(word.as_bytes())
        && (pos == 0 || !is_word_byte(bytes[pos - 1]))
        && (end == bytes.len() || !is_word_byte(bytes[end]))
}

/// `UNION` outside any parentheses.
pub fn has_top_level_union(code: &str) -> bool {
    let bytes = code.as_bytes();
    let mut depth: i64 = 0;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'u' | b'U' if depth == 0 && is_word_at(bytes, i, "union") => return true,
            _ => {}
        }
    }
    false
}

/// Byte offset of the first depth-zero `FROM` in `[from, limit)`, or of a
/// depth-zero `;`, whichever comes first.
fn find_projection_end(code: &str, from: usize, limit: usize) -> (usize, bool) {
    let bytes = code.as_bytes();
    let mut depth: i64 = 0;
    for i in from..limit {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return (i, false);
                }
            }
            b';' if depth == 0 => return (i, false),
            b'f' | b'F' if depth == 0 && is_word_at(bytes, i, "from") => return (i, true),
            _ => {}
        }
    }
    (limit, false)
}

fn build_block(
    masked: &MaskedSql,
    starts: &[usize],
    select_line: usize,
    next_select: Option<usize>,
    policy: AliasPolicy,
) -> ProjectionBlock {
    let code = masked.code.as_str();
    let line = line_text(code, starts, select_line);
    let body_start = starts[select_line] + select_prefix_len(line);
    let limit = next_select.map_or(code.len(), |l| starts[l]);
    let (body_end, found_from) = find_projection_end(code, body_start, limit);

    let (end_line, from) = if found_from {
        let from_line = line_of(starts, body_end);
        let column = body_end - starts[from_line];
        let before_from = &code[starts[from_line]..body_end];
        let end = if before_from.trim().is_empty() {
            from_line
        } else {
            from_line + 1
        };
        (end.max(select_line + 1), Some((from_line, column)))
    } else {
        (next_select.unwrap_or(starts.len()), None)
    };

    ProjectionBlock {
        start_line: select_line,
        end_line,
        from,
        columns: split_columns(masked, starts, body_start, body_end, policy),
    }
}

fn split_columns(
    masked: &MaskedSql,
    starts: &[usize],
    body_start: usize,
    body_end: usize,
    policy: AliasPolicy,
) -> Vec<ProjectionColumn> {
    let code = masked.code.as_bytes();
    let mut segments = Vec::new();
    let mut depth: i64 = 0;
    let mut segment_start = body_start;
    for i in body_start..body_end {
        match code[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                segments.push((segment_start, i));
                segment_start = i + 1;
            }
            _ => {}
        }
    }
    segments.push((segment_start, body_end));

    segments
        .into_iter()
        .filter_map(|(start, end)| {
            let slice = &masked.code[start..end];
            let first = slice.find(|c: char| !c.is_whitespace())?;
            let last = slice.rfind(|c: char| !c.is_whitespace())?;
            let raw = &masked.comment_free[start..end];
            Some(ProjectionColumn {
                definition: normalize_definition(raw),
                alias: extract_alias(raw, policy),
                first_line: line_of(starts, start + first),
                last_line: line_of(starts, start + last),
            })
        })
        .collect()
}
