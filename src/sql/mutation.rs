//! Safe mutation: comment out projection columns by alias, then repair commas.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::alias::AliasPolicy;
use super::analyzer::{select_prefix_len, ProjectionBlock, SqlStructure};
use super::lexer::mask;
use super::probe::{verify_rewrite, Verification};
use crate::config::CommentStyle;
use crate::diagnostics::DiagnosticSink;
use crate::error::AuditError;
use crate::util::{indentation, read_text_with_fallback};

const COMPONENT: &str = "mutation";

/// Comment wrapper stamped with the run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentMarker {
    pub style: CommentStyle,
    pub timestamp: String,
}

impl CommentMarker {
    pub fn new(style: CommentStyle, timestamp: impl Into<String>) -> Self {
        Self {
            style,
            timestamp: timestamp.into(),
        }
    }

    pub fn now(style: CommentStyle) -> Self {
        Self::new(style, chrono::Local::now().format("%Y%m%d_%H%M%S").to_string())
    }

    /// Wrap `content`; an embedded closing marker is broken up so the comment stays closed.
    pub fn wrap(&self, content: &str) -> String {
        match self.style {
            CommentStyle::Template => format!(
                "{{# UNUSED FIELD (script {}): {} #}}",
                self.timestamp,
                content.replace("#}", "# }")
            ),
            CommentStyle::Block => format!(
                "/* UNUSED FIELD (commented by script {}): {} */",
                self.timestamp,
                content.replace("*/", "* /")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentedColumn {
    pub alias: String,
    /// 0-based source lines that were wrapped
    pub lines: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedColumn {
    pub alias: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationReport {
    pub text: String,
    pub commented: Vec<CommentedColumn>,
    pub skipped: Vec<SkippedColumn>,
    /// Lines whose separating comma was removed
    pub commas_repaired: Vec<usize>,
    pub blocks_rewritten: usize,
}

impl MutationReport {
    pub fn changed(&self) -> bool {
        !self.commented.is_empty()
    }

    /// Lower-cased aliases that were commented at least once.
    pub fn commented_aliases(&self) -> BTreeSet<String> {
        self.commented.iter().map(|c| c.alias.to_lowercase()).collect()
    }
}

/// The source has no top-level SELECT to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoSafeZone;

struct LineEdit {
    line: usize,
    /// Bytes kept verbatim before the comment (the SELECT keyword)
    keep: usize,
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("--") || trimmed.starts_with("/*") || trimmed.starts_with("{#")
}

fn plan_block(
    block: &ProjectionBlock,
    targets: &BTreeSet<String>,
    lines: &[String],
    skipped: &mut Vec<SkippedColumn>,
) -> Vec<(String, Vec<LineEdit>)> {
    let mut planned = Vec::new();
    for (index, column) in block.columns.iter().enumerate() {
        let Some(alias) = column.alias.as_ref() else {
            continue;
        };
        if !targets.contains(&alias.to_lowercase()) {
            continue;
        }

        let shares_line = block.columns.iter().enumerate().any(|(other, c)| {
            other != index && c.first_line <= column.last_line && c.last_line >= column.first_line
        });
        if shares_line {
            skipped.push(SkippedColumn {
                alias: alias.clone(),
                reason: format!("line {} holds another column", column.first_line + 1),
            });
            continue;
        }
        if block.from_line_shared() == Some(column.last_line) {
            skipped.push(SkippedColumn {
                alias: alias.clone(),
                reason: format!("line {} also holds FROM", column.last_line + 1),
            });
            continue;
        }

        let edits = (column.first_line..=column.last_line)
            .filter(|&line| line < lines.len() && !is_comment_line(&lines[line]))
            .map(|line| LineEdit {
                line,
                keep: if line == block.start_line {
                    select_prefix_len(&lines[line])
                } else {
                    0
                },
            })
            .collect();
        planned.push((alias.clone(), edits));
    }

    if !planned.is_empty() && planned.len() == block.columns.len() {
        for (alias, _) in planned.drain(..) {
            skipped.push(SkippedColumn {
                alias,
                reason: "would leave an empty projection".to_string(),
            });
        }
    }
    planned
}

type BlockPlan = Vec<(String, Vec<LineEdit>)>;

/// Plan every block together. Under a UNION an alias is commented in all
/// branches or in none, so the branches keep the same column count.
fn plan_blocks(
    blocks: &[ProjectionBlock],
    targets: &BTreeSet<String>,
    lines: &[String],
) -> (Vec<BlockPlan>, Vec<SkippedColumn>) {
    let mut active = targets.clone();
    let mut dropped: Vec<SkippedColumn> = Vec::new();
    loop {
        let mut skipped = Vec::new();
        let plans: Vec<BlockPlan> = blocks
            .iter()
            .map(|block| plan_block(block, &active, lines, &mut skipped))
            .collect();
        if plans.len() < 2 {
            return (plans, skipped);
        }

        let uneven: BTreeSet<String> = active
            .iter()
            .filter(|alias| {
                let planned_in = plans
                    .iter()
                    .filter(|plan| plan.iter().any(|(a, _)| a.eq_ignore_ascii_case(alias)))
                    .count();
                planned_in > 0 && planned_in < plans.len()
            })
            .cloned()
            .collect();
        if uneven.is_empty() {
            dropped.extend(skipped);
            return (plans, dropped);
        }

        for alias in &uneven {
            let reasons: Vec<SkippedColumn> = skipped
                .iter()
                .filter(|s| s.alias.eq_ignore_ascii_case(alias))
                .cloned()
                .collect();
            if reasons.is_empty() {
                let shown = plans
                    .iter()
                    .flatten()
                    .find(|(a, _)| a.eq_ignore_ascii_case(alias))
                    .map_or_else(|| alias.clone(), |(a, _)| a.clone());
                dropped.push(SkippedColumn {
                    alias: shown,
                    reason: "missing from another UNION branch".to_string(),
                });
            } else {
                dropped.extend(reasons);
            }
        }
        active.retain(|alias| !uneven.contains(alias));
    }
}

fn apply_edit(line: &str, keep: usize, marker: &CommentMarker) -> String {
    if keep > 0 {
        let (prefix, rest) = line.split_at(keep);
        format!("{} {}", prefix.trim_end(), marker.wrap(rest.trim()))
    } else {
        format!("{}{}", indentation(line), marker.wrap(line.trim()))
    }
}

/// Code (comments and literals blanked) of line `i` inside `block`, with its byte offset.
fn block_line_body<'a>(block: &ProjectionBlock, code_lines: &[&'a str], i: usize) -> (usize, &'a str) {
    let line = code_lines.get(i).copied().unwrap_or("");
    let start = if i == block.start_line {
        select_prefix_len(line)
    } else {
        0
    };
    let mut end = match block.from {
        // a leading-comma repair can shorten the FROM line
        Some((from_line, column)) if from_line == i => column.min(line.len()).max(start),
        _ => line.len(),
    };
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    (start, &line[start..end.max(start)])
}

/// Strip a dangling leading comma at the new head of the list and a dangling
/// trailing comma at its new tail.
fn repair_commas(block: &ProjectionBlock, lines: &mut [String], repaired: &mut Vec<usize>) {
    let joined = lines.join("\n");
    let masked = mask(&joined);
    let code_lines: Vec<&str> = masked.code.split('\n').collect();
    let end = block.end_line.min(lines.len());

    for i in block.start_line..end {
        let (offset, body) = block_line_body(block, &code_lines, i);
        let trimmed = body.trim_start();
        if trimmed.trim().is_empty() {
            continue;
        }
        if trimmed.starts_with(',') {
            let pos = offset + (body.len() - trimmed.len());
            let line = &lines[i];
            let fixed = format!("{}{}", &line[..pos], line[pos + 1..].trim_start());
            lines[i] = fixed;
            repaired.push(i);
        }
        break;
    }

    let joined = lines.join("\n");
    let masked = mask(&joined);
    let code_lines: Vec<&str> = masked.code.split('\n').collect();
    for i in (block.start_line..end).rev() {
        let (offset, body) = block_line_body(block, &code_lines, i);
        let trimmed = body.trim_end();
        if trimmed.trim().is_empty() {
            continue;
        }
        if trimmed.ends_with(',') {
            let pos = offset + trimmed.len() - 1;
            lines[i].remove(pos);
            repaired.push(i);
        }
        break;
    }
}

/// Comment out every safe-block column whose alias is in `targets` (lower-cased).
///
/// With a top-level UNION every branch is rewritten.
pub fn comment_out_columns(
    text: &str,
    targets: &BTreeSet<String>,
    marker: &CommentMarker,
) -> Result<MutationReport, NoSafeZone> {
    let structure = SqlStructure::analyze(text, AliasPolicy::Permissive).ok_or(NoSafeZone)?;
    let eol = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();

    let mut report = MutationReport {
        text: String::new(),
        commented: Vec::new(),
        skipped: Vec::new(),
        commas_repaired: Vec::new(),
        blocks_rewritten: 0,
    };

    let blocks = structure.safe_blocks();
    let (plans, skipped) = plan_blocks(blocks, targets, &lines);
    report.skipped = skipped;

    for (block, planned) in blocks.iter().zip(plans) {
        if planned.is_empty() {
            continue;
        }
        for (alias, edits) in planned {
            let mut touched = Vec::new();
            for edit in edits {
                lines[edit.line] = apply_edit(&lines[edit.line], edit.keep, marker);
                touched.push(edit.line);
            }
            report.commented.push(CommentedColumn {
                alias,
                lines: touched,
            });
        }
        repair_commas(block, &mut lines, &mut report.commas_repaired);
        report.blocks_rewritten += 1;
    }

    let mut rewritten = lines.join(eol);
    if text.ends_with('\n') {
        rewritten.push_str(eol);
    }
    report.text = rewritten;
    Ok(report)
}

/// Result of rewriting one SQL file.
#[derive(Debug, Clone, Serialize)]
pub struct FileMutation {
    pub path: PathBuf,
    pub commented: Vec<CommentedColumn>,
    pub skipped: Vec<SkippedColumn>,
    pub written: bool,
    #[serde(skip)]
    pub verification: Verification,
}

impl FileMutation {
    /// Targets (lower-cased) that were not commented, with the reason the engine gave.
    pub fn left_in_place(&self, targets: &BTreeSet<String>) -> Vec<SkippedColumn> {
        let done: BTreeSet<String> = self.commented.iter().map(|c| c.alias.to_lowercase()).collect();
        targets
            .iter()
            .filter(|t| !done.contains(*t))
            .map(|target| {
                self.skipped
                    .iter()
                    .find(|s| s.alias.eq_ignore_ascii_case(target))
                    .cloned()
                    .unwrap_or_else(|| SkippedColumn {
                        alias: target.clone(),
                        reason: "no safe projection column with this alias".to_string(),
                    })
            })
            .collect()
    }
}

/// Read, rewrite, verify and write back one SQL file.
pub fn comment_out_in_file(
    path: &Path,
    targets: &BTreeSet<String>,
    marker: &CommentMarker,
    verify: bool,
    sink: &mut dyn DiagnosticSink,
) -> Result<FileMutation, AuditError> {
    let original = read_text_with_fallback(path).map_err(|e| AuditError::MutationWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let report = comment_out_columns(&original, targets, marker).map_err(|_| {
        AuditError::SqlParseFailed {
            path: path.to_path_buf(),
            message: "no top-level SELECT found".to_string(),
        }
    })?;

    for skipped in &report.skipped {
        sink.warn(
            COMPONENT,
            format!(
                "{}: not commenting '{}': {}",
                path.display(),
                skipped.alias,
                skipped.reason
            ),
        );
    }

    if !report.changed() {
        sink.info(COMPONENT, format!("{}: nothing to change", path.display()));
        return Ok(FileMutation {
            path: path.to_path_buf(),
            commented: report.commented,
            skipped: report.skipped,
            written: false,
            verification: Verification::Skipped,
        });
    }

    let verification = if verify {
        verify_rewrite(&original, &report.text)
    } else {
        Verification::Skipped
    };
    if let Verification::Broken(message) = &verification {
        return Err(AuditError::SqlParseFailed {
            path: path.to_path_buf(),
            message: format!("rewrite refused, result no longer parses: {}", message),
        });
    }
    if let Verification::Inconclusive(message) = &verification {
        sink.debug(
            COMPONENT,
            format!("{}: parser check inconclusive: {}", path.display(), message),
        );
    }

    std::fs::write(path, &report.text).map_err(|e| AuditError::MutationWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    sink.info(
        COMPONENT,
        format!(
            "{}: commented {} columns in {} blocks",
            path.display(),
            report.commented.len(),
            report.blocks_rewritten
        ),
    );
    Ok(FileMutation {
        path: path.to_path_buf(),
        commented: report.commented,
        skipped: report.skipped,
        written: true,
        verification,
    })
}
