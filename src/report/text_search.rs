//! Text-variant detection: quoted/bracketed spellings of a field found in raw artifact text.

use crate::model::FieldKey;
use crate::usage::UsageKind;

/// A hit is only accepted when its line also carries one of these.
pub const CONTEXT_KEYWORDS: &[&str] = &[
    "queryref",
    "datafield",
    "column",
    "property",
    "sourceref",
    "expression",
    "measure",
    "filter",
    "entity",
    "name",
    "table",
    "select",
    "from",
    "where",
    "prototypequery",
    "source",
    "aggregation",
];

const PROSE_MARKERS: &[&str] = &["comment", "description"];

const FILTER_HINTS: &[&str] = &["filter", "slicer", "where"];
const VISUAL_HINTS: &[&str] = &["visual", "chart", "table", "matrix", "select", "prototypequery"];
const MEASURE_HINTS: &[&str] = &["measure", "sum(", "count(", "calculate(", "aggregation"];

/// Spellings searched for a field, most specific first.
pub fn field_variants(field: &FieldKey) -> Vec<String> {
    let t = &field.table;
    let f = &field.field;
    vec![
        format!("'{}'[{}]", t, f),
        format!("[{}].[{}]", t, f),
        format!("'{}'.'{}'", t, f),
        format!("\"{}\".\"{}\"", t, f),
        format!("{}.{}", t, f),
        format!("[{}]", f),
        format!("'{}'", f),
        format!("\"{}\"", f),
        f.clone(),
    ]
}

/// Lines of `content` containing `variant`, lower-cased.
fn matching_lines(content: &str, variant: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains(variant))
        .map(|(i, line)| (i + 1, line.to_lowercase()))
        .collect()
}

/// Some line with the variant has a context keyword and is not prose.
pub fn is_valid_reference(content: &str, variant: &str) -> bool {
    matching_lines(content, variant).iter().any(|(_, line)| {
        CONTEXT_KEYWORDS.iter().any(|k| line.contains(k))
            && !PROSE_MARKERS.iter().any(|m| line.contains(m))
    })
}

pub fn classify_usage(content: &str, variant: &str, entry: &str) -> UsageKind {
    let context: String = matching_lines(content, variant)
        .into_iter()
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join(" ");

    if FILTER_HINTS.iter().any(|h| context.contains(h)) {
        UsageKind::Filter
    } else if VISUAL_HINTS.iter().any(|h| context.contains(h)) {
        UsageKind::Visualization
    } else if MEASURE_HINTS.iter().any(|h| context.contains(h)) {
        UsageKind::Measure
    } else if entry.to_lowercase().contains("filter") {
        UsageKind::Filter
    } else {
        UsageKind::Other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextHit {
    pub variant: String,
    pub kind: UsageKind,
    /// 1-based line of the first occurrence
    pub line_number: usize,
    pub excerpt: String,
}

/// ±50 characters around the first occurrence of `variant`.
fn excerpt_around(content: &str, variant: &str) -> String {
    let Some(pos) = content.find(variant) else {
        return String::new();
    };
    let start = content[..pos]
        .char_indices()
        .rev()
        .nth(49)
        .map_or(0, |(i, _)| i);
    let end_from = pos + variant.len();
    let end = content[end_from..]
        .char_indices()
        .nth(50)
        .map_or(content.len(), |(i, _)| end_from + i);
    content[start..end].replace(['\n', '\r'], " ").trim().to_string()
}

/// First accepted variant of `field` in `content`, if any.
pub fn find_text_reference(content: &str, field: &FieldKey, entry: &str) -> Option<TextHit> {
    for variant in field_variants(field) {
        if !content.contains(&variant) || !is_valid_reference(content, &variant) {
            continue;
        }
        let line_number = content
            .lines()
            .position(|line| line.contains(&variant))
            .map_or(1, |i| i + 1);
        return Some(TextHit {
            kind: classify_usage(content, &variant, entry),
            line_number,
            excerpt: excerpt_around(content, &variant),
            variant,
        });
    }
    None
}
