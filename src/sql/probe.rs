//! Parser probe: a rewrite is refused if it turns parseable SQL into unparseable SQL.
//!
//! dbt models are templates, so the text is rendered crudely first: control
//! and comment tags vanish, standalone `{{ }}` lines vanish and inline
//! expressions become a placeholder identifier.

use sqlparser::dialect::SnowflakeDialect;
use sqlparser::parser::Parser;

const PLACEHOLDER: &str = "__tpl__";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Verification {
    /// No check was run
    #[default]
    Skipped,
    /// Both versions parse
    Verified,
    /// The original does not parse either; nothing can be concluded
    Inconclusive(String),
    /// The original parses and the rewrite does not
    Broken(String),
}

impl Verification {
    pub fn is_broken(&self) -> bool {
        matches!(self, Verification::Broken(_))
    }
}

fn newlines_of(text: &str) -> String {
    text.chars().filter(|&c| c == '\n').collect()
}

fn line_is_blank_around(text: &str, start: usize, end: usize) -> bool {
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[end..].find('\n').map_or(text.len(), |i| end + i);
    text[line_start..start].trim().is_empty() && text[end..line_end].trim().is_empty()
}

/// Strip template syntax, keeping the line layout.
pub fn render_templates(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find('{') {
        let open = cursor + rel;
        let closer = match text[open + 1..].chars().next() {
            Some('{') => "}}",
            Some('%') => "%}",
            Some('#') => "#}",
            _ => {
                out.push_str(&text[cursor..open + 1]);
                cursor = open + 1;
                continue;
            }
        };
        let Some(close_rel) = text[open + 2..].find(closer) else {
            break;
        };
        let close = open + 2 + close_rel + 2;
        out.push_str(&text[cursor..open]);
        let tag = &text[open..close];
        if closer == "}}" && !line_is_blank_around(text, open, close) {
            out.push_str(PLACEHOLDER);
        }
        out.push_str(&newlines_of(tag));
        cursor = close;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Parse the rendered text; `Err` carries the parser message.
pub fn parses(text: &str) -> Result<(), String> {
    let rendered = render_templates(text);
    if rendered.trim().is_empty() {
        return Err("nothing left to parse after template rendering".to_string());
    }
    Parser::parse_sql(&SnowflakeDialect {}, &rendered)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

pub fn verify_rewrite(original: &str, mutated: &str) -> Verification {
    if let Err(message) = parses(original) {
        return Verification::Inconclusive(message);
    }
    match parses(mutated) {
        Ok(()) => Verification::Verified,
        Err(message) => Verification::Broken(message),
    }
}
