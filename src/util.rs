//! Shared utility helpers.

use std::path::Path;

use encoding_rs::{UTF_8, WINDOWS_1252};

/// Case-insensitive starts_with check without allocating.
#[inline]
pub fn starts_with_ci(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len()
        && haystack.as_bytes()[..needle.len()].eq_ignore_ascii_case(needle.as_bytes())
}

/// Case-insensitive find starting at byte offset `from`; returns the absolute byte offset.
pub fn find_ci_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let needle_bytes = needle.as_bytes();
    let haystack_bytes = haystack.as_bytes();
    if from > haystack_bytes.len() || needle_bytes.len() > haystack_bytes.len() - from {
        return None;
    }
    if needle_bytes.is_empty() {
        return Some(from);
    }
    haystack_bytes[from..]
        .windows(needle_bytes.len())
        .position(|window| window.eq_ignore_ascii_case(needle_bytes))
        .map(|pos| pos + from)
}

#[inline]
pub fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offsets of every case-insensitive whole-word occurrence of `word`.
///
/// A match must not be preceded or followed by `[A-Za-z0-9_]`.
pub fn word_positions_ci(haystack: &str, word: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    if word.is_empty() {
        return positions;
    }
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = find_ci_from(haystack, word, from) {
        let end = pos + word.len();
        let before_ok = pos == 0 || !is_word_byte(bytes[pos - 1]);
        let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            positions.push(pos);
        }
        from = pos + 1;
    }
    positions
}

#[inline]
pub fn contains_word_ci(haystack: &str, word: &str) -> bool {
    !word_positions_ci(haystack, word).is_empty()
}

/// Strip `--` line comments (everything from `--` to end of line).
pub fn strip_line_comments(text: &str) -> String {
    text.split('\n')
        .map(|line| match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `snake_case_id` -> `Snake Case Id`
pub fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Leading whitespace of a line.
#[inline]
pub fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Read a file as a string, trying UTF-8 first, then Windows-1252 as fallback.
/// A leading BOM is stripped.
pub fn read_text_with_fallback(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;

    let text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(err) => {
            // Windows-1252 is common for SQL files created on Windows
            let bytes = err.into_bytes();
            let (decoded, _, had_errors) = WINDOWS_1252.decode(&bytes);
            if had_errors {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "File contains invalid characters",
                ));
            }
            decoded.into_owned()
        }
    };

    Ok(match text.strip_prefix('\u{FEFF}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

/// Decode bytes as UTF-8, dropping anything that does not decode.
pub fn decode_utf8_ignoring_errors(bytes: &[u8]) -> String {
    let (decoded, _) = UTF_8.decode_with_bom_removal(bytes);
    decoded.chars().filter(|c| *c != '\u{FFFD}').collect()
}
