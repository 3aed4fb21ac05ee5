//! Comment and literal masking for the line-oriented SQL analysis.
//!
//! Masked text has exactly the byte length and line layout of the input:
//! masked characters become spaces (one per byte) and newlines are kept, so
//! offsets and line numbers can be used against the original text directly.

/// Two masked views of one SQL source.
#[derive(Debug, Clone)]
pub struct MaskedSql {
    /// Comments and string-literal contents blanked
    pub code: String,
    /// Only comments blanked; literals kept for alias extraction
    pub comment_free: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    TemplateComment,
    Literal,
}

fn blank(out: &mut String, c: char) {
    if c == '\n' || c == '\r' {
        out.push(c);
    } else {
        out.extend(std::iter::repeat(' ').take(c.len_utf8()));
    }
}

/// Mask `--`, `/* */` and `{# #}` comments plus `'...'` literal contents.
pub fn mask(text: &str) -> MaskedSql {
    let mut code = String::with_capacity(text.len());
    let mut comment_free = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut state = State::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Code => {
                let opener = match (c, next) {
                    ('-', Some('-')) => Some(State::LineComment),
                    ('/', Some('*')) => Some(State::BlockComment),
                    ('{', Some('#')) => Some(State::TemplateComment),
                    _ => None,
                };
                if let Some(comment) = opener {
                    blank(&mut code, c);
                    blank(&mut comment_free, c);
                    if let Some(n) = next {
                        blank(&mut code, n);
                        blank(&mut comment_free, n);
                    }
                    state = comment;
                    i += 2;
                    continue;
                }
                if c == '\'' {
                    state = State::Literal;
                }
                code.push(c);
                comment_free.push(c);
            }
            State::LineComment => {
                blank(&mut code, c);
                blank(&mut comment_free, c);
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment | State::TemplateComment => {
                let closer = if state == State::BlockComment { '*' } else { '#' };
                let terminator = if state == State::BlockComment { '/' } else { '}' };
                if c == closer && next == Some(terminator) {
                    for ch in [c, terminator] {
                        blank(&mut code, ch);
                        blank(&mut comment_free, ch);
                    }
                    state = State::Code;
                    i += 2;
                    continue;
                }
                blank(&mut code, c);
                blank(&mut comment_free, c);
            }
            State::Literal => {
                comment_free.push(c);
                if c == '\'' {
                    if next == Some('\'') {
                        // escaped quote stays inside the literal
                        blank(&mut code, c);
                        blank(&mut code, '\'');
                        comment_free.push('\'');
                        i += 2;
                        continue;
                    }
                    code.push(c);
                    state = State::Code;
                } else {
                    blank(&mut code, c);
                }
            }
        }
        i += 1;
    }

    MaskedSql { code, comment_free }
}

/// Byte offset of the start of every line (`\n`-separated).
pub fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Line index containing byte `offset`.
pub fn line_of(starts: &[usize], offset: usize) -> usize {
    match starts.binary_search(&offset) {
        Ok(line) => line,
        Err(insert) => insert.saturating_sub(1),
    }
}
