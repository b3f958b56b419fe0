use std::borrow::Cow;

use crate::error::PgDriverError;

use super::parsers::{
    is_block_comment_end, is_block_comment_start, is_line_comment_start, matches_tag,
    try_start_dollar_quote,
};

#[derive(Clone)]
pub(super) enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

/// What the visitor wants done with the byte it was shown.
pub(super) enum Action {
    /// Leave it; move on to the next byte.
    Continue,
    /// Copy the next `n` bytes verbatim without visiting them.
    Skip(usize),
    /// Replace `len` bytes starting here with `with`.
    Replace { len: usize, with: String },
}

/// Walk `sql` once, left to right, calling `visit` for every byte that sits in
/// plain SQL text. Quoted literals, quoted identifiers, comments and
/// dollar-quoted bodies are copied verbatim and never visited.
///
/// Returns a borrowed `Cow` when the visitor made no replacement.
///
/// # Errors
/// Returns `SyntaxError` when a quoted literal or dollar-quoted body is left
/// open at the end of the query, and propagates visitor errors.
pub(super) fn scan_code<F>(sql: &str, mut visit: F) -> Result<Cow<'_, str>, PgDriverError>
where
    F: FnMut(usize) -> Result<Action, PgDriverError>,
{
    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                _ if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                _ => {
                    if b == b'$' {
                        if let Some((tag, advance)) = try_start_dollar_quote(bytes, idx) {
                            state = State::DollarQuoted(tag);
                            idx = advance + 1;
                            continue;
                        }
                    }
                    match visit(idx)? {
                        Action::Continue => {}
                        Action::Skip(n) => {
                            idx += n.max(1);
                            continue;
                        }
                        Action::Replace { len, with } => {
                            let buf = out.get_or_insert_with(|| String::with_capacity(sql.len() + 8));
                            buf.push_str(&sql[copied..idx]);
                            buf.push_str(&with);
                            idx += len;
                            copied = idx;
                            continue;
                        }
                    }
                }
            },
            State::SingleQuoted => {
                if b == b'\\' {
                    idx += 1; // backslash escape, standard_conforming_strings is off
                } else if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    if depth == 1 {
                        state = State::Normal;
                    } else {
                        state = State::BlockComment(depth - 1);
                    }
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    let tag_len = tag.len();
                    state = State::Normal;
                    idx += tag_len + 1;
                }
            }
        }

        idx += 1;
    }

    if matches!(
        state,
        State::SingleQuoted | State::DoubleQuoted | State::DollarQuoted(_)
    ) {
        return Err(PgDriverError::SyntaxError(
            "query with an unterminated text string specified".to_string(),
        ));
    }

    Ok(match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied.min(sql.len())..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    })
}
