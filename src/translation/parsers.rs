pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// Recognise `$tag$` at `start`. Returns the tag and the index of the closing `$`.
///
/// Tags cannot begin with a digit, so native markers like `$1` are never
/// mistaken for the start of a dollar-quoted body.
pub(super) fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    if bytes.get(start + 1).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        idx += 1;
    }

    if idx < bytes.len() && bytes[idx] == b'$' {
        let tag = String::from_utf8(bytes[start + 1..idx].to_vec()).ok()?;
        Some((tag, idx))
    } else {
        None
    }
}

pub(super) fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    end < bytes.len()
        && bytes[idx + 1..end].starts_with(tag.as_bytes())
        && bytes.get(end) == Some(&b'$')
}

/// Length of the ASCII digit run starting at `start`.
pub(super) fn digit_run(bytes: &[u8], start: usize) -> usize {
    bytes[start.min(bytes.len())..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count()
}

/// True when `keyword` (ASCII, lowercase) starts at `idx` as a whole word.
pub(super) fn is_keyword_at(bytes: &[u8], idx: usize, keyword: &[u8]) -> bool {
    let is_word = |b: &u8| b.is_ascii_alphanumeric() || *b == b'_';
    let end = idx + keyword.len();
    bytes
        .get(idx..end)
        .is_some_and(|w| w.eq_ignore_ascii_case(keyword))
        && (idx == 0 || !is_word(&bytes[idx - 1]))
        && !bytes.get(end).is_some_and(is_word)
}
