use std::borrow::Cow;

/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Shortened form of a payload for log lines.
pub fn snippet(s: &str, max_chars: usize) -> Cow<'_, str> {
    let prefix = prefix_chars(s, max_chars);
    if prefix.len() == s.len() {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("{}...", prefix))
    }
}

/// Length in bytes of the longest suffix of `buffer` that is a strict prefix of `token`.
pub fn partial_suffix_len(buffer: &str, token: &str) -> usize {
    let max = buffer.len().min(token.len().saturating_sub(1));
    (1..=max)
        .rev()
        .find(|&n| buffer.is_char_boundary(buffer.len() - n) && token.starts_with(&buffer[buffer.len() - n..]))
        .unwrap_or(0)
}

/// Longest strict-prefix suffix across a whole vocabulary of tokens.
pub fn partial_suffix_len_any(buffer: &str, tokens: &[&str]) -> usize {
    tokens
        .iter()
        .map(|t| partial_suffix_len(buffer, t))
        .max()
        .unwrap_or(0)
}

/// Removes every occurrence of each token.
pub fn strip_tokens<'a>(text: &'a str, tokens: &[&str]) -> Cow<'a, str> {
    if !tokens.iter().any(|t| text.contains(t)) {
        return Cow::Borrowed(text);
    }
    let mut out = text.to_string();
    // Repeat until stable: removing one token can join the halves of another.
    loop {
        let before = out.len();
        for t in tokens {
            if out.contains(t) {
                out = out.replace(t, "");
            }
        }
        if out.len() == before {
            break;
        }
    }
    Cow::Owned(out)
}
