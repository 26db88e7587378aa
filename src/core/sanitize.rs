//! Delimiter escaping for values that become part of a line.
//!
//! Escapes `\` → `\\`, `|` → `\|`, CR/LF → `\r`/`\n`, and prefixes any
//! `@[A-Z_]+` with a backslash so a value can never forge a section header.
//! `unescape` is the exact inverse of `sanitize`.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static SECTION_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@[A-Z_]+").unwrap());

pub fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    if SECTION_TAG_RE.is_match(&out) {
        out = SECTION_TAG_RE.replace_all(&out, "\\$0").into_owned();
    }
    out
}

/// Reverse `sanitize`. Unknown escapes and a dangling trailing backslash
/// (possible in hand-edited files) are kept literally rather than rejected.
pub fn unescape(value: &str) -> Cow<'_, str> {
    if !value.contains('\\') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('|') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('@') => out.push('@'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

/// True when `value` can be embedded in a line without escaping.
pub fn is_line_safe(value: &str) -> bool {
    !value.contains(['|', '\n', '\r', '\\']) && !SECTION_TAG_RE.is_match(value)
}
