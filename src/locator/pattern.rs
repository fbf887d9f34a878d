use regex::Regex;

use crate::config::LayoutRewrite;
use crate::errors::LocatorError;

/// Translate an artifact path pattern into an anchored regex.
///
/// `*` matches any run of characters including `/`, `?` one character,
/// `[...]` and `[!...]` a character class. Everything else is literal.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, LocatorError> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                // Runs of stars collapse into one
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if closed && !class.is_empty() && class != "^" {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    // Unterminated class is matched literally
                    out.push_str(&regex::escape("["));
                    out.push_str(&regex::escape(&class));
                    if closed {
                        out.push_str(&regex::escape("]"));
                    }
                }
            }
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|source| LocatorError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Pattern variants tried in order when the literal pattern matches nothing.
///
/// Covers the flat backup layout (no leading directory before the logical
/// path) and the `private/var` vs `var` split between acquisition tools.
pub fn layout_variants(pattern: &str, extra: &[LayoutRewrite]) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if candidate != pattern && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    };

    if let Some(stripped) = pattern.strip_prefix("*/") {
        push(stripped.to_string());
    }

    if let Some(candidate) = replace_segment(pattern, "private/var/", "var/") {
        push(candidate);
    } else if let Some(candidate) = replace_segment(pattern, "var/", "private/var/") {
        push(candidate);
    }

    for rewrite in extra {
        if !rewrite.from.is_empty() && pattern.contains(&rewrite.from) {
            push(pattern.replacen(&rewrite.from, &rewrite.to, 1));
        }
    }

    variants
}

/// Replace the first occurrence of `segment` that starts a path component.
fn replace_segment(pattern: &str, segment: &str, with: &str) -> Option<String> {
    let start = pattern
        .match_indices(segment)
        .map(|(i, _)| i)
        .find(|&i| i == 0 || pattern.as_bytes()[i - 1] == b'/')?;
    Some(format!("{}{}{}", &pattern[..start], with, &pattern[start + segment.len()..]))
}
