//! # Wildcard Matching
//!
//! Glob-style matching used by symbol search.
//!
//! Patterns consist of literal characters, `*` (any run of characters,
//! including none) and `?` (exactly one character). Matching is a greedy
//! forward scan that backtracks to the most recent `*` on a mismatch, which
//! is linear for the patterns symbol searches use in practice and
//! `O(text * pattern)` in the worst case.
//!
//! ```rust
//! use symscope_core::pattern::matches;
//!
//! assert!(matches("malloc", "*alloc", false));
//! assert!(matches("MALLOC", "m?lloc", true));
//! assert!(!matches("malloc", "free", false));
//! ```

fn eq(a: u8, b: u8, ignore_case: bool) -> bool
{
    if ignore_case {
        a.eq_ignore_ascii_case(&b)
    } else {
        a == b
    }
}

/// Match `text` against `pattern`.
///
/// `ignore_case` folds ASCII letters only. An empty pattern matches only the
/// empty text; a pattern made of `*` matches everything.
#[must_use]
pub fn matches(text: &str, pattern: &str, ignore_case: bool) -> bool
{
    let text = text.as_bytes();
    let pattern = pattern.as_bytes();

    let mut t = 0;
    let mut p = 0;
    // Position just after the last `*` seen, and the text position it was
    // tried against.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                while pattern.get(p) == Some(&b'*') {
                    p += 1;
                }
                if p == pattern.len() {
                    return true;
                }
                star = Some((p, t));
            }
            Some(b'?') => {
                t += 1;
                p += 1;
            }
            Some(&c) if eq(c, text[t], ignore_case) => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p;
                    t = star_t + 1;
                    star = Some((star_p, t));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match `text` against a list of patterns, stopping at the first match.
///
/// The list uses the packed native layout: patterns separated by NUL and the
/// list terminated by an empty pattern (a double NUL). Text after the
/// terminator is ignored.
#[must_use]
pub fn matches_any(text: &str, patterns: &str, ignore_case: bool) -> bool
{
    patterns
        .split('\0')
        .take_while(|pattern| !pattern.is_empty())
        .any(|pattern| matches(text, pattern, ignore_case))
}

/// Whether a pattern contains wildcard characters.
#[must_use]
pub fn has_wildcards(pattern: &str) -> bool
{
    pattern.bytes().any(|c| c == b'*' || c == b'?')
}
