//! Template-argument collapsing for undecorated MSVC names.
//!
//! The MSVC undecorator prints full template argument lists. Names coming
//! out of the other backends carry `<>` instead, so this pass rewrites
//! `std::vector<int,std::allocator<int> >::push_back` into
//! `std::vector<>::push_back`.
//!
//! The scan is strictly left to right and the write cursor never passes the
//! read cursor, so [`detemplatize_in_place`] can rewrite a buffer without a
//! second allocation.

const OPERATOR: &[u8] = b"operator";

/// Whether the bytes written so far end in `operator`, optionally followed
/// by one of the operator characters in `tail`.
fn ends_with_operator(written: &[u8], tail: &[u8]) -> bool
{
    if written.ends_with(OPERATOR) {
        return true;
    }
    match written.split_last() {
        Some((last, rest)) => tail.contains(last) && rest.ends_with(OPERATOR),
        None => false,
    }
}

/// A `<` right after a scope separator (or at the very start) begins a
/// compiler-synthesised name such as `<lambda_1>`, not a template list.
fn starts_synthetic_name(written: &[u8]) -> bool
{
    matches!(written.last(), None | Some(b':' | b'`'))
}

/// Count of `<` minus count of `>` in `rest`.
fn bracket_balance(rest: &[u8]) -> isize
{
    rest.iter().fold(0, |balance, &c| match c {
        b'<' => balance + 1,
        b'>' => balance - 1,
        _ => balance,
    })
}

/// Collapse template argument lists of `buf`, writing the result to its front.
///
/// Returns the new length, or `None` when the brackets do not balance; the
/// buffer contents are unspecified in that case.
fn collapse(buf: &mut [u8]) -> Option<usize>
{
    let mut read = 0;
    let mut write = 0;
    let mut nesting = 0usize;
    // Depth of a compiler-synthesised `<...>` name being copied verbatim.
    let mut literal = 0usize;

    while read < buf.len() {
        let c = buf[read];
        match c {
            b'<' if nesting == 0 && literal == 0 && ends_with_operator(&buf[..write], b"<") => {
                // `operator<` and `operator<<` keep their brackets unless the
                // rest of the string shows this `<` opens a template list.
                buf[write] = c;
                write += 1;
                if bracket_balance(&buf[read..]) <= 0 {
                    nesting = 1;
                }
            }
            b'<' if nesting == 0 && (literal > 0 || starts_synthetic_name(&buf[..write])) => {
                literal += 1;
                buf[write] = c;
                write += 1;
            }
            b'<' => {
                if nesting == 0 {
                    buf[write] = c;
                    write += 1;
                }
                nesting += 1;
            }
            b'>' if literal > 0 && nesting == 0 => {
                literal -= 1;
                buf[write] = c;
                write += 1;
            }
            b'>' if nesting == 0 && ends_with_operator(&buf[..write], b">-") => {
                buf[write] = c;
                write += 1;
            }
            b'>' => {
                nesting = nesting.checked_sub(1)?;
                if nesting == 0 {
                    buf[write] = c;
                    write += 1;
                }
            }
            _ if nesting == 0 => {
                buf[write] = c;
                write += 1;
            }
            _ => {}
        }
        read += 1;
    }

    (nesting == 0 && literal == 0).then_some(write)
}

/// Collapse template arguments of `buf` in place.
///
/// Returns `false` for malformed input, in which case the contents of `buf`
/// are unspecified and the caller should fall back to a saved copy of the
/// raw name.
pub fn detemplatize_in_place(buf: &mut Vec<u8>) -> bool
{
    match collapse(buf) {
        Some(len) => {
            buf.truncate(len);
            true
        }
        None => false,
    }
}

/// Collapse template arguments of `name`.
///
/// Returns `None` for malformed input; callers fall back to the raw name.
#[must_use]
pub fn detemplatize(name: &str) -> Option<String>
{
    let mut buf = name.as_bytes().to_vec();
    let len = collapse(&mut buf)?;
    buf.truncate(len);
    String::from_utf8(buf).ok()
}
