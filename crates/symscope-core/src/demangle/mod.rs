//! # Symbol Demangling
//!
//! Turns linkage names into the names callers see.
//!
//! Three mangling families are recognised by prefix:
//!
//! - **Itanium C++** (`_Z...`): the short form comes from the in-crate,
//!   allocation-free [`itanium`] demangler; the full form (templates and
//!   parameters) from `cpp_demangle`.
//! - **MSVC C++** (`?...`): undecorated with `msvc-demangler`, after which
//!   template arguments are collapsed by [`detemplatize`] unless the caller
//!   asked to keep them.
//! - **Rust v0** (`_R...`): handled by `rustc-demangle`. Legacy Rust names
//!   use the Itanium scheme and need no special casing.
//!
//! Everything else is treated as an already-plain C identifier.

pub mod detemplatize;
pub mod itanium;

use cpp_demangle::{BorrowedSymbol, DemangleOptions, ParseOptions};
use msvc_demangler::DemangleFlags;

use crate::types::symbols::copy_truncated;
use crate::types::QueryFlags;

/// First buffer size tried by [`demangle_to_string`].
pub const INITIAL_NAME_BUFFER: usize = 1024;

const RECURSION_LIMIT: u32 = 1000;

/// Mangling family of a linkage name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mangling
{
    Itanium,
    Msvc,
    Rust,
    None,
}

impl Mangling
{
    #[must_use]
    pub fn detect(name: &str) -> Self
    {
        if name.starts_with("_R") {
            Mangling::Rust
        } else if itanium::is_mangled(name.as_bytes()) {
            Mangling::Itanium
        } else if name.starts_with('?') {
            Mangling::Msvc
        } else {
            Mangling::None
        }
    }
}

/// Demangle `mangled` into `dst` according to `flags`.
///
/// Returns the number of bytes, terminator included, the demangled name
/// needs; a value larger than `dst.len()` means `dst` holds a truncated,
/// NUL-terminated prefix. Returns 0 when the name was not demangled, which
/// covers plain identifiers, malformed names and an empty `flags`; `dst`
/// then holds `mangled` verbatim, truncated to fit.
///
/// With [`QueryFlags::DEMANGLE_FULL`] the returned size is only an estimate
/// of what a retry needs. Callers should loop, as [`demangle_to_string`]
/// does, rather than assume one retry suffices.
pub fn demangle_symbol(dst: &mut [u8], mangled: &str, flags: QueryFlags) -> usize
{
    let wants_full = flags.contains(QueryFlags::DEMANGLE_FULL);
    if !wants_full && !flags.contains(QueryFlags::DEMANGLE) {
        copy_truncated(mangled.as_bytes(), dst);
        return 0;
    }

    let rendered = match Mangling::detect(mangled) {
        Mangling::Itanium if !wants_full => return itanium::demangle(mangled.as_bytes(), dst),
        Mangling::Itanium => full_itanium(mangled),
        Mangling::Msvc => undecorate_msvc(mangled, flags),
        Mangling::Rust => rustc_demangle::try_demangle(mangled)
            .ok()
            .map(|name| if wants_full { name.to_string() } else { format!("{name:#}") }),
        Mangling::None => None,
    };

    match rendered {
        Some(name) => {
            copy_truncated(name.as_bytes(), dst);
            name.len() + 1
        }
        None => {
            copy_truncated(mangled.as_bytes(), dst);
            0
        }
    }
}

fn full_itanium(mangled: &str) -> Option<String>
{
    let parse = ParseOptions::default().recursion_limit(RECURSION_LIMIT);
    let symbol = BorrowedSymbol::new_with_options(mangled.as_bytes(), &parse).ok()?;
    symbol
        .demangle(&DemangleOptions::default().recursion_limit(RECURSION_LIMIT))
        .ok()
}

/// Undecorate an MSVC name, collapsing templates unless
/// [`QueryFlags::DEMANGLE_PDB_TEMPLATES`] is set.
pub(crate) fn undecorate_msvc(mangled: &str, flags: QueryFlags) -> Option<String>
{
    let style = if flags.contains(QueryFlags::DEMANGLE_FULL) {
        DemangleFlags::COMPLETE
    } else {
        DemangleFlags::NAME_ONLY
    };
    let undecorated = msvc_demangler::demangle(mangled, style).ok()?;
    Some(collapse_templates(undecorated, flags))
}

/// Apply [`detemplatize`] to an undecorated MSVC name when the flags call
/// for it, keeping the input when the pass rejects it.
pub(crate) fn collapse_templates(name: String, flags: QueryFlags) -> String
{
    if flags.contains(QueryFlags::DEMANGLE_PDB_TEMPLATES) || flags.contains(QueryFlags::DEMANGLE_FULL) {
        return name;
    }
    detemplatize::detemplatize(&name).unwrap_or(name)
}

/// Demangle into an owned string, growing the buffer until the name fits.
///
/// Returns `None` when the name was not demangled.
#[must_use]
pub fn demangle_to_string(mangled: &str, flags: QueryFlags) -> Option<String>
{
    let mut buf = vec![0u8; INITIAL_NAME_BUFFER];
    loop {
        let needed = demangle_symbol(&mut buf, mangled, flags);
        if needed == 0 {
            return None;
        }
        if needed <= buf.len() {
            buf.truncate(needed - 1);
            return String::from_utf8(buf).ok();
        }
        let grown = needed.max(buf.len() * 2);
        buf.resize(grown, 0);
    }
}

/// Name as presented under `flags`: demangled when possible, raw otherwise.
#[must_use]
pub fn present(raw: &str, flags: QueryFlags) -> String
{
    demangle_to_string(raw, flags).unwrap_or_else(|| raw.to_string())
}
