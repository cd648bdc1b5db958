//! # Native Symbol Engines
//!
//! PE modules that carry their debug info in a PDB are served by a native
//! symbol engine rather than the in-crate readers. [`NativeEngine`] is the
//! interface to such an engine. It mirrors the primitives of a
//! process-style symbol handler: modules are loaded at a base address in a
//! synthetic address space, and every address crossing the trait is
//! absolute within that space.
//!
//! [`PdbEngine`] is the bundled implementation and reads PDB files
//! directly, so the PDB path works on every host.

mod pdb_engine;

use std::path::Path;

use thiserror::Error;

pub use self::pdb_engine::PdbEngine;
use crate::error::SymError;
use crate::pattern;
use crate::types::{DebugKind, QueryFlags};

/// Oldest engine version whose indexed search is trusted.
pub const FAST_SEARCH_MIN_VERSION: (u16, u16) = (6, 6);

/// A symbol as the native engine reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSymbol
{
    /// Undecorated, possibly template-bearing name.
    pub name: String,
    /// Absolute address in the engine's address space.
    pub address: u64,
    /// Size in bytes, 0 when unknown.
    pub size: u64,
    /// Index of the symbol's type record, 0 when none.
    pub type_index: u32,
    pub is_function: bool,
}

/// Source position of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLine
{
    pub file: String,
    pub line: u64,
    /// Absolute address of the first instruction of the line.
    pub address: u64,
}

/// One row of a module's line tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLineEntry
{
    /// Object file (compiland) the row came from.
    pub compiland: Option<String>,
    pub file: Option<String>,
    pub line: u64,
    pub address: u64,
}

/// What the engine found for a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeModuleInfo
{
    pub base: u64,
    pub size: u64,
    pub debug_kind: DebugKind,
}

/// A decoded type record. Children are type indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeType
{
    Function
    {
        return_type: Option<u32>,
        args: Vec<u32>,
    },
    Pointer
    {
        target: u32,
        size: u64,
    },
    Array
    {
        element: u32,
        size: u64,
        count: u64,
    },
    Base
    {
        size: u64,
        signed: bool,
    },
    Compound
    {
        name: String,
        size: u64,
        fields: Vec<u32>,
    },
    Typedef
    {
        name: String,
        target: u32,
    },
    Void,
    Other
    {
        name: String,
        size: u64,
    },
}

/// Why a native load failed.
#[derive(Error, Debug)]
pub enum NativeLoadError
{
    /// The module cannot be placed at the requested base.
    #[error("module cannot be loaded at 0x{0:x}")]
    InvalidAddress(u64),

    #[error(transparent)]
    Failed(#[from] SymError),
}

/// Interface to a native symbol engine.
///
/// Implementations synchronise internally; every method takes `&self`.
/// Callbacks return `false` to stop the walk.
pub trait NativeEngine: Send + Sync
{
    /// `(major, minor)` version of the engine.
    fn version(&self) -> (u16, u16);

    /// Load `path` at `base`, returning the base actually used.
    ///
    /// A `base` of 0 lets the engine pick, normally the image's preferred
    /// base.
    ///
    /// ## Errors
    ///
    /// [`NativeLoadError::InvalidAddress`] when `base` cannot be used.
    fn load_module(&self, path: &Path, base: u64, size: u64) -> Result<u64, NativeLoadError>;

    fn unload_module(&self, base: u64);

    fn module_info(&self, base: u64) -> Option<NativeModuleInfo>;

    /// Symbol covering `address`.
    fn symbol_from_address(&self, address: u64) -> Option<NativeSymbol>;

    fn line_from_address(&self, address: u64) -> Option<NativeLine>;

    /// Symbol named by a case-sensitive `module!name` string.
    fn symbol_from_name(&self, qualified: &str) -> Option<NativeSymbol>;

    /// Indexed search with a wildcard `mask`, matched as
    /// [`matches_mask`](Self::matches_mask) does.
    ///
    /// ## Errors
    ///
    /// `FeatureNotAvailable` if the engine has no index for the module.
    fn search(
        &self,
        base: u64,
        mask: &str,
        functions_only: bool,
        callback: &mut dyn FnMut(&NativeSymbol) -> bool,
    ) -> crate::Result<()>;

    /// Visit every symbol of the module.
    fn enumerate(&self, base: u64, callback: &mut dyn FnMut(&NativeSymbol) -> bool) -> crate::Result<()>;

    fn enumerate_lines(&self, base: u64, callback: &mut dyn FnMut(&NativeLineEntry) -> bool) -> crate::Result<()>;

    fn type_record(&self, base: u64, type_index: u32) -> Option<NativeType>;

    /// Undecorate an MSVC name. Template handling is left to the caller.
    fn undecorate(&self, name: &str, flags: QueryFlags) -> Option<String>;

    /// Whether `name` is selected by a search `mask`.
    ///
    /// A decorated name matches through its raw form or its undecorated
    /// base name, so the indexed search and a filtered enumeration agree.
    fn matches_mask(&self, name: &str, mask: &str) -> bool
    {
        if pattern::matches(name, mask, false) {
            return true;
        }
        name.starts_with('?')
            && self
                .undecorate(name, QueryFlags::DEMANGLE)
                .is_some_and(|base_name| pattern::matches(&base_name, mask, false))
    }
}

/// Whether `version` supports the indexed search.
#[must_use]
pub fn has_fast_search(version: (u16, u16)) -> bool
{
    version >= FAST_SEARCH_MIN_VERSION
}
