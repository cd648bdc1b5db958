//! # symscope-core
//!
//! Cross-format symbol and debug-information engine.
//!
//! Given a module on disk and either a module-relative offset or a name,
//! the engine resolves symbol names, address ranges and source lines, and
//! for PDB-described modules expands type information. One façade,
//! [`Engine`], fronts four backends:
//!
//! - **ELF**: `.symtab` (or `.dynsym`) plus DWARF line tables, following
//!   `.gnu_debuglink` and build-id debug files.
//! - **Mach-O**: `LC_SYMTAB` plus DWARF, thin or universal, following `.dSYM`
//!   bundles whose UUID matches.
//! - **PE/COFF**: MinGW-style images with a COFF symbol table or DWARF.
//! - **PDB**: every other PE image, through a [`NativeEngine`]; the bundled
//!   [`PdbEngine`] reads PDB files directly.
//!
//! All offsets are module-relative, so results do not depend on where a
//! module is mapped at run time.
//!
//! ## Why unsafe code is needed
//!
//! Module files are memory mapped, and mapping a file is `unsafe` because
//! the file may change underneath the mapping. Nothing else in the crate
//! uses `unsafe`.

#![allow(unsafe_code)] // Required for memory-mapping module files

pub mod config;
pub mod demangle;
pub mod engine;
pub mod error;
pub mod native;
pub mod pattern;
pub mod symbols;
pub mod types;

pub use config::EngineConfig;
pub use demangle::demangle_symbol;
pub use engine::Engine;
pub use error::{ErrorCode, Result, SymError};
pub use native::{NativeEngine, PdbEngine};
pub use symbols::image::{FileSystemSource, ImageSource, MappedImage};
pub use symbols::session::ModuleInfo;
pub use types::{DebugKind, LineEntry, LineInfo, QueryFlags, SymbolInfo, TypeArena, TypeNode, TypeRef};
