//! # Types
//!
//! Records produced by the symbol engine.
//!
//! Offsets in every record are module-relative ("modoffs"): they are measured
//! from the module's preferred load base, never from a runtime address, so a
//! record stays valid however the module is mapped in a live process.

pub mod symbols;
pub mod typeinfo;

pub use symbols::{DebugKind, LineEntry, LineInfo, QueryFlags, SymbolInfo};
pub use typeinfo::{TypeArena, TypeNode, TypeRef};
