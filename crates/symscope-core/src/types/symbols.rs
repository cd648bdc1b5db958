//! Symbol, line and debug-kind types.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::ErrorCode;

bitflags! {
    /// Debug information a module exposes.
    ///
    /// The two generic bits (`SYMBOLS`, `LINE_NUMS`) summarise the concrete
    /// format bits; a session whose line info lives in a split debug file
    /// reports the union of both files' bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DebugKind: u32
    {
        const SYMBOLS = 0x0001;
        const LINE_NUMS = 0x0002;
        const ELF_SYMTAB = 0x0100;
        const DWARF_LINE = 0x0200;
        const PDB = 0x0400;
        const PECOFF_SYMTAB = 0x0800;
        const MACHO_SYMTAB = 0x1000;
    }
}

bitflags! {
    /// Presentation flags accepted by lookups and enumerations.
    ///
    /// The empty set leaves names exactly as stored in the module.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueryFlags: u32
    {
        /// Short demangled form: no template arguments, no parameters.
        const DEMANGLE = 0x01;
        /// Full demangled form with templates and parameter lists.
        const DEMANGLE_FULL = 0x02;
        /// Keep template arguments in undecorated MSVC names.
        const DEMANGLE_PDB_TEMPLATES = 0x04;
    }
}

impl QueryFlags
{
    /// Flags honoured by every backend except the PDB one.
    pub const NON_PDB: QueryFlags = QueryFlags::DEMANGLE.union(QueryFlags::DEMANGLE_FULL);

    /// Default flags used when building name indexes.
    #[must_use]
    pub const fn default_demangle() -> Self
    {
        QueryFlags::DEMANGLE
    }
}

/// Source position of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo
{
    /// Source file path as recorded in the debug info.
    pub file: Option<Arc<str>>,
    /// 1-based line number.
    pub line: u64,
    /// Distance from the first address of the line to the queried address.
    pub line_offs: u64,
}

/// One line-table row, as delivered by line enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry
{
    /// Name of the compilation unit the row belongs to.
    pub cu_name: Option<Arc<str>>,
    /// Source file, `None` for a compilation unit without a line table.
    pub file: Option<Arc<str>>,
    /// Line number, 0 when `file` is `None`.
    pub line: u64,
    /// Module-relative address of the row.
    pub addr: u64,
}

/// Result of a symbol lookup or one step of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo
{
    /// Presented name (mangled or demangled according to `flags`).
    pub name: String,
    /// Bytes, including the terminator, the complete presented name needs.
    pub name_available_size: usize,
    /// Module-relative start offset.
    pub start_offs: u64,
    /// Module-relative end offset.
    ///
    /// Exact when the container records a size. Otherwise this is the start
    /// of the next symbol, and `start_offs + 1` for the last one.
    pub end_offs: u64,
    /// Debug info of the owning module.
    pub debug_kind: DebugKind,
    /// Native type index, 0 outside the PDB backend.
    pub type_id: u32,
    /// Flags the backend actually honoured.
    pub flags: QueryFlags,
    /// Source position, when it could be resolved.
    pub line: Option<LineInfo>,
}

impl SymbolInfo
{
    pub(crate) fn new(name: String, start_offs: u64, end_offs: u64, debug_kind: DebugKind) -> Self
    {
        let name_available_size = name.len() + 1;
        Self {
            name,
            name_available_size,
            start_offs,
            end_offs,
            debug_kind,
            type_id: 0,
            flags: QueryFlags::empty(),
            line: None,
        }
    }

    /// Status of the lookup that produced this record.
    ///
    /// `LineNotAvailable` means the symbol fields are valid but no line
    /// information was found for the address.
    #[must_use]
    pub fn status(&self) -> ErrorCode
    {
        if self.line.is_some() {
            ErrorCode::Success
        } else {
            ErrorCode::LineNotAvailable
        }
    }

    /// Whether the container gave no usable size for the symbol.
    #[must_use]
    pub fn is_point_symbol(&self) -> bool
    {
        self.end_offs == self.start_offs || self.end_offs == self.start_offs.wrapping_add(1)
    }

    /// Copy the name into a caller buffer.
    ///
    /// The buffer always ends up NUL-terminated (when non-empty) and holds as
    /// much of the name as fits. The return value is
    /// [`name_available_size`](Self::name_available_size); a value larger
    /// than `buf.len()` means the copy was truncated.
    pub fn copy_name_into(&self, buf: &mut [u8]) -> usize
    {
        copy_truncated(self.name.as_bytes(), buf);
        self.name_available_size
    }
}

impl fmt::Display for SymbolInfo
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} [0x{:x}-0x{:x}]", self.name, self.start_offs, self.end_offs)?;
        if let Some(line) = &self.line {
            write!(
                f,
                " {}:{}+0x{:x}",
                line.file.as_deref().unwrap_or("??"),
                line.line,
                line.line_offs
            )?;
        }
        Ok(())
    }
}

/// Copy `src` into `dst`, truncating and NUL-terminating.
///
/// Returns the number of bytes copied, excluding the terminator.
pub(crate) fn copy_truncated(src: &[u8], dst: &mut [u8]) -> usize
{
    let Some(room) = dst.len().checked_sub(1) else {
        return 0;
    };
    let len = src.len().min(room);
    dst[..len].copy_from_slice(&src[..len]);
    dst[len] = 0;
    len
}
