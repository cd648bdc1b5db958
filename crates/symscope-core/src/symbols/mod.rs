//! # Object File Readers
//!
//! Per-format symbol tables for the modules the engine handles itself:
//! ELF, Mach-O (thin or universal) and PE/COFF images built by MinGW-style
//! toolchains that carry a COFF symbol table or DWARF. PE images with only
//! PDB debug info go to the native engine instead.
//!
//! Every reader exposes the same indexed view through [`ObjectSymbols`].
//! Indices are stable for the life of the reader and offsets are relative to
//! the module's preferred load base.

pub(crate) mod cache;
pub(crate) mod debuglink;
pub(crate) mod dwarf;
pub(crate) mod elf;
pub mod image;
pub(crate) mod macho;
pub(crate) mod pdb;
pub(crate) mod pecoff;
pub(crate) mod session;

use gimli::{Dwarf, EndianArcSlice, RunTimeEndian};
use object::{FileKind, Object};
use tracing::debug;

use self::elf::ElfReader;
use self::image::{has_section, DebugSections, MappedImage};
use self::macho::MachOReader;
use self::pecoff::PecoffReader;
use crate::error::{Result, SymError};
use crate::types::DebugKind;

pub(crate) type OwnedReader = EndianArcSlice<RunTimeEndian>;
pub(crate) type OwnedDwarf = Dwarf<OwnedReader>;

/// Pointer from a module to its separate debug file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DebugLink
{
    /// File name from `.gnu_debuglink`.
    Name(String),
    /// A `.dSYM` bundle next to the module, matched by `LC_UUID`.
    Dsym
    {
        uuid: [u8; 16],
    },
}

/// Indexed symbol view shared by every object-format reader.
pub(crate) trait ObjectSymbols
{
    fn num_symbols(&self) -> usize;

    /// Raw (possibly mangled) name at `idx`.
    fn symbol_name(&self, idx: usize) -> Option<&str>;

    /// `[start, end)` of the symbol at `idx`, relative to the load base.
    ///
    /// ## Errors
    ///
    /// `SymbolNotFound` for imports, `InvalidParameter` for a bad index.
    fn symbol_offs(&self, idx: usize) -> Result<(u64, u64)>;

    /// Index of the symbol covering `modoffs`.
    fn addrsearch(&self, modoffs: u64) -> Option<usize>;

    fn load_base(&self) -> u64;

    fn debug_kind(&self) -> DebugKind;

    fn debuglink(&self) -> Option<DebugLink>
    {
        None
    }

    fn build_id(&self) -> Option<&str>
    {
        None
    }

    fn uuid(&self) -> Option<[u8; 16]>
    {
        None
    }

    /// Distance between the load base and where module offsets start
    /// counting. Non-zero only for Mach-O executables with `__PAGEZERO`.
    fn offs_adjust(&self) -> u64
    {
        0
    }

    /// Address in the file's own address space that DWARF line tables
    /// use for `modoffs`.
    fn dwarf_address(&self, modoffs: u64) -> u64
    {
        self.load_base().wrapping_add(self.offs_adjust()).wrapping_add(modoffs)
    }
}

/// The readers the engine knows, as a closed set.
#[derive(Debug)]
pub(crate) enum ObjectReader
{
    Elf(ElfReader),
    MachO(MachOReader),
    Pecoff(PecoffReader),
}

impl ObjectReader
{
    fn inner(&self) -> &dyn ObjectSymbols
    {
        match self {
            ObjectReader::Elf(reader) => reader,
            ObjectReader::MachO(reader) => reader,
            ObjectReader::Pecoff(reader) => reader,
        }
    }

    #[must_use]
    pub(crate) fn format_name(&self) -> &'static str
    {
        match self {
            ObjectReader::Elf(_) => "ELF",
            ObjectReader::MachO(_) => "Mach-O",
            ObjectReader::Pecoff(_) => "PE/COFF",
        }
    }
}

impl ObjectSymbols for ObjectReader
{
    fn num_symbols(&self) -> usize
    {
        self.inner().num_symbols()
    }

    fn symbol_name(&self, idx: usize) -> Option<&str>
    {
        self.inner().symbol_name(idx)
    }

    fn symbol_offs(&self, idx: usize) -> Result<(u64, u64)>
    {
        self.inner().symbol_offs(idx)
    }

    fn addrsearch(&self, modoffs: u64) -> Option<usize>
    {
        self.inner().addrsearch(modoffs)
    }

    fn load_base(&self) -> u64
    {
        self.inner().load_base()
    }

    fn debug_kind(&self) -> DebugKind
    {
        self.inner().debug_kind()
    }

    fn debuglink(&self) -> Option<DebugLink>
    {
        self.inner().debuglink()
    }

    fn build_id(&self) -> Option<&str>
    {
        self.inner().build_id()
    }

    fn uuid(&self) -> Option<[u8; 16]>
    {
        self.inner().uuid()
    }

    fn offs_adjust(&self) -> u64
    {
        self.inner().offs_adjust()
    }
}

/// A parsed module: its symbol reader plus owned DWARF sections, if any.
pub(crate) struct LoadedObject
{
    pub(crate) reader: ObjectReader,
    pub(crate) sections: Option<DebugSections>,
}

/// How a module file should be handled.
pub(crate) enum Classified
{
    /// Parsed by one of the in-crate readers.
    Object(LoadedObject),
    /// A PE image with no COFF symbols and no DWARF; needs the native engine.
    NativePe,
}

/// Parse `image` with the reader matching its format.
///
/// ## Errors
///
/// `LoadFailed` for unrecognised or malformed files.
pub(crate) fn load_object(image: &MappedImage) -> Result<Classified>
{
    let path = image.path().display().to_string();
    let kind = FileKind::parse(&**image).map_err(|err| SymError::load_failed(&path, err))?;
    debug!(path = %path, ?kind, "classified module");

    let data: &[u8] = match kind {
        FileKind::MachOFat32 | FileKind::MachOFat64 => {
            macho::select_fat_slice(image, kind).map_err(|err| SymError::load_failed(&path, err))?
        }
        _ => &**image,
    };

    let file = object::File::parse(data).map_err(|err| SymError::load_failed(&path, err))?;
    let reader = match file.format() {
        object::BinaryFormat::Elf => ObjectReader::Elf(ElfReader::parse(&file)?),
        object::BinaryFormat::MachO => ObjectReader::MachO(MachOReader::parse(data, &file)?),
        object::BinaryFormat::Pe | object::BinaryFormat::Coff => {
            let has_coff_symbols = file.symbols().next().is_some();
            if !has_coff_symbols && !has_section(&file, &[".debug_line"]) {
                return Ok(Classified::NativePe);
            }
            ObjectReader::Pecoff(PecoffReader::parse(&file)?)
        }
        other => {
            return Err(SymError::load_failed(&path, format!("unsupported object format {other:?}")));
        }
    };

    let sections = DebugSections::load(&file)?;
    Ok(Classified::Object(LoadedObject { reader, sections }))
}
