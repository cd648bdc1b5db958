//! Module images and DWARF section loading.
//!
//! A [`MappedImage`] is the read-only view of one module file. Every reader
//! parses out of it; nothing a reader hands back borrows from it past load
//! time except through the owned copies made here.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use memmap2::{Mmap, MmapOptions};
use object::{Object, ObjectSection};

use super::{OwnedDwarf, OwnedReader};
use crate::error::{Result, SymError};

enum ImageBytes
{
    Mapped(Mmap),
    Shared(Arc<[u8]>),
}

/// Read-only bytes of a module file.
pub struct MappedImage
{
    path: PathBuf,
    bytes: ImageBytes,
}

impl MappedImage
{
    /// Wrap bytes that are already in memory.
    #[must_use]
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: impl Into<Arc<[u8]>>) -> Self
    {
        Self {
            path: path.into(),
            bytes: ImageBytes::Shared(bytes.into()),
        }
    }

    /// Map `path` read-only and copy-on-write.
    ///
    /// ## Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, or is empty.
    pub fn map(path: &Path) -> Result<Self>
    {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(SymError::load_failed(&path.display().to_string(), "file is empty"));
        }
        // SAFETY: the mapping is private and read-only; a concurrent writer
        // can at worst make parsing fail, which every reader reports as an
        // error rather than trusting the bytes.
        let map = unsafe { MmapOptions::new().map_copy_read_only(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            bytes: ImageBytes::Mapped(map),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Size of the file in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64
    {
        self.len() as u64
    }
}

impl Deref for MappedImage
{
    type Target = [u8];

    fn deref(&self) -> &[u8]
    {
        match &self.bytes {
            ImageBytes::Mapped(map) => map,
            ImageBytes::Shared(bytes) => bytes,
        }
    }
}

impl fmt::Debug for MappedImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("MappedImage")
            .field("path", &self.path)
            .field("size", &self.len())
            .finish()
    }
}

/// Where module and debug files come from.
///
/// The engine performs every file access through this trait, so embedders
/// can serve modules from memory and tests can observe how often a module
/// is (re)opened.
pub trait ImageSource: Send + Sync
{
    /// Open and map a module file.
    ///
    /// ## Errors
    ///
    /// Returns an error when the file cannot be read.
    fn open(&self, path: &Path) -> Result<MappedImage>;

    /// Whether `path` names a readable regular file.
    fn exists(&self, path: &Path) -> bool;

    /// Whether two paths name the same underlying file.
    fn same_file(&self, a: &Path, b: &Path) -> bool;
}

/// [`ImageSource`] backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemSource;

impl ImageSource for FileSystemSource
{
    fn open(&self, path: &Path) -> Result<MappedImage>
    {
        MappedImage::map(path)
    }

    fn exists(&self, path: &Path) -> bool
    {
        path.is_file()
    }

    #[cfg(unix)]
    fn same_file(&self, a: &Path, b: &Path) -> bool
    {
        use std::os::unix::fs::MetadataExt;

        match (std::fs::metadata(a), std::fs::metadata(b)) {
            (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
            _ => false,
        }
    }

    #[cfg(not(unix))]
    fn same_file(&self, a: &Path, b: &Path) -> bool
    {
        match (a.canonicalize(), b.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

const DWARF_SECTIONS: &[(&str, &[&str])] = &[
    (".debug_abbrev", &[".debug_abbrev", "__debug_abbrev"]),
    (".debug_addr", &[".debug_addr", "__debug_addr"]),
    (".debug_aranges", &[".debug_aranges", "__debug_aranges"]),
    (".debug_info", &[".debug_info", "__debug_info"]),
    (".debug_line", &[".debug_line", "__debug_line"]),
    (".debug_line_str", &[".debug_line_str", "__debug_line_str"]),
    (".debug_ranges", &[".debug_ranges", "__debug_ranges"]),
    (".debug_rnglists", &[".debug_rnglists", "__debug_rnglists"]),
    (".debug_str", &[".debug_str", "__debug_str"]),
    (".debug_str_offsets", &[".debug_str_offsets", "__debug_str_offsets"]),
    (".debug_types", &[".debug_types", "__debug_types"]),
];

fn section_key(id: SectionId) -> &'static str
{
    match id {
        SectionId::DebugAbbrev => ".debug_abbrev",
        SectionId::DebugAddr => ".debug_addr",
        SectionId::DebugAranges => ".debug_aranges",
        SectionId::DebugInfo => ".debug_info",
        SectionId::DebugLine => ".debug_line",
        SectionId::DebugLineStr => ".debug_line_str",
        SectionId::DebugRanges => ".debug_ranges",
        SectionId::DebugRngLists => ".debug_rnglists",
        SectionId::DebugStr => ".debug_str",
        SectionId::DebugStrOffsets => ".debug_str_offsets",
        SectionId::DebugTypes => ".debug_types",
        _ => "",
    }
}

/// Whether `file` has a section under any of `names` that occupies file
/// space. `SHT_NOBITS` stand-ins left behind by `strip --only-keep-debug`
/// count as absent.
pub(crate) fn has_section(file: &object::File<'_>, names: &[&str]) -> bool
{
    names.iter().any(|name| {
        file.section_by_name(name)
            .is_some_and(|section| section.file_range().is_some_and(|(_, size)| size > 0))
    })
}

fn load_section_bytes(file: &object::File<'_>, names: &[&str]) -> Result<Option<Arc<[u8]>>>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            if section.file_range().is_none() {
                continue;
            }
            let data = section
                .uncompressed_data()
                .map_err(|err| SymError::Parse(format!("failed to read {name}: {err}")))?;
            return Ok(Some(match data {
                Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes),
                Cow::Owned(vec) => vec.into(),
            }));
        }
    }

    Ok(None)
}

/// Owned copies of a module's DWARF sections.
pub(crate) struct DebugSections
{
    endian: RunTimeEndian,
    sections: HashMap<&'static str, Arc<[u8]>>,
}

impl DebugSections
{
    /// Copy the DWARF sections out of `file`.
    ///
    /// Returns `None` when the file carries no line table, which is the only
    /// DWARF the engine consumes directly.
    pub(crate) fn load(file: &object::File<'_>) -> Result<Option<Self>>
    {
        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let mut sections = HashMap::new();
        for (canonical, aliases) in DWARF_SECTIONS {
            if let Some(data) = load_section_bytes(file, aliases)? {
                sections.insert(*canonical, data);
            }
        }

        if !sections.contains_key(".debug_line") {
            return Ok(None);
        }
        Ok(Some(Self { endian, sections }))
    }

    fn section_reader(&self, id: SectionId) -> OwnedReader
    {
        let data = self
            .sections
            .get(section_key(id))
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }

    pub(crate) fn dwarf(&self) -> Result<OwnedDwarf>
    {
        Dwarf::load(|section| Ok::<_, gimli::Error>(self.section_reader(section)))
            .map_err(|err| SymError::Parse(format!("failed to load DWARF: {err}")))
    }
}
