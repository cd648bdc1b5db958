//! Mach-O symbol tables.
//!
//! The Mach-O symbol table carries no sizes, so the reader keeps an
//! auxiliary index sorted by address and treats each symbol as running up
//! to the next one. Lookups binary-search that index.

use std::collections::HashSet;

use object::macho;
use object::read::macho::{FatArch, LoadCommandVariant, MachHeader, MachOFatFile32, MachOFatFile64, Nlist};
use object::{Architecture, Endianness, FileKind, Object, ObjectSegment};
use tracing::{debug, trace};

use super::image::has_section;
use super::{DebugLink, ObjectSymbols};
use crate::error::{Result, SymError};
use crate::types::DebugKind;

const PAGEZERO: &str = "__PAGEZERO";

#[derive(Debug, Clone)]
struct MachSymbol
{
    /// Name with the leading underscore removed.
    name: Box<str>,
    value: u64,
}

/// Symbol view of one Mach-O slice.
#[derive(Debug)]
pub(crate) struct MachOReader
{
    /// Sorted by `value`, one entry per distinct name.
    sorted: Vec<MachSymbol>,
    load_base: u64,
    /// Bytes covered by all segments, measured from `load_base`.
    span: u64,
    pagezero: u64,
    debug_kind: DebugKind,
    uuid: Option<[u8; 16]>,
}

/// Host architecture as `object` names it.
fn host_architecture() -> Architecture
{
    if cfg!(target_arch = "aarch64") {
        Architecture::Aarch64
    } else if cfg!(target_arch = "x86_64") {
        Architecture::X86_64
    } else if cfg!(target_arch = "x86") {
        Architecture::I386
    } else {
        Architecture::Unknown
    }
}

fn pick_arch<'data, A: FatArch>(arches: &[A], data: &'data [u8]) -> object::Result<Option<&'data [u8]>>
{
    let host = host_architecture();
    let Some(chosen) = arches.iter().find(|arch| arch.architecture() == host).or_else(|| arches.first()) else {
        return Ok(None);
    };
    debug!(arch = ?chosen.architecture(), "selected universal binary slice");
    chosen.data(data).map(Some)
}

/// Slice of a universal binary matching the host, or the first one.
pub(crate) fn select_fat_slice(data: &[u8], kind: FileKind) -> Result<&[u8]>
{
    let slice = match kind {
        FileKind::MachOFat64 => pick_arch(MachOFatFile64::parse(data)?.arches(), data)?,
        _ => pick_arch(MachOFatFile32::parse(data)?.arches(), data)?,
    };
    slice.ok_or_else(|| SymError::Parse("universal binary has no slices".to_string()))
}

/// Walk the raw load commands for the symbol table.
///
/// Returns `None` when there is no `LC_SYMTAB`.
fn read_symtab<Mach>(data: &[u8]) -> object::Result<Option<Vec<MachSymbol>>>
where
    Mach: MachHeader<Endian = Endianness>,
{
    let header = Mach::parse(data, 0)?;
    let endian = header.endian()?;
    let mut commands = header.load_commands(endian, data, 0)?;

    while let Some(command) = commands.next()? {
        let LoadCommandVariant::Symtab(symtab) = command.variant()? else {
            continue;
        };
        let table = symtab.symbols::<Mach, _>(endian, data)?;
        let mut symbols = Vec::new();
        for nlist in table.iter() {
            if nlist.is_stab() {
                continue;
            }
            let n_type = nlist.n_type() & macho::N_TYPE;
            // Undefined entries are imports; indirect ones alias another name.
            if n_type == macho::N_UNDF || n_type == macho::N_INDR {
                continue;
            }
            let value: u64 = nlist.n_value(endian).into();
            let Ok(raw) = nlist.name(endian, table.strings()) else {
                continue;
            };
            if value == 0 || raw.is_empty() {
                continue;
            }
            let raw = String::from_utf8_lossy(raw);
            let name = raw.strip_prefix('_').unwrap_or(&raw);
            symbols.push(MachSymbol {
                name: name.into(),
                value,
            });
        }
        return Ok(Some(symbols));
    }

    Ok(None)
}

/// Sort by address after keeping only the first entry seen for each name.
fn build_sorted(symbols: Vec<MachSymbol>) -> Vec<MachSymbol>
{
    let mut seen = HashSet::with_capacity(symbols.len());
    let mut sorted: Vec<MachSymbol> =
        symbols.into_iter().filter(|symbol| seen.insert(symbol.name.clone())).collect();
    sorted.sort_by_key(|symbol| symbol.value);
    sorted
}

impl MachOReader
{
    pub(crate) fn parse(data: &[u8], file: &object::File<'_>) -> Result<Self>
    {
        let mut load_base = u64::MAX;
        let mut end = 0u64;
        let mut pagezero = 0u64;
        for segment in file.segments() {
            load_base = load_base.min(segment.address());
            end = end.max(segment.address().saturating_add(segment.size()));
            if matches!(segment.name(), Ok(Some(PAGEZERO))) {
                pagezero = segment.size();
            }
        }
        if load_base == u64::MAX {
            load_base = 0;
        }

        let symtab = if file.is_64() {
            read_symtab::<macho::MachHeader64<Endianness>>(data)
        } else {
            read_symtab::<macho::MachHeader32<Endianness>>(data)
        }
        .map_err(|err| SymError::Parse(format!("bad Mach-O symbol table: {err}")))?;

        let mut debug_kind = DebugKind::empty();
        if symtab.is_some() {
            debug_kind |= DebugKind::SYMBOLS | DebugKind::MACHO_SYMTAB;
        }
        if has_section(file, &["__debug_line"]) {
            debug_kind |= DebugKind::LINE_NUMS | DebugKind::DWARF_LINE;
        }

        let uuid = file
            .mach_uuid()
            .map_err(|err| SymError::Parse(format!("bad LC_UUID: {err}")))?;

        let sorted = build_sorted(symtab.unwrap_or_default());
        debug!(
            symbols = sorted.len(),
            load_base = format_args!("0x{load_base:x}"),
            pagezero = format_args!("0x{pagezero:x}"),
            "parsed Mach-O module"
        );

        Ok(Self {
            sorted,
            load_base,
            span: end.saturating_sub(load_base),
            pagezero,
            debug_kind,
            uuid,
        })
    }

    fn entry(&self, idx: usize) -> Result<&MachSymbol>
    {
        self.sorted
            .get(idx)
            .ok_or_else(|| SymError::InvalidParameter(format!("symbol index {idx} out of range")))
    }

    fn module_offset(&self, value: u64) -> u64
    {
        value.wrapping_sub(self.load_base).wrapping_sub(self.pagezero)
    }
}

impl ObjectSymbols for MachOReader
{
    fn num_symbols(&self) -> usize
    {
        self.sorted.len()
    }

    fn symbol_name(&self, idx: usize) -> Option<&str>
    {
        self.sorted.get(idx).map(|symbol| &*symbol.name)
    }

    fn symbol_offs(&self, idx: usize) -> Result<(u64, u64)>
    {
        let symbol = self.entry(idx)?;
        let start = self.module_offset(symbol.value);
        let end = match self.sorted.get(idx + 1) {
            Some(next) => self.module_offset(next.value),
            None => start.wrapping_add(1),
        };
        Ok((start, end))
    }

    fn addrsearch(&self, modoffs: u64) -> Option<usize>
    {
        let rel = modoffs.checked_add(self.pagezero)?;
        if rel >= self.span {
            trace!(modoffs, "offset beyond the last segment");
            return None;
        }
        let target = self.load_base.checked_add(rel)?;

        // Last entry whose address does not exceed the target.
        let after = self.sorted.partition_point(|symbol| symbol.value <= target);
        after.checked_sub(1)
    }

    fn load_base(&self) -> u64
    {
        self.load_base
    }

    fn debug_kind(&self) -> DebugKind
    {
        self.debug_kind
    }

    fn debuglink(&self) -> Option<DebugLink>
    {
        self.uuid.map(|uuid| DebugLink::Dsym { uuid })
    }

    fn uuid(&self) -> Option<[u8; 16]>
    {
        self.uuid
    }

    fn offs_adjust(&self) -> u64
    {
        self.pagezero
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn sym(name: &str, value: u64) -> MachSymbol
    {
        MachSymbol {
            name: name.into(),
            value,
        }
    }

    fn reader(symbols: Vec<MachSymbol>) -> MachOReader
    {
        MachOReader {
            sorted: build_sorted(symbols),
            load_base: 0,
            span: 0x1_0000_2000,
            pagezero: 0x1_0000_0000,
            debug_kind: DebugKind::SYMBOLS | DebugKind::MACHO_SYMTAB,
            uuid: None,
        }
    }

    #[test]
    fn test_sorted_index_dedups_by_name()
    {
        let reader = reader(vec![
            sym("b", 0x1_0000_0200),
            sym("a", 0x1_0000_0100),
            sym("b", 0x1_0000_0300),
        ]);
        assert_eq!(reader.num_symbols(), 2);
        assert_eq!(reader.symbol_name(0), Some("a"));
        assert_eq!(reader.symbol_offs(0).unwrap(), (0x100, 0x200));
        assert_eq!(reader.symbol_offs(1).unwrap(), (0x200, 0x201));
    }

    #[test]
    fn test_addrsearch_picks_closest_below()
    {
        let reader = reader(vec![sym("a", 0x1_0000_0100), sym("b", 0x1_0000_0200)]);
        assert_eq!(reader.addrsearch(0x50), None);
        assert_eq!(reader.addrsearch(0x100), Some(0));
        assert_eq!(reader.addrsearch(0x1ff), Some(0));
        assert_eq!(reader.addrsearch(0x250), Some(1));
        assert_eq!(reader.addrsearch(0x2000), None);
    }

    #[test]
    fn test_dwarf_address_adds_pagezero()
    {
        let reader = reader(vec![sym("a", 0x1_0000_0100)]);
        assert_eq!(reader.dwarf_address(0x100), 0x1_0000_0100);
    }
}
