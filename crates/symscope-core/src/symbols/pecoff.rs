//! PE/COFF symbol tables for images built with GNU-style toolchains.

use object::{Object, ObjectSection, ObjectSymbol, SymbolSection};
use tracing::debug;

use super::image::has_section;
use super::ObjectSymbols;
use crate::error::{Result, SymError};
use crate::types::DebugKind;

#[derive(Debug, Clone)]
struct CoffSymbol
{
    name: Box<str>,
    /// Relative virtual address.
    rva: u64,
}

/// Symbol view of a PE image with a COFF symbol table or DWARF.
///
/// COFF symbols carry no sizes, so each runs up to the next one in address
/// order. Images without a symbol table fall back to the export directory.
#[derive(Debug)]
pub(crate) struct PecoffReader
{
    sorted: Vec<CoffSymbol>,
    image_base: u64,
    /// End of the last section, as an RVA.
    image_end: u64,
    debug_kind: DebugKind,
}

impl PecoffReader
{
    pub(crate) fn parse(file: &object::File<'_>) -> Result<Self>
    {
        let image_base = file.relative_address_base();
        let to_rva = |address: u64| address.checked_sub(image_base).unwrap_or(address);

        let mut sorted: Vec<CoffSymbol> = file
            .symbols()
            .filter(|symbol| matches!(symbol.section(), SymbolSection::Section(_)) && symbol.is_definition())
            .filter_map(|symbol| {
                let name = symbol.name().ok().filter(|name| !name.is_empty())?;
                Some(CoffSymbol {
                    name: name.into(),
                    rva: to_rva(symbol.address()),
                })
            })
            .collect();

        let mut debug_kind = DebugKind::empty();
        if sorted.is_empty() {
            let exports = file
                .exports()
                .map_err(|err| SymError::Parse(format!("bad export directory: {err}")))?;
            sorted = exports
                .iter()
                .filter(|export| !export.name().is_empty())
                .map(|export| CoffSymbol {
                    name: String::from_utf8_lossy(export.name()).into(),
                    rva: to_rva(export.address()),
                })
                .collect();
            debug!(exports = sorted.len(), "no COFF symbols, using exports");
            if !sorted.is_empty() {
                debug_kind |= DebugKind::SYMBOLS;
            }
        } else {
            debug_kind |= DebugKind::SYMBOLS | DebugKind::PECOFF_SYMTAB;
        }
        if has_section(file, &[".debug_line"]) {
            debug_kind |= DebugKind::LINE_NUMS | DebugKind::DWARF_LINE;
        }
        sorted.sort_by_key(|symbol| symbol.rva);

        let image_end = file
            .sections()
            .map(|section| to_rva(section.address()).saturating_add(section.size()))
            .max()
            .unwrap_or(0);

        Ok(Self {
            sorted,
            image_base,
            image_end,
            debug_kind,
        })
    }
}

impl ObjectSymbols for PecoffReader
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
        let symbol = self
            .sorted
            .get(idx)
            .ok_or_else(|| SymError::InvalidParameter(format!("symbol index {idx} out of range")))?;
        let next = self.sorted.partition_point(|other| other.rva <= symbol.rva);
        let end = self
            .sorted
            .get(next)
            .map_or_else(|| self.image_end.max(symbol.rva.saturating_add(1)), |next| next.rva);
        Ok((symbol.rva, end))
    }

    fn addrsearch(&self, modoffs: u64) -> Option<usize>
    {
        if modoffs >= self.image_end {
            return None;
        }
        let after = self.sorted.partition_point(|symbol| symbol.rva <= modoffs);
        after.checked_sub(1)
    }

    fn load_base(&self) -> u64
    {
        self.image_base
    }

    fn debug_kind(&self) -> DebugKind
    {
        self.debug_kind
    }
}

#[cfg(test)]
mod tests
{
    use object::pe;
    use object::write::pe::{NtHeaders, Writer};

    use super::*;

    const TEXT_LEN: u32 = 0x100;

    /// Export directory for `exports`, laid out for an `.edata` at `rva`.
    fn export_directory(rva: u32, exports: &[(&str, u32)]) -> Vec<u8>
    {
        let count = u32::try_from(exports.len()).unwrap();
        let functions = 40;
        let names = functions + 4 * count;
        let ordinals = names + 4 * count;
        let strings = ordinals + 2 * count;

        let mut by_name: Vec<usize> = (0..exports.len()).collect();
        by_name.sort_by_key(|&idx| exports[idx].0);

        let mut table = vec![0u8; strings as usize];
        let mut text = b"demo.dll\0".to_vec();
        let mut name_rvas = vec![0u32; exports.len()];
        for (idx, (name, _)) in exports.iter().enumerate() {
            name_rvas[idx] = rva + strings + u32::try_from(text.len()).unwrap();
            text.extend_from_slice(name.as_bytes());
            text.push(0);
        }

        let mut put = |at: u32, bytes: &[u8]| table[at as usize..at as usize + bytes.len()].copy_from_slice(bytes);
        put(12, &(rva + strings).to_le_bytes());
        put(16, &1u32.to_le_bytes());
        put(20, &count.to_le_bytes());
        put(24, &count.to_le_bytes());
        put(28, &(rva + functions).to_le_bytes());
        put(32, &(rva + names).to_le_bytes());
        put(36, &(rva + ordinals).to_le_bytes());
        for (idx, (_, address)) in exports.iter().enumerate() {
            put(functions + 4 * u32::try_from(idx).unwrap(), &address.to_le_bytes());
        }
        for (slot, &idx) in by_name.iter().enumerate() {
            let slot = u32::try_from(slot).unwrap();
            put(names + 4 * slot, &name_rvas[idx].to_le_bytes());
            put(ordinals + 2 * slot, &u16::try_from(idx).unwrap().to_le_bytes());
        }
        table.extend_from_slice(&text);
        table
    }

    /// A PE32+ DLL with a `.text` section and only an export table.
    /// `exports` are offsets into `.text`.
    fn exports_only_dll(exports: &[(&str, u32)]) -> Vec<u8>
    {
        let edata_len = u32::try_from(export_directory(0, exports).len()).unwrap();
        let mut data = Vec::new();
        let mut writer = Writer::new(true, 0x1000, 0x200, &mut data);
        writer.reserve_dos_header_and_stub();
        writer.reserve_nt_headers(16);
        writer.reserve_section_headers(2);
        let text = writer.reserve_text_section(TEXT_LEN);
        let edata = writer.reserve_edata_section(edata_len);

        let targets: Vec<(&str, u32)> = exports
            .iter()
            .map(|&(name, offset)| (name, text.virtual_address + offset))
            .collect();
        let directory = export_directory(edata.virtual_address, &targets);

        writer.write_dos_header_and_stub().unwrap();
        writer.write_nt_headers(NtHeaders {
            machine: pe::IMAGE_FILE_MACHINE_AMD64,
            time_date_stamp: 0,
            characteristics: pe::IMAGE_FILE_EXECUTABLE_IMAGE | pe::IMAGE_FILE_LARGE_ADDRESS_AWARE | pe::IMAGE_FILE_DLL,
            major_linker_version: 14,
            minor_linker_version: 0,
            address_of_entry_point: 0,
            image_base: 0x1_8000_0000,
            major_operating_system_version: 6,
            minor_operating_system_version: 0,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: 6,
            minor_subsystem_version: 0,
            subsystem: pe::IMAGE_SUBSYSTEM_WINDOWS_CUI,
            dll_characteristics: 0,
            size_of_stack_reserve: 0x10_0000,
            size_of_stack_commit: 0x1000,
            size_of_heap_reserve: 0x10_0000,
            size_of_heap_commit: 0x1000,
        });
        writer.write_section_headers();
        writer.write_section(text.file_offset, &[0xcc; TEXT_LEN as usize]);
        writer.write_section(edata.file_offset, &directory);
        data
    }

    fn reader(image: &[u8]) -> PecoffReader
    {
        let file = object::File::parse(image).unwrap();
        PecoffReader::parse(&file).unwrap()
    }

    #[test]
    fn test_exports_count_as_symbols()
    {
        let image = exports_only_dll(&[("beta", 0x0), ("alpha", 0x40), ("gamma", 0x80)]);
        let reader = reader(&image);

        assert!(reader.debug_kind().contains(DebugKind::SYMBOLS));
        assert!(!reader.debug_kind().contains(DebugKind::PECOFF_SYMTAB));
        assert_eq!(reader.load_base(), 0x1_8000_0000);

        let names: Vec<&str> = (0..reader.num_symbols()).filter_map(|idx| reader.symbol_name(idx)).collect();
        assert_eq!(names, ["beta", "alpha", "gamma"]);
        assert_eq!(reader.symbol_offs(0).unwrap(), (0x1000, 0x1040));
        assert_eq!(reader.symbol_offs(1).unwrap(), (0x1040, 0x1080));
        let (start, end) = reader.symbol_offs(2).unwrap();
        assert_eq!(start, 0x1080);
        assert_eq!(end, reader.image_end);
    }

    #[test]
    fn test_aliases_end_at_next_distinct_address()
    {
        let image = exports_only_dll(&[("first", 0x10), ("first_alias", 0x10), ("second", 0x30)]);
        let reader = reader(&image);

        assert_eq!(reader.symbol_offs(0).unwrap(), (0x1010, 0x1030));
        assert_eq!(reader.symbol_offs(1).unwrap(), (0x1010, 0x1030));
        assert_eq!(reader.addrsearch(0x1020), Some(1));
        assert_eq!(reader.addrsearch(0x1005), None);
    }

    #[test]
    fn test_empty_export_table_has_no_symbols()
    {
        let image = exports_only_dll(&[]);
        let reader = reader(&image);

        assert_eq!(reader.num_symbols(), 0);
        assert!(!reader.debug_kind().contains(DebugKind::SYMBOLS));
    }
}
