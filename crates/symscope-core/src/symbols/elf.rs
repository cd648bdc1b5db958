//! ELF symbol tables, debug links and build ids.

use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind, SymbolSection};
use tracing::{debug, warn};

use super::image::has_section;
use super::{DebugLink, ObjectSymbols};
use crate::error::{Result, SymError};
use crate::types::DebugKind;

/// Longest hex build id kept, terminator included.
const MAX_BUILD_ID_LENGTH: usize = 128;

#[derive(Debug, Clone)]
struct ElfSymbol
{
    name: Box<str>,
    value: u64,
    size: u64,
    import: bool,
}

/// Symbol view of an ELF module.
///
/// Uses `.symtab` when the module carries one and `.dynsym` otherwise.
#[derive(Debug)]
pub(crate) struct ElfReader
{
    symbols: Vec<ElfSymbol>,
    load_base: u64,
    debug_kind: DebugKind,
    debuglink: Option<String>,
    build_id: Option<String>,
}

impl ElfReader
{
    pub(crate) fn parse(file: &object::File<'_>) -> Result<Self>
    {
        let use_symtab = has_section(file, &[".symtab"]);
        let symbols: Vec<ElfSymbol> = if use_symtab {
            file.symbols().map(convert_symbol).collect()
        } else {
            debug!("no .symtab, falling back to .dynsym");
            file.dynamic_symbols().map(convert_symbol).collect()
        };

        let mut debug_kind = DebugKind::empty();
        if use_symtab || has_section(file, &[".dynsym"]) {
            debug_kind |= DebugKind::SYMBOLS | DebugKind::ELF_SYMTAB;
        }
        if has_section(file, &[".debug_line"]) {
            debug_kind |= DebugKind::LINE_NUMS | DebugKind::DWARF_LINE;
        }

        // Position-independent objects without loadable segments report 0.
        let load_base = file.segments().map(|segment| segment.address()).min().unwrap_or(0);

        let debuglink = file
            .gnu_debuglink()
            .map_err(|err| SymError::Parse(format!("bad .gnu_debuglink: {err}")))?
            .map(|(name, _crc)| String::from_utf8_lossy(name).into_owned())
            .filter(|name| !name.is_empty());

        let build_id = file
            .build_id()
            .map_err(|err| SymError::Parse(format!("bad build id note: {err}")))?
            .map(hex_build_id);

        debug!(
            symbols = symbols.len(),
            load_base = format_args!("0x{load_base:x}"),
            ?debug_kind,
            "parsed ELF module"
        );

        Ok(Self {
            symbols,
            load_base,
            debug_kind,
            debuglink,
            build_id,
        })
    }

    fn symbol(&self, idx: usize) -> Result<&ElfSymbol>
    {
        self.symbols
            .get(idx)
            .ok_or_else(|| SymError::InvalidParameter(format!("symbol index {idx} out of range")))
    }
}

fn convert_symbol<'data, S>(symbol: S) -> ElfSymbol
where
    S: ObjectSymbol<'data>,
{
    let value = symbol.address();
    let import =
        (value == 0 && symbol.kind() != SymbolKind::Tls) || symbol.section() == SymbolSection::Undefined;
    ElfSymbol {
        name: symbol.name().unwrap_or_default().into(),
        value,
        size: symbol.size(),
        import,
    }
}

/// Hex-encode a build id, refusing to grow past [`MAX_BUILD_ID_LENGTH`].
pub(crate) fn hex_build_id(bytes: &[u8]) -> String
{
    use std::fmt::Write;

    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        if hex.len() + 3 > MAX_BUILD_ID_LENGTH {
            warn!(len = bytes.len(), "build id is too long, truncating");
            break;
        }
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

impl ObjectSymbols for ElfReader
{
    fn num_symbols(&self) -> usize
    {
        self.symbols.len()
    }

    fn symbol_name(&self, idx: usize) -> Option<&str>
    {
        self.symbols.get(idx).map(|symbol| &*symbol.name)
    }

    fn symbol_offs(&self, idx: usize) -> Result<(u64, u64)>
    {
        let symbol = self.symbol(idx)?;
        if symbol.import {
            return Err(SymError::SymbolNotFound);
        }
        let start = symbol.value.wrapping_sub(self.load_base);
        Ok((start, start.wrapping_add(symbol.size)))
    }

    fn addrsearch(&self, modoffs: u64) -> Option<usize>
    {
        let addr = self.load_base.wrapping_add(modoffs);
        let mut closest: Option<(usize, u64)> = None;

        for (idx, symbol) in self.symbols.iter().enumerate() {
            if symbol.import {
                continue;
            }
            if symbol.value <= addr && addr < symbol.value.saturating_add(symbol.size) {
                return Some(idx);
            }
            if symbol.value <= addr {
                let distance = addr - symbol.value;
                if closest.is_none_or(|(_, best)| distance < best) {
                    closest = Some((idx, distance));
                }
            }
        }

        // Hand-written assembly routines often carry no size.
        let (idx, _) = closest?;
        let symbol = &self.symbols[idx];
        (symbol.size == 0 && !symbol.name.is_empty()).then_some(idx)
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
        self.debuglink.clone().map(DebugLink::Name)
    }

    fn build_id(&self) -> Option<&str>
    {
        self.build_id.as_deref()
    }
}
