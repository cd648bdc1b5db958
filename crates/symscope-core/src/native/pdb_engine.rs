//! Native engine backed by the `pdb` crate.
//!
//! Each loaded module is indexed eagerly: public, procedure and data
//! symbols, every module's line program, and the type stream. Nothing is
//! read from the PDB after `load_module` returns.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use msvc_demangler::DemangleFlags;
use object::{Object, ObjectSection};
use parking_lot::RwLock;
use pdb::{FallibleIterator, SymbolData, TypeData, PDB};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::{
    NativeEngine, NativeLine, NativeLineEntry, NativeLoadError, NativeModuleInfo, NativeSymbol, NativeType,
};
use crate::error::{Result, SymError};
use crate::symbols::image::MappedImage;
use crate::types::{DebugKind, QueryFlags};

const ENGINE_VERSION: (u16, u16) = (10, 0);

/// Type indices below this are primitives encoded in the index itself.
const FIRST_NON_PRIMITIVE: u32 = 0x1000;

const MAX_MODIFIER_HOPS: usize = 16;

#[derive(Debug, Clone)]
struct IndexedSymbol
{
    name: String,
    rva: u64,
    size: u64,
    type_index: u32,
    is_function: bool,
}

#[derive(Debug, Clone)]
struct LineRecord
{
    compiland: Arc<str>,
    file: Arc<str>,
    line: u64,
    rva: u64,
    len: Option<u64>,
}

/// Type records with their PDB lifetimes stripped.
#[derive(Debug, Clone)]
enum RawType
{
    Procedure
    {
        return_type: Option<u32>,
        arg_list: u32,
    },
    ArgList(Vec<u32>),
    FieldList
    {
        members: Vec<u32>,
        continuation: Option<u32>,
    },
    Pointer
    {
        target: u32,
        size: u64,
    },
    Modifier(u32),
    Array
    {
        element: u32,
        size: u64,
    },
    Compound
    {
        name: String,
        size: u64,
        fields: Option<u32>,
    },
    Enumeration
    {
        name: String,
        underlying: u32,
    },
}

#[derive(Debug)]
struct PdbModule
{
    /// File stem, the `module` half of `module!symbol`.
    name: String,
    base: u64,
    size: u64,
    debug_kind: DebugKind,
    /// Sorted by `rva`.
    symbols: Vec<IndexedSymbol>,
    /// In program order, grouped by compiland.
    lines: Vec<LineRecord>,
    /// Indices into `lines`, sorted by address.
    lines_by_addr: Vec<usize>,
    types: HashMap<u32, RawType>,
}

impl PdbModule
{
    fn contains(&self, address: u64) -> bool
    {
        address >= self.base && address - self.base < self.size.max(1)
    }

    fn native(&self, symbol: &IndexedSymbol) -> NativeSymbol
    {
        NativeSymbol {
            name: symbol.name.clone(),
            address: self.base + symbol.rva,
            size: symbol.size,
            type_index: symbol.type_index,
            is_function: symbol.is_function,
        }
    }

    fn symbol_at(&self, rva: u64) -> Option<&IndexedSymbol>
    {
        let after = self.symbols.partition_point(|symbol| symbol.rva <= rva);
        let candidates = &self.symbols[..after];
        // Prefer a sized symbol that actually covers the address.
        candidates
            .iter()
            .rev()
            .find(|symbol| symbol.size > 0 && rva < symbol.rva.saturating_add(symbol.size))
            .or_else(|| candidates.last())
    }

    fn line_at(&self, rva: u64) -> Option<&LineRecord>
    {
        let after = self.lines_by_addr.partition_point(|&idx| self.lines[idx].rva <= rva);
        let record = &self.lines[*self.lines_by_addr[..after].last()?];
        match record.len {
            Some(len) if rva >= record.rva.saturating_add(len) => None,
            _ => Some(record),
        }
    }

    fn type_size(&self, index: u32, hops: usize) -> u64
    {
        if hops > MAX_MODIFIER_HOPS {
            return 0;
        }
        if index < FIRST_NON_PRIMITIVE {
            return match primitive(index) {
                NativeType::Base { size, .. } | NativeType::Pointer { size, .. } | NativeType::Other { size, .. } => size,
                _ => 0,
            };
        }
        match self.types.get(&index) {
            Some(RawType::Pointer { size, .. } | RawType::Array { size, .. } | RawType::Compound { size, .. }) => *size,
            Some(RawType::Modifier(target)) => self.type_size(*target, hops + 1),
            Some(RawType::Enumeration { underlying, .. }) => self.type_size(*underlying, hops + 1),
            _ => 0,
        }
    }

    fn field_types(&self, mut list: Option<u32>) -> Vec<u32>
    {
        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        while let Some(index) = list.filter(|index| seen.insert(*index)) {
            match self.types.get(&index) {
                Some(RawType::FieldList { members, continuation }) => {
                    fields.extend_from_slice(members);
                    list = *continuation;
                }
                _ => break,
            }
        }
        fields
    }

    fn type_record(&self, mut index: u32) -> Option<NativeType>
    {
        for _ in 0..MAX_MODIFIER_HOPS {
            if index < FIRST_NON_PRIMITIVE {
                return Some(primitive(index));
            }
            let record = match self.types.get(&index)? {
                RawType::Modifier(target) => {
                    index = *target;
                    continue;
                }
                RawType::Procedure { return_type, arg_list } => NativeType::Function {
                    return_type: *return_type,
                    args: match self.types.get(arg_list) {
                        Some(RawType::ArgList(args)) => args.clone(),
                        _ => Vec::new(),
                    },
                },
                RawType::Pointer { target, size } => NativeType::Pointer {
                    target: *target,
                    size: *size,
                },
                RawType::Array { element, size } => {
                    let element_size = self.type_size(*element, 0);
                    NativeType::Array {
                        element: *element,
                        size: *size,
                        count: if element_size > 0 { size / element_size } else { 0 },
                    }
                }
                RawType::Compound { name, size, fields } => NativeType::Compound {
                    name: name.clone(),
                    size: *size,
                    fields: self.field_types(*fields),
                },
                RawType::Enumeration { name, underlying } => NativeType::Other {
                    name: name.clone(),
                    size: self.type_size(*underlying, 0),
                },
                RawType::ArgList(_) | RawType::FieldList { .. } => return None,
            };
            return Some(record);
        }
        None
    }
}

/// Decode a primitive type index: low byte is the kind, the next nibble the
/// pointer mode.
fn primitive(index: u32) -> NativeType
{
    let kind = index & 0xff;
    let mode = (index >> 8) & 0xf;
    if mode != 0 {
        let size = match mode {
            6 => 8,
            7 => 16,
            _ => 4,
        };
        return NativeType::Pointer { target: kind, size };
    }
    let (size, signed) = match kind {
        0x03 => return NativeType::Void,
        0x10 | 0x68 | 0x70 => (1, true),
        0x20 | 0x69 | 0x30 => (1, false),
        0x11 | 0x72 => (2, true),
        0x21 | 0x73 | 0x71 | 0x7a => (2, false),
        0x12 | 0x74 | 0x08 => (4, true),
        0x22 | 0x75 | 0x7b => (4, false),
        0x13 | 0x76 => (8, true),
        0x23 | 0x77 => (8, false),
        0x40 => return NativeType::Other { name: "float".into(), size: 4 },
        0x41 => return NativeType::Other { name: "double".into(), size: 8 },
        _ => return NativeType::Other { name: String::new(), size: 0 },
    };
    NativeType::Base { size, signed }
}

/// Native engine reading PE images and their PDB files.
#[derive(Debug, Default)]
pub struct PdbEngine
{
    modules: RwLock<HashMap<u64, Arc<PdbModule>>>,
}

impl PdbEngine
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn module(&self, base: u64) -> Option<Arc<PdbModule>>
    {
        self.modules.read().get(&base).cloned()
    }

    fn module_containing(&self, address: u64) -> Option<Arc<PdbModule>>
    {
        self.modules.read().values().find(|module| module.contains(address)).cloned()
    }

    fn overlaps(&self, base: u64, size: u64) -> bool
    {
        let end = base.saturating_add(size.max(1));
        self.modules
            .read()
            .values()
            .any(|module| base < module.base.saturating_add(module.size.max(1)) && module.base < end)
    }
}

/// PDB next to the image, found through the CodeView record or by name.
fn find_pdb(image_path: &Path, codeview: Option<&[u8]>) -> Option<PathBuf>
{
    let mut candidates: SmallVec<[PathBuf; 3]> = SmallVec::new();
    if let Some(recorded) = codeview.map(|bytes| PathBuf::from(String::from_utf8_lossy(bytes).into_owned())) {
        if let (Some(dir), Some(name)) = (image_path.parent(), recorded.file_name()) {
            candidates.push(dir.join(name));
        }
        candidates.push(recorded);
    }
    candidates.push(image_path.with_extension("pdb"));
    candidates.into_iter().find(|candidate| candidate.is_file())
}

struct PdbIndex
{
    symbols: Vec<IndexedSymbol>,
    lines: Vec<LineRecord>,
    types: HashMap<u32, RawType>,
}

fn index_pdb(path: &Path) -> Result<PdbIndex>
{
    let mut pdb = PDB::open(File::open(path)?)?;
    let address_map = pdb.address_map()?;
    let string_table = pdb.string_table().ok();

    let mut symbols = Vec::new();
    let mut procedure_rvas = HashSet::new();

    let dbi = pdb.debug_information()?;
    let mut modules = dbi.modules()?;
    let mut lines = Vec::new();
    while let Some(module) = modules.next()? {
        let compiland: Arc<str> = Arc::from(module.module_name().as_ref());
        let Some(info) = pdb.module_info(&module)? else {
            continue;
        };

        let mut module_symbols = info.symbols()?;
        while let Some(symbol) = module_symbols.next()? {
            match symbol.parse() {
                Ok(SymbolData::Procedure(proc)) => {
                    let Some(rva) = proc.offset.to_rva(&address_map) else {
                        continue;
                    };
                    procedure_rvas.insert(u64::from(rva.0));
                    symbols.push(IndexedSymbol {
                        name: proc.name.to_string().into_owned(),
                        rva: u64::from(rva.0),
                        size: u64::from(proc.len),
                        type_index: proc.type_index.0,
                        is_function: true,
                    });
                }
                Ok(SymbolData::Data(data)) => {
                    let Some(rva) = data.offset.to_rva(&address_map) else {
                        continue;
                    };
                    symbols.push(IndexedSymbol {
                        name: data.name.to_string().into_owned(),
                        rva: u64::from(rva.0),
                        size: 0,
                        type_index: data.type_index.0,
                        is_function: false,
                    });
                }
                _ => {}
            }
        }

        let program = info.line_program()?;
        let mut program_lines = program.lines();
        while let Some(line) = program_lines.next()? {
            let Some(rva) = line.offset.to_rva(&address_map) else {
                continue;
            };
            let file_info = program.get_file_info(line.file_index)?;
            let file = match &string_table {
                Some(strings) => file_info.name.to_string_lossy(strings)?.into_owned(),
                None => String::new(),
            };
            lines.push(LineRecord {
                compiland: Arc::clone(&compiland),
                file: Arc::from(file),
                line: u64::from(line.line_start),
                rva: u64::from(rva.0),
                len: line.length.map(u64::from),
            });
        }
    }

    let globals = pdb.global_symbols()?;
    let mut global_symbols = globals.iter();
    while let Some(symbol) = global_symbols.next()? {
        if let Ok(SymbolData::Public(public)) = symbol.parse() {
            let Some(rva) = public.offset.to_rva(&address_map) else {
                continue;
            };
            let rva = u64::from(rva.0);
            if public.function && procedure_rvas.contains(&rva) {
                continue;
            }
            symbols.push(IndexedSymbol {
                name: public.name.to_string().into_owned(),
                rva,
                size: 0,
                type_index: 0,
                is_function: public.function,
            });
        }
    }

    let mut types = HashMap::new();
    let type_information = pdb.type_information()?;
    let mut records = type_information.iter();
    while let Some(record) = records.next()? {
        let index = record.index().0;
        let Ok(data) = record.parse() else {
            continue;
        };
        let raw = match data {
            TypeData::Procedure(proc) => RawType::Procedure {
                return_type: proc.return_type.map(|ty| ty.0),
                arg_list: proc.argument_list.0,
            },
            TypeData::MemberFunction(func) => RawType::Procedure {
                return_type: Some(func.return_type.0),
                arg_list: func.argument_list.0,
            },
            TypeData::ArgumentList(list) => RawType::ArgList(list.arguments.iter().map(|ty| ty.0).collect()),
            TypeData::FieldList(list) => RawType::FieldList {
                members: list
                    .fields
                    .iter()
                    .filter_map(|field| match field {
                        TypeData::Member(member) => Some(member.field_type.0),
                        _ => None,
                    })
                    .collect(),
                continuation: list.continuation.map(|ty| ty.0),
            },
            TypeData::Pointer(pointer) => RawType::Pointer {
                target: pointer.underlying_type.0,
                size: u64::from(pointer.attributes.size()),
            },
            TypeData::Modifier(modifier) => RawType::Modifier(modifier.underlying_type.0),
            TypeData::Bitfield(bitfield) => RawType::Modifier(bitfield.underlying_type.0),
            TypeData::Array(array) => RawType::Array {
                element: array.element_type.0,
                size: array.dimensions.last().copied().map_or(0, u64::from),
            },
            TypeData::Class(class) => RawType::Compound {
                name: class.name.to_string().into_owned(),
                size: class.size,
                fields: class.fields.map(|ty| ty.0),
            },
            TypeData::Union(union) => RawType::Compound {
                name: union.name.to_string().into_owned(),
                size: union.size,
                fields: Some(union.fields.0),
            },
            TypeData::Enumeration(enumeration) => RawType::Enumeration {
                name: enumeration.name.to_string().into_owned(),
                underlying: enumeration.underlying_type.0,
            },
            _ => continue,
        };
        types.insert(index, raw);
    }

    Ok(PdbIndex { symbols, lines, types })
}

fn export_symbols(file: &object::File<'_>) -> Vec<IndexedSymbol>
{
    let image_base = file.relative_address_base();
    file.exports()
        .unwrap_or_default()
        .iter()
        .map(|export| IndexedSymbol {
            name: String::from_utf8_lossy(export.name()).into_owned(),
            rva: export.address().checked_sub(image_base).unwrap_or(export.address()),
            size: 0,
            type_index: 0,
            is_function: true,
        })
        .collect()
}

impl PdbEngine
{
    fn build_module(path: &Path, base: u64, size: u64) -> Result<PdbModule>
    {
        let shown = path.display().to_string();
        let image = MappedImage::map(path)?;
        let file = object::File::parse(&*image).map_err(|err| SymError::load_failed(&shown, err))?;

        let image_size = file
            .sections()
            .map(|section| {
                section
                    .address()
                    .saturating_sub(file.relative_address_base())
                    .saturating_add(section.size())
            })
            .max()
            .unwrap_or(0)
            .max(size);
        let base = if base == 0 { file.relative_address_base() } else { base };

        let codeview = file.pdb_info().ok().flatten();
        let pdb_path = find_pdb(path, codeview.as_ref().map(|cv| cv.path()));

        let (mut symbols, mut lines, types, debug_kind) = match pdb_path {
            Some(pdb_path) => {
                debug!(pdb = %pdb_path.display(), "indexing PDB");
                let index = index_pdb(&pdb_path)?;
                let mut kind = DebugKind::SYMBOLS | DebugKind::PDB;
                if !index.lines.is_empty() {
                    kind |= DebugKind::LINE_NUMS;
                }
                (index.symbols, index.lines, index.types, kind)
            }
            None => {
                warn!(module = %shown, "no PDB found, using exports only");
                let exports = export_symbols(&file);
                let kind = if exports.is_empty() {
                    DebugKind::empty()
                } else {
                    DebugKind::SYMBOLS
                };
                (exports, Vec::new(), HashMap::new(), kind)
            }
        };

        symbols.sort_by_key(|symbol| symbol.rva);
        lines.shrink_to_fit();
        let mut lines_by_addr: Vec<usize> = (0..lines.len()).collect();
        lines_by_addr.sort_by_key(|&idx| lines[idx].rva);

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(PdbModule {
            name,
            base,
            size: image_size,
            debug_kind,
            symbols,
            lines,
            lines_by_addr,
            types,
        })
    }
}

impl NativeEngine for PdbEngine
{
    fn version(&self) -> (u16, u16)
    {
        ENGINE_VERSION
    }

    fn load_module(&self, path: &Path, base: u64, size: u64) -> std::result::Result<u64, NativeLoadError>
    {
        if base != 0 && self.overlaps(base, size) {
            return Err(NativeLoadError::InvalidAddress(base));
        }
        let module = Self::build_module(path, base, size)?;
        let actual = module.base;
        debug!(
            path = %path.display(),
            base = format_args!("0x{actual:x}"),
            symbols = module.symbols.len(),
            "native module loaded"
        );

        let mut modules = self.modules.write();
        if modules.contains_key(&actual) {
            return Err(NativeLoadError::InvalidAddress(actual));
        }
        modules.insert(actual, Arc::new(module));
        Ok(actual)
    }

    fn unload_module(&self, base: u64)
    {
        if self.modules.write().remove(&base).is_none() {
            trace!(base, "unload of unknown native module");
        }
    }

    fn module_info(&self, base: u64) -> Option<NativeModuleInfo>
    {
        self.module(base).map(|module| NativeModuleInfo {
            base: module.base,
            size: module.size,
            debug_kind: module.debug_kind,
        })
    }

    fn symbol_from_address(&self, address: u64) -> Option<NativeSymbol>
    {
        let module = self.module_containing(address)?;
        let symbol = module.symbol_at(address - module.base)?;
        Some(module.native(symbol))
    }

    fn line_from_address(&self, address: u64) -> Option<NativeLine>
    {
        let module = self.module_containing(address)?;
        let record = module.line_at(address - module.base)?;
        Some(NativeLine {
            file: record.file.to_string(),
            line: record.line,
            address: module.base + record.rva,
        })
    }

    fn symbol_from_name(&self, qualified: &str) -> Option<NativeSymbol>
    {
        let (module_name, name) = qualified.split_once('!')?;
        let module = self
            .modules
            .read()
            .values()
            .find(|module| module.name.eq_ignore_ascii_case(module_name))
            .cloned()?;
        let symbol = module.symbols.iter().find(|symbol| symbol.name == name)?;
        Some(module.native(symbol))
    }

    fn search(
        &self,
        base: u64,
        mask: &str,
        functions_only: bool,
        callback: &mut dyn FnMut(&NativeSymbol) -> bool,
    ) -> Result<()>
    {
        let module = self
            .module(base)
            .ok_or_else(|| SymError::FeatureNotAvailable(format!("no native module at 0x{base:x}")))?;
        for symbol in &module.symbols {
            if functions_only && !symbol.is_function {
                continue;
            }
            if self.matches_mask(&symbol.name, mask) && !callback(&module.native(symbol)) {
                break;
            }
        }
        Ok(())
    }

    fn enumerate(&self, base: u64, callback: &mut dyn FnMut(&NativeSymbol) -> bool) -> Result<()>
    {
        let module = self
            .module(base)
            .ok_or_else(|| SymError::InvalidParameter(format!("no native module at 0x{base:x}")))?;
        for symbol in &module.symbols {
            if !callback(&module.native(symbol)) {
                break;
            }
        }
        Ok(())
    }

    fn enumerate_lines(&self, base: u64, callback: &mut dyn FnMut(&NativeLineEntry) -> bool) -> Result<()>
    {
        let module = self
            .module(base)
            .ok_or_else(|| SymError::InvalidParameter(format!("no native module at 0x{base:x}")))?;
        if module.lines.is_empty() {
            return Err(SymError::LineNotAvailable);
        }
        for record in &module.lines {
            let entry = NativeLineEntry {
                compiland: Some(record.compiland.to_string()),
                file: Some(record.file.to_string()),
                line: record.line,
                address: module.base + record.rva,
            };
            if !callback(&entry) {
                break;
            }
        }
        Ok(())
    }

    fn type_record(&self, base: u64, type_index: u32) -> Option<NativeType>
    {
        self.module(base)?.type_record(type_index)
    }

    fn undecorate(&self, name: &str, flags: QueryFlags) -> Option<String>
    {
        let style = if flags.contains(QueryFlags::DEMANGLE_FULL) {
            DemangleFlags::COMPLETE
        } else {
            DemangleFlags::NAME_ONLY
        };
        msvc_demangler::demangle(name, style).ok()
    }
}
