//! Shared fixtures: in-memory module sources and modules synthesised with
//! the `object` writer, with line tables from the `gimli` writer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::write::{self, LineProgram, LineString};
use gimli::{Encoding, Format, LineEncoding, LittleEndian};
use object::write::elf as elf_write;
use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use parking_lot::Mutex;
use symscope_core::{Engine, EngineConfig, ImageSource, MappedImage, SymError};

/// Debug root used by engines built with [`engine_for`].
pub const DEBUG_ROOT: &str = "/dbg";

/// Serves files from memory and counts how often each one is opened.
#[derive(Debug, Default)]
pub struct MemorySource
{
    files: Mutex<HashMap<PathBuf, Arc<[u8]>>>,
    opens: Mutex<HashMap<PathBuf, usize>>,
}

impl MemorySource
{
    pub fn new() -> Arc<Self>
    {
        Arc::new(Self::default())
    }

    pub fn add(&self, path: impl Into<PathBuf>, bytes: Vec<u8>)
    {
        self.files.lock().insert(path.into(), bytes.into());
    }

    pub fn opens(&self, path: impl AsRef<Path>) -> usize
    {
        self.opens.lock().get(path.as_ref()).copied().unwrap_or(0)
    }
}

impl ImageSource for MemorySource
{
    fn open(&self, path: &Path) -> symscope_core::Result<MappedImage>
    {
        let bytes = self
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| SymError::Io(io::Error::new(io::ErrorKind::NotFound, path.display().to_string())))?;
        *self.opens.lock().entry(path.to_path_buf()).or_default() += 1;
        Ok(MappedImage::from_bytes(path, bytes))
    }

    fn exists(&self, path: &Path) -> bool
    {
        self.files.lock().contains_key(path)
    }

    fn same_file(&self, a: &Path, b: &Path) -> bool
    {
        a == b
    }
}

pub fn config() -> EngineConfig
{
    EngineConfig::default().with_debug_root(DEBUG_ROOT)
}

/// Initialised engine reading from `source`.
pub fn engine_for(source: &Arc<MemorySource>) -> Engine
{
    let engine = Engine::new().with_source(Arc::clone(source) as Arc<dyn ImageSource>);
    engine.init(config()).unwrap();
    engine
}

/// Builder for relocatable x86-64 ELF fixtures.
///
/// `.text` starts at address 0, so symbol values double as module offsets.
#[derive(Debug, Default, Clone)]
pub struct ElfFixture
{
    functions: Vec<(String, u64, u64)>,
    imports: Vec<String>,
    debuglink: Option<String>,
    build_id: Option<Vec<u8>>,
    debug_sections: Vec<(&'static str, Vec<u8>)>,
}

impl ElfFixture
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn function(mut self, name: &str, value: u64, size: u64) -> Self
    {
        self.functions.push((name.to_string(), value, size));
        self
    }

    pub fn import(mut self, name: &str) -> Self
    {
        self.imports.push(name.to_string());
        self
    }

    pub fn debuglink(mut self, name: &str) -> Self
    {
        self.debuglink = Some(name.to_string());
        self
    }

    pub fn build_id(mut self, id: &[u8]) -> Self
    {
        self.build_id = Some(id.to_vec());
        self
    }

    /// Embed the DWARF sections of `units`.
    pub fn dwarf(mut self, units: &[CuFixture]) -> Self
    {
        self.debug_sections = dwarf_sections(units);
        self
    }

    fn text_len(&self) -> usize
    {
        let end = self
            .functions
            .iter()
            .map(|(_, value, size)| value + size.max(&1))
            .max()
            .unwrap_or(0);
        usize::try_from(end + 0x10).unwrap()
    }

    pub fn build(&self) -> Vec<u8>
    {
        let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let text = obj.section_id(StandardSection::Text);
        obj.append_section_data(text, &vec![0xc3; self.text_len()], 16);

        for (name, value, size) in &self.functions {
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: *value,
                size: *size,
                kind: SymbolKind::Text,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: SymbolSection::Section(text),
                flags: SymbolFlags::None,
            });
        }
        for name in &self.imports {
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: SymbolKind::Text,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            });
        }

        if let Some(link) = &self.debuglink {
            let mut data = link.as_bytes().to_vec();
            data.push(0);
            while data.len() % 4 != 0 {
                data.push(0);
            }
            data.extend_from_slice(&0u32.to_le_bytes());
            let section = obj.add_section(Vec::new(), b".gnu_debuglink".to_vec(), SectionKind::Other);
            obj.append_section_data(section, &data, 4);
        }

        if let Some(id) = &self.build_id {
            let mut note = Vec::new();
            note.extend_from_slice(&4u32.to_le_bytes());
            note.extend_from_slice(&u32::try_from(id.len()).unwrap().to_le_bytes());
            note.extend_from_slice(&3u32.to_le_bytes());
            note.extend_from_slice(b"GNU\0");
            note.extend_from_slice(id);
            while note.len() % 4 != 0 {
                note.push(0);
            }
            let section = obj.add_section(Vec::new(), b".note.gnu.build-id".to_vec(), SectionKind::Note);
            obj.append_section_data(section, &note, 4);
        }

        for (name, data) in &self.debug_sections {
            let section = obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::Debug);
            obj.append_section_data(section, data, 1);
        }

        obj.write().unwrap()
    }
}

/// One compilation unit for [`dwarf_sections`].
#[derive(Debug, Clone)]
pub struct CuFixture
{
    pub name: &'static str,
    /// Include directory of `file`; empty for the compilation directory.
    pub dir: &'static str,
    pub file: &'static str,
    /// `(address, line)` rows of a single sequence. No rows means no line
    /// program at all.
    pub rows: Vec<(u64, u64)>,
    /// Address that ends the sequence.
    pub end: u64,
    /// Whether `.debug_aranges` covers the sequence.
    pub in_aranges: bool,
}

impl CuFixture
{
    pub fn new(name: &'static str, file: &'static str, rows: &[(u64, u64)], end: u64) -> Self
    {
        Self {
            name,
            dir: "",
            file,
            rows: rows.to_vec(),
            end,
            in_aranges: true,
        }
    }

    pub fn in_dir(mut self, dir: &'static str) -> Self
    {
        self.dir = dir;
        self
    }

    pub fn without_aranges(mut self) -> Self
    {
        self.in_aranges = false;
        self
    }

    /// A unit with a name but no line program.
    pub fn without_lines(name: &'static str) -> Self
    {
        Self {
            name,
            dir: "",
            file: "",
            rows: Vec::new(),
            end: 0,
            in_aranges: false,
        }
    }
}

/// DWARF 4 sections describing `units`, including a hand-built
/// `.debug_aranges` since the `gimli` writer does not emit one.
pub fn dwarf_sections(units: &[CuFixture]) -> Vec<(&'static str, Vec<u8>)>
{
    let encoding = Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size: 8,
    };
    let mut dwarf = write::Dwarf::new();
    for cu in units {
        let program = if cu.rows.is_empty() {
            LineProgram::none()
        } else {
            let mut program = LineProgram::new(
                encoding,
                LineEncoding::default(),
                LineString::String(b"/work".to_vec()),
                None,
                LineString::String(cu.name.as_bytes().to_vec()),
                None,
            );
            let dir = if cu.dir.is_empty() {
                program.default_directory()
            } else {
                program.add_directory(LineString::String(cu.dir.as_bytes().to_vec()))
            };
            let file = program.add_file(LineString::String(cu.file.as_bytes().to_vec()), dir, None);
            let start = cu.rows[0].0;
            program.begin_sequence(Some(write::Address::Constant(start)));
            for &(address, line) in &cu.rows {
                program.row().address_offset = address - start;
                program.row().file = file;
                program.row().line = line;
                program.generate_row();
            }
            program.end_sequence(cu.end - start);
            program
        };
        let id = dwarf.units.add(write::Unit::new(encoding, program));
        let unit = dwarf.units.get_mut(id);
        let root = unit.root();
        unit.get_mut(root)
            .set(gimli::DW_AT_name, write::AttributeValue::String(cu.name.as_bytes().to_vec()));
    }

    let mut sections = write::Sections::new(write::EndianVec::new(LittleEndian));
    dwarf.write(&mut sections).unwrap();
    let mut out: Vec<(&'static str, Vec<u8>)> = Vec::new();
    sections
        .for_each(|id, data| {
            if !data.slice().is_empty() {
                out.push((id.name(), data.slice().to_vec()));
            }
            Ok::<_, write::Error>(())
        })
        .unwrap();

    let info = out
        .iter()
        .find(|(name, _)| *name == ".debug_info")
        .map(|(_, data)| data.clone())
        .unwrap_or_default();
    let mut offsets = Vec::new();
    let mut headers = gimli::DebugInfo::new(&info, LittleEndian).units();
    while let Some(header) = headers.next().unwrap() {
        offsets.push(header.offset().as_debug_info_offset().unwrap().0);
    }

    let mut aranges = Vec::new();
    for (cu, offset) in units.iter().zip(offsets) {
        if cu.in_aranges && !cu.rows.is_empty() {
            aranges.extend_from_slice(&arange_set(offset, cu.rows[0].0, cu.end - cu.rows[0].0));
        }
    }
    if !aranges.is_empty() {
        out.push((".debug_aranges", aranges));
    }
    out
}

/// One DWARF 2 address range set with a single 64-bit range.
fn arange_set(info_offset: usize, address: u64, length: u64) -> Vec<u8>
{
    let mut set = Vec::new();
    set.extend_from_slice(&0u32.to_le_bytes());
    set.extend_from_slice(&2u16.to_le_bytes());
    set.extend_from_slice(&u32::try_from(info_offset).unwrap().to_le_bytes());
    set.push(8);
    set.push(0);
    // Tuples start at a multiple of twice the address size.
    set.resize(16, 0);
    set.extend_from_slice(&address.to_le_bytes());
    set.extend_from_slice(&length.to_le_bytes());
    set.extend_from_slice(&[0; 16]);
    let unit_length = u32::try_from(set.len() - 4).unwrap();
    set[..4].copy_from_slice(&unit_length.to_le_bytes());
    set
}

/// An ELF file holding only `sections` and the section name table, the
/// shape `objcopy --only-keep-debug` leaves after stripping the symbols.
pub fn debug_only_elf(sections: &[(&'static str, Vec<u8>)]) -> Vec<u8>
{
    let mut out = Vec::new();
    let mut writer = elf_write::Writer::new(Endianness::Little, true, &mut out);
    writer.reserve_file_header();

    let names: Vec<_> = sections.iter().map(|(name, _)| writer.add_section_name(name.as_bytes())).collect();
    for _ in sections {
        writer.reserve_section_index();
    }
    writer.reserve_shstrtab_section_index();
    let offsets: Vec<usize> = sections.iter().map(|(_, data)| writer.reserve(data.len(), 1)).collect();
    writer.reserve_shstrtab();
    writer.reserve_section_headers();

    writer
        .write_file_header(&elf_write::FileHeader {
            os_abi: 0,
            abi_version: 0,
            e_type: object::elf::ET_DYN,
            e_machine: object::elf::EM_X86_64,
            e_entry: 0,
            e_flags: 0,
        })
        .unwrap();
    for (offset, (_, data)) in offsets.iter().zip(sections) {
        writer.pad_until(*offset);
        writer.write(data);
    }
    writer.write_shstrtab();

    writer.write_null_section_header();
    for ((name, offset), (_, data)) in names.into_iter().zip(&offsets).zip(sections) {
        writer.write_section_header(&elf_write::SectionHeader {
            name: Some(name),
            sh_type: object::elf::SHT_PROGBITS,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: *offset as u64,
            sh_size: data.len() as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        });
    }
    writer.write_shstrtab_section_header();
    out
}

/// Mach-O object with one text symbol per `(name, value)`. The writer adds
/// the leading underscore.
pub fn macho(functions: &[(&str, u64)]) -> Vec<u8>
{
    let mut obj = Object::new(BinaryFormat::MachO, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    let end = functions.iter().map(|(_, value)| *value).max().unwrap_or(0) + 0x10;
    obj.append_section_data(text, &vec![0xc3; usize::try_from(end).unwrap()], 16);
    for (name, value) in functions {
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: *value,
            size: 0,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }
    obj.write().unwrap()
}

/// Smallest PE32+ image `object` accepts: headers only, no sections, no
/// symbols and no debug directory, so the engine hands it to the native
/// engine.
pub fn minimal_pe() -> Vec<u8>
{
    const PE_OFFSET: usize = 0x40;
    let mut image = vec![0u8; 0x200];
    image[0..2].copy_from_slice(b"MZ");
    image[0x3c..0x40].copy_from_slice(&u32::try_from(PE_OFFSET).unwrap().to_le_bytes());

    let mut at = PE_OFFSET;
    let mut put = |bytes: &[u8]| {
        image[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };
    put(b"PE\0\0");
    // File header.
    put(&0x8664u16.to_le_bytes());
    put(&0u16.to_le_bytes());
    put(&0u32.to_le_bytes());
    put(&0u32.to_le_bytes());
    put(&0u32.to_le_bytes());
    put(&240u16.to_le_bytes());
    put(&0x0022u16.to_le_bytes());

    // Optional header, PE32+.
    let mut optional = vec![0u8; 240];
    optional[0..2].copy_from_slice(&0x20bu16.to_le_bytes());
    optional[24..32].copy_from_slice(&0x1_8000_0000u64.to_le_bytes());
    optional[32..36].copy_from_slice(&0x1000u32.to_le_bytes());
    optional[36..40].copy_from_slice(&0x200u32.to_le_bytes());
    optional[56..60].copy_from_slice(&0x1000u32.to_le_bytes());
    optional[60..64].copy_from_slice(&0x200u32.to_le_bytes());
    optional[108..112].copy_from_slice(&16u32.to_le_bytes());
    put(&optional);

    image
}
