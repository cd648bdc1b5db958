//! # DWARF Line Tables
//!
//! Address to `(file, line)` resolution and full line-table enumeration.
//!
//! Lookups find the owning compilation unit through `.debug_aranges` and
//! fall back to scanning every unit when the index is missing or does not
//! cover the address. The decoded rows of the most recently queried unit
//! are kept in a single-entry cache, since consecutive queries usually land
//! in the same unit.
//!
//! All addresses crossing this module's API are module-relative; `bias`
//! converts them to the addresses the line programs use.

use std::collections::HashMap;
use std::sync::Arc;

use gimli::{DebugInfoOffset, Reader, Unit};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{OwnedDwarf, OwnedReader};
use crate::error::{Result, SymError};
use crate::types::{LineEntry, LineInfo};

/// One decoded line-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LineRow
{
    pub(crate) addr: u64,
    pub(crate) file: Option<Arc<str>>,
    pub(crate) line: u64,
    pub(crate) end_sequence: bool,
}

/// Outcome of searching one unit's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineSearch
{
    /// Two consecutive rows bracket the address.
    Found(usize),
    /// The address is at or past the unit's last row. Another unit may
    /// still hold a better match.
    Maybe(usize),
    NotFound,
}

/// Find the row covering `addr` in `rows`, which must be sorted by address.
pub(crate) fn bracket(rows: &[LineRow], addr: u64) -> LineSearch
{
    let after = rows.partition_point(|row| row.addr <= addr);
    let Some(idx) = after.checked_sub(1) else {
        return LineSearch::NotFound;
    };
    if idx + 1 == rows.len() {
        LineSearch::Maybe(idx)
    } else if rows[idx].end_sequence {
        LineSearch::NotFound
    } else {
        LineSearch::Found(idx)
    }
}

#[derive(Debug)]
struct CuLines
{
    offset: DebugInfoOffset,
    name: Option<Arc<str>>,
    rows: Vec<LineRow>,
}

/// Line-table access for one module.
pub(crate) struct DwarfLineReader
{
    dwarf: Arc<OwnedDwarf>,
    bias: u64,
    cache: Mutex<Option<Arc<CuLines>>>,
}

impl std::fmt::Debug for DwarfLineReader
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("DwarfLineReader").field("bias", &self.bias).finish_non_exhaustive()
    }
}

fn dwarf_error(context: &str, err: gimli::Error) -> SymError
{
    SymError::Parse(format!("{context}: {err}"))
}

fn reader_to_arc(reader: &OwnedReader) -> Option<Arc<str>>
{
    reader.to_string_lossy().ok().map(|name| Arc::from(name.as_ref()))
}

impl DwarfLineReader
{
    /// `bias` is the DWARF address of module offset 0.
    pub(crate) fn new(dwarf: OwnedDwarf, bias: u64) -> Self
    {
        Self {
            dwarf: Arc::new(dwarf),
            bias,
            cache: Mutex::new(None),
        }
    }

    /// Resolve `modoffs` to a source position.
    ///
    /// Returns `Ok(None)` when no unit covers the address.
    pub(crate) fn lookup_line(&self, modoffs: u64) -> Result<Option<LineInfo>>
    {
        let addr = self.bias.wrapping_add(modoffs);
        trace!(addr = format_args!("0x{addr:x}"), "line lookup");

        if let Some(cached) = self.cache.lock().clone() {
            if let LineSearch::Found(idx) = bracket(&cached.rows, addr) {
                return Ok(Some(line_info(&cached.rows[idx], addr)));
            }
        }

        if let Some(offset) = self.aranges_lookup(addr)? {
            let lines = self.load_cu(offset)?;
            let hit = match bracket(&lines.rows, addr) {
                LineSearch::Found(idx) | LineSearch::Maybe(idx) => Some(line_info(&lines.rows[idx], addr)),
                LineSearch::NotFound => None,
            };
            if hit.is_some() {
                *self.cache.lock() = Some(lines);
                return Ok(hit);
            }
        }

        self.scan_all(addr)
    }

    /// Offset of the unit whose aranges cover `addr`.
    fn aranges_lookup(&self, addr: u64) -> Result<Option<DebugInfoOffset>>
    {
        let mut headers = self.dwarf.debug_aranges.headers();
        while let Some(header) = headers.next().map_err(|err| dwarf_error("reading .debug_aranges", err))? {
            let mut entries = header.entries();
            while let Some(entry) = entries.next().map_err(|err| dwarf_error("reading arange entry", err))? {
                if entry.address() <= addr && addr < entry.address().saturating_add(entry.length()) {
                    return Ok(Some(header.debug_info_offset()));
                }
            }
        }
        Ok(None)
    }

    fn scan_all(&self, addr: u64) -> Result<Option<LineInfo>>
    {
        debug!(addr = format_args!("0x{addr:x}"), "aranges miss, scanning every unit");
        let mut maybe: Option<(Arc<CuLines>, usize)> = None;

        let mut headers = self.dwarf.units();
        while let Some(header) = headers.next().map_err(|err| dwarf_error("reading unit header", err))? {
            let Some(offset) = header.offset().as_debug_info_offset() else {
                continue;
            };
            let unit = self.dwarf.unit(header).map_err(|err| dwarf_error("parsing unit", err))?;
            let lines = Arc::new(self.decode_unit(offset, &unit)?);
            match bracket(&lines.rows, addr) {
                LineSearch::Found(idx) => {
                    let info = line_info(&lines.rows[idx], addr);
                    *self.cache.lock() = Some(lines);
                    return Ok(Some(info));
                }
                // A later unit's weak match replaces an earlier one.
                LineSearch::Maybe(idx) => maybe = Some((lines, idx)),
                LineSearch::NotFound => {}
            }
        }

        Ok(maybe.map(|(lines, idx)| {
            let info = line_info(&lines.rows[idx], addr);
            *self.cache.lock() = Some(lines);
            info
        }))
    }

    fn load_cu(&self, offset: DebugInfoOffset) -> Result<Arc<CuLines>>
    {
        if let Some(cached) = self.cache.lock().as_ref() {
            if cached.offset == offset {
                return Ok(Arc::clone(cached));
            }
        }
        let header = self
            .dwarf
            .debug_info
            .header_from_offset(offset)
            .map_err(|err| dwarf_error("locating unit", err))?;
        let unit = self.dwarf.unit(header).map_err(|err| dwarf_error("parsing unit", err))?;
        Ok(Arc::new(self.decode_unit(offset, &unit)?))
    }

    fn decode_unit(&self, offset: DebugInfoOffset, unit: &Unit<OwnedReader>) -> Result<CuLines>
    {
        let name = unit.name.as_ref().and_then(reader_to_arc);
        let mut rows = Vec::new();

        if let Some(program) = unit.line_program.clone() {
            // Interned so every row of a file shares one allocation.
            let mut files: HashMap<u64, Option<Arc<str>>> = HashMap::new();
            let mut state = program.rows();
            while let Some((header, row)) = state.next_row().map_err(|err| dwarf_error("running line program", err))? {
                let file = match files.get(&row.file_index()) {
                    Some(file) => file.clone(),
                    None => {
                        let path = self.file_path(unit, header, row.file(header));
                        files.insert(row.file_index(), path.clone());
                        path
                    }
                };
                rows.push(LineRow {
                    addr: row.address(),
                    file,
                    line: row.line().map_or(0, |line| line.get()),
                    end_sequence: row.end_sequence(),
                });
            }
        }

        // Sequence ends sort ahead of a sequence starting at the same address.
        rows.sort_by_key(|row| (row.addr, !row.end_sequence));
        Ok(CuLines { offset, name, rows })
    }

    fn file_path(
        &self,
        unit: &Unit<OwnedReader>,
        header: &gimli::LineProgramHeader<OwnedReader>,
        file: Option<&gimli::FileEntry<OwnedReader>>,
    ) -> Option<Arc<str>>
    {
        let file = file?;
        let name = self.dwarf.attr_string(unit, file.path_name()).ok()?;
        let name = name.to_string_lossy().ok()?;
        if name.starts_with('/') {
            return Some(Arc::from(name.as_ref()));
        }
        let directory = file
            .directory(header)
            .and_then(|dir| self.dwarf.attr_string(unit, dir).ok())
            .and_then(|dir| dir.to_string_lossy().ok().map(|dir| dir.into_owned()));
        match directory {
            Some(dir) if !dir.is_empty() => Some(Arc::from(format!("{dir}/{name}"))),
            _ => Some(Arc::from(name.as_ref())),
        }
    }

    /// Visit every row of every unit.
    ///
    /// A unit without a line table yields one entry with no file. Returns
    /// `false` if `callback` stopped the walk early.
    pub(crate) fn enumerate_lines(&self, callback: &mut dyn FnMut(&LineEntry) -> bool) -> Result<bool>
    {
        let mut headers = self.dwarf.units();
        while let Some(header) = headers.next().map_err(|err| dwarf_error("reading unit header", err))? {
            let Some(offset) = header.offset().as_debug_info_offset() else {
                continue;
            };
            let unit = self.dwarf.unit(header).map_err(|err| dwarf_error("parsing unit", err))?;
            let lines = self.decode_unit(offset, &unit)?;

            if lines.rows.is_empty() {
                let entry = LineEntry {
                    cu_name: lines.name.clone(),
                    file: None,
                    line: 0,
                    addr: 0,
                };
                if !callback(&entry) {
                    return Ok(false);
                }
                continue;
            }

            for row in lines.rows.iter().filter(|row| !row.end_sequence) {
                let entry = LineEntry {
                    cu_name: lines.name.clone(),
                    file: row.file.clone(),
                    line: row.line,
                    addr: row.addr.wrapping_sub(self.bias),
                };
                if !callback(&entry) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

fn line_info(row: &LineRow, addr: u64) -> LineInfo
{
    LineInfo {
        file: row.file.clone(),
        line: row.line,
        line_offs: addr.saturating_sub(row.addr),
    }
}

#[cfg(test)]
mod tests
{
    use gimli::write::{self, LineProgram, LineString};
    use gimli::{EndianArcSlice, Encoding, Format, LineEncoding, LittleEndian, RunTimeEndian};

    use super::*;

    /// Reader over one unit per `(name, rows, end)`, without aranges.
    fn reader_for(units: &[(&str, &[(u64, u64)], u64)], bias: u64) -> DwarfLineReader
    {
        let encoding = Encoding {
            format: Format::Dwarf32,
            version: 4,
            address_size: 8,
        };
        let mut dwarf = write::Dwarf::new();
        for &(name, rows, end) in units {
            let mut program = LineProgram::new(
                encoding,
                LineEncoding::default(),
                LineString::String(b"/src".to_vec()),
                None,
                LineString::String(name.as_bytes().to_vec()),
                None,
            );
            let dir = program.default_directory();
            let file = program.add_file(LineString::String(format!("/src/{name}").into_bytes()), dir, None);
            let start = rows[0].0;
            program.begin_sequence(Some(write::Address::Constant(start)));
            for &(addr, line) in rows {
                program.row().address_offset = addr - start;
                program.row().file = file;
                program.row().line = line;
                program.generate_row();
            }
            program.end_sequence(end - start);
            let id = dwarf.units.add(write::Unit::new(encoding, program));
            let unit = dwarf.units.get_mut(id);
            let root = unit.root();
            unit.get_mut(root)
                .set(gimli::DW_AT_name, write::AttributeValue::String(name.as_bytes().to_vec()));
        }

        let mut sections = write::Sections::new(write::EndianVec::new(LittleEndian));
        dwarf.write(&mut sections).unwrap();
        let mut data: HashMap<&'static str, Vec<u8>> = HashMap::new();
        sections
            .for_each(|id, section| {
                data.insert(id.name(), section.slice().to_vec());
                Ok::<_, write::Error>(())
            })
            .unwrap();

        let dwarf = gimli::Dwarf::load(|id| {
            let bytes = data.get(id.name()).cloned().unwrap_or_default();
            Ok::<_, gimli::Error>(EndianArcSlice::new(Arc::from(bytes), RunTimeEndian::Little))
        })
        .unwrap();
        DwarfLineReader::new(dwarf, bias)
    }

    fn cached(reader: &DwarfLineReader) -> Arc<CuLines>
    {
        reader.cache.lock().clone().unwrap()
    }

    fn row(addr: u64, line: u64, end_sequence: bool) -> LineRow
    {
        LineRow {
            addr,
            file: Some(Arc::from("main.c")),
            line,
            end_sequence,
        }
    }

    #[test]
    fn test_bracket_between_rows()
    {
        let rows = vec![row(0x10, 1, false), row(0x20, 2, false), row(0x30, 3, true)];
        assert_eq!(bracket(&rows, 0x10), LineSearch::Found(0));
        assert_eq!(bracket(&rows, 0x1f), LineSearch::Found(0));
        assert_eq!(bracket(&rows, 0x20), LineSearch::Found(1));
    }

    #[test]
    fn test_bracket_before_first_row()
    {
        let rows = vec![row(0x10, 1, false), row(0x20, 2, true)];
        assert_eq!(bracket(&rows, 0x5), LineSearch::NotFound);
        assert_eq!(bracket(&[], 0x5), LineSearch::NotFound);
    }

    #[test]
    fn test_bracket_past_last_row_is_maybe()
    {
        let rows = vec![row(0x10, 1, false), row(0x20, 2, true)];
        assert_eq!(bracket(&rows, 0x20), LineSearch::Maybe(1));
        assert_eq!(bracket(&rows, 0x1000), LineSearch::Maybe(1));
    }

    #[test]
    fn test_bracket_gap_between_sequences()
    {
        let rows = vec![
            row(0x10, 1, false),
            row(0x20, 2, true),
            row(0x40, 7, false),
            row(0x50, 8, true),
        ];
        assert_eq!(bracket(&rows, 0x30), LineSearch::NotFound);
        assert_eq!(bracket(&rows, 0x44), LineSearch::Found(2));
    }

    #[test]
    fn test_line_offset_is_distance_from_row()
    {
        let info = line_info(&row(0x10, 4, false), 0x18);
        assert_eq!(info.line, 4);
        assert_eq!(info.line_offs, 8);
    }

    #[test]
    fn test_queries_in_one_unit_reuse_cached_rows()
    {
        let reader = reader_for(&[("a.c", &[(0x10, 1), (0x20, 2)], 0x30), ("b.c", &[(0x30, 9)], 0x40)], 0);
        assert!(reader.cache.lock().is_none());

        let first = reader.lookup_line(0x14).unwrap().unwrap();
        assert_eq!(first.line, 1);
        let entry = cached(&reader);
        assert_eq!(entry.name.as_deref(), Some("a.c"));

        let second = reader.lookup_line(0x24).unwrap().unwrap();
        assert_eq!(second.line, 2);
        assert_eq!(second.line_offs, 4);
        assert!(Arc::ptr_eq(&entry, &cached(&reader)));

        let other = reader.lookup_line(0x34).unwrap().unwrap();
        assert_eq!(other.line, 9);
        let replaced = cached(&reader);
        assert_eq!(replaced.name.as_deref(), Some("b.c"));
        assert_ne!(replaced.offset, entry.offset);
    }

    #[test]
    fn test_later_weak_match_wins_full_scan()
    {
        let reader = reader_for(&[("a.c", &[(0x10, 5)], 0x20), ("b.c", &[(0x20, 7)], 0x30)], 0);

        let info = reader.lookup_line(0x38).unwrap().unwrap();
        assert_eq!(info.file.as_deref(), Some("/src/b.c"));
        assert_eq!(info.line, 7);
        assert_eq!(info.line_offs, 8);
        assert_eq!(cached(&reader).name.as_deref(), Some("b.c"));
        assert_eq!(reader.lookup_line(0x5).unwrap(), None);
    }

    #[test]
    fn test_bias_maps_module_offsets()
    {
        let reader = reader_for(&[("a.c", &[(0x1010, 3), (0x1018, 4)], 0x1020)], 0x1000);

        let info = reader.lookup_line(0x1a).unwrap().unwrap();
        assert_eq!(info.line, 4);
        assert_eq!(info.line_offs, 2);

        let mut addrs = Vec::new();
        reader
            .enumerate_lines(&mut |entry| {
                addrs.push(entry.addr);
                true
            })
            .unwrap();
        assert_eq!(addrs, [0x10, 0x18]);
    }
}
