//! # Module Sessions
//!
//! A session is everything the engine keeps for one loaded module: the
//! mapped image, the format reader, the DWARF line reader and the lazily
//! built name index. Sessions are created by [`SessionLoader`], which also
//! chases debug links, and are shared through the module cache as `Arc`s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::{debug, trace, warn};

use super::debuglink::DebugLinkResolver;
use super::dwarf::DwarfLineReader;
use super::image::{ImageSource, MappedImage};
use super::pdb::{PdbBackend, PdbReader};
use super::{load_object, Classified, ObjectReader, ObjectSymbols};
use crate::config::EngineConfig;
use crate::demangle::{demangle_to_string, present};
use crate::error::{Result, SymError};
use crate::pattern;
use crate::types::{DebugKind, LineEntry, QueryFlags, SymbolInfo};

/// Summary of a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// Container format of the file symbols come from.
    pub format: &'static str,
    pub load_base: u64,
    pub file_size: u64,
    pub debug_kind: DebugKind,
    /// Separate file the line tables come from, if any.
    pub debug_file: Option<PathBuf>,
}

/// Session for a module handled by the in-crate readers.
pub(crate) struct UnixSession
{
    path: PathBuf,
    image: MappedImage,
    reader: ObjectReader,
    dwarf: Option<DwarfLineReader>,
    debug_kind: DebugKind,
    names: OnceCell<HashMap<String, u64>>,
    /// Debug-link target kept for its DWARF while this file supplies symbols.
    with_dwarf: Option<Box<UnixSession>>,
}

impl std::fmt::Debug for UnixSession
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("UnixSession")
            .field("path", &self.path)
            .field("format", &self.reader.format_name())
            .field("debug_kind", &self.debug_kind)
            .field("with_dwarf", &self.with_dwarf.as_ref().map(|session| &session.path))
            .finish_non_exhaustive()
    }
}

impl UnixSession
{
    fn line_reader(&self) -> Option<&DwarfLineReader>
    {
        self.dwarf
            .as_ref()
            .or_else(|| self.with_dwarf.as_ref().and_then(|session| session.dwarf.as_ref()))
    }

    pub(crate) fn debug_kind(&self) -> DebugKind
    {
        self.debug_kind
    }

    pub(crate) fn info(&self) -> ModuleInfo
    {
        ModuleInfo {
            format: self.reader.format_name(),
            load_base: self.reader.load_base(),
            file_size: self.image.file_size(),
            debug_kind: self.debug_kind,
            debug_file: self.with_dwarf.as_ref().map(|session| session.path.clone()),
        }
    }

    fn record(&self, idx: usize, flags: QueryFlags) -> Result<SymbolInfo>
    {
        let raw = self.reader.symbol_name(idx).ok_or(SymError::SymbolNotFound)?;
        let (start, end) = self.reader.symbol_offs(idx)?;
        let mut info = SymbolInfo::new(present(raw, flags), start, end, self.debug_kind);
        info.flags = flags & QueryFlags::NON_PDB;
        Ok(info)
    }

    pub(crate) fn lookup_address(&self, modoffs: u64, flags: QueryFlags) -> Result<SymbolInfo>
    {
        let idx = self.reader.addrsearch(modoffs).ok_or(SymError::SymbolNotFound)?;
        let mut info = self.record(idx, flags)?;
        trace!(modoffs, name = %info.name, "address resolved");

        if let Some(lines) = self.line_reader() {
            match lines.lookup_line(modoffs) {
                Ok(line) => info.line = line,
                Err(err) => debug!(%err, "line lookup failed"),
            }
        }
        Ok(info)
    }

    fn name_index(&self) -> &HashMap<String, u64>
    {
        self.names.get_or_init(|| build_name_index(&self.reader))
    }

    /// Offset of the symbol called `name`.
    ///
    /// Exact matches go through the name index. A name with wildcards that
    /// is not itself indexed falls back to the first matching symbol.
    pub(crate) fn lookup_name(&self, name: &str) -> Result<u64>
    {
        if let Some(&offs) = self.name_index().get(name) {
            return Ok(offs);
        }
        if !pattern::has_wildcards(name) {
            return Err(SymError::SymbolNotFound);
        }

        let mut found = None;
        self.search(name, QueryFlags::default_demangle(), &mut |info| {
            found = Some(info.start_offs);
            false
        })?;
        found.ok_or(SymError::SymbolNotFound)
    }

    /// Visit every defined, named symbol.
    pub(crate) fn enumerate(&self, flags: QueryFlags, callback: &mut dyn FnMut(&SymbolInfo) -> bool) -> Result<()>
    {
        for idx in 0..self.reader.num_symbols() {
            if self.reader.symbol_name(idx).is_none_or(str::is_empty) {
                continue;
            }
            let info = match self.record(idx, flags) {
                Ok(info) => info,
                Err(SymError::SymbolNotFound) => continue,
                Err(err) => return Err(err),
            };
            if !callback(&info) {
                break;
            }
        }
        Ok(())
    }

    /// Visit symbols whose presented name matches `pattern`.
    pub(crate) fn search(
        &self,
        pattern: &str,
        flags: QueryFlags,
        callback: &mut dyn FnMut(&SymbolInfo) -> bool,
    ) -> Result<()>
    {
        self.enumerate(flags, &mut |info| {
            if pattern::matches(&info.name, pattern, false) {
                callback(info)
            } else {
                true
            }
        })
    }

    pub(crate) fn enumerate_lines(&self, callback: &mut dyn FnMut(&LineEntry) -> bool) -> Result<()>
    {
        let lines = self.line_reader().ok_or(SymError::LineNotAvailable)?;
        lines.enumerate_lines(callback).map(|_| ())
    }
}

/// Index every real symbol under the names callers are likely to ask for.
///
/// The first symbol to claim a key keeps it.
fn build_name_index(reader: &ObjectReader) -> HashMap<String, u64>
{
    let mut index = HashMap::with_capacity(reader.num_symbols() * 2);
    let mut insert = |key: &str, offs: u64| {
        if !key.is_empty() && !index.contains_key(key) {
            index.insert(key.to_string(), offs);
        }
    };

    for idx in 0..reader.num_symbols() {
        let Some(name) = reader.symbol_name(idx).filter(|name| !name.is_empty()) else {
            continue;
        };
        let Ok((offs, _)) = reader.symbol_offs(idx) else {
            continue;
        };

        insert(name, offs);
        // `foo@@GLIBC_2.1` is also reachable as `foo`.
        if let Some(at) = name.get(1..).and_then(|rest| rest.find('@')) {
            insert(&name[..=at], offs);
        }
        if let Some(short) = demangle_to_string(name, QueryFlags::default_demangle()) {
            // Crude overload stripping; breaks on names with parens elsewhere.
            if let Some(paren) = short.find('(') {
                insert(&short[..paren], offs);
            }
            insert(&short, offs);
        }
        if let Some(full) = demangle_to_string(name, QueryFlags::DEMANGLE_FULL) {
            insert(&full, offs);
        }
    }

    debug!(keys = index.len(), "built name index");
    index
}

/// A loaded module, whichever backend serves it.
#[derive(Debug)]
pub(crate) enum ModuleSession
{
    Unix(UnixSession),
    Pdb(PdbReader),
}

impl ModuleSession
{
    pub(crate) fn debug_kind(&self) -> DebugKind
    {
        match self {
            ModuleSession::Unix(session) => session.debug_kind(),
            ModuleSession::Pdb(reader) => reader.debug_kind(),
        }
    }

    pub(crate) fn info(&self) -> ModuleInfo
    {
        match self {
            ModuleSession::Unix(session) => session.info(),
            ModuleSession::Pdb(reader) => reader.info(),
        }
    }
}

/// Builds sessions, following debug links up to the configured depth.
pub(crate) struct SessionLoader<'a>
{
    source: &'a dyn ImageSource,
    config: &'a EngineConfig,
}

impl<'a> SessionLoader<'a>
{
    pub(crate) fn new(source: &'a dyn ImageSource, config: &'a EngineConfig) -> Self
    {
        Self { source, config }
    }

    /// Load the module at `path`.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the file cannot be read or recognised, or if the
    /// native engine refuses it.
    pub(crate) fn load(&self, path: &Path, pdb: &mut PdbBackend) -> Result<ModuleSession>
    {
        let image = self.source.open(path)?;
        match load_object(&image)? {
            Classified::NativePe => {
                debug!(path = %path.display(), "routing PE module to the native engine");
                Ok(ModuleSession::Pdb(pdb.load(path, image.file_size())?))
            }
            Classified::Object(object) => Ok(ModuleSession::Unix(self.load_unix(path, image, object, 0)?)),
        }
    }

    fn load_chained(&self, path: &Path, depth: usize) -> Result<UnixSession>
    {
        if depth >= self.config.max_debuglink_depth {
            warn!(
                path = %path.display(),
                limit = self.config.max_debuglink_depth,
                "refusing to follow debug links any further"
            );
            return Err(SymError::load_failed(&path.display().to_string(), "debug link chain too deep"));
        }
        let image = self.source.open(path)?;
        match load_object(&image)? {
            Classified::Object(object) => self.load_unix(path, image, object, depth),
            Classified::NativePe => Err(SymError::load_failed(
                &path.display().to_string(),
                "debug link target has no usable symbols",
            )),
        }
    }

    fn load_unix(
        &self,
        path: &Path,
        image: MappedImage,
        object: super::LoadedObject,
        depth: usize,
    ) -> Result<UnixSession>
    {
        let reader = object.reader;
        let mut debug_kind = reader.debug_kind();
        debug!(
            path = %path.display(),
            format = reader.format_name(),
            ?debug_kind,
            depth,
            "loading module"
        );

        let link = reader.debuglink();
        let resolver = DebugLinkResolver::new(self.source, &self.config.debug_root);
        if let Some(debug_path) = resolver.resolve(path, link.as_ref(), reader.build_id()) {
            match self.load_chained(&debug_path, depth + 1) {
                Ok(linked) => {
                    let symtabs = DebugKind::ELF_SYMTAB | DebugKind::PECOFF_SYMTAB;
                    if !linked.debug_kind.intersects(symtabs) && debug_kind.intersects(symtabs) {
                        debug!(debug_file = %debug_path.display(), "keeping module for symbols, debug file for lines");
                        debug_kind |= linked.debug_kind;
                        return Ok(UnixSession {
                            path: path.to_path_buf(),
                            image,
                            reader,
                            dwarf: None,
                            debug_kind,
                            names: OnceCell::new(),
                            with_dwarf: Some(Box::new(linked)),
                        });
                    }
                    debug!(debug_file = %debug_path.display(), "debug file replaces module");
                    return Ok(linked);
                }
                Err(err) => warn!(debug_file = %debug_path.display(), %err, "skipping debug file"),
            }
        }

        let dwarf = match (&object.sections, debug_kind.contains(DebugKind::DWARF_LINE)) {
            (Some(sections), true) => match sections.dwarf() {
                Ok(dwarf) => Some(DwarfLineReader::new(dwarf, reader.dwarf_address(0))),
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to initialise DWARF");
                    None
                }
            },
            _ => None,
        };

        Ok(UnixSession {
            path: path.to_path_buf(),
            image,
            reader,
            dwarf,
            debug_kind,
            names: OnceCell::new(),
            with_dwarf: None,
        })
    }
}
