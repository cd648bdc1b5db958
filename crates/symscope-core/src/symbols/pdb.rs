//! # PDB Modules
//!
//! PE modules without COFF symbols or DWARF are served by a
//! [`NativeEngine`]. The engine works in one synthetic address space, so each
//! module is placed at its own base by [`PdbBackend`] and every query
//! translates between that space and module offsets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::session::ModuleInfo;
use crate::demangle::collapse_templates;
use crate::error::{Result, SymError};
use crate::native::{has_fast_search, NativeEngine, NativeLoadError, NativeSymbol, NativeType};
use crate::pattern;
use crate::types::{DebugKind, LineEntry, LineInfo, QueryFlags, SymbolInfo, TypeArena, TypeRef};

/// First synthetic base handed out.
pub(crate) const FIRST_LOAD_BASE: u64 = 0x1100_0000;

/// Bases are advanced in multiples of this.
const LOAD_ALIGNMENT: u64 = 64 * 1024;

/// Places modules in the native engine's address space.
pub(crate) struct PdbBackend
{
    native: Arc<dyn NativeEngine>,
    next_load: u64,
}

impl std::fmt::Debug for PdbBackend
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("PdbBackend")
            .field("version", &self.native.version())
            .field("next_load", &format_args!("0x{:x}", self.next_load))
            .finish()
    }
}

impl PdbBackend
{
    pub(crate) fn new(native: Arc<dyn NativeEngine>) -> Self
    {
        Self {
            native,
            next_load: FIRST_LOAD_BASE,
        }
    }

    /// Load `path` into the native engine.
    ///
    /// Executables are not relocatable and go in at their preferred base.
    /// Everything else is packed at the cursor, which then moves past the
    /// module. A module the engine refuses at the cursor is retried once at
    /// its preferred base; that only works while a single such module is
    /// loaded.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` when the engine cannot load the module at all.
    pub(crate) fn load(&mut self, path: &Path, size: u64) -> Result<PdbReader>
    {
        let shown = path.display().to_string();
        let is_exe = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
        let requested = if is_exe { 0 } else { self.next_load };

        let base = match self.native.load_module(path, requested, size) {
            Ok(base) => base,
            Err(NativeLoadError::InvalidAddress(at)) if requested != 0 => {
                warn!(path = %shown, base = format_args!("0x{at:x}"), "native engine refused base, retrying at 0");
                self.native
                    .load_module(path, 0, size)
                    .map_err(|err| SymError::load_failed(&shown, err))?
            }
            Err(err) => return Err(SymError::load_failed(&shown, err)),
        };
        if !is_exe && base == requested {
            self.next_load += size.div_ceil(LOAD_ALIGNMENT).max(1) * LOAD_ALIGNMENT;
        }

        let file_size = size;
        let info = self.native.module_info(base);
        let (size, debug_kind) = info.map_or((size, DebugKind::empty()), |info| (info.size, info.debug_kind));
        debug!(path = %shown, base = format_args!("0x{base:x}"), size, ?debug_kind, "native module ready");

        let module_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(PdbReader {
            native: Arc::clone(&self.native),
            path: path.to_path_buf(),
            module_name,
            base,
            size,
            file_size,
            debug_kind,
        })
    }
}

/// One module loaded in the native engine.
pub(crate) struct PdbReader
{
    native: Arc<dyn NativeEngine>,
    path: PathBuf,
    module_name: String,
    base: u64,
    size: u64,
    file_size: u64,
    debug_kind: DebugKind,
}

impl std::fmt::Debug for PdbReader
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("PdbReader")
            .field("path", &self.path)
            .field("base", &format_args!("0x{:x}", self.base))
            .field("size", &self.size)
            .field("debug_kind", &self.debug_kind)
            .finish_non_exhaustive()
    }
}

impl Drop for PdbReader
{
    fn drop(&mut self)
    {
        trace!(path = %self.path.display(), "unloading native module");
        self.native.unload_module(self.base);
    }
}

impl PdbReader
{
    pub(crate) fn debug_kind(&self) -> DebugKind
    {
        self.debug_kind
    }

    pub(crate) fn info(&self) -> ModuleInfo
    {
        ModuleInfo {
            format: "PDB",
            load_base: self.base,
            file_size: self.file_size,
            debug_kind: self.debug_kind,
            debug_file: None,
        }
    }

    fn in_module(&self, address: u64) -> bool
    {
        address >= self.base && address - self.base < self.size
    }

    /// Engine address of `modoffs`, if it lies inside the module.
    fn address_of(&self, modoffs: u64) -> Result<u64>
    {
        if modoffs >= self.size {
            return Err(SymError::SymbolNotFound);
        }
        self.base.checked_add(modoffs).ok_or(SymError::SymbolNotFound)
    }

    fn present(&self, raw: &str, flags: QueryFlags) -> String
    {
        if !flags.intersects(QueryFlags::DEMANGLE | QueryFlags::DEMANGLE_FULL) {
            return raw.to_string();
        }
        let undecorated = if raw.starts_with('?') {
            self.native.undecorate(raw, flags).unwrap_or_else(|| raw.to_string())
        } else {
            raw.to_string()
        };
        collapse_templates(undecorated, flags)
    }

    fn record(&self, symbol: &NativeSymbol, flags: QueryFlags) -> SymbolInfo
    {
        let start = symbol.address - self.base;
        let end = if symbol.size > 0 {
            start.saturating_add(symbol.size)
        } else {
            start.wrapping_add(1)
        };
        let mut info = SymbolInfo::new(self.present(&symbol.name, flags), start, end, self.debug_kind);
        info.type_id = symbol.type_index;
        info.flags = flags;
        info
    }

    pub(crate) fn lookup_address(&self, modoffs: u64, flags: QueryFlags) -> Result<SymbolInfo>
    {
        let address = self.address_of(modoffs)?;
        let symbol = self
            .native
            .symbol_from_address(address)
            .filter(|symbol| self.in_module(symbol.address))
            .ok_or(SymError::SymbolNotFound)?;
        let mut info = self.record(&symbol, flags);

        info.line = self.native.line_from_address(address).map(|line| LineInfo {
            file: Some(Arc::from(line.file.as_str())),
            line: line.line,
            line_offs: address.saturating_sub(line.address),
        });
        trace!(modoffs, name = %info.name, has_line = info.line.is_some(), "address resolved");
        Ok(info)
    }

    /// Offset of `name`, qualified with this module for the native lookup.
    ///
    /// An answer outside the module is treated as not found.
    pub(crate) fn lookup_name(&self, name: &str) -> Result<u64>
    {
        let qualified = format!("{}!{name}", self.module_name);
        if let Some(symbol) = self.native.symbol_from_name(&qualified) {
            if self.in_module(symbol.address) {
                return Ok(symbol.address - self.base);
            }
            warn!(
                name = %qualified,
                address = format_args!("0x{:x}", symbol.address),
                "native engine returned an address outside the module"
            );
            return Err(SymError::SymbolNotFound);
        }
        if !pattern::has_wildcards(name) {
            return Err(SymError::SymbolNotFound);
        }

        let mut found = None;
        self.search(name, true, QueryFlags::default_demangle(), &mut |info| {
            found = Some(info.start_offs);
            false
        })?;
        found.ok_or(SymError::SymbolNotFound)
    }

    pub(crate) fn enumerate(&self, flags: QueryFlags, callback: &mut dyn FnMut(&SymbolInfo) -> bool) -> Result<()>
    {
        self.native.enumerate(self.base, &mut |symbol| {
            !self.in_module(symbol.address) || callback(&self.record(symbol, flags))
        })
    }

    /// Visit symbols matching `pattern`; `full` includes non-functions.
    ///
    /// Uses the engine's index when its version allows, and the full
    /// enumeration otherwise or when the index is missing.
    pub(crate) fn search(
        &self,
        pattern: &str,
        full: bool,
        flags: QueryFlags,
        callback: &mut dyn FnMut(&SymbolInfo) -> bool,
    ) -> Result<()>
    {
        if has_fast_search(self.native.version()) {
            let indexed = self.native.search(self.base, pattern, !full, &mut |symbol| {
                !self.in_module(symbol.address) || callback(&self.record(symbol, flags))
            });
            match indexed {
                Err(SymError::FeatureNotAvailable(reason)) => {
                    debug!(%reason, "indexed search unavailable, enumerating");
                }
                other => return other,
            }
        }

        self.native.enumerate(self.base, &mut |symbol| {
            if !self.in_module(symbol.address) || (!full && !symbol.is_function) {
                return true;
            }
            if self.native.matches_mask(&symbol.name, pattern) {
                callback(&self.record(symbol, flags))
            } else {
                true
            }
        })
    }

    pub(crate) fn enumerate_lines(&self, callback: &mut dyn FnMut(&LineEntry) -> bool) -> Result<()>
    {
        self.native.enumerate_lines(self.base, &mut |entry| {
            callback(&LineEntry {
                cu_name: entry.compiland.as_deref().map(Arc::from),
                file: entry.file.as_deref().map(Arc::from),
                line: entry.line,
                addr: entry.address.saturating_sub(self.base),
            })
        })
    }

    fn symbol_at(&self, modoffs: u64) -> Result<NativeSymbol>
    {
        self.native
            .symbol_from_address(self.address_of(modoffs)?)
            .filter(|symbol| self.in_module(symbol.address))
            .ok_or(SymError::SymbolNotFound)
    }

    /// Type of the symbol at `modoffs`, expanded `levels` deep.
    pub(crate) fn get_type(&self, modoffs: u64, levels: u32, arena: &mut TypeArena) -> Result<TypeRef>
    {
        let symbol = self.symbol_at(modoffs)?;
        if symbol.type_index == 0 {
            return Err(SymError::FeatureNotAvailable(format!("{} has no type record", symbol.name)));
        }
        self.expand_type(symbol.type_index, levels, arena)
    }

    /// Signature of the function at `modoffs`, with its return and argument
    /// types expanded one level.
    pub(crate) fn get_func_type(&self, modoffs: u64, arena: &mut TypeArena) -> Result<TypeRef>
    {
        let symbol = self.symbol_at(modoffs)?;
        if !symbol.is_function {
            return Err(SymError::InvalidParameter(format!("{} is not a function", symbol.name)));
        }
        match self.native.type_record(self.base, symbol.type_index) {
            Some(NativeType::Function { .. }) => self.expand_type(symbol.type_index, 1, arena),
            _ => Err(SymError::FeatureNotAvailable(format!("{} has no function type", symbol.name))),
        }
    }

    pub(crate) fn expand_type(&self, type_id: u32, levels: u32, arena: &mut TypeArena) -> Result<TypeRef>
    {
        TypeExpander {
            native: self.native.as_ref(),
            base: self.base,
            arena,
            visited: HashMap::new(),
        }
        .expand(type_id, levels)
    }
}

/// Decodes native type records into an arena, once per type index.
struct TypeExpander<'a>
{
    native: &'a dyn NativeEngine,
    base: u64,
    arena: &'a mut TypeArena,
    visited: HashMap<u32, TypeRef>,
}

impl TypeExpander<'_>
{
    fn expand(&mut self, id: u32, levels: u32) -> Result<TypeRef>
    {
        if let Some(&node) = self.visited.get(&id) {
            return Ok(node);
        }
        let Some(record) = self.native.type_record(self.base, id) else {
            return self.arena.alloc_other(id, 0, "");
        };
        let deeper = levels.saturating_sub(1);

        // Nodes are registered before their children so cycles resolve to
        // the node under construction.
        let node = match record {
            NativeType::Void => self.arena.alloc_void(id)?,
            NativeType::Base { size, signed } => self.arena.alloc_int(id, size, signed)?,
            NativeType::Other { name, size } => self.arena.alloc_other(id, size, &name)?,
            NativeType::Pointer { target, size } => {
                let node = self.arena.alloc_ptr(id, size)?;
                self.visited.insert(id, node);
                if levels > 0 {
                    let child = self.expand(target, deeper)?;
                    self.arena.set_target(node, child);
                }
                node
            }
            NativeType::Array { element, size, count } => {
                let node = self.arena.alloc_array(id, size, count)?;
                self.visited.insert(id, node);
                if levels > 0 {
                    let child = self.expand(element, deeper)?;
                    self.arena.set_target(node, child);
                }
                node
            }
            NativeType::Typedef { name, target } => {
                let node = self.arena.alloc_typedef(id, &name)?;
                self.visited.insert(id, node);
                if levels > 0 {
                    let child = self.expand(target, deeper)?;
                    self.arena.set_target(node, child);
                }
                node
            }
            NativeType::Compound { name, size, fields } => {
                let count = if levels > 0 { fields.len() } else { 0 };
                let node = self.arena.alloc_compound(id, size, &name, count)?;
                self.visited.insert(id, node);
                for (slot, field) in fields.into_iter().take(count).enumerate() {
                    let child = self.expand(field, deeper)?;
                    self.arena.set_child(node, slot, child);
                }
                node
            }
            NativeType::Function { .. } if levels == 0 => self.arena.alloc_other(id, 0, "")?,
            NativeType::Function { return_type, args } => {
                let node = self.arena.alloc_func(id, args.len())?;
                self.visited.insert(id, node);
                if let Some(ret) = return_type {
                    let child = self.expand(ret, deeper)?;
                    self.arena.set_target(node, child);
                }
                for (slot, arg) in args.into_iter().enumerate() {
                    let child = self.expand(arg, deeper)?;
                    self.arena.set_child(node, slot, child);
                }
                node
            }
        };
        self.visited.insert(id, node);
        Ok(node)
    }
}
