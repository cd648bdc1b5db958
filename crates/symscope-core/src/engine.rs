//! # Engine
//!
//! The public façade over every backend.
//!
//! An [`Engine`] owns the module cache, the configuration and the native
//! engine's address-space cursor, all behind one re-entrant lock. Queries
//! take the lock, fetch (or load) the module's session, and run against it.
//! Enumeration callbacks run with the lock still held by the calling thread,
//! so a callback may issue further queries, including against other
//! modules, without deadlocking. Other threads wait until the enumeration
//! returns.
//!
//! ## Lifecycle
//!
//! `init` and `exit` are reference counted. The first `init` creates the
//! state from its [`EngineConfig`]; later calls only bump the count. The
//! matching last `exit` drops every cached module.
//!
//! ```rust,no_run
//! use symscope_core::{Engine, EngineConfig, QueryFlags};
//!
//! fn main() -> symscope_core::Result<()>
//! {
//!     let engine = Engine::global();
//!     engine.init(EngineConfig::from_env())?;
//!
//!     let offs = engine.lookup_name("/usr/lib/libc.so.6", "libc!malloc")?;
//!     let info = engine.lookup_address("/usr/lib/libc.so.6", offs, QueryFlags::DEMANGLE)?;
//!     println!("{info}");
//!
//!     engine.exit()
//! }
//! ```

use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::demangle;
use crate::error::{Result, SymError};
use crate::native::{NativeEngine, PdbEngine};
use crate::symbols::cache::ModuleCache;
use crate::symbols::image::{FileSystemSource, ImageSource};
use crate::symbols::pdb::PdbBackend;
use crate::symbols::session::{ModuleInfo, ModuleSession, SessionLoader};
use crate::types::{DebugKind, LineEntry, QueryFlags, SymbolInfo, TypeArena, TypeRef};

static GLOBAL: Lazy<Engine> = Lazy::new(Engine::new);

/// State that exists between the first `init` and the last `exit`.
#[derive(Debug)]
struct EngineState
{
    config: EngineConfig,
    cache: ModuleCache,
    pdb: PdbBackend,
    refcount: usize,
}

type StateCell = RefCell<Option<EngineState>>;

/// Marks a running enumeration callback for as long as it lives.
struct CallbackScope<'a>(&'a AtomicUsize);

impl<'a> CallbackScope<'a>
{
    fn enter(depth: &'a AtomicUsize) -> Self
    {
        depth.fetch_add(1, Ordering::SeqCst);
        Self(depth)
    }
}

impl Drop for CallbackScope<'_>
{
    fn drop(&mut self)
    {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Symbol engine context.
pub struct Engine
{
    state: ReentrantMutex<StateCell>,
    source: Arc<dyn ImageSource>,
    native: Arc<dyn NativeEngine>,
    /// Enumerations currently inside a caller callback, on any module.
    callback_depth: AtomicUsize,
}

impl std::fmt::Debug for Engine
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Engine")
            .field("native_version", &self.native.version())
            .field("callback_depth", &self.callback_depth.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for Engine
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl Engine
{
    /// Engine reading from the filesystem, with the bundled PDB engine.
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            state: ReentrantMutex::new(RefCell::new(None)),
            source: Arc::new(FileSystemSource),
            native: Arc::new(PdbEngine::new()),
            callback_depth: AtomicUsize::new(0),
        }
    }

    /// The process-wide engine.
    pub fn global() -> &'static Engine
    {
        &GLOBAL
    }

    /// Serve module files from `source` instead of the filesystem.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ImageSource>) -> Self
    {
        self.source = source;
        self
    }

    /// Hand PDB modules to `native` instead of the bundled engine.
    #[must_use]
    pub fn with_native_engine(mut self, native: Arc<dyn NativeEngine>) -> Self
    {
        self.native = native;
        self
    }

    /// Initialise the engine, or add a reference to an initialised one.
    ///
    /// `config` only takes effect on the first call.
    ///
    /// ## Errors
    ///
    /// Currently infallible; kept fallible for parity with `exit`.
    pub fn init(&self, config: EngineConfig) -> Result<()>
    {
        let guard = self.state.lock();
        let mut cell = guard.borrow_mut();
        match cell.as_mut() {
            Some(state) => {
                state.refcount += 1;
                trace!(refcount = state.refcount, "engine init (nested)");
            }
            None => {
                if config.is_sideline() {
                    warn!(id = config.sideline_id, "sideline mode requested; queries will fail");
                }
                debug!(?config, "engine initialised");
                *cell = Some(EngineState {
                    cache: ModuleCache::new(config.case_insensitive_paths),
                    pdb: PdbBackend::new(Arc::clone(&self.native)),
                    config,
                    refcount: 1,
                });
            }
        }
        Ok(())
    }

    /// Drop one reference; the last one unloads every module.
    ///
    /// ## Errors
    ///
    /// `InvalidParameter` when the engine is not initialised, `Recursive`
    /// when called from an enumeration callback.
    pub fn exit(&self) -> Result<()>
    {
        let guard = self.state.lock();
        if self.callback_depth.load(Ordering::SeqCst) > 0 {
            return Err(SymError::Recursive);
        }
        let mut cell = guard.borrow_mut();
        let Some(state) = cell.as_mut() else {
            warn!("engine exit without matching init");
            return Err(SymError::InvalidParameter("engine is not initialised".into()));
        };
        state.refcount -= 1;
        if state.refcount == 0 {
            state.cache.clear();
            *cell = None;
            debug!("engine shut down");
        } else {
            trace!(refcount = state.refcount, "engine exit (nested)");
        }
        Ok(())
    }

    /// Whether `init` has been called more often than `exit`.
    #[must_use]
    pub fn is_initialized(&self) -> bool
    {
        self.state.lock().borrow().is_some()
    }

    /// Session for `path`. The caller holds `guard` for as long as it uses
    /// the session.
    fn session(&self, guard: &ReentrantMutexGuard<'_, StateCell>, path: &Path) -> Result<Arc<ModuleSession>>
    {
        let mut cell = guard.borrow_mut();
        let state = cell
            .as_mut()
            .ok_or_else(|| SymError::InvalidParameter("engine is not initialised".into()))?;
        if state.config.is_sideline() {
            return Err(SymError::NotImplemented("sideline mode"));
        }
        let EngineState { config, cache, pdb, .. } = state;
        let loader = SessionLoader::new(self.source.as_ref(), config);
        cache.get_or_load(path, &loader, pdb)
    }

    /// Symbol covering `modoffs`, with its source line when available.
    ///
    /// A missing line is not an error: the record comes back with `line`
    /// unset and [`SymbolInfo::status`] reports `LineNotAvailable`.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the module cannot be loaded, `SymbolNotFound` if no
    /// symbol encloses the offset.
    pub fn lookup_address(&self, path: impl AsRef<Path>, modoffs: u64, flags: QueryFlags) -> Result<SymbolInfo>
    {
        let guard = self.state.lock();
        let session = self.session(&guard, path.as_ref())?;
        match &*session {
            ModuleSession::Unix(session) => session.lookup_address(modoffs, flags),
            ModuleSession::Pdb(reader) => reader.lookup_address(modoffs, flags),
        }
    }

    /// Module offset of the symbol called `name`.
    ///
    /// A leading `module!` qualifier is accepted and dropped; the lookup is
    /// always scoped to `path`. `name` may contain `*` and `?` wildcards, in
    /// which case the first match wins.
    ///
    /// ## Errors
    ///
    /// `SymbolNotFound` when nothing matches.
    pub fn lookup_name(&self, path: impl AsRef<Path>, name: &str) -> Result<u64>
    {
        let name = strip_module(name);
        if name.is_empty() {
            return Err(SymError::InvalidParameter("empty symbol name".into()));
        }
        let guard = self.state.lock();
        let session = self.session(&guard, path.as_ref())?;
        match &*session {
            ModuleSession::Unix(session) => session.lookup_name(name),
            ModuleSession::Pdb(reader) => reader.lookup_name(name),
        }
    }

    /// Visit every symbol as `(name, modoffs)`. Return `false` to stop.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the module cannot be loaded.
    pub fn enumerate_symbols(
        &self,
        path: impl AsRef<Path>,
        flags: QueryFlags,
        mut callback: impl FnMut(&str, u64) -> bool,
    ) -> Result<()>
    {
        self.enumerate_symbols_ex(path, flags, |info| callback(&info.name, info.start_offs))
    }

    /// Visit every symbol as a full record. Lines are not resolved.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the module cannot be loaded.
    pub fn enumerate_symbols_ex(
        &self,
        path: impl AsRef<Path>,
        flags: QueryFlags,
        mut callback: impl FnMut(&SymbolInfo) -> bool,
    ) -> Result<()>
    {
        let guard = self.state.lock();
        let session = self.session(&guard, path.as_ref())?;
        let _scope = CallbackScope::enter(&self.callback_depth);
        match &*session {
            ModuleSession::Unix(session) => session.enumerate(flags, &mut callback),
            ModuleSession::Pdb(reader) => reader.enumerate(flags, &mut callback),
        }
    }

    /// Visit symbols whose name matches the wildcard `pattern`, as
    /// `(name, modoffs)`.
    ///
    /// `full` includes data symbols; only the PDB backend distinguishes.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the module cannot be loaded.
    pub fn search_symbols(
        &self,
        path: impl AsRef<Path>,
        pattern: &str,
        full: bool,
        flags: QueryFlags,
        mut callback: impl FnMut(&str, u64) -> bool,
    ) -> Result<()>
    {
        self.search_symbols_ex(path, pattern, full, flags, |info| callback(&info.name, info.start_offs))
    }

    /// [`search_symbols`](Self::search_symbols) with full records.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the module cannot be loaded.
    pub fn search_symbols_ex(
        &self,
        path: impl AsRef<Path>,
        pattern: &str,
        full: bool,
        flags: QueryFlags,
        mut callback: impl FnMut(&SymbolInfo) -> bool,
    ) -> Result<()>
    {
        let pattern = strip_module(pattern);
        let guard = self.state.lock();
        let session = self.session(&guard, path.as_ref())?;
        let _scope = CallbackScope::enter(&self.callback_depth);
        match &*session {
            ModuleSession::Unix(session) => session.search(pattern, flags, &mut callback),
            ModuleSession::Pdb(reader) => reader.search(pattern, full, flags, &mut callback),
        }
    }

    /// Visit every line-table row of the module.
    ///
    /// ## Errors
    ///
    /// `LineNotAvailable` if the module has no line tables.
    pub fn enumerate_lines(&self, path: impl AsRef<Path>, mut callback: impl FnMut(&LineEntry) -> bool) -> Result<()>
    {
        let guard = self.state.lock();
        let session = self.session(&guard, path.as_ref())?;
        let _scope = CallbackScope::enter(&self.callback_depth);
        match &*session {
            ModuleSession::Unix(session) => session.enumerate_lines(&mut callback),
            ModuleSession::Pdb(reader) => reader.enumerate_lines(&mut callback),
        }
    }

    fn with_pdb<T>(
        &self,
        path: &Path,
        op: impl FnOnce(&crate::symbols::pdb::PdbReader) -> Result<T>,
    ) -> Result<T>
    {
        let guard = self.state.lock();
        let session = self.session(&guard, path)?;
        match &*session {
            ModuleSession::Pdb(reader) => op(reader),
            ModuleSession::Unix(_) => Err(SymError::NotImplemented("type information requires a PDB")),
        }
    }

    /// Type of the symbol at `modoffs`, expanded `levels` deep into `arena`.
    ///
    /// ## Errors
    ///
    /// `NotImplemented` outside the PDB backend, `OutOfMemory` when `arena`
    /// fills up.
    pub fn get_type(&self, path: impl AsRef<Path>, modoffs: u64, levels: u32, arena: &mut TypeArena) -> Result<TypeRef>
    {
        self.with_pdb(path.as_ref(), |reader| reader.get_type(modoffs, levels, arena))
    }

    /// Signature of the function at `modoffs`.
    ///
    /// ## Errors
    ///
    /// As [`get_type`](Self::get_type), plus `InvalidParameter` when the
    /// symbol is not a function.
    pub fn get_func_type(&self, path: impl AsRef<Path>, modoffs: u64, arena: &mut TypeArena) -> Result<TypeRef>
    {
        self.with_pdb(path.as_ref(), |reader| reader.get_func_type(modoffs, arena))
    }

    /// Expand the type with native index `type_id`, as found in
    /// [`SymbolInfo::type_id`].
    ///
    /// ## Errors
    ///
    /// As [`get_type`](Self::get_type).
    pub fn expand_type(&self, path: impl AsRef<Path>, type_id: u32, levels: u32, arena: &mut TypeArena) -> Result<TypeRef>
    {
        self.with_pdb(path.as_ref(), |reader| reader.expand_type(type_id, levels, arena))
    }

    /// Debug information the module exposes.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the module cannot be loaded.
    pub fn get_module_debug_kind(&self, path: impl AsRef<Path>) -> Result<DebugKind>
    {
        let guard = self.state.lock();
        Ok(self.session(&guard, path.as_ref())?.debug_kind())
    }

    /// Whether the module has any symbol table.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the module cannot be loaded.
    pub fn module_has_symbols(&self, path: impl AsRef<Path>) -> Result<bool>
    {
        Ok(self.get_module_debug_kind(path)?.contains(DebugKind::SYMBOLS))
    }

    /// Format, base and debug-file summary of the module.
    ///
    /// ## Errors
    ///
    /// `LoadFailed` if the module cannot be loaded.
    pub fn module_info(&self, path: impl AsRef<Path>) -> Result<ModuleInfo>
    {
        let guard = self.state.lock();
        Ok(self.session(&guard, path.as_ref())?.info())
    }

    /// Unload the module at `path`.
    ///
    /// ## Errors
    ///
    /// `Recursive` while any enumeration callback is running, in which case
    /// nothing is evicted; `InvalidParameter` if the module is not loaded.
    pub fn free_resources(&self, path: impl AsRef<Path>) -> Result<()>
    {
        let path = path.as_ref();
        let guard = self.state.lock();
        if self.callback_depth.load(Ordering::SeqCst) > 0 {
            warn!(path = %path.display(), "refusing to free a module from inside a callback");
            return Err(SymError::Recursive);
        }
        let mut cell = guard.borrow_mut();
        let state = cell
            .as_mut()
            .ok_or_else(|| SymError::InvalidParameter("engine is not initialised".into()))?;
        if state.config.is_sideline() {
            return Err(SymError::NotImplemented("sideline mode"));
        }
        if state.cache.evict(path) {
            Ok(())
        } else {
            Err(SymError::InvalidParameter(format!("{} is not loaded", path.display())))
        }
    }

    /// Number of modules currently cached.
    #[must_use]
    pub fn loaded_modules(&self) -> usize
    {
        self.state.lock().borrow().as_ref().map_or(0, |state| state.cache.len())
    }

    /// See [`demangle::demangle_symbol`].
    pub fn demangle_symbol(dst: &mut [u8], mangled: &str, flags: QueryFlags) -> usize
    {
        demangle::demangle_symbol(dst, mangled, flags)
    }
}

/// Drop a leading `module!` qualifier.
fn strip_module(name: &str) -> &str
{
    name.split_once('!').map_or(name, |(_, symbol)| symbol)
}
