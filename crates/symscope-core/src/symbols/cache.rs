//! # Module Cache
//!
//! Path-keyed cache of loaded module sessions.
//!
//! A module is loaded on the first query that names it and stays loaded
//! until it is evicted explicitly or the engine shuts down. Sessions are
//! handed out as `Arc`s so a query can keep using one after releasing the
//! engine state, for example while running a caller's callback.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use super::pdb::PdbBackend;
use super::session::{ModuleSession, SessionLoader};
use crate::error::Result;

/// Cache of module sessions keyed by the caller's path string.
///
/// Keys are compared byte for byte unless the cache folds case, in which
/// case they are lower-cased first.
#[derive(Debug, Default)]
pub(crate) struct ModuleCache
{
    modules: HashMap<String, Arc<ModuleSession>>,
    case_insensitive: bool,
}

impl ModuleCache
{
    #[must_use]
    pub(crate) fn new(case_insensitive: bool) -> Self
    {
        Self {
            modules: HashMap::new(),
            case_insensitive,
        }
    }

    fn key(&self, path: &Path) -> String
    {
        let key = path.to_string_lossy();
        if self.case_insensitive {
            key.to_lowercase()
        } else {
            key.into_owned()
        }
    }

    /// Session for `path`, loading it on a miss.
    ///
    /// ## Errors
    ///
    /// Whatever the loader reports; nothing is cached on failure.
    pub(crate) fn get_or_load(
        &mut self,
        path: &Path,
        loader: &SessionLoader<'_>,
        pdb: &mut PdbBackend,
    ) -> Result<Arc<ModuleSession>>
    {
        let key = self.key(path);
        if let Some(session) = self.modules.get(&key) {
            trace!(path = %key, "module cache hit");
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(loader.load(path, pdb)?);
        debug!(path = %key, debug_kind = ?session.debug_kind(), "module cached");
        self.modules.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Drop the session for `path`. Returns whether one was cached.
    pub(crate) fn evict(&mut self, path: &Path) -> bool
    {
        let key = self.key(path);
        let evicted = self.modules.remove(&key).is_some();
        if evicted {
            debug!(path = %key, "module evicted");
        }
        evicted
    }

    pub(crate) fn clear(&mut self)
    {
        debug!(modules = self.modules.len(), "clearing module cache");
        self.modules.clear();
    }

    pub(crate) fn len(&self) -> usize
    {
        self.modules.len()
    }
}
