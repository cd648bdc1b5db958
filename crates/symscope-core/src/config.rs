//! Engine configuration.

use std::env;
use std::path::PathBuf;

use tracing::warn;

/// Default root of the separate debug file tree.
pub const DEFAULT_DEBUG_ROOT: &str = "/usr/lib/debug";

/// Default number of debug-link hops followed from a module.
pub const DEFAULT_MAX_DEBUGLINK_DEPTH: usize = 2;

/// Default byte budget for type expansion arenas.
pub const DEFAULT_TYPE_POOL_SIZE: usize = 64 * 1024;

/// Settings fixed when the engine is initialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig
{
    /// Root for `.build-id` and mirrored-directory debug file lookups.
    pub debug_root: PathBuf,
    /// Debug-link hops followed before giving up.
    pub max_debuglink_depth: usize,
    /// Fold module path case before using it as a cache key.
    pub case_insensitive_paths: bool,
    /// Non-zero selects sideline mode, which is not implemented.
    pub sideline_id: u32,
    /// Byte budget of [`TypeArena`](crate::types::TypeArena)s the CLI creates.
    pub type_pool_size: usize,
}

impl Default for EngineConfig
{
    fn default() -> Self
    {
        Self {
            debug_root: PathBuf::from(DEFAULT_DEBUG_ROOT),
            max_debuglink_depth: DEFAULT_MAX_DEBUGLINK_DEPTH,
            case_insensitive_paths: cfg!(windows),
            sideline_id: 0,
            type_pool_size: DEFAULT_TYPE_POOL_SIZE,
        }
    }
}

impl EngineConfig
{
    /// Defaults overlaid with `SYMSCOPE_DEBUG_ROOT` and
    /// `SYMSCOPE_MAX_DEBUGLINK_DEPTH`.
    #[must_use]
    pub fn from_env() -> Self
    {
        let mut config = Self::default();
        if let Some(root) = env::var_os("SYMSCOPE_DEBUG_ROOT").filter(|root| !root.is_empty()) {
            config.debug_root = PathBuf::from(root);
        }
        if let Ok(depth) = env::var("SYMSCOPE_MAX_DEBUGLINK_DEPTH") {
            match depth.trim().parse() {
                Ok(depth) => config.max_debuglink_depth = depth,
                Err(_) => warn!(value = %depth, "ignoring malformed SYMSCOPE_MAX_DEBUGLINK_DEPTH"),
            }
        }
        config
    }

    #[must_use]
    pub fn with_debug_root(mut self, root: impl Into<PathBuf>) -> Self
    {
        self.debug_root = root.into();
        self
    }

    #[must_use]
    pub fn is_sideline(&self) -> bool
    {
        self.sideline_id != 0
    }
}
