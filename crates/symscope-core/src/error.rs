//! # Error Types
//!
//! Error handling for the symbol engine.
//!
//! Every public operation returns [`Result`]. A failed call carries a
//! [`SymError`], and every `SymError` projects onto the closed [`ErrorCode`]
//! taxonomy through [`SymError::code`], so front ends that need a stable
//! numeric status can report one without matching on messages.

use std::fmt;

use thiserror::Error;

/// Closed status taxonomy shared by every front end.
///
/// `Success` is never carried by a [`SymError`]. `LineNotAvailable` is
/// mostly a soft status, reported by
/// [`SymbolInfo::status`](crate::types::SymbolInfo::status) when a symbol
/// was found but its line could not be resolved; it is a hard error only for
/// line enumeration on a module without line tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode
{
    Success,
    Error,
    InvalidParameter,
    InvalidSize,
    LoadFailed,
    SymbolNotFound,
    LineNotAvailable,
    NotImplemented,
    FeatureNotAvailable,
    OutOfMemory,
    Recursive,
}

impl ErrorCode
{
    /// Short lower-case name, used by the command-line front end.
    #[must_use]
    pub const fn as_str(self) -> &'static str
    {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::Error => "error",
            ErrorCode::InvalidParameter => "invalid parameter",
            ErrorCode::InvalidSize => "invalid size",
            ErrorCode::LoadFailed => "load failed",
            ErrorCode::SymbolNotFound => "symbol not found",
            ErrorCode::LineNotAvailable => "line not available",
            ErrorCode::NotImplemented => "not implemented",
            ErrorCode::FeatureNotAvailable => "feature not available",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::Recursive => "recursive",
        }
    }
}

impl fmt::Display for ErrorCode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

/// Main error type for symbol engine operations
///
/// ## Error Categories
///
/// 1. **Caller errors**: InvalidParameter, InvalidSize
/// 2. **Module errors**: LoadFailed, Parse, Io
/// 3. **Lookup errors**: SymbolNotFound, LineNotAvailable
/// 4. **Capability errors**: NotImplemented, FeatureNotAvailable
/// 5. **Resource errors**: OutOfMemory, Recursive
#[derive(Error, Debug)]
pub enum SymError
{
    /// Unclassified failure, usually reported by a native engine.
    #[error("Symbol engine error: {0}")]
    Generic(String),

    /// A caller-supplied argument was rejected.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A caller-supplied structure or buffer had an unsupported size.
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    /// The module could not be opened, mapped or recognised.
    #[error("Failed to load module {path}: {reason}")]
    LoadFailed
    {
        /// Module path as passed by the caller
        path: String,
        /// Why the load failed
        reason: String,
    },

    /// A container or debug-info section could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// No symbol encloses the address, or no symbol carries the name.
    #[error("Symbol not found")]
    SymbolNotFound,

    /// The module has no line tables to enumerate.
    #[error("Line information not available")]
    LineNotAvailable,

    /// The operation exists in the interface but this backend does not provide it.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// The operation needs a capability the loaded module or engine lacks.
    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),

    /// A fixed-size pool was exhausted.
    ///
    /// Type expansion allocates every node from a caller-owned arena; this
    /// error is returned once that arena has no room left.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Teardown was requested from inside an enumeration callback.
    #[error("Operation refused while an enumeration callback is running")]
    Recursive,

    /// I/O error while reading a module or debug file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SymError
{
    /// Project this error onto the status taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode
    {
        match self {
            SymError::Generic(_) => ErrorCode::Error,
            SymError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            SymError::InvalidSize(_) => ErrorCode::InvalidSize,
            SymError::LoadFailed { .. } | SymError::Parse(_) | SymError::Io(_) => ErrorCode::LoadFailed,
            SymError::SymbolNotFound => ErrorCode::SymbolNotFound,
            SymError::LineNotAvailable => ErrorCode::LineNotAvailable,
            SymError::NotImplemented(_) => ErrorCode::NotImplemented,
            SymError::FeatureNotAvailable(_) => ErrorCode::FeatureNotAvailable,
            SymError::OutOfMemory(_) => ErrorCode::OutOfMemory,
            SymError::Recursive => ErrorCode::Recursive,
        }
    }

    pub(crate) fn load_failed(path: &str, reason: impl fmt::Display) -> Self
    {
        SymError::LoadFailed {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<object::read::Error> for SymError
{
    fn from(err: object::read::Error) -> Self
    {
        SymError::Parse(err.to_string())
    }
}

impl From<gimli::Error> for SymError
{
    fn from(err: gimli::Error) -> Self
    {
        SymError::Parse(format!("DWARF: {err}"))
    }
}

impl From<pdb::Error> for SymError
{
    fn from(err: pdb::Error) -> Self
    {
        SymError::Parse(format!("PDB: {err}"))
    }
}

/// Result type alias for symbol engine operations
pub type Result<T> = std::result::Result<T, SymError>;
