//! # Symscope Utilities
//!
//! Logging bootstrap shared by the Symscope binaries.

pub mod logging;

pub use logging::{init_logging, init_logging_with, init_logging_with_level, LogFormat, LogGuard, LogLevel, LoggingError, LoggingOptions};
pub use tracing::{debug, error, info, trace, warn};
