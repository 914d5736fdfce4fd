//! Utility modules for the backuper.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, IoResultExt, Result};
