//! Backuper Library
//!
//! Configuration-driven mirroring of files and directories into a backup
//! destination, with mtime-based change detection and rename-on-conflict.

pub mod classify;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod scheduler;
pub mod sync;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::{Configuration, Period, Schedule, SourceMode};
pub use executor::report::BackupReport;
pub use executor::BackupExecutor;
pub use sync::FileAction;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
