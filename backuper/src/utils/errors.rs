//! Custom error types for the backuper.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid mode: {0:?} (expected one of 'f', 'd', 'r')")]
    InvalidMode(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid schedule period: {0:?} (expected once, daily, weekly or monthly)")]
    InvalidPeriod(String),

    #[error("Invalid task name: {0:?}")]
    InvalidTaskName(String),

    #[error("Invalid destination {}: {reason}", .path.display())]
    InvalidDestination { path: PathBuf, reason: String },

    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Cannot parse configuration file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("Cannot serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Source not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Destination conflict: {} exists and is not a directory", .0.display())]
    DestinationConflict(PathBuf),

    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup cancelled")]
    Cancelled,

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl BackupError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Short machine-readable name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::InvalidMode(_) => "invalid_mode",
            BackupError::InvalidTime(_) => "invalid_time",
            BackupError::InvalidPeriod(_) => "invalid_period",
            BackupError::InvalidTaskName(_) => "invalid_task_name",
            BackupError::InvalidDestination { .. } => "invalid_destination",
            BackupError::ConfigNotFound(_) => "config_not_found",
            BackupError::ConfigParse { .. } => "config_parse",
            BackupError::ConfigSerialize(_) => "config_serialize",
            BackupError::MissingSource(_) => "missing_source",
            BackupError::DestinationConflict(_) => "destination_conflict",
            BackupError::NotAFile(_) => "not_a_file",
            BackupError::NotADirectory(_) => "not_a_directory",
            BackupError::Io { .. } => "io",
            BackupError::Cancelled => "cancelled",
            BackupError::Scheduler(_) => "scheduler",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Attach a path to a plain `std::io::Result`.
pub trait IoResultExt<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| BackupError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_path() {
        let err: Result<()> = Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
            .at_path("/data/report.txt");

        let err = err.unwrap_err();
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("/data/report.txt"));
    }
}
