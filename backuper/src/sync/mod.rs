//! Synchronization engine.
//!
//! [`file::sync_file`] holds the per-file policy. [`Synchronizer`] applies it
//! to single files, flat directories and whole trees, honoring the ignore set
//! and the destination guard at every level, and records every decision in a
//! [`SyncOutcome`].

pub mod directory;
pub mod file;

pub use file::{sync_file, FileAction};

use crate::config::IgnoreSet;
use crate::fs::walker::EntryFilter;
use crate::transfer::progress::ProgressTracker;
use crate::utils::{BackupError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One file the synchronizer acted on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(flatten)]
    pub action: FileAction,
}

/// An entry that could not be synchronized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub path: PathBuf,
    pub kind: &'static str,
    pub reason: String,
}

impl Failure {
    pub fn new(path: &Path, error: &BackupError) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

/// A directory that was deliberately not descended into
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDirectory {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything that happened while synchronizing one source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub files: Vec<FileRecord>,
    pub failures: Vec<Failure>,
    pub ignored: Vec<PathBuf>,
    pub skipped_dirs: Vec<SkippedDirectory>,
}

impl SyncOutcome {
    pub fn count(&self, predicate: impl Fn(&FileAction) -> bool) -> usize {
        self.files.iter().filter(|record| predicate(&record.action)).count()
    }

    pub fn copied(&self) -> usize {
        self.count(|action| matches!(action, FileAction::Copied))
    }

    pub fn skipped(&self) -> usize {
        self.count(|action| matches!(action, FileAction::Skipped))
    }

    pub fn renamed(&self) -> usize {
        self.count(|action| matches!(action, FileAction::RenamedAndCopied { .. }))
    }

    pub(crate) fn record_failure(&mut self, path: &Path, error: &BackupError) {
        warn!("Failed to synchronize {}: {}", path.display(), error);
        self.failures.push(Failure::new(path, error));
    }
}

/// Applies the file policy across sources while tracking the entry filter,
/// cancellation and progress
pub struct Synchronizer<'a> {
    filter: EntryFilter<'a>,
    cancel_token: CancellationToken,
    progress: ProgressTracker,
}

impl<'a> Synchronizer<'a> {
    /// Create a synchronizer (no cancellation support)
    pub fn new(ignored: &'a IgnoreSet) -> Self {
        Self {
            filter: EntryFilter::new(ignored),
            cancel_token: CancellationToken::new(),
            progress: ProgressTracker::default(),
        }
    }

    /// Check `cancel_token` between files
    pub fn with_cancel(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    /// Never descend into `dir`; used for a destination nested inside a source
    pub fn guard(mut self, dir: &Path) -> Self {
        self.filter = self.filter.guard(dir);
        self
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub(crate) fn filter(&self) -> &EntryFilter<'a> {
        &self.filter
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        Ok(())
    }

    /// Synchronize one file pair, returning the action or the error
    pub fn copy_file(&mut self, src: &Path, dest: &Path) -> Result<FileAction> {
        self.check_cancelled()?;

        let result = sync_file(src, dest);
        self.progress.file_processed(src);
        result
    }

    /// Synchronize one file pair and record the result. Only cancellation is
    /// returned as an error; any other failure is recorded and swallowed.
    pub fn record_file(&mut self, src: &Path, dest: &Path, outcome: &mut SyncOutcome) -> Result<()> {
        match self.copy_file(src, dest) {
            Ok(action) => {
                outcome.files.push(FileRecord {
                    source: src.to_path_buf(),
                    destination: dest.to_path_buf(),
                    action,
                });
                Ok(())
            }
            Err(BackupError::Cancelled) => Err(BackupError::Cancelled),
            Err(e) => {
                outcome.record_failure(src, &e);
                Ok(())
            }
        }
    }
}
