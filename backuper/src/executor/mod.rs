//! Backup executor - Orchestrates a backup run over every registered source.
//!
//! For each source that is not ignored the executor checks it still exists,
//! maps it into the destination tree and dispatches it by mode to the file,
//! flat or recursive synchronizer. Failures of one source never stop the
//! others; only a destination that cannot be created or written aborts the
//! whole run.

pub mod report;

use crate::classify::{classify, target_path};
use crate::config::{Configuration, SourceMode};
use crate::fs::walker::{self, EntryFilter};
use crate::sync::directory::ensure_directory;
use crate::sync::{FileRecord, SyncOutcome, Synchronizer};
use crate::transfer::progress::{BackupProgress, ProgressTracker};
use crate::utils::{BackupError, Result};
use chrono::Local;
use report::{BackupReport, SourceReport, SourceStatus};
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type ProgressCallback = Box<dyn FnMut(&BackupProgress) + Send>;

/// Main backup executor
pub struct BackupExecutor {
    cancel_token: CancellationToken,
    progress_callback: Option<ProgressCallback>,
}

impl BackupExecutor {
    /// Create a new backup executor (no cancellation support)
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            progress_callback: None,
        }
    }

    /// Create a new backup executor with cancellation support.
    /// The token is checked between files; a copy in flight is finished first.
    pub fn with_cancel(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            progress_callback: None,
        }
    }

    /// Report progress after every examined file of the next run
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&BackupProgress) + Send + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Execute a backup of every registered, non-ignored source
    pub fn run_backup(&mut self, config: &Configuration) -> Result<BackupReport> {
        let destination = config.destination();
        let mut report = BackupReport::new(destination.to_path_buf());

        info!("Starting backup to {}", destination.display());
        prepare_destination(destination)?;

        let total_files = count_files(config);
        let mut progress = ProgressTracker::new(total_files);
        if let Some(callback) = self.progress_callback.take() {
            progress = progress.with_callback(callback);
        }
        info!("{} files to examine", total_files);

        let mut sync = Synchronizer::new(config.ignored())
            .with_cancel(self.cancel_token.clone())
            .with_progress(progress)
            .guard(destination);

        for (path, _) in config.sources().iter() {
            if config.ignored().contains(path) {
                info!("Source is ignored: {}", path.display());
                report.ignored_sources.push(path.to_path_buf());
                continue;
            }

            if self.cancel_token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let Some(mode) = classify(path, config.sources()) else {
                continue;
            };
            let target = target_path(path, mode, destination);
            let mut outcome = SyncOutcome::default();

            let status = if !path.exists() {
                let missing = BackupError::MissingSource(path.to_path_buf());
                warn!("{}", missing);
                SourceStatus::Missing
            } else {
                info!("Moving to next source: {} ({})", path.display(), mode);

                match sync_source(&mut sync, path, mode, &target, &mut outcome) {
                    Ok(()) => SourceStatus::Completed,
                    Err(BackupError::Cancelled) => {
                        report.cancelled = true;
                        SourceStatus::Cancelled
                    }
                    Err(e) => {
                        warn!("Source {} failed: {}", path.display(), e);
                        SourceStatus::Failed {
                            kind: e.kind(),
                            reason: e.to_string(),
                        }
                    }
                }
            };

            report.sources.push(SourceReport {
                path: path.to_path_buf(),
                mode,
                target,
                status,
                outcome,
            });

            if report.cancelled {
                break;
            }
        }

        report.finished_at = Local::now();
        let summary = report.summary();

        if report.cancelled {
            warn!(
                "Backup cancelled: {} of {} files examined",
                sync.progress().progress().files_processed,
                total_files
            );
        } else {
            info!(
                "Backup done: {} copied, {} unchanged, {} renamed, {} failed, {} sources missing, {}s",
                summary.copied,
                summary.skipped,
                summary.renamed,
                summary.failed_files + summary.failed_sources,
                summary.missing_sources,
                report.duration_secs()
            );
        }

        Ok(report)
    }
}

impl Default for BackupExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a backup without cancellation or progress reporting
pub fn run_backup(config: &Configuration) -> Result<BackupReport> {
    BackupExecutor::new().run_backup(config)
}

/// Number of files a backup of `config` would examine.
///
/// Walks with the same filter the synchronizer applies: ignore set,
/// destination guard and the source's own target tree.
pub fn count_files(config: &Configuration) -> usize {
    let destination = config.destination();
    let filter = EntryFilter::new(config.ignored()).guard(destination);

    config
        .active_sources()
        .filter(|(path, _)| path.exists())
        .map(|(path, mode)| {
            let target = target_path(path, mode, destination);
            walker::count_files(path, mode, &filter.clone().with_target(&target))
        })
        .sum()
}

/// Dispatch one source to the synchronizer matching its mode
fn sync_source(
    sync: &mut Synchronizer<'_>,
    path: &Path,
    mode: SourceMode,
    target: &Path,
    outcome: &mut SyncOutcome,
) -> Result<()> {
    match mode {
        SourceMode::File => {
            if let Some(parent) = target.parent() {
                ensure_directory(parent)?;
            }
            let action = sync.copy_file(path, target)?;
            outcome.files.push(FileRecord {
                source: path.to_path_buf(),
                destination: target.to_path_buf(),
                action,
            });
            Ok(())
        }
        SourceMode::Directory => sync.sync_flat(path, target, outcome),
        SourceMode::RecursiveDirectory => sync.sync_recursive(path, target, outcome),
    }
}

/// Make sure the destination exists and accepts writes; anything else aborts the run
fn prepare_destination(destination: &Path) -> Result<()> {
    let invalid = |reason: String| BackupError::InvalidDestination {
        path: destination.to_path_buf(),
        reason,
    };

    ensure_directory(destination).map_err(|e| invalid(e.to_string()))?;

    let probe = destination.join(format!(".backuper-probe-{}", std::process::id()));
    fs::write(&probe, b"").map_err(|e| invalid(format!("not writable: {e}")))?;
    fs::remove_file(&probe).map_err(|e| invalid(format!("cannot clean up write probe: {e}")))?;

    Ok(())
}
