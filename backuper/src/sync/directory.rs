//! Flat and recursive directory synchronization.

use super::{SkippedDirectory, SyncOutcome, Synchronizer};
use crate::fs::walker::Exclusion;
use crate::utils::{BackupError, IoResultExt, Result};
use std::cmp::Ordering;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

impl Synchronizer<'_> {
    /// Synchronize the files directly inside `src_dir` into `dest_dir`.
    ///
    /// Subdirectories are not descended into. Errors returned here are fatal
    /// for the whole directory (it is not a directory, the destination is
    /// occupied by a file, it cannot be listed, or the run was cancelled);
    /// per-file failures are recorded in `outcome` instead.
    pub fn sync_flat(&mut self, src_dir: &Path, dest_dir: &Path, outcome: &mut SyncOutcome) -> Result<()> {
        self.sync_tree(src_dir, dest_dir, Some(1), outcome)
    }

    /// Synchronize the whole tree under `src_dir` into `dest_dir`.
    ///
    /// The ignore set is consulted at every depth. A subdirectory that fails
    /// is recorded and skipped while its siblings continue. Neither the
    /// destination nor `dest_dir` itself is ever walked, even when they lie
    /// inside `src_dir`.
    pub fn sync_recursive(&mut self, src_dir: &Path, dest_dir: &Path, outcome: &mut SyncOutcome) -> Result<()> {
        self.sync_tree(src_dir, dest_dir, None, outcome)
    }

    fn sync_tree(
        &mut self,
        src_dir: &Path,
        dest_dir: &Path,
        max_depth: Option<usize>,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        self.check_cancelled()?;

        let metadata = fs::metadata(src_dir).at_path(src_dir)?;
        if !metadata.is_dir() {
            return Err(BackupError::NotADirectory(src_dir.to_path_buf()));
        }

        info!("Synchronizing directory: {}", src_dir.display());
        ensure_directory(dest_dir)?;

        let filter = self.filter().clone().with_target(dest_dir);
        let mut excluded: Vec<(PathBuf, Exclusion)> = Vec::new();

        let mut walker = WalkDir::new(src_dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by(files_first);
        if let Some(max_depth) = max_depth {
            walker = walker.max_depth(max_depth);
        }

        let mut entries = walker.into_iter().filter_entry(|entry| match filter.exclusion(entry) {
            Some(exclusion) => {
                excluded.push((entry.path().to_path_buf(), exclusion));
                false
            }
            None => true,
        });

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    record_walk_error(src_dir, e, outcome)?;
                    continue;
                }
            };

            let Ok(relative) = entry.path().strip_prefix(src_dir) else {
                continue;
            };
            let target = dest_dir.join(relative);
            let file_type = entry.file_type();

            if file_type.is_file() {
                self.record_file(entry.path(), &target, outcome)?;
            } else if file_type.is_dir() {
                if max_depth.is_some_and(|max_depth| entry.depth() >= max_depth) {
                    continue;
                }
                self.check_cancelled()?;
                debug!("Synchronizing directory: {}", entry.path().display());
                if let Err(e) = ensure_directory(&target) {
                    outcome.record_failure(entry.path(), &e);
                    entries.skip_current_dir();
                }
            } else {
                let path = entry.path().to_path_buf();
                outcome.record_failure(&path, &BackupError::NotAFile(path.clone()));
            }
        }
        drop(entries);

        for (path, exclusion) in excluded {
            match exclusion {
                Exclusion::Ignored => {
                    debug!("Ignored: {}", path.display());
                    outcome.ignored.push(path);
                }
                Exclusion::Destination | Exclusion::Target => {
                    warn!("Not descending into {}: {}", exclusion.reason(), path.display());
                    outcome.skipped_dirs.push(SkippedDirectory {
                        path,
                        reason: exclusion.reason().to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Files before directories, each group by name
fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Loops become skipped directories, an unreadable source root is fatal,
/// anything else is a per-entry failure
fn record_walk_error(src_dir: &Path, error: walkdir::Error, outcome: &mut SyncOutcome) -> Result<()> {
    let path = error.path().unwrap_or(src_dir).to_path_buf();

    if error.loop_ancestor().is_some() {
        warn!("Directory already visited, skipping: {}", path.display());
        outcome.skipped_dirs.push(SkippedDirectory {
            path,
            reason: "already visited (symlink loop)".to_string(),
        });
        return Ok(());
    }

    let depth = error.depth();
    let failure = BackupError::io(&path, io::Error::from(error));
    if depth == 0 {
        return Err(failure);
    }
    outcome.record_failure(&path, &failure);
    Ok(())
}

/// Create `dir` if absent; a non-directory already occupying it is a conflict
pub fn ensure_directory(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(BackupError::DestinationConflict(dir.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(dir).at_path(dir)?;
            debug!("Dir created: {}", dir.display());
            Ok(())
        }
        Err(e) => Err(BackupError::io(dir, e)),
    }
}
