//! File-level progress tracking for backup runs.
//!
//! The total is computed up front with [`crate::fs::walker::count_files`], then
//! every file the synchronizer examines (copied, skipped or failed) advances
//! the counter by one. Front-ends register a callback to drive a progress bar.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Snapshot of a running backup
#[derive(Debug, Clone, Default)]
pub struct BackupProgress {
    /// Files examined so far
    pub files_processed: usize,

    /// Files the run is expected to examine
    pub total_files: usize,

    /// Percentage complete (0-100)
    pub percent_complete: f64,

    /// File examined last
    pub current_file: Option<PathBuf>,

    /// Time since the run started
    pub elapsed: Duration,
}

impl BackupProgress {
    /// Check if every expected file has been examined
    pub fn is_complete(&self) -> bool {
        self.files_processed >= self.total_files
    }
}

type ProgressCallback = Box<dyn FnMut(&BackupProgress) + Send>;

/// Progress tracker invoking an optional callback after every file
pub struct ProgressTracker {
    start_time: Instant,
    progress: BackupProgress,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    pub fn new(total_files: usize) -> Self {
        Self {
            start_time: Instant::now(),
            progress: BackupProgress {
                total_files,
                ..BackupProgress::default()
            },
            callback: None,
        }
    }

    /// Call `callback` after every processed file
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&BackupProgress) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Record one examined file
    pub fn file_processed(&mut self, path: &Path) {
        self.progress.files_processed += 1;
        // The tree may have grown since it was counted
        if self.progress.files_processed > self.progress.total_files {
            self.progress.total_files = self.progress.files_processed;
        }
        self.progress.percent_complete = if self.progress.total_files > 0 {
            (self.progress.files_processed as f64 / self.progress.total_files as f64) * 100.0
        } else {
            100.0
        };
        self.progress.current_file = Some(path.to_path_buf());
        self.progress.elapsed = self.start_time.elapsed();

        if let Some(callback) = self.callback.as_mut() {
            callback(&self.progress);
        }
    }

    /// Get current progress
    pub fn progress(&self) -> &BackupProgress {
        &self.progress
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_progress_percent() {
        let mut tracker = ProgressTracker::new(4);

        tracker.file_processed(Path::new("/data/a"));
        assert_eq!(tracker.progress().files_processed, 1);
        assert_eq!(tracker.progress().percent_complete, 25.0);

        tracker.file_processed(Path::new("/data/b"));
        assert_eq!(tracker.progress().percent_complete, 50.0);
        assert_eq!(tracker.progress().current_file.as_deref(), Some(Path::new("/data/b")));
        assert!(!tracker.progress().is_complete());
    }

    #[test]
    fn test_total_grows_with_unexpected_files() {
        let mut tracker = ProgressTracker::new(1);

        tracker.file_processed(Path::new("/data/a"));
        tracker.file_processed(Path::new("/data/b"));

        assert_eq!(tracker.progress().total_files, 2);
        assert_eq!(tracker.progress().percent_complete, 100.0);
        assert!(tracker.progress().is_complete());
    }

    #[test]
    fn test_callback_invoked_per_file() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut tracker = ProgressTracker::new(2).with_callback(move |progress| {
            sink.lock().unwrap().push(progress.files_processed);
        });
        tracker.file_processed(Path::new("/data/a"));
        tracker.file_processed(Path::new("/data/b"));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
