//! Backup report: what happened to every source and every file of a run.

use crate::config::SourceMode;
use crate::sync::SyncOutcome;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;

/// Final state of one source after a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    /// Every entry was examined; individual file failures are in the outcome
    Completed,
    /// The source path did not exist when the run reached it
    Missing,
    /// The source could not be processed at all
    Failed { kind: &'static str, reason: String },
    /// The run was cancelled while this source was in progress
    Cancelled,
}

/// Per-source section of the report
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub path: PathBuf,
    pub mode: SourceMode,
    pub target: PathBuf,
    pub status: SourceStatus,
    pub outcome: SyncOutcome,
}

/// Aggregate counters over a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub sources: usize,
    pub missing_sources: usize,
    pub failed_sources: usize,
    pub copied: usize,
    pub skipped: usize,
    pub renamed: usize,
    pub failed_files: usize,
}

/// Backup execution result
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub destination: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub sources: Vec<SourceReport>,
    /// Registered sources skipped because they are in the ignore set
    pub ignored_sources: Vec<PathBuf>,
    pub cancelled: bool,
}

impl BackupReport {
    pub fn new(destination: PathBuf) -> Self {
        let now = Local::now();
        Self {
            destination,
            started_at: now,
            finished_at: now,
            sources: Vec::new(),
            ignored_sources: Vec::new(),
            cancelled: false,
        }
    }

    pub fn summary(&self) -> ReportSummary {
        self.sources.iter().fold(ReportSummary::default(), |mut summary, source| {
            summary.sources += 1;
            match source.status {
                SourceStatus::Missing => summary.missing_sources += 1,
                SourceStatus::Failed { .. } => summary.failed_sources += 1,
                SourceStatus::Completed | SourceStatus::Cancelled => {}
            }
            summary.copied += source.outcome.copied();
            summary.skipped += source.outcome.skipped();
            summary.renamed += source.outcome.renamed();
            summary.failed_files += source.outcome.failures.len();
            summary
        })
    }

    /// Whether the run finished with nothing for the user to review
    pub fn is_clean(&self) -> bool {
        let summary = self.summary();
        !self.cancelled
            && summary.missing_sources == 0
            && summary.failed_sources == 0
            && summary.renamed == 0
            && summary.failed_files == 0
    }

    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    pub fn source(&self, path: &std::path::Path) -> Option<&SourceReport> {
        self.sources.iter().find(|source| source.path == path)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Failure, FileAction, FileRecord};
    use crate::utils::BackupError;

    fn record(name: &str, action: FileAction) -> FileRecord {
        FileRecord {
            source: PathBuf::from("/src").join(name),
            destination: PathBuf::from("/dest").join(name),
            action,
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut report = BackupReport::new(PathBuf::from("/dest"));

        let mut outcome = SyncOutcome::default();
        outcome.files.push(record("a", FileAction::Copied));
        outcome.files.push(record("b", FileAction::Skipped));
        outcome.files.push(record(
            "c",
            FileAction::RenamedAndCopied {
                renamed_to: PathBuf::from("/dest/c_newer_2023-01-01_00-00"),
            },
        ));
        outcome.failures.push(Failure::new(
            std::path::Path::new("/src/d"),
            &BackupError::NotAFile(PathBuf::from("/src/d")),
        ));

        report.sources.push(SourceReport {
            path: PathBuf::from("/src"),
            mode: SourceMode::Directory,
            target: PathBuf::from("/dest/src"),
            status: SourceStatus::Completed,
            outcome,
        });
        report.sources.push(SourceReport {
            path: PathBuf::from("/gone"),
            mode: SourceMode::RecursiveDirectory,
            target: PathBuf::from("/dest/gone"),
            status: SourceStatus::Missing,
            outcome: SyncOutcome::default(),
        });

        let summary = report.summary();
        assert_eq!(summary.sources, 2);
        assert_eq!(summary.missing_sources, 1);
        assert_eq!(summary.copied, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.renamed, 1);
        assert_eq!(summary.failed_files, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_json_shape() {
        let mut report = BackupReport::new(PathBuf::from("/dest"));
        let mut outcome = SyncOutcome::default();
        outcome.files.push(record("a", FileAction::Copied));
        report.sources.push(SourceReport {
            path: PathBuf::from("/src"),
            mode: SourceMode::File,
            target: PathBuf::from("/dest/x/src"),
            status: SourceStatus::Completed,
            outcome,
        });

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let source = &json["sources"][0];

        assert_eq!(source["mode"], "f");
        assert_eq!(source["status"]["status"], "completed");
        assert_eq!(source["outcome"]["files"][0]["action"], "copied");
        assert!(report.is_clean());
    }
}
