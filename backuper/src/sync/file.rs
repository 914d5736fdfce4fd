//! Single-file synchronization.
//!
//! Decision rule for a (source, destination) pair, by modification time only:
//!
//! | destination          | action                                         |
//! |----------------------|------------------------------------------------|
//! | missing              | copy                                           |
//! | older than source    | overwrite                                      |
//! | newer than source    | rename destination aside, then copy            |
//! | same mtime           | leave it be                                    |
//!
//! No content is hashed: two files with the same mtime are considered equal
//! even when their bytes differ.

use crate::fs::metadata::{copy_with_metadata, FileMetadata};
use crate::utils::{BackupError, IoResultExt, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::cmp::Ordering;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Outcome of synchronizing one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction {
    /// Destination was missing or older and now matches the source
    Copied,
    /// Destination already had the source's mtime
    Skipped,
    /// Destination was newer; it was moved to `renamed_to` before copying
    RenamedAndCopied { renamed_to: PathBuf },
}

/// Bring `dest` up to date with `src`
pub fn sync_file(src: &Path, dest: &Path) -> Result<FileAction> {
    let src_meta = FileMetadata::from_path(src).at_path(src)?;
    if !src_meta.is_file {
        return Err(BackupError::NotAFile(src.to_path_buf()));
    }

    let dest_meta = match FileMetadata::from_path(dest) {
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(BackupError::io(dest, e)),
    };

    let Some(dest_meta) = dest_meta else {
        copy(src, dest)?;
        debug!("Copied file: {}", src.display());
        return Ok(FileAction::Copied);
    };

    if dest_meta.is_dir {
        return Err(BackupError::DestinationConflict(dest.to_path_buf()));
    }

    match src_meta.modified.cmp(&dest_meta.modified) {
        Ordering::Greater => {
            copy(src, dest)?;
            debug!("Updated file: {}", src.display());
            Ok(FileAction::Copied)
        }
        Ordering::Less => {
            let renamed_to = free_newer_path(dest, dest_meta.modified);
            fs::rename(dest, &renamed_to).at_path(dest)?;
            copy(src, dest)?;
            warn!(
                "Newer file version found in backup directory: {}; newer file renamed to {}",
                src.display(),
                renamed_to.display()
            );
            Ok(FileAction::RenamedAndCopied { renamed_to })
        }
        Ordering::Equal => {
            debug!("File didn't change: {}", src.display());
            Ok(FileAction::Skipped)
        }
    }
}

/// Copy with errors attributed to the path that caused them
fn copy(src: &Path, dest: &Path) -> Result<()> {
    // Opening first separates "cannot read source" from "cannot write destination"
    drop(fs::File::open(src).at_path(src)?);

    copy_with_metadata(src, dest).map(|_| ()).map_err(|e| {
        let offending = if src.exists() { dest } else { src };
        BackupError::io(offending, e)
    })
}

/// The `_newer_<mtime>` name for `dest`, with `attempt` > 0 adding a counter.
///
/// The suffix goes before the last extension: `data.csv` becomes
/// `data_newer_2023-01-01_00-00.csv`; a name without extension gets it appended.
pub fn newer_path(dest: &Path, modified: SystemTime, attempt: u32) -> PathBuf {
    let timestamp = DateTime::<Local>::from(modified).format("_newer_%Y-%m-%d_%H-%M");

    let mut name = OsString::new();
    if let Some(stem) = dest.file_stem() {
        name.push(stem);
    }
    name.push(timestamp.to_string());
    if attempt > 0 {
        name.push(format!("_{attempt}"));
    }
    if let Some(extension) = dest.extension() {
        name.push(".");
        name.push(extension);
    }

    dest.with_file_name(name)
}

/// First `_newer_` name next to `dest` that nothing occupies yet
fn free_newer_path(dest: &Path, modified: SystemTime) -> PathBuf {
    let mut attempt = 0;
    loop {
        let candidate = newer_path(dest, modified, attempt);
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, mtime: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> SystemTime {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap().into()
    }

    #[test]
    fn test_copies_when_destination_missing() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("dest.txt");
        fs::write(&src, b"fresh").unwrap();
        set_mtime(&src, local(2022, 5, 1, 12, 0));

        assert_eq!(sync_file(&src, &dest)?, FileAction::Copied);
        assert_eq!(fs::read(&dest).unwrap(), b"fresh");
        assert_eq!(
            fs::metadata(&dest).unwrap().modified().unwrap(),
            local(2022, 5, 1, 12, 0)
        );

        Ok(())
    }

    #[test]
    fn test_overwrites_older_destination() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("dest.txt");
        fs::write(&src, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();
        set_mtime(&dest, local(2021, 1, 1, 0, 0));
        set_mtime(&src, local(2022, 1, 1, 0, 0));

        assert_eq!(sync_file(&src, &dest)?, FileAction::Copied);
        assert_eq!(fs::read(&dest).unwrap(), b"new");

        // Nothing was renamed aside
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 2);

        Ok(())
    }

    #[test]
    fn test_skips_equal_mtime() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("dest.txt");
        fs::write(&src, b"same").unwrap();

        assert_eq!(sync_file(&src, &dest)?, FileAction::Copied);
        assert_eq!(sync_file(&src, &dest)?, FileAction::Skipped);
        assert_eq!(fs::read(&dest).unwrap(), b"same");

        Ok(())
    }

    #[test]
    fn test_equal_mtime_with_different_content_is_not_detected() -> Result<()> {
        // mtime is the only change signal; differing bytes go unnoticed
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("dest.txt");
        fs::write(&src, b"edited content").unwrap();
        fs::write(&dest, b"original").unwrap();
        let mtime = local(2023, 3, 3, 3, 3);
        set_mtime(&src, mtime);
        set_mtime(&dest, mtime);

        assert_eq!(sync_file(&src, &dest)?, FileAction::Skipped);
        assert_eq!(fs::read(&dest).unwrap(), b"original");

        Ok(())
    }

    #[test]
    fn test_renames_newer_destination() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("data.csv");
        let dest_dir = temp_dir.path().join("backup");
        fs::create_dir(&dest_dir).unwrap();
        let dest = dest_dir.join("data.csv");

        fs::write(&src, b"source content").unwrap();
        fs::write(&dest, b"destination content").unwrap();
        set_mtime(&src, local(2022, 1, 1, 0, 0));
        set_mtime(&dest, local(2023, 1, 1, 0, 0));

        let action = sync_file(&src, &dest)?;

        let expected = dest_dir.join("data_newer_2023-01-01_00-00.csv");
        assert_eq!(
            action,
            FileAction::RenamedAndCopied {
                renamed_to: expected.clone()
            }
        );
        assert_eq!(fs::read(&expected).unwrap(), b"destination content");
        assert_eq!(fs::read(&dest).unwrap(), b"source content");

        Ok(())
    }

    #[test]
    fn test_rename_never_overwrites_previous_conflict() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("log.txt");
        let dest_mtime = local(2023, 1, 1, 0, 0);

        let taken = temp_dir.path().join("log_newer_2023-01-01_00-00.txt");
        fs::write(&taken, b"earlier conflict").unwrap();

        fs::write(&src, b"source").unwrap();
        fs::write(&dest, b"newer destination").unwrap();
        set_mtime(&src, local(2022, 1, 1, 0, 0));
        set_mtime(&dest, dest_mtime);

        let action = sync_file(&src, &dest)?;

        let renamed = temp_dir.path().join("log_newer_2023-01-01_00-00_1.txt");
        assert_eq!(action, FileAction::RenamedAndCopied { renamed_to: renamed.clone() });
        assert_eq!(fs::read(&taken).unwrap(), b"earlier conflict");
        assert_eq!(fs::read(&renamed).unwrap(), b"newer destination");
        assert_eq!(fs::read(&dest).unwrap(), b"source");

        Ok(())
    }

    #[test]
    fn test_newer_path_naming() {
        let mtime = local(2024, 7, 9, 8, 5);

        assert_eq!(
            newer_path(Path::new("/b/archive.tar.gz"), mtime, 0),
            PathBuf::from("/b/archive.tar_newer_2024-07-09_08-05.gz")
        );
        assert_eq!(
            newer_path(Path::new("/b/Makefile"), mtime, 0),
            PathBuf::from("/b/Makefile_newer_2024-07-09_08-05")
        );
        assert_eq!(
            newer_path(Path::new("/b/.bashrc"), mtime, 2),
            PathBuf::from("/b/.bashrc_newer_2024-07-09_08-05_2")
        );
    }

    #[test]
    fn test_missing_source_is_io_failure() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("vanished.txt");

        let err = sync_file(&src, &temp_dir.path().join("dest.txt")).unwrap_err();
        match err {
            BackupError::Io { path, .. } => assert_eq!(path, src),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_directory_source_is_rejected() {
        let temp_dir = TempDir::new().unwrap();

        let err = sync_file(temp_dir.path(), &temp_dir.path().join("dest")).unwrap_err();
        assert!(matches!(err, BackupError::NotAFile(_)));
    }

    #[test]
    fn test_directory_at_destination_is_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("occupied");
        fs::write(&src, b"x").unwrap();
        fs::create_dir(&dest).unwrap();

        let err = sync_file(&src, &dest).unwrap_err();
        assert!(matches!(err, BackupError::DestinationConflict(path) if path == dest));
    }

    #[test]
    fn test_missing_destination_parent_is_io_failure() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("no/such/dir/dest.txt");
        fs::write(&src, b"x").unwrap();
        set_mtime(&src, SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));

        let err = sync_file(&src, &dest).unwrap_err();
        match err {
            BackupError::Io { path, .. } => assert_eq!(path, dest),
            other => panic!("unexpected error: {other}"),
        }
    }
}
