//! File metadata handling for backup operations.
//!
//! Copies must carry the source's timestamps over to the destination: the
//! modification time is the only thing the synchronizer compares on the next
//! run.

use std::fs::{self, FileTimes};
use std::path::Path;
use std::time::SystemTime;

/// The subset of file metadata the synchronizer cares about
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time
    pub modified: SystemTime,

    /// Last access time, when the platform reports one
    pub accessed: Option<SystemTime>,

    /// Is this a directory?
    pub is_dir: bool,

    /// Is this a regular file?
    pub is_file: bool,
}

impl FileMetadata {
    /// Extract metadata from a path, following symlinks
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;

        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified()?,
            accessed: metadata.accessed().ok(),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
        })
    }

    /// Apply the timestamps of this metadata to another file
    pub fn apply_times(&self, path: &Path) -> std::io::Result<()> {
        let mut times = FileTimes::new().set_modified(self.modified);
        if let Some(accessed) = self.accessed {
            times = times.set_accessed(accessed);
        }

        // Unix only needs ownership to change timestamps; Windows wants a write handle.
        #[cfg(unix)]
        let file = fs::File::open(path)?;
        #[cfg(not(unix))]
        let file = fs::OpenOptions::new().write(true).open(path)?;

        file.set_times(times)
    }
}

/// Copy `src` over `dest`, preserving permissions and timestamps.
///
/// Returns the number of bytes copied. A read-only `dest` left behind by an
/// earlier copy of a read-only source is made writable first.
pub fn copy_with_metadata(src: &Path, dest: &Path) -> std::io::Result<u64> {
    let metadata = FileMetadata::from_path(src)?;

    if let Ok(existing) = fs::metadata(dest) {
        let mut permissions = existing.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(dest, permissions)?;
        }
    }

    // fs::copy carries the permission bits over
    let bytes = fs::copy(src, dest)?;
    metadata.apply_times(dest)?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_extract_metadata() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let metadata = FileMetadata::from_path(temp_file.path())?;

        assert_eq!(metadata.size, 12);
        assert!(metadata.is_file);
        assert!(!metadata.is_dir);
        assert!(metadata.modified > SystemTime::UNIX_EPOCH);

        Ok(())
    }

    #[test]
    fn test_copy_preserves_mtime() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("dest.txt");
        fs::write(&src, b"payload")?;

        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fs::File::options().write(true).open(&src)?.set_modified(mtime)?;

        let bytes = copy_with_metadata(&src, &dest)?;

        assert_eq!(bytes, 7);
        assert_eq!(fs::read(&dest)?, b"payload");
        assert_eq!(fs::metadata(&dest)?.modified()?, mtime);

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_copy_over_readonly_destination() -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let src = temp_dir.path().join("src.txt");
        let dest = temp_dir.path().join("dest.txt");
        fs::write(&src, b"new")?;
        fs::write(&dest, b"old")?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o444))?;

        copy_with_metadata(&src, &dest)?;

        assert_eq!(fs::read(&dest)?, b"new");
        Ok(())
    }
}
