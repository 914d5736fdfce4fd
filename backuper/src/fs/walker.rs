//! Directory traversal honoring the ignore set and the backup destination.
//!
//! [`EntryFilter`] decides which entries a walk may visit. The synchronizer
//! and [`count_files`] share it, so a run examines exactly the files that were
//! counted for it.

use crate::config::{IgnoreSet, SourceMode};
use crate::fs::paths::{is_within, resolve_path};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: true,
            max_depth: None,
        }
    }
}

impl WalkOptions {
    /// Walk options matching how a source of `mode` is synchronized
    pub fn for_mode(mode: SourceMode) -> Self {
        match mode {
            SourceMode::File => Self {
                max_depth: Some(0),
                ..Self::default()
            },
            SourceMode::Directory => Self {
                max_depth: Some(1),
                ..Self::default()
            },
            SourceMode::RecursiveDirectory => Self::default(),
        }
    }
}

/// Why an entry was left out of a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// The path is in the ignore set
    Ignored,
    /// The directory is the backup destination
    Destination,
    /// The directory lies inside the tree the current source is written to
    Target,
}

impl Exclusion {
    pub fn reason(self) -> &'static str {
        match self {
            Exclusion::Ignored => "ignored",
            Exclusion::Destination => "backup destination",
            Exclusion::Target => "backup target of this source",
        }
    }
}

/// Entry filter shared by every walk over a source
#[derive(Debug, Clone)]
pub struct EntryFilter<'a> {
    ignored: &'a IgnoreSet,
    /// Canonical directories never entered
    guarded: Vec<PathBuf>,
    /// Canonical root of the tree being written; nothing inside it is entered
    target: Option<PathBuf>,
}

impl<'a> EntryFilter<'a> {
    pub fn new(ignored: &'a IgnoreSet) -> Self {
        Self {
            ignored,
            guarded: Vec::new(),
            target: None,
        }
    }

    /// Never enter `dir`; used for the backup destination
    pub fn guard(mut self, dir: &Path) -> Self {
        self.guarded.push(canonical(dir));
        self
    }

    /// Never enter `target` or anything beneath it
    pub fn with_target(mut self, target: &Path) -> Self {
        self.target = Some(canonical(target));
        self
    }

    /// The reason `entry` must not be visited, if any. The walk root is always admitted.
    pub fn exclusion(&self, entry: &DirEntry) -> Option<Exclusion> {
        if entry.depth() == 0 {
            return None;
        }
        if self.ignored.is_ignored(entry.path()) {
            return Some(Exclusion::Ignored);
        }
        if !entry.file_type().is_dir() || (self.guarded.is_empty() && self.target.is_none()) {
            return None;
        }

        let Ok(dir) = fs::canonicalize(entry.path()) else {
            return None;
        };
        if self.guarded.contains(&dir) {
            return Some(Exclusion::Destination);
        }
        if self.target.as_deref().is_some_and(|target| is_within(&dir, target)) {
            return Some(Exclusion::Target);
        }
        None
    }
}

fn canonical(dir: &Path) -> PathBuf {
    resolve_path(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// Walk a directory tree with a callback for each admitted file.
///
/// Excluded directories are pruned, so nothing beneath them is visited.
/// Unreadable entries and symlink loops are logged and skipped.
pub fn walk_files_with_callback<F>(
    root: &Path,
    filter: &EntryFilter<'_>,
    options: WalkOptions,
    mut callback: F,
) where
    F: FnMut(&DirEntry),
{
    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let entries = walker
        .into_iter()
        .filter_entry(|entry| filter.exclusion(entry).is_none());

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping entry while counting: {}", e);
                continue;
            }
        };

        if entry.file_type().is_file() {
            callback(&entry);
        }
    }
}

/// Count the files a source of `mode` rooted at `root` would examine
pub fn count_files(root: &Path, mode: SourceMode, filter: &EntryFilter<'_>) -> usize {
    let mut count = 0;

    walk_files_with_callback(root, filter, WalkOptions::for_mode(mode), |_| {
        count += 1;
    });

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_count_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let ignored = IgnoreSet::default();
        let count = count_files(temp_dir.path(), SourceMode::RecursiveDirectory, &EntryFilter::new(&ignored));
        assert_eq!(count, 0);
        Ok(())
    }

    #[test]
    fn test_count_by_mode() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;

        let ignored = IgnoreSet::default();
        let filter = EntryFilter::new(&ignored);
        assert_eq!(count_files(temp_dir.path(), SourceMode::Directory, &filter), 1);
        assert_eq!(count_files(temp_dir.path(), SourceMode::RecursiveDirectory, &filter), 2);
        assert_eq!(
            count_files(&temp_dir.path().join("file1.txt"), SourceMode::File, &filter),
            1
        );

        Ok(())
    }

    #[test]
    fn test_count_skips_ignored_paths() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = fs::canonicalize(temp_dir.path())?;

        fs::create_dir_all(root.join("keep"))?;
        fs::create_dir_all(root.join("cache/deep"))?;
        fs::write(root.join("keep/a.txt"), b"a")?;
        fs::write(root.join("keep/b.log"), b"b")?;
        fs::write(root.join("cache/c.txt"), b"c")?;
        fs::write(root.join("cache/deep/d.txt"), b"d")?;

        let mut ignored = IgnoreSet::default();
        ignored.insert(root.join("cache"));
        ignored.insert(root.join("keep/b.log"));

        assert_eq!(
            count_files(&root, SourceMode::RecursiveDirectory, &EntryFilter::new(&ignored)),
            1
        );

        Ok(())
    }

    #[test]
    fn test_count_skips_destination_and_target() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let home = fs::canonicalize(temp_dir.path())?.join("home");

        fs::create_dir_all(home.join("backup/home"))?;
        fs::create_dir_all(home.join("mirror"))?;
        fs::write(home.join("a.txt"), b"a")?;
        fs::write(home.join("backup/home/a.txt"), b"a")?;
        fs::write(home.join("mirror/m.txt"), b"m")?;

        let ignored = IgnoreSet::default();
        let guarded = EntryFilter::new(&ignored).guard(&home.join("backup"));
        assert_eq!(count_files(&home, SourceMode::RecursiveDirectory, &guarded), 2);

        let targeted = EntryFilter::new(&ignored).with_target(&home.join("mirror"));
        assert_eq!(count_files(&home, SourceMode::RecursiveDirectory, &targeted), 2);

        Ok(())
    }
}
