//! Source classification and destination mapping.
//!
//! The mode of a source is whatever was declared when it was registered; the
//! filesystem is never consulted to infer it. A File registration that points
//! at a directory stays a File registration and is rejected by the file
//! synchronizer when the backup runs.

use crate::config::{SourceMode, Sources};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Directory name used for sources without a final path component (a filesystem root)
const ROOT_NAME: &str = "root";

/// Look up the registered mode of `path`
pub fn classify(path: &Path, sources: &Sources) -> Option<SourceMode> {
    sources.get(path)
}

/// Where a source of the given mode lands inside `destination`.
///
/// Single files are nested under their parent directory's name so that they
/// cannot collide with a directory source sharing their name; directories
/// land directly under the destination.
pub fn target_path(source: &Path, mode: SourceMode, destination: &Path) -> PathBuf {
    let name = source.file_name().unwrap_or(OsStr::new(ROOT_NAME));

    match mode {
        SourceMode::File => {
            let parent = source
                .parent()
                .and_then(Path::file_name)
                .unwrap_or(OsStr::new(ROOT_NAME));
            destination.join(parent).join(name)
        }
        SourceMode::Directory | SourceMode::RecursiveDirectory => destination.join(name),
    }
}
