//! Path resolution shared by registration and lookup.
//!
//! Every path stored in the configuration, and every path tested against the
//! ignore set, goes through [`resolve_path`] so that membership is a plain
//! equality check. The rule: make the path absolute against the current
//! directory, drop `.` and `..` lexically, then resolve symlinks for the
//! longest prefix that exists on disk. Paths that do not exist yet still
//! resolve, so sources can be registered before they are created.

use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolve `path` to its absolute, canonical form.
pub fn resolve_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let normalized = normalize_lexically(&absolute);

    let mut existing = normalized.as_path();
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for name in tail.iter().rev() {
                    resolved.push(name);
                }
                return Ok(resolved);
            }
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Ok(normalized),
            },
        }
    }
}

/// Remove `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                let at_root = matches!(
                    out.components().next_back(),
                    Some(Component::RootDir) | Some(Component::Prefix(_)) | None
                );
                if !at_root {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }

    out
}

/// Whether `path` equals `root` or lies somewhere beneath it.
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}
