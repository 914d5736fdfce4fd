//! Filesystem helpers: path resolution, metadata-preserving copies and tree walking.

pub mod metadata;
pub mod paths;
pub mod walker;
