//! Filesystem helpers: traversal and staging copies.

pub mod copy;
pub mod walker;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// An I/O failure tied to the path it happened on.
#[derive(Error, Debug)]
#[error("{}: {source}", .path.display())]
pub struct FsError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl FsError {
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    fn from_walk(err: walkdir::Error, root: &Path) -> Self {
        let path = err.path().unwrap_or(root).to_path_buf();
        Self::new(path, err.into())
    }
}
