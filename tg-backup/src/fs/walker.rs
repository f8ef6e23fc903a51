//! Directory traversal for staging and archiving.
//!
//! Entries are yielded depth-first in directory listing order. The order is
//! stable for a given filesystem state but is not sorted.

use super::FsError;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Also yield directories (the root itself is never yielded)
    pub include_dirs: bool,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Is this a directory?
    pub is_dir: bool,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Symlinks are resolved to their target. Returns None for symlinked
    /// directories, broken symlinks and anything that is neither a regular
    /// file nor a directory (FIFOs, sockets, devices).
    fn from_entry(entry: &DirEntry, root: &Path) -> Result<Option<Self>, FsError> {
        let path = entry.path().to_path_buf();
        let raw_metadata = entry.metadata().map_err(|e| FsError::from_walk(e, root))?;
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        let is_dir = if raw_metadata.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => false,
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "Skipping symlink to special file");
                    return Ok(None);
                }
                Err(_) => {
                    tracing::warn!(path = %path.display(), "Skipping broken symlink");
                    return Ok(None);
                }
            }
        } else if raw_metadata.is_dir() {
            true
        } else if raw_metadata.is_file() {
            false
        } else {
            tracing::warn!(path = %path.display(), "Skipping special file");
            return Ok(None);
        };

        Ok(Some(Self {
            path,
            relative_path,
            is_dir,
        }))
    }
}

/// Walk a directory tree and collect its entries.
///
/// The first unreadable entry aborts the walk with its path attached.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> Result<Vec<FileInfo>, FsError> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root).min_depth(1);

    for entry in walker {
        let entry = entry.map_err(|e| FsError::from_walk(e, root))?;

        if entry.file_type().is_dir() && !options.include_dirs {
            continue;
        }

        if let Some(info) = FileInfo::from_entry(&entry, root)? {
            entries.push(info);
        }
    }

    Ok(entries)
}
