//! Copies source files and directories into the run workspace.

use super::walker::{walk_directory, WalkOptions};
use super::FsError;
use std::fs;
use std::io;
use std::path::Path;

/// Totals for one copy operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub bytes: u64,
}

/// Copy a single regular file, keeping its permissions.
pub fn copy_file(from: &Path, to: &Path) -> Result<CopyStats, FsError> {
    let metadata = fs::metadata(from).map_err(|e| FsError::new(from, e))?;
    if !metadata.is_file() {
        // Reading a FIFO or a device would block or never end.
        return Err(FsError::new(
            from,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    let bytes = fs::copy(from, to).map_err(|e| FsError::new(from, e))?;
    Ok(CopyStats { files: 1, bytes })
}

/// Recursively copy `from` into `to`, creating `to` and every
/// subdirectory (empty ones included).
pub fn copy_dir(from: &Path, to: &Path) -> Result<CopyStats, FsError> {
    fs::create_dir_all(to).map_err(|e| FsError::new(to, e))?;

    let options = WalkOptions { include_dirs: true };

    let mut stats = CopyStats::default();
    for entry in walk_directory(from, &options)? {
        let dest = to.join(&entry.relative_path);
        if entry.is_dir {
            fs::create_dir_all(&dest).map_err(|e| FsError::new(&dest, e))?;
            continue;
        }
        let copied = copy_file(&entry.path, &dest)?;
        stats.files += copied.files;
        stats.bytes += copied.bytes;
    }

    Ok(stats)
}
