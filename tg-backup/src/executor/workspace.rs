//! Per-run staging directory.

use crate::archive::archive_path_for;
use crate::utils::errors::BackupError;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Timestamp format of workspace directory names
const NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// How many suffixed names to try when the timestamp is already taken
const MAX_NAME_ATTEMPTS: u32 = 100;

/// A freshly created directory under the dump root, plus the sibling path
/// its archive will be written to. Both are removed by `close`, or on drop
/// as a last resort.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    archive: PathBuf,
    closed: bool,
}

impl Workspace {
    /// Create `<dump_dir>/<local timestamp>`. The dump root itself is
    /// created when missing.
    pub async fn create(dump_dir: &Path) -> Result<Self, BackupError> {
        tokio::fs::create_dir_all(dump_dir)
            .await
            .map_err(|source| BackupError::Workspace {
                path: dump_dir.to_path_buf(),
                source,
            })?;

        let stamp = chrono::Local::now().format(NAME_FORMAT).to_string();
        let mut attempt = 0;
        loop {
            let name = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{stamp}_{attempt}")
            };
            let dir = dump_dir.join(name);

            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    let archive = archive_path_for(&dir)?;
                    debug!(workspace = %dir.display(), "Workspace created");
                    return Ok(Self {
                        dir,
                        archive,
                        closed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                    attempt += 1;
                }
                Err(source) => return Err(BackupError::Workspace { path: dir, source }),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Where the archive of this workspace lives once built
    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Remove the archive (if it was built) and the workspace directory.
    /// Both removals are always attempted; the first failure is returned.
    pub async fn close(mut self) -> Result<(), BackupError> {
        self.closed = true;

        let archive = match tokio::fs::remove_file(&self.archive).await {
            Ok(()) => {
                debug!(archive = %self.archive.display(), "Archive removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BackupError::Workspace {
                path: self.archive.clone(),
                source,
            }),
        };

        let dir = match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!(workspace = %self.dir.display(), "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BackupError::Workspace {
                path: self.dir.clone(),
                source,
            }),
        };

        match (archive, dir) {
            (Err(first), Err(second)) => {
                warn!(error = %second, "Workspace removal also failed");
                Err(first)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(workspace = %self.dir.display(), "Workspace dropped without cleanup, removing");
        let _ = std::fs::remove_file(&self.archive);
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(workspace = %self.dir.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}
