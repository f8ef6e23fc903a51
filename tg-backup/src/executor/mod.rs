//! Backup run executor - Orchestrates one backup run.
//!
//! Stages run strictly in order: database dumps, file copies, directory
//! copies, archive, upload. The first failure stops the run. Whatever
//! happened, the workspace and archive are removed before returning.

pub mod workspace;

use crate::archive::build_archive;
use crate::config::{DatabaseTarget, TelegramConfig};
use crate::dump::DatabaseDumper;
use crate::fs::copy::{copy_dir, copy_file, CopyStats};
use crate::fs::FsError;
use crate::transfer::progress::{format_bytes, format_duration};
use crate::transfer::TelegramUploader;
use crate::utils::errors::{ArchiveError, BackupError, DumpError};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use workspace::Workspace;

/// Everything one run needs. Immutable for the duration of the run.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub databases: Vec<DatabaseTarget>,
    pub files: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
    pub telegram: TelegramConfig,
    pub dump_dir: PathBuf,
}

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub archive_name: String,
    pub archive_bytes: u64,
    pub databases: usize,
    pub files: usize,
    pub directories: usize,
    pub copied_bytes: u64,
    pub elapsed: Duration,
}

/// Main backup executor
pub struct BackupExecutor<D> {
    dumper: D,
    compression_level: i32,
}

impl<D> BackupExecutor<D>
where
    D: DatabaseDumper,
{
    pub fn new(dumper: D) -> Self {
        Self {
            dumper,
            compression_level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Execute one backup run
    pub async fn execute(&self, job: &BackupJob) -> Result<BackupReport, BackupError> {
        let started = Instant::now();
        info!(
            databases = job.databases.len(),
            files = job.files.len(),
            directories = job.directories.len(),
            "Starting backup run"
        );

        let workspace = Workspace::create(&job.dump_dir).await?;
        let outcome = self.run_stages(job, &workspace, started).await;
        let cleanup = workspace.close().await;

        match (outcome, cleanup) {
            (Ok(report), Ok(())) => {
                info!(
                    archive = %report.archive_name,
                    size = %format_bytes(report.archive_bytes),
                    elapsed = %format_duration(report.elapsed.as_secs()),
                    "Backup run completed"
                );
                Ok(report)
            }
            (Ok(report), Err(cleanup)) => {
                warn!(error = %cleanup, "Backup delivered but cleanup failed");
                Ok(report)
            }
            (Err(primary), Ok(())) => {
                error!(stage = primary.stage(), error = %primary, "Backup run failed");
                Err(primary)
            }
            (Err(primary), Err(cleanup)) => {
                error!(
                    stage = primary.stage(),
                    error = %primary,
                    cleanup_error = %cleanup,
                    "Backup run failed and cleanup failed"
                );
                Err(BackupError::Cleanup {
                    primary: Box::new(primary),
                    cleanup: Box::new(cleanup),
                })
            }
        }
    }

    async fn run_stages(
        &self,
        job: &BackupJob,
        workspace: &Workspace,
        started: Instant,
    ) -> Result<BackupReport, BackupError> {
        for target in &job.databases {
            let dump_error = |source| BackupError::Dump {
                database: target.label(),
                source,
            };
            let output = dump_output(workspace.path(), &target.name)
                .await
                .map_err(dump_error)?;
            info!(database = %target.label(), "Dumping database");
            self.dumper.dump(target, &output).await.map_err(dump_error)?;
        }

        let mut copied = CopyStats::default();
        for file in &job.files {
            let stats = stage_copy(file, workspace.path(), copy_file).await?;
            copied.files += stats.files;
            copied.bytes += stats.bytes;
        }
        for dir in &job.directories {
            let stats = stage_copy(dir, workspace.path(), copy_dir).await?;
            copied.files += stats.files;
            copied.bytes += stats.bytes;
        }
        info!(
            files = copied.files,
            size = %format_bytes(copied.bytes),
            "Sources staged"
        );

        let source_dir = workspace.path().to_path_buf();
        let level = self.compression_level;
        let archive = tokio::task::spawn_blocking(move || build_archive(&source_dir, level))
            .await
            .map_err(|e| ArchiveError {
                path: workspace.archive_path().to_path_buf(),
                source: io::Error::other(e),
            })??;

        let archive_bytes = tokio::fs::metadata(&archive)
            .await
            .map_err(|source| ArchiveError {
                path: archive.clone(),
                source,
            })?
            .len();

        let uploader = TelegramUploader::new(&job.telegram)?;
        uploader.upload(&archive).await?;

        Ok(BackupReport {
            archive_name: archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| workspace.name()),
            archive_bytes,
            databases: job.databases.len(),
            files: job.files.len(),
            directories: job.directories.len(),
            copied_bytes: copied.bytes,
            elapsed: started.elapsed(),
        })
    }
}

/// `<workspace>/<name>.sql`. The name must be a single path component and
/// the file must not exist yet.
async fn dump_output(workspace: &Path, name: &str) -> Result<PathBuf, DumpError> {
    let file_name = format!("{name}.sql");
    let output = workspace.join(&file_name);
    let output_error = |kind, message: &str| DumpError::Output {
        path: output.clone(),
        source: io::Error::new(kind, message.to_string()),
    };

    if name.is_empty() || Path::new(&file_name).file_name() != Some(OsStr::new(&file_name)) {
        return Err(output_error(
            io::ErrorKind::InvalidInput,
            "database name is not a plain file name",
        ));
    }
    if tokio::fs::symlink_metadata(&output).await.is_ok() {
        return Err(output_error(
            io::ErrorKind::AlreadyExists,
            "a dump with this name is already staged",
        ));
    }
    Ok(output)
}

/// Copy `source` into the workspace under its base name on the blocking
/// pool. An existing entry of that name is never overwritten.
async fn stage_copy(
    source: &Path,
    workspace: &Path,
    copy: fn(&Path, &Path) -> Result<CopyStats, FsError>,
) -> Result<CopyStats, BackupError> {
    let copy_error = |source_err: io::Error| BackupError::Copy {
        path: source.to_path_buf(),
        source: source_err,
    };

    let name = source.file_name().ok_or_else(|| {
        copy_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path has no file name",
        ))
    })?;
    let dest = workspace.join(name);
    if tokio::fs::symlink_metadata(&dest).await.is_ok() {
        return Err(copy_error(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} is already staged", dest.display()),
        )));
    }

    info!(source = %source.display(), "Copying");
    let from = source.to_path_buf();
    tokio::task::spawn_blocking(move || copy(&from, &dest))
        .await
        .map_err(|e| copy_error(io::Error::other(e)))?
        .map_err(|e| BackupError::Copy {
            path: e.path,
            source: e.source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::archive_path_for;
    use crate::utils::errors::UploadError;
    use crate::utils::Secret;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes a small dump per database; fails for the database named in
    /// `fail_on`. With `block_archive` it also puts a directory where the
    /// archive goes, so removing the archive during cleanup fails.
    struct FakeDumper {
        fail_on: Option<String>,
        block_archive: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDumper {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                fail_on: fail_on.map(str::to_string),
                block_archive: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl DatabaseDumper for FakeDumper {
        async fn dump(&self, target: &DatabaseTarget, output: &Path) -> Result<(), DumpError> {
            self.calls.lock().unwrap().push(target.name.clone());
            if self.block_archive {
                let workspace = output.parent().unwrap();
                std::fs::create_dir(archive_path_for(workspace).unwrap()).unwrap();
            }
            if self.fail_on.as_deref() == Some(target.name.as_str()) {
                return Err(DumpError::DumpTool {
                    reason: "exit status: 1".to_string(),
                    output: "connection refused".to_string(),
                });
            }
            tokio::fs::write(output, format!("-- dump of {}\n", target.name))
                .await
                .unwrap();
            Ok(())
        }
    }

    fn target(name: &str) -> DatabaseTarget {
        DatabaseTarget {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: Secret::new("pw"),
            name: name.to_string(),
            schema: "public".to_string(),
            exclude: Vec::new(),
        }
    }

    fn job(temp: &TempDir, databases: &[&str]) -> BackupJob {
        BackupJob {
            databases: databases.iter().map(|n| target(n)).collect(),
            files: Vec::new(),
            directories: Vec::new(),
            telegram: TelegramConfig {
                token: Secret::new("1:x"),
                chat_id: "1".to_string(),
                // Nothing listens on the discard port.
                api_url: "http://127.0.0.1:9".to_string(),
                insecure_skip_verify: false,
                timeout_secs: 5,
            },
            dump_dir: temp.path().join("dumps"),
        }
    }

    fn dump_dir_is_empty(job: &BackupJob) -> bool {
        std::fs::read_dir(&job.dump_dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_dump_failure_stops_run_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let job = job(&temp, &["first", "second", "third"]);
        let executor = BackupExecutor::new(FakeDumper::new(Some("second")));

        let err = executor.execute(&job).await.unwrap_err();
        match &err {
            BackupError::Dump { database, .. } => assert!(database.starts_with("second@")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*executor.dumper.calls.lock().unwrap(), vec!["first", "second"]);
        assert!(dump_dir_is_empty(&job));
    }

    #[tokio::test]
    async fn test_missing_file_fails_copy_stage() {
        let temp = TempDir::new().unwrap();
        let mut job = job(&temp, &["shop"]);
        job.files.push(temp.path().join("missing.txt"));
        let executor = BackupExecutor::new(FakeDumper::new(None));

        let err = executor.execute(&job).await.unwrap_err();
        assert_eq!(err.stage(), "copy");
        assert!(dump_dir_is_empty(&job));
    }

    #[tokio::test]
    async fn test_duplicate_base_names_are_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("a")).unwrap();
        std::fs::create_dir_all(temp.path().join("b")).unwrap();
        std::fs::write(temp.path().join("a/notes.txt"), b"a").unwrap();
        std::fs::write(temp.path().join("b/notes.txt"), b"b").unwrap();

        let mut job = job(&temp, &[]);
        job.files.push(temp.path().join("a/notes.txt"));
        job.files.push(temp.path().join("b/notes.txt"));
        let executor = BackupExecutor::new(FakeDumper::new(None));

        let err = executor.execute(&job).await.unwrap_err();
        match err {
            BackupError::Copy { path, source } => {
                assert_eq!(path, temp.path().join("b/notes.txt"));
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeated_database_name_is_not_overwritten() {
        let temp = TempDir::new().unwrap();
        let job = job(&temp, &["shop", "shop"]);
        let executor = BackupExecutor::new(FakeDumper::new(None));

        let err = executor.execute(&job).await.unwrap_err();
        match err {
            BackupError::Dump {
                source: DumpError::Output { path, source },
                ..
            } => {
                assert!(path.ends_with("shop.sql"));
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*executor.dumper.calls.lock().unwrap(), vec!["shop"]);
        assert!(dump_dir_is_empty(&job));
    }

    #[tokio::test]
    async fn test_database_name_with_separator_is_rejected() {
        let temp = TempDir::new().unwrap();
        for name in ["../escape", "a/b", "shop/", ""] {
            let job = job(&temp, &[name]);
            let executor = BackupExecutor::new(FakeDumper::new(None));

            let err = executor.execute(&job).await.unwrap_err();
            match err {
                BackupError::Dump {
                    source: DumpError::Output { source, .. },
                    ..
                } => assert_eq!(source.kind(), io::ErrorKind::InvalidInput, "{name:?}"),
                other => panic!("unexpected error for {name:?}: {other:?}"),
            }
            assert!(executor.dumper.calls.lock().unwrap().is_empty());
        }
        assert!(!temp.path().join("escape.sql").exists());
        assert!(dump_dir_is_empty(&job(&temp, &[])));
    }

    #[tokio::test]
    async fn test_failed_run_with_failed_cleanup_reports_both() {
        let temp = TempDir::new().unwrap();
        let job = job(&temp, &["shop"]);
        let mut dumper = FakeDumper::new(Some("shop"));
        dumper.block_archive = true;
        let executor = BackupExecutor::new(dumper);

        let err = executor.execute(&job).await.unwrap_err();
        match &err {
            BackupError::Cleanup { primary, cleanup } => {
                assert_eq!(primary.stage(), "dump");
                assert!(matches!(**cleanup, BackupError::Workspace { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.stage(), "dump");

        // Only the blocking directory is left; the workspace itself is gone.
        let left: Vec<_> = std::fs::read_dir(&job.dump_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left.len(), 1);
        assert!(left[0].ends_with(".tar.zst"));
    }

    #[tokio::test]
    async fn test_unreachable_api_removes_archive() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("uploads");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("nested/a.bin"), vec![7u8; 2048]).unwrap();

        let mut job = job(&temp, &["shop"]);
        job.directories.push(source);
        let executor = BackupExecutor::new(FakeDumper::new(None)).with_compression_level(1);

        let err = executor.execute(&job).await.unwrap_err();
        assert!(matches!(err, BackupError::Upload(UploadError::Transport(_))));
        assert!(dump_dir_is_empty(&job));
    }
}
