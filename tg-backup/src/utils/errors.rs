//! Error types for the backup pipeline.
//!
//! Each stage has its own error type; `BackupError` aggregates them for a
//! whole run and is what the binary finally reports.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while producing a database dump.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Failed to list columns of table {table}: {source}")]
    SchemaIntrospection {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to prepare temporary table {table}_temp: {source}")]
    TempTablePreparation {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Cannot write dump to {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pg_dump failed ({reason}): {output}")]
    DumpTool { reason: String, output: String },
}

/// Failure while building the archive. The partially written archive is
/// invalid and must not be uploaded.
#[derive(Error, Debug)]
#[error("Failed to archive {}: {source}", .path.display())]
pub struct ArchiveError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Failure while delivering the archive.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upload rejected with status {status}: {body}")]
    RemoteRejection { status: u16, body: String },
}

/// Terminal error of a backup run.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Dump of database {database} failed: {source}")]
    Dump {
        database: String,
        #[source]
        source: DumpError,
    },

    #[error("Failed to copy {}: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("Workspace error at {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{primary} (cleanup also failed: {cleanup})")]
    Cleanup {
        primary: Box<BackupError>,
        cleanup: Box<BackupError>,
    },
}

impl BackupError {
    /// Name of the pipeline stage that produced the error.
    pub fn stage(&self) -> &'static str {
        match self {
            BackupError::Dump { .. } => "dump",
            BackupError::Copy { .. } => "copy",
            BackupError::Archive(_) => "archive",
            BackupError::Upload(_) => "upload",
            BackupError::Workspace { .. } => "workspace",
            BackupError::Cleanup { primary, .. } => primary.stage(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_cleanup_error_reports_both_failures() {
        let primary = BackupError::Dump {
            database: "shop@db:5432".to_string(),
            source: DumpError::DumpTool {
                reason: "exit status: 1".to_string(),
                output: "connection refused".to_string(),
            },
        };
        let cleanup = BackupError::Workspace {
            path: PathBuf::from("/tmp/ws"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let err = BackupError::Cleanup {
            primary: Box::new(primary),
            cleanup: Box::new(cleanup),
        };

        let text = err.to_string();
        assert!(text.contains("shop@db:5432"));
        assert!(text.contains("connection refused"));
        assert!(text.contains("/tmp/ws"));
        assert_eq!(err.stage(), "dump");
    }

    #[test]
    fn test_remote_rejection_keeps_body() {
        let err = BackupError::from(UploadError::RemoteRejection {
            status: 400,
            body: "{\"ok\":false}".to_string(),
        });
        assert_eq!(err.stage(), "upload");
        assert!(err.to_string().ends_with("{\"ok\":false}"));
    }
}
