//! `pg_dump` invocation.
//!
//! The password reaches the child through `PGPASSWORD` on that one
//! `Command`; it is never put on the argument list or into this process's
//! environment.

use super::catalog::quote_ident;
use crate::config::DatabaseTarget;
use crate::utils::errors::DumpError;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Produces a plain-SQL dump of a whole database minus some tables.
pub trait DumpTool: Send + Sync {
    fn dump(
        &self,
        target: &DatabaseTarget,
        excluded_tables: &[String],
        output: &Path,
    ) -> impl Future<Output = Result<(), DumpError>> + Send;
}

/// Runs the `pg_dump` executable.
#[derive(Debug, Clone)]
pub struct PgDumpTool {
    program: PathBuf,
}

impl PgDumpTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build the command without running it.
    pub fn command(&self, target: &DatabaseTarget, excluded_tables: &[String], output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-h")
            .arg(&target.host)
            .arg("-p")
            .arg(target.port.to_string())
            .arg("-U")
            .arg(&target.user)
            .arg("-F")
            .arg("p")
            .arg("-f")
            .arg(output);

        for table in excluded_tables {
            cmd.arg(format!(
                "--exclude-table={}.{}",
                quote_ident(&target.schema),
                quote_ident(table)
            ));
        }

        cmd.arg(&target.name)
            .env("PGPASSWORD", target.password.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl DumpTool for PgDumpTool {
    async fn dump(
        &self,
        target: &DatabaseTarget,
        excluded_tables: &[String],
        output: &Path,
    ) -> Result<(), DumpError> {
        info!(
            database = %target.label(),
            output = %output.display(),
            excluded_tables = ?excluded_tables,
            "Running pg_dump"
        );

        let result = self
            .command(target, excluded_tables, output)
            .output()
            .await
            .map_err(|e| DumpError::DumpTool {
                reason: format!("failed to start {}: {}", self.program.display(), e),
                output: String::new(),
            })?;

        let mut captured = String::from_utf8_lossy(&result.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&result.stderr));

        if !result.status.success() {
            return Err(DumpError::DumpTool {
                reason: result.status.to_string(),
                output: captured.trim().to_string(),
            });
        }

        if !captured.trim().is_empty() {
            debug!(database = %target.label(), output = %captured.trim(), "pg_dump output");
        }
        Ok(())
    }
}
