//! Configuration management for the backup runner.
//!
//! Loads configuration from a TOML file. Relative file and directory paths
//! are resolved against `workspace.source_root`.

use crate::executor::BackupJob;
use crate::scheduler::daily_cron;
use crate::utils::Secret;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Databases to dump, in order
    #[serde(default)]
    pub databases: Vec<DatabaseTarget>,

    /// Single files to include, relative to `workspace.source_root`
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Directories to include recursively, relative to `workspace.source_root`
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    pub telegram: TelegramConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub dump: DumpConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// One PostgreSQL database to dump.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseTarget {
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    pub user: String,

    pub password: Secret,

    /// Database name
    pub name: String,

    /// Schema holding the tables named in `exclude`
    #[serde(default = "default_schema")]
    pub schema: String,

    /// `table.column` pairs to leave out of the dump
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl DatabaseTarget {
    /// Identifies the target in logs and errors (never includes credentials).
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.name, self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token
    pub token: Secret,

    /// Destination chat: numeric id or `@channel`
    pub chat_id: String,

    /// Bot API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Skips TLS certificate validation. Never enable outside of testing.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Root under which per-run workspaces are created
    #[serde(default = "default_dump_dir")]
    pub dump_dir: PathBuf,

    /// Base directory for relative `files` and `directories` entries
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// zstd compression level
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DumpConfig {
    /// Path to the `pg_dump` executable
    #[serde(default = "default_pg_dump_path")]
    pub pg_dump_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Local time of the daily run, `HH:MM`
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output (stdout, stderr)
    #[serde(default)]
    pub output: LogOutput,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
}

// Default values
fn default_pg_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_dump_dir() -> PathBuf {
    PathBuf::from("./dumps")
}

fn default_source_root() -> PathBuf {
    PathBuf::from("./files")
}

fn default_compression_level() -> i32 {
    3
}

fn default_pg_dump_path() -> PathBuf {
    PathBuf::from("pg_dump")
}

fn default_daily_at() -> String {
    "08:00".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dump_dir: default_dump_dir(),
            source_root: default_source_root(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            pg_dump_path: default_pg_dump_path(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: LogOutput::default(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.token.is_empty() {
            bail!("telegram.token must not be empty");
        }
        let chat_id = self.telegram.chat_id.trim();
        if chat_id.is_empty() {
            bail!("telegram.chat_id must not be empty");
        }
        if chat_id.parse::<i64>().is_err() && !chat_id.starts_with('@') {
            bail!("telegram.chat_id must be a numeric id or an @channel name, got {chat_id:?}");
        }

        let mut names = HashSet::new();
        for db in &self.databases {
            if db.name.is_empty() {
                bail!("database on host {} has an empty name", db.host);
            }
            // Dump files are named after the database.
            if !names.insert(db.name.as_str()) {
                bail!("database {} is listed more than once", db.name);
            }
        }

        if !zstd::compression_level_range().contains(&self.archive.compression_level) {
            bail!(
                "archive.compression_level {} is outside the supported range",
                self.archive.compression_level
            );
        }

        daily_cron(&self.schedule.daily_at)?;
        Ok(())
    }

    /// Build the immutable description of one run
    pub fn backup_job(&self) -> BackupJob {
        let root = &self.workspace.source_root;
        BackupJob {
            databases: self.databases.clone(),
            files: self.files.iter().map(|f| root.join(f)).collect(),
            directories: self.directories.iter().map(|d| root.join(d)).collect(),
            telegram: self.telegram.clone(),
            dump_dir: self.workspace.dump_dir.clone(),
        }
    }

    /// Log what will be backed up. Credentials are left out.
    pub fn log_summary(&self) {
        for db in &self.databases {
            tracing::info!(
                database = %db.label(),
                excluded_columns = db.exclude.len(),
                "Configured database"
            );
        }
        for file in &self.files {
            tracing::info!(file = %file.display(), "Configured file");
        }
        for dir in &self.directories {
            tracing::info!(directory = %dir.display(), "Configured directory");
        }
        tracing::info!(
            chat_id = %self.telegram.chat_id,
            dump_dir = %self.workspace.dump_dir.display(),
            daily_at = %self.schedule.daily_at,
            "Delivery settings"
        );
    }
}
