//! Backup runner library
//!
//! Dumps PostgreSQL databases (with optional column exclusion), stages files
//! and directories, packs everything into one archive and delivers it to a
//! Telegram chat through the Bot API.

pub mod archive;
pub mod config;
pub mod daemon;
pub mod dump;
pub mod executor;
pub mod fs;
pub mod scheduler;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupExecutor, BackupJob, BackupReport};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
