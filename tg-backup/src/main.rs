//! tg-backup - Main entry point
//!
//! Runs a backup at startup and then once a day, or a single time with
//! `--once`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tg_backup::daemon::shutdown::ShutdownCoordinator;
use tg_backup::dump::PgDumper;
use tg_backup::scheduler::DailyScheduler;
use tg_backup::{utils, BackupExecutor, BackupJob, Config};
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run a single backup and exit
    #[arg(long)]
    once: bool,
}

struct Runner {
    executor: BackupExecutor<PgDumper>,
    job: BackupJob,
    active: Arc<Mutex<()>>,
}

impl Runner {
    /// Run once unless another run holds the lock. Returns `None` when skipped.
    async fn try_run(&self) -> Option<tg_backup::Result<()>> {
        let Ok(_active) = self.active.try_lock() else {
            tracing::warn!("Previous backup run still in progress, skipping this trigger");
            return None;
        };
        Some(self.executor.execute(&self.job).await.map(|_| ()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.output)?;

    tracing::info!(
        "Starting tg-backup v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );
    config.log_summary();

    let executor = BackupExecutor::new(PgDumper::new(config.dump.pg_dump_path.clone()))
        .with_compression_level(config.archive.compression_level);
    let runner = Arc::new(Runner {
        executor,
        job: config.backup_job(),
        active: Arc::new(Mutex::new(())),
    });

    if args.once {
        return match runner.try_run().await {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(e.into()),
            None => Ok(()),
        };
    }

    // Create shutdown coordinator
    let shutdown_coordinator = Arc::new(ShutdownCoordinator::new());

    let scheduler = DailyScheduler::new().await?;
    let trigger_runner = Arc::clone(&runner);
    let trigger_shutdown = Arc::clone(&shutdown_coordinator);
    scheduler
        .schedule(&config.schedule.daily_at, move || {
            let runner = Arc::clone(&trigger_runner);
            let shutdown = Arc::clone(&trigger_shutdown);
            async move {
                if shutdown.is_shutting_down() {
                    return;
                }
                tracing::info!("Starting scheduled backup");
                // Failures are logged by the executor; the next trigger still fires.
                let _ = runner.try_run().await;
            }
        })
        .await?;
    scheduler.start().await?;

    // Initial run right away, in the background so signals are still handled.
    let initial_runner = Arc::clone(&runner);
    let initial_lock = Arc::clone(&runner.active).try_lock_owned()?;
    let initial_run = tokio::spawn(async move {
        let _active = initial_lock;
        if let Err(e) = initial_runner.executor.execute(&initial_runner.job).await {
            tracing::error!(error = %e, "Initial backup failed, waiting for next scheduled run");
        }
    });

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Scheduler shutdown failed: {}", e);
    }

    // Graceful shutdown
    if shutdown_coordinator.shutdown(&runner.active).await {
        if let Err(e) = initial_run.await {
            tracing::error!("Initial backup task panicked: {}", e);
        }
    }

    Ok(())
}
