//! Daily trigger for backup runs, in the host's local time zone.

use anyhow::{bail, Context};
use std::future::Future;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Convert a `HH:MM` wall-clock time into a six-field cron expression
/// (seconds first) firing once a day.
pub fn daily_cron(daily_at: &str) -> anyhow::Result<String> {
    let Some((hour, minute)) = daily_at.trim().split_once(':') else {
        bail!("schedule.daily_at must look like HH:MM, got {daily_at:?}");
    };
    let hour: u32 = hour
        .parse()
        .with_context(|| format!("invalid hour in schedule.daily_at {daily_at:?}"))?;
    let minute: u32 = minute
        .parse()
        .with_context(|| format!("invalid minute in schedule.daily_at {daily_at:?}"))?;

    if hour > 23 || minute > 59 {
        bail!("schedule.daily_at {daily_at:?} is not a valid time of day");
    }

    Ok(format!("0 {minute} {hour} * * *"))
}

pub struct DailyScheduler {
    scheduler: Mutex<JobScheduler>,
}

impl DailyScheduler {
    pub async fn new() -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Register `run` to fire every day at `daily_at`, local time.
    pub async fn schedule<F, Fut>(&self, daily_at: &str, run: F) -> anyhow::Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cron = daily_cron(daily_at)?;
        let job = Job::new_async_tz(cron.as_str(), chrono::Local, move |_uuid, _lock| {
            Box::pin(run())
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(daily_at = %daily_at, cron = %cron, "Backup scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
