use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::{Error, Result};
use crate::sync::{SyncJob, SyncOptions, SyncStatus};

/// Runs a `SyncJob` on a cron schedule until shut down.
///
/// Each trigger runs one cycle. Failures are logged and swallowed so the
/// schedule keeps firing; overlapping triggers are skipped by the job itself.
pub struct SyncScheduler {
    scheduler: JobScheduler,
}

impl SyncScheduler {
    /// Register `job` under `cron` (six fields, seconds first) and start
    /// the scheduler.
    pub async fn start(job: Arc<SyncJob>, cron: &str) -> Result<Self> {
        let mut scheduler = JobScheduler::new().await?;
        let cron_job = Job::new_async(cron, move |_uuid, _lock| {
            let job = Arc::clone(&job);
            Box::pin(async move {
                run_scheduled(&job).await;
            })
        })
        .map_err(|e| Error::Schedule(format!("invalid cron expression {cron:?}: {e}")))?;

        scheduler.add(cron_job).await?;
        scheduler.start().await?;
        log::info!("Incident sync scheduled with cron {cron:?}");
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        log::info!("Incident sync scheduler stopped");
        Ok(())
    }
}

/// One scheduled trigger. Never fails: the next trigger retries.
pub async fn run_scheduled(job: &SyncJob) {
    match job.run_cycle(&SyncOptions::default()).await {
        Ok(report) if report.status == SyncStatus::Skipped => {}
        Ok(report) => log::info!(
            "Scheduled incident sync {}: {} synced",
            report.status.as_str(),
            report.items_synced
        ),
        Err(e) if e.is_retryable() => {
            log::warn!("Scheduled incident sync failed, will retry on next trigger: {e}")
        }
        Err(e) => log::error!("Scheduled incident sync failed: {e}"),
    }
}
