pub mod config;
pub mod date_util;
pub mod error;
pub mod lookup;
pub mod mapper;
pub mod model;
pub mod query;
pub mod remote;
pub mod storage;
pub mod sync;

use std::sync::Arc;

use chrono::NaiveDateTime;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{IncidentRecord, ResponseSlaConfig};
pub use query::FilterQuery;
pub use remote::{IncidentSource, ServiceNowClient};
pub use storage::repository::SyncRun;
pub use storage::{Database, IncidentStore};
pub use sync::{
    BatchPolicy, Clock, SyncJob, SyncOptions, SyncReport, SyncScheduler, SyncStatus, SystemClock,
};

use storage::repository;

/// Main entry point: a local incident store plus the job that fills it.
pub struct IncidentSync {
    db: Database,
    job: Arc<SyncJob>,
}

impl IncidentSync {
    /// Wire the HTTP client, database and sync job from configuration.
    pub fn from_config(db: Database, config: &Config) -> Result<Self> {
        config.validate()?;
        let client = ServiceNowClient::new(&config.remote)?;
        let policy = if config.schedule.skip_malformed {
            BatchPolicy::SkipInvalid
        } else {
            BatchPolicy::Strict
        };
        let job = SyncJob::new(Arc::new(client), Arc::new(db.clone()))
            .with_policy(policy)
            .with_initial_lookback(chrono::Duration::minutes(
                config.schedule.initial_lookback_minutes,
            ));
        Ok(Self::new(db, job))
    }

    pub fn new(db: Database, job: SyncJob) -> Self {
        Self {
            db,
            job: Arc::new(job),
        }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Sync ───────────────────────────────────────────────────────

    pub async fn sync_once(&self, options: &SyncOptions) -> Result<SyncReport> {
        self.job.run_cycle(options).await
    }

    /// Start the recurring job. Keep the returned scheduler alive for as long
    /// as cycles should run.
    pub async fn start_scheduler(&self, cron: &str) -> Result<SyncScheduler> {
        SyncScheduler::start(Arc::clone(&self.job), cron).await
    }

    // ── Incidents ──────────────────────────────────────────────────

    pub async fn incidents(&self, limit: u32) -> Result<Vec<IncidentRecord>> {
        let rows = self
            .db
            .reader()
            .call(move |conn| repository::list_incidents(conn, limit))
            .await?;
        Ok(rows)
    }

    pub async fn incident(&self, incident_number: &str) -> Result<Option<IncidentRecord>> {
        let incident_number = incident_number.to_string();
        let row = self
            .db
            .reader()
            .call(move |conn| repository::get_incident(conn, &incident_number))
            .await?;
        Ok(row)
    }

    // ── Response SLA ───────────────────────────────────────────────

    pub async fn response_sla_configs(&self) -> Result<Vec<ResponseSlaConfig>> {
        self.db.find_all_response_sla().await
    }

    pub async fn set_response_sla(&self, sla: ResponseSlaConfig) -> Result<()> {
        if sla.response_minutes < 0 || sla.resolution_minutes < 0 {
            return Err(Error::Other("SLA thresholds must not be negative".into()));
        }
        self.db
            .writer()
            .call(move |conn| repository::upsert_response_sla(conn, &sla))
            .await?;
        Ok(())
    }

    pub async fn remove_response_sla(&self, id: i64) -> Result<bool> {
        let removed = self
            .db
            .writer()
            .call(move |conn| repository::delete_response_sla(conn, id))
            .await?;
        Ok(removed)
    }

    // ── Watermark ──────────────────────────────────────────────────

    pub async fn watermark(&self) -> Result<Option<NaiveDateTime>> {
        self.db.watermark().await
    }

    /// Move the watermark, e.g. to replay a window on the next cycle.
    /// Unlike a cycle's commit this may move it backwards.
    pub async fn set_watermark(&self, at: NaiveDateTime) -> Result<()> {
        self.ensure_idle().await?;
        self.db
            .writer()
            .call(move |conn| repository::set_watermark(conn, at))
            .await?;
        Ok(())
    }

    /// Forget the watermark; the next cycle uses the initial lookback.
    pub async fn reset_watermark(&self) -> Result<bool> {
        self.ensure_idle().await?;
        let removed = self
            .db
            .writer()
            .call(|conn| repository::clear_watermark(conn))
            .await?;
        Ok(removed)
    }

    /// Fails if a cycle is running here or in another process sharing the
    /// database.
    async fn ensure_idle(&self) -> Result<()> {
        let now = chrono::Utc::now().naive_utc();
        let leased = self
            .db
            .reader()
            .call(move |conn| repository::lease_active(conn, now))
            .await?;
        if self.job.is_running() || leased {
            return Err(Error::Other("a sync cycle is running; try again later".into()));
        }
        Ok(())
    }

    // ── Status ─────────────────────────────────────────────────────

    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let runs = self
            .db
            .reader()
            .call(move |conn| repository::list_sync_runs(conn, limit))
            .await?;
        Ok(runs)
    }

    pub async fn status_counts(&self) -> Result<Vec<(String, u64)>> {
        let counts = self
            .db
            .reader()
            .call(|conn| repository::count_incidents_by_status(conn))
            .await?;
        Ok(counts)
    }
}
