use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tokio::sync::Mutex;

use crate::config::DEFAULT_INITIAL_LOOKBACK_MINUTES;
use crate::error::{Error, Result};
use crate::mapper::map_incident;
use crate::query::FilterQuery;
use crate::remote::{parse_envelope, IncidentSource};
use crate::storage::repository::SyncRun;
use crate::storage::IncidentStore;
use crate::sync::{BatchPolicy, Clock, SyncOptions, SyncReport, SyncStatus, SystemClock};

const DEFAULT_LEASE_TTL_MINUTES: i64 = 15;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// The incident synchronization job.
///
/// One cycle reads the watermark, fetches incidents updated since then,
/// maps them, commits the batch and only then advances the watermark to the
/// cycle's start time. Any failure leaves the watermark where it was, so the
/// next cycle fetches the same window again.
///
/// Cycles never overlap: a cycle started while another is running is
/// skipped. Within a process a mutex decides; across processes sharing the
/// store, a lease row with an expiry does.
pub struct SyncJob {
    source: Arc<dyn IncidentSource>,
    store: Arc<dyn IncidentStore>,
    clock: Arc<dyn Clock>,
    policy: BatchPolicy,
    initial_lookback: Duration,
    lease_ttl: Duration,
    lease_owner: String,
    running: Mutex<()>,
}

impl SyncJob {
    pub fn new(source: Arc<dyn IncidentSource>, store: Arc<dyn IncidentStore>) -> Self {
        Self {
            source,
            store,
            clock: Arc::new(SystemClock),
            policy: BatchPolicy::default(),
            initial_lookback: Duration::minutes(DEFAULT_INITIAL_LOOKBACK_MINUTES),
            lease_ttl: Duration::minutes(DEFAULT_LEASE_TTL_MINUTES),
            lease_owner: format!(
                "{}:{}",
                std::process::id(),
                NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)
            ),
            running: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Window used when no watermark has been stored yet.
    pub fn with_initial_lookback(mut self, lookback: Duration) -> Self {
        self.initial_lookback = lookback;
        self
    }

    /// How long a cycle may hold the cross-process lease before another
    /// process is allowed to take over.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run one cycle. Returns a `Skipped` report without touching the remote
    /// API or the store if another cycle is in flight.
    pub async fn run_cycle(&self, options: &SyncOptions) -> Result<SyncReport> {
        let Ok(_guard) = self.running.try_lock() else {
            log::warn!("Incident sync still running, skipping this trigger");
            return Ok(SyncReport::skipped());
        };

        let started_at = self.clock.now();
        let lease_expires = started_at
            .checked_add_signed(self.lease_ttl)
            .ok_or_else(|| Error::Config(format!("lease TTL {} out of range", self.lease_ttl)))?;
        if !self
            .store
            .try_acquire_lease(&self.lease_owner, started_at, lease_expires)
            .await?
        {
            log::warn!("Incident sync running in another process, skipping this trigger");
            return Ok(SyncReport::skipped());
        }

        log::info!("Running incident sync at {started_at}");

        let mut filter_query = None;
        let result = self.execute(started_at, options, &mut filter_query).await;

        let run = match &result {
            Ok(report) => {
                log::info!(
                    "Incident sync finished: {} synced, {} skipped, watermark now {}",
                    report.items_synced,
                    report.items_failed,
                    started_at
                );
                SyncRun {
                    started_at,
                    finished_at: self.clock.now(),
                    status: report.status.as_str().to_string(),
                    filter_query: filter_query.clone(),
                    items_synced: report.items_synced,
                    items_failed: report.items_failed,
                    error_message: report.error.clone(),
                }
            }
            Err(e) => {
                log::error!(
                    "Incident sync failed (filter-query: {}): {e}",
                    filter_query.as_deref().unwrap_or("<none>")
                );
                SyncRun {
                    started_at,
                    finished_at: self.clock.now(),
                    status: SyncStatus::Failed.as_str().to_string(),
                    filter_query: filter_query.clone(),
                    items_synced: 0,
                    items_failed: 0,
                    error_message: Some(e.to_string()),
                }
            }
        };
        if let Err(e) = self.store.record_run(run).await {
            log::warn!("Failed to record sync run: {e}");
        }
        if let Err(e) = self.store.release_lease(&self.lease_owner).await {
            log::warn!("Failed to release sync lease: {e}");
        }

        result
    }

    async fn execute(
        &self,
        started_at: NaiveDateTime,
        options: &SyncOptions,
        filter_query: &mut Option<String>,
    ) -> Result<SyncReport> {
        let window_start = match options.since {
            Some(since) => since,
            None => match self.store.watermark().await? {
                Some(watermark) => watermark,
                None => {
                    log::info!(
                        "No incident watermark stored, looking back {} minutes",
                        self.initial_lookback.num_minutes()
                    );
                    started_at
                        .checked_sub_signed(self.initial_lookback)
                        .ok_or_else(|| {
                            Error::Config(format!(
                                "initial lookback of {} minutes is out of range",
                                self.initial_lookback.num_minutes()
                            ))
                        })?
                }
            },
        };

        let query = FilterQuery::new(window_start).build();
        log::info!("filter-query: {query}");
        *filter_query = Some(query.clone());

        let body = self.source.fetch_incidents(&query).await?;
        log::debug!("Incident API response: {body}");

        let items = parse_envelope(&body)
            .inspect_err(|_| log::warn!("Unexpected incident API response: {body}"))?;
        log::info!("Fetched {} incidents", items.len());

        let mut records = Vec::with_capacity(items.len());
        let mut failed = 0u64;
        for item in &items {
            match map_incident(item) {
                Ok(record) => records.push(record),
                Err(e) if self.policy == BatchPolicy::SkipInvalid => {
                    log::warn!("Skipping incident: {e}");
                    failed += 1;
                }
                Err(e) => {
                    log::debug!("Offending incident: {item}");
                    return Err(e);
                }
            }
        }

        let synced = self.store.save_all(records).await?;
        self.store.set_watermark(started_at).await.map_err(|e| {
            Error::Database(format!("batch committed but watermark not advanced: {e}"))
        })?;

        Ok(SyncReport::from_counts(
            query,
            window_start,
            started_at,
            synced as u64,
            failed,
        ))
    }
}
