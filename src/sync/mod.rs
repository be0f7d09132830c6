pub mod scheduler;
pub mod syncer;

use chrono::NaiveDateTime;
use serde::Serialize;

pub use scheduler::SyncScheduler;
pub use syncer::SyncJob;

/// Options controlling a single sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Fetch incidents updated at or after this instant instead of the stored
    /// watermark.
    pub since: Option<NaiveDateTime>,
}

/// What to do with a batch when individual incidents fail to map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// Abort the cycle on the first malformed incident.
    #[default]
    Strict,
    /// Log and skip malformed incidents, commit the rest.
    SkipInvalid,
}

/// Source of "now" for watermark handling.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }
}

/// Report returned after a sync cycle completes.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub filter_query: Option<String>,
    /// Lower bound of the fetched window.
    pub window_start: Option<NaiveDateTime>,
    /// Watermark stored after the commit; `None` if it was not advanced.
    pub watermark: Option<NaiveDateTime>,
    pub items_fetched: u64,
    pub items_synced: u64,
    pub items_failed: u64,
    pub error: Option<String>,
}

impl SyncReport {
    /// Create a SyncReport for a committed batch with the status derived
    /// from counts.
    pub fn from_counts(
        filter_query: String,
        window_start: NaiveDateTime,
        watermark: NaiveDateTime,
        items_synced: u64,
        items_failed: u64,
    ) -> Self {
        let status = if items_failed == 0 {
            SyncStatus::Success
        } else if items_synced > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        };
        let error = if items_failed > 0 {
            Some(format!("{items_failed} incidents skipped"))
        } else {
            None
        };
        Self {
            status,
            filter_query: Some(filter_query),
            window_start: Some(window_start),
            watermark: Some(watermark),
            items_fetched: items_synced + items_failed,
            items_synced,
            items_failed,
            error,
        }
    }

    /// Report for a trigger that found another cycle still running.
    pub fn skipped() -> Self {
        Self {
            status: SyncStatus::Skipped,
            filter_query: None,
            window_start: None,
            watermark: None,
            items_fetched: 0,
            items_synced: 0,
            items_failed: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
    Skipped,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::PartialFailure => "partial_failure",
            SyncStatus::Failed => "failed",
            SyncStatus::Skipped => "skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_report_from_counts_status() {
        let ok = SyncReport::from_counts("q".into(), ts(), ts(), 3, 0);
        assert_eq!(ok.status, SyncStatus::Success);
        assert_eq!(ok.error, None);
        assert_eq!(ok.items_fetched, 3);

        let partial = SyncReport::from_counts("q".into(), ts(), ts(), 3, 1);
        assert_eq!(partial.status, SyncStatus::PartialFailure);
        assert_eq!(partial.error.as_deref(), Some("1 incidents skipped"));
        assert_eq!(partial.items_fetched, 4);

        let failed = SyncReport::from_counts("q".into(), ts(), ts(), 0, 2);
        assert_eq!(failed.status, SyncStatus::Failed);

        let empty = SyncReport::from_counts("q".into(), ts(), ts(), 0, 0);
        assert_eq!(empty.status, SyncStatus::Success);
    }

    #[test]
    fn test_skipped_report() {
        let r = SyncReport::skipped();
        assert_eq!(r.status, SyncStatus::Skipped);
        assert!(r.watermark.is_none());
        assert_eq!(r.status.as_str(), "skipped");
    }
}
