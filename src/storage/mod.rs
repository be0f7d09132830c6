pub mod repository;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite_migration::{Migrations, M};

use crate::error::{Error, Result};
use crate::model::{IncidentRecord, ResponseSlaConfig};
use repository::SyncRun;

/// Persistence collaborator used by the sync cycle.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Upsert a batch by incident number, all-or-nothing.
    async fn save_all(&self, records: Vec<IncidentRecord>) -> Result<usize>;

    async fn find_all_response_sla(&self) -> Result<Vec<ResponseSlaConfig>>;

    async fn watermark(&self) -> Result<Option<NaiveDateTime>>;

    /// Advance the watermark to `at`. A value older than the stored one is
    /// ignored, so a slow cycle cannot move it backwards.
    async fn set_watermark(&self, at: NaiveDateTime) -> Result<()>;

    async fn record_run(&self, run: SyncRun) -> Result<()>;

    /// Claim the cycle lease shared by every process using this store.
    /// `Ok(false)` means another holder's lease is still live at `now`.
    async fn try_acquire_lease(
        &self,
        owner: &str,
        now: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> Result<bool>;

    async fn release_lease(&self, owner: &str) -> Result<()>;
}

/// Database wraps two `tokio_rusqlite::Connection` instances (writer + reader)
/// using WAL mode for concurrent access. The writer serializes writes via
/// `tokio_rusqlite`'s internal channel; the reader can proceed without blocking.
#[derive(Clone)]
pub struct Database {
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
}

impl Database {
    /// Open the database at the given path, creating parent directories.
    pub async fn open_at(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| Error::Config(e.to_string()))?;
        }

        let writer = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_writer(&writer).await?;

        let reader = tokio_rusqlite::Connection::open(&path).await?;
        Self::init_reader(&reader).await?;

        Ok(Self { writer, reader })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let writer = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init_writer(&writer).await?;

        // In-memory DBs are per-connection, so reader and writer share one.
        Ok(Self {
            reader: writer.clone(),
            writer,
        })
    }

    async fn init_writer(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )
            .map_err(|e| e.to_string())?;
            let migrations = Migrations::new(vec![
                M::up(include_str!("migrations/001_initial.sql")),
                M::up(include_str!("migrations/002_sync_lease.sql")),
            ]);
            migrations.to_latest(conn).map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        })
        .await
        .map_err(|e| Error::Migration(e.to_string()))
    }

    async fn init_reader(conn: &tokio_rusqlite::Connection) -> Result<()> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA foreign_keys=ON;\
                 PRAGMA busy_timeout=5000;",
            )?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
        Ok(())
    }

    pub fn writer(&self) -> &tokio_rusqlite::Connection {
        &self.writer
    }

    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        &self.reader
    }
}

#[async_trait]
impl IncidentStore for Database {
    async fn save_all(&self, records: Vec<IncidentRecord>) -> Result<usize> {
        let n = self
            .writer
            .call(move |conn| repository::save_incidents(conn, &records))
            .await?;
        Ok(n)
    }

    async fn find_all_response_sla(&self) -> Result<Vec<ResponseSlaConfig>> {
        let rows = self.reader.call(|conn| repository::list_response_sla(conn)).await?;
        Ok(rows)
    }

    async fn watermark(&self) -> Result<Option<NaiveDateTime>> {
        let at = self.reader.call(|conn| repository::get_watermark(conn)).await?;
        Ok(at)
    }

    async fn set_watermark(&self, at: NaiveDateTime) -> Result<()> {
        let advanced = self
            .writer
            .call(move |conn| repository::advance_watermark(conn, at))
            .await?;
        if !advanced {
            log::warn!("Incident watermark already past {at}, left unchanged");
        }
        Ok(())
    }

    async fn record_run(&self, run: SyncRun) -> Result<()> {
        self.writer
            .call(move |conn| repository::insert_sync_run(conn, &run))
            .await?;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        owner: &str,
        now: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> Result<bool> {
        let owner = owner.to_string();
        let acquired = self
            .writer
            .call(move |conn| repository::try_acquire_lease(conn, &owner, now, expires_at))
            .await?;
        Ok(acquired)
    }

    async fn release_lease(&self, owner: &str) -> Result<()> {
        let owner = owner.to_string();
        self.writer
            .call(move |conn| repository::release_lease(conn, &owner))
            .await?;
        Ok(())
    }
}
