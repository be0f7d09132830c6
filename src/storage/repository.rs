use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::date_util::{format_timestamp, parse_remote_timestamp};
use crate::model::{IncidentRecord, ResponseSlaConfig};

pub const WATERMARK_KEY: &str = "incident_watermark";

// ── Incidents ──────────────────────────────────────────────────────

/// Insert or update by incident number. A row is never replaced by an older
/// version of itself (smaller `updated_on`).
pub fn upsert_incident(conn: &Connection, incident: &IncidentRecord) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO incidents (
            incident_number, assigned_to, assignment_group, subject,
            priority, severity, status, created_on, updated_on, synced_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
        ON CONFLICT(incident_number) DO UPDATE SET
            assigned_to=excluded.assigned_to, assignment_group=excluded.assignment_group,
            subject=excluded.subject, priority=excluded.priority, severity=excluded.severity,
            status=excluded.status, created_on=excluded.created_on,
            updated_on=excluded.updated_on, synced_at=excluded.synced_at
        WHERE excluded.updated_on >= incidents.updated_on",
        params![
            incident.incident_number,
            incident.assigned_to,
            incident.assignment_group,
            incident.subject,
            incident.priority,
            incident.severity,
            incident.status,
            format_timestamp(incident.created_on),
            format_timestamp(incident.updated_on),
        ],
    )?;
    Ok(())
}

/// Upsert a batch in a single transaction. Either every record is written or
/// none is.
pub fn save_incidents(
    conn: &mut Connection,
    incidents: &[IncidentRecord],
) -> Result<usize, rusqlite::Error> {
    let tx = conn.transaction()?;
    for incident in incidents {
        upsert_incident(&tx, incident)?;
    }
    tx.commit()?;
    Ok(incidents.len())
}

const INCIDENT_COLUMNS: &str = "incident_number, assigned_to, assignment_group, subject,
    priority, severity, status, created_on, updated_on";

fn incident_from_row(row: &Row<'_>) -> Result<IncidentRecord, rusqlite::Error> {
    Ok(IncidentRecord {
        incident_number: row.get(0)?,
        assigned_to: row.get(1)?,
        assignment_group: row.get(2)?,
        subject: row.get(3)?,
        priority: row.get(4)?,
        severity: row.get(5)?,
        status: row.get(6)?,
        created_on: timestamp_column(row, 7)?,
        updated_on: timestamp_column(row, 8)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> Result<NaiveDateTime, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    parse_remote_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp {raw:?}").into(),
        )
    })
}

pub fn get_incident(
    conn: &Connection,
    incident_number: &str,
) -> Result<Option<IncidentRecord>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE incident_number = ?1"),
        params![incident_number],
        incident_from_row,
    )
    .optional()
}

/// Most recently updated incidents first.
pub fn list_incidents(conn: &Connection, limit: u32) -> Result<Vec<IncidentRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INCIDENT_COLUMNS} FROM incidents
         ORDER BY updated_on DESC, incident_number
         LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit], incident_from_row)?;
    rows.collect()
}

pub fn count_incidents(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Incident counts per local status name.
pub fn count_incidents_by_status(conn: &Connection) -> Result<Vec<(String, u64)>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM incidents GROUP BY status ORDER BY status",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?;
    rows.collect()
}

// ── Response SLA config ────────────────────────────────────────────

pub fn upsert_response_sla(conn: &Connection, sla: &ResponseSlaConfig) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO response_sla_config (id, priority, response_minutes, resolution_minutes, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
            priority=excluded.priority, response_minutes=excluded.response_minutes,
            resolution_minutes=excluded.resolution_minutes, updated_at=excluded.updated_at",
        params![sla.id, sla.priority, sla.response_minutes, sla.resolution_minutes],
    )?;
    Ok(())
}

pub fn list_response_sla(conn: &Connection) -> Result<Vec<ResponseSlaConfig>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, priority, response_minutes, resolution_minutes
         FROM response_sla_config ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ResponseSlaConfig {
            id: row.get(0)?,
            priority: row.get(1)?,
            response_minutes: row.get(2)?,
            resolution_minutes: row.get(3)?,
        })
    })?;
    rows.collect()
}

pub fn delete_response_sla(conn: &Connection, id: i64) -> Result<bool, rusqlite::Error> {
    let n = conn.execute("DELETE FROM response_sla_config WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_config(conn: &Connection, key: &str) -> Result<bool, rusqlite::Error> {
    let n = conn.execute("DELETE FROM app_config WHERE key = ?1", params![key])?;
    Ok(n > 0)
}

// ── Watermark ──────────────────────────────────────────────────────

pub fn get_watermark(conn: &Connection) -> Result<Option<NaiveDateTime>, rusqlite::Error> {
    match get_config(conn, WATERMARK_KEY)? {
        None => Ok(None),
        Some(raw) => parse_remote_timestamp(&raw).map(Some).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                Type::Text,
                format!("invalid {WATERMARK_KEY} {raw:?}").into(),
            )
        }),
    }
}

/// Overwrite the watermark unconditionally (operator replays).
pub fn set_watermark(conn: &Connection, at: NaiveDateTime) -> Result<(), rusqlite::Error> {
    set_config(conn, WATERMARK_KEY, &format_timestamp(at))
}

/// Move the watermark forward to `at`. Returns false, leaving the stored
/// value alone, when it is already at or past `at`.
pub fn advance_watermark(conn: &Connection, at: NaiveDateTime) -> Result<bool, rusqlite::Error> {
    let n = conn.execute(
        "INSERT INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET
            value=excluded.value, updated_at=excluded.updated_at
         WHERE excluded.value > app_config.value",
        params![WATERMARK_KEY, format_timestamp(at)],
    )?;
    Ok(n > 0)
}

pub fn clear_watermark(conn: &Connection) -> Result<bool, rusqlite::Error> {
    delete_config(conn, WATERMARK_KEY)
}

// ── Sync lease ─────────────────────────────────────────────────────

/// Take the single cycle lease for `owner` until `expires_at`. Succeeds when
/// no lease exists or the current one expired at or before `now`.
pub fn try_acquire_lease(
    conn: &Connection,
    owner: &str,
    now: NaiveDateTime,
    expires_at: NaiveDateTime,
) -> Result<bool, rusqlite::Error> {
    let n = conn.execute(
        "INSERT INTO sync_lease (id, owner, acquired_at, expires_at)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            owner=excluded.owner, acquired_at=excluded.acquired_at,
            expires_at=excluded.expires_at
         WHERE sync_lease.expires_at <= excluded.acquired_at",
        params![owner, format_timestamp(now), format_timestamp(expires_at)],
    )?;
    Ok(n > 0)
}

/// Drop the lease if `owner` still holds it.
pub fn release_lease(conn: &Connection, owner: &str) -> Result<bool, rusqlite::Error> {
    let n = conn.execute("DELETE FROM sync_lease WHERE owner = ?1", params![owner])?;
    Ok(n > 0)
}

/// Whether some process holds an unexpired lease at `now`.
pub fn lease_active(conn: &Connection, now: NaiveDateTime) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sync_lease WHERE expires_at > ?1)",
        params![format_timestamp(now)],
        |row| row.get(0),
    )
}

// ── Sync runs ──────────────────────────────────────────────────────

/// Outcome of one cycle as stored in `sync_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRun {
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub status: String,
    pub filter_query: Option<String>,
    pub items_synced: u64,
    pub items_failed: u64,
    pub error_message: Option<String>,
}

pub fn insert_sync_run(conn: &Connection, run: &SyncRun) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_runs (
            started_at, finished_at, status, filter_query,
            items_synced, items_failed, error_message
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            format_timestamp(run.started_at),
            format_timestamp(run.finished_at),
            run.status,
            run.filter_query,
            run.items_synced as i64,
            run.items_failed as i64,
            run.error_message,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent runs first.
pub fn list_sync_runs(conn: &Connection, limit: u32) -> Result<Vec<SyncRun>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT started_at, finished_at, status, filter_query,
                items_synced, items_failed, error_message
         FROM sync_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(SyncRun {
            started_at: timestamp_column(row, 0)?,
            finished_at: timestamp_column(row, 1)?,
            status: row.get(2)?,
            filter_query: row.get(3)?,
            items_synced: row.get::<_, i64>(4)? as u64,
            items_failed: row.get::<_, i64>(5)? as u64,
            error_message: row.get(6)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::NaiveDate;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn incident(number: &str, status: &str, updated_day: u32) -> IncidentRecord {
        IncidentRecord {
            incident_number: number.to_string(),
            assigned_to: "Ada".to_string(),
            assignment_group: "RPA Team".to_string(),
            subject: format!("{number} subject"),
            priority: "2".to_string(),
            severity: "1".to_string(),
            status: status.to_string(),
            created_on: ts(1, 10),
            updated_on: ts(updated_day, 9),
        }
    }

    #[tokio::test]
    async fn test_upsert_incident_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let rec = incident("INC001", "New", 2);
                upsert_incident(conn, &rec)?;
                assert_eq!(get_incident(conn, "INC001")?, Some(rec));
                assert_eq!(get_incident(conn, "INC404")?, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_incident_overwrites_by_number() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_incident(conn, &incident("INC001", "New", 2))?;
                let mut changed = incident("INC001", "Resolved", 5);
                changed.assigned_to = String::new();
                upsert_incident(conn, &changed)?;

                assert_eq!(count_incidents(conn)?, 1);
                assert_eq!(get_incident(conn, "INC001")?, Some(changed));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_incident_keeps_newer_row() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let newer = incident("INC001", "Closed", 5);
                upsert_incident(conn, &newer)?;
                upsert_incident(conn, &incident("INC001", "New", 2))?;
                assert_eq!(get_incident(conn, "INC001")?, Some(newer));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_incidents_batch() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let batch = vec![
                    incident("INC001", "New", 2),
                    incident("INC002", "Closed", 4),
                    incident("INC003", "New", 3),
                ];
                assert_eq!(save_incidents(conn, &batch)?, 3);
                // Re-running the same batch is idempotent.
                assert_eq!(save_incidents(conn, &batch)?, 3);
                assert_eq!(count_incidents(conn)?, 3);

                let listed: Vec<String> = list_incidents(conn, 10)?
                    .into_iter()
                    .map(|r| r.incident_number)
                    .collect();
                assert_eq!(listed, vec!["INC002", "INC003", "INC001"]);
                assert_eq!(list_incidents(conn, 1)?.len(), 1);

                assert_eq!(
                    count_incidents_by_status(conn)?,
                    vec![("Closed".to_string(), 1), ("New".to_string(), 2)]
                );
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_incidents_empty_batch() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert_eq!(save_incidents(conn, &[])?, 0);
                assert_eq!(count_incidents(conn)?, 0);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_response_sla_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert!(list_response_sla(conn)?.is_empty());

                let p1 = ResponseSlaConfig {
                    id: 1,
                    priority: "1".into(),
                    response_minutes: 15,
                    resolution_minutes: 240,
                };
                let mut p2 = ResponseSlaConfig {
                    id: 2,
                    priority: "2".into(),
                    response_minutes: 60,
                    resolution_minutes: 480,
                };
                upsert_response_sla(conn, &p2)?;
                upsert_response_sla(conn, &p1)?;
                p2.response_minutes = 30;
                upsert_response_sla(conn, &p2)?;

                assert_eq!(list_response_sla(conn)?, vec![p1, p2]);
                assert!(delete_response_sla(conn, 1)?);
                assert!(!delete_response_sla(conn, 1)?);
                assert_eq!(list_response_sla(conn)?.len(), 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_watermark_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert_eq!(get_watermark(conn)?, None);
                set_watermark(conn, ts(2, 9))?;
                assert_eq!(get_watermark(conn)?, Some(ts(2, 9)));
                set_watermark(conn, ts(3, 9))?;
                assert_eq!(get_watermark(conn)?, Some(ts(3, 9)));
                assert!(clear_watermark(conn)?);
                assert_eq!(get_watermark(conn)?, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_advance_watermark_never_moves_back() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert!(advance_watermark(conn, ts(3, 13))?);
                assert!(!advance_watermark(conn, ts(3, 12))?);
                assert!(!advance_watermark(conn, ts(3, 13))?);
                assert_eq!(get_watermark(conn)?, Some(ts(3, 13)));
                assert!(advance_watermark(conn, ts(3, 14))?);
                assert_eq!(get_watermark(conn)?, Some(ts(3, 14)));

                // Operators can still move it back explicitly.
                set_watermark(conn, ts(1, 0))?;
                assert_eq!(get_watermark(conn)?, Some(ts(1, 0)));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync_lease() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert!(!lease_active(conn, ts(3, 12))?);
                assert!(try_acquire_lease(conn, "a", ts(3, 12), ts(3, 13))?);
                assert!(lease_active(conn, ts(3, 12))?);

                // Held by someone else until it expires.
                assert!(!try_acquire_lease(conn, "b", ts(3, 12), ts(3, 13))?);
                assert!(try_acquire_lease(conn, "b", ts(3, 13), ts(3, 14))?);

                // The previous holder cannot release a lease it lost.
                assert!(!release_lease(conn, "a")?);
                assert!(release_lease(conn, "b")?);
                assert!(!lease_active(conn, ts(3, 13))?);
                assert!(try_acquire_lease(conn, "a", ts(3, 13), ts(3, 14))?);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_watermark_is_an_error() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, WATERMARK_KEY, "yesterday")?;
                assert!(get_watermark(conn).is_err());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync_runs() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let ok = SyncRun {
                    started_at: ts(2, 9),
                    finished_at: ts(2, 9),
                    status: "success".into(),
                    filter_query: Some("q".into()),
                    items_synced: 4,
                    items_failed: 0,
                    error_message: None,
                };
                let failed = SyncRun {
                    started_at: ts(2, 10),
                    finished_at: ts(2, 10),
                    status: "failed".into(),
                    filter_query: Some("q".into()),
                    items_synced: 0,
                    items_failed: 0,
                    error_message: Some("Remote API returned HTTP 500: boom".into()),
                };
                let first = insert_sync_run(conn, &ok)?;
                let second = insert_sync_run(conn, &failed)?;
                assert!(second > first);

                assert_eq!(list_sync_runs(conn, 10)?, vec![failed.clone(), ok]);
                assert_eq!(list_sync_runs(conn, 1)?, vec![failed]);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
