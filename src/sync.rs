//! Offline checkout queue.
//!
//! A checkout recorded without connectivity is written to `offline_checkouts`
//! (photos as data URLs in `offline_photos`) and replayed later. Each record
//! carries an idempotency key sent with the create call, and the server id is
//! persisted as soon as the create succeeds, so a record whose photos failed
//! is never created twice. Failed records are retried with exponential
//! backoff until `max_retries`, then parked as `failed`.

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::ColetaApi;
use crate::auth::Session;
use crate::checkout::{clean_notes, validate_odometer};
use crate::db::{self, DbState};
use crate::error::{ColetaError, Result};
use crate::models::OdometerEntry;
use crate::photos::{self, PhotoRef, MAX_QUEUED_PHOTOS};

const DEFAULT_RETRY_DELAY_MS: i64 = 5_000;
const MAX_RETRY_DELAY_MS: i64 = 300_000;
pub const DEFAULT_MAX_RETRIES: i64 = 5;

const SYNC_CATEGORY: &str = "sync";
const KEY_LAST_SYNC: &str = "last_sync";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Synced,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "synced" => Self::Synced,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedPhoto {
    pub id: i64,
    pub position: i64,
    pub file_name: String,
    #[serde(skip)]
    pub data_url: String,
    pub uploaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedCheckout {
    pub id: i64,
    pub idempotency_key: String,
    pub user_id: i64,
    pub vehicle_id: i64,
    pub odometer_out: f64,
    pub notes: Option<String>,
    pub started_at: String,
    pub remote_id: Option<i64>,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
    pub photos: Vec<QueuedPhoto>,
}

/// Outcome of one drain pass. `attempted = synced + failed`; `deferred`
/// counts records not yet due or owned by another driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub deferred: usize,
    pub photos_uploaded: usize,
    pub photos_failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub pending: i64,
    pub synced: i64,
    pub failed: i64,
    /// Earliest scheduled retry among pending records.
    pub next_retry_at: Option<String>,
    pub last_sync: Option<String>,
}

/// Managed state for the background sync loop.
pub struct SyncState {
    pub is_running: Arc<AtomicBool>,
    pub last_sync: Arc<std::sync::Mutex<Option<String>>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            last_sync: Arc::new(std::sync::Mutex::new(None)),
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Retry scheduling
// ---------------------------------------------------------------------------

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Delay before attempt `retry_count + 1`: 5 s doubling, capped at 5 min.
pub fn backoff_delay_ms(retry_count: i64) -> i64 {
    let exponent = (retry_count - 1).clamp(0, 16) as u32;
    DEFAULT_RETRY_DELAY_MS
        .saturating_mul(1_i64 << exponent)
        .min(MAX_RETRY_DELAY_MS)
}

fn deterministic_jitter_ms(seed: i64) -> i64 {
    let positive = if seed < 0 { -seed } else { seed };
    (positive % 700) + 50
}

fn schedule_next_retry(now: DateTime<Utc>, delay_ms: i64, seed: i64) -> String {
    let bounded = delay_ms.clamp(1_000, MAX_RETRY_DELAY_MS);
    let jitter = deterministic_jitter_ms(seed);
    timestamp(now + ChronoDuration::milliseconds(bounded + jitter))
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

fn refuse_if_queued(conn: &Connection, user_id: i64) -> Result<()> {
    let open: Option<i64> = conn
        .query_row(
            "SELECT id FROM offline_checkouts
             WHERE user_id = ?1 AND status != 'synced'
             LIMIT 1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    match open {
        Some(queue_id) => {
            debug!(queue_id, user_id, "driver already has an unsynced checkout");
            Err(ColetaError::validation(
                "Já existe uma coleta aguardando sincronização",
            ))
        }
        None => Ok(()),
    }
}

/// Refuse a new checkout while the driver's offline one has not been synced.
pub fn ensure_nothing_queued(db_state: &DbState, session: &Session) -> Result<()> {
    let conn = db_state.lock()?;
    refuse_if_queued(&conn, session.user_id)
}

/// Record a checkout for later replay.
pub fn enqueue(
    db_state: &DbState,
    session: &Session,
    vehicle_id: i64,
    odometer_out: f64,
    notes: Option<&str>,
    attachments: Vec<PhotoRef>,
    now: DateTime<Utc>,
) -> Result<QueuedCheckout> {
    if vehicle_id <= 0 {
        return Err(ColetaError::validation("Selecione um veículo"));
    }
    validate_odometer(odometer_out)?;
    if attachments.len() > MAX_QUEUED_PHOTOS {
        return Err(ColetaError::validation(format!(
            "Máximo de {MAX_QUEUED_PHOTOS} fotos"
        )));
    }

    let mut data_urls = Vec::with_capacity(attachments.len());
    for photo in attachments {
        photos::check_extension(&photo.file_name)?;
        let url = photo.to_data_url();
        data_urls.push((photo.file_name, url));
    }

    let mut conn = db_state.lock()?;
    refuse_if_queued(&conn, session.user_id)?;

    let key = Uuid::new_v4().to_string();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO offline_checkouts
            (user_id, vehicle_id, odometer_out, notes, started_at, synced,
             idempotency_key, status, retry_count, max_retries, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, 'pending', 0, ?7, ?5)",
        params![
            session.user_id,
            vehicle_id,
            odometer_out,
            clean_notes(notes),
            timestamp(now),
            key,
            DEFAULT_MAX_RETRIES,
        ],
    )?;
    let id = tx.last_insert_rowid();
    for (position, (file_name, url)) in data_urls.iter().enumerate() {
        tx.execute(
            "INSERT INTO offline_photos (checkout_id, position, file_name, data_url)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, position as i64, file_name, url],
        )?;
    }
    tx.commit()?;

    info!(
        queue_id = id,
        vehicle_id,
        photos = data_urls.len(),
        "checkout queued for sync"
    );
    load(&conn, id)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

const CHECKOUT_COLUMNS: &str = "id, idempotency_key, user_id, vehicle_id, odometer_out, notes,
     started_at, remote_id, status, retry_count, max_retries, next_retry_at, last_error";

fn row_to_checkout(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedCheckout> {
    let status: String = row.get(8)?;
    Ok(QueuedCheckout {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        user_id: row.get(2)?,
        vehicle_id: row.get(3)?,
        odometer_out: row.get(4)?,
        notes: row.get(5)?,
        started_at: row.get(6)?,
        remote_id: row.get(7)?,
        status: QueueStatus::parse(&status),
        retry_count: row.get(9)?,
        max_retries: row.get(10)?,
        next_retry_at: row.get(11)?,
        last_error: row.get(12)?,
        photos: Vec::new(),
    })
}

fn load_photos(conn: &Connection, checkout_id: i64) -> Result<Vec<QueuedPhoto>> {
    let mut stmt = conn.prepare(
        "SELECT id, position, file_name, data_url, uploaded
         FROM offline_photos WHERE checkout_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![checkout_id], |row| {
        Ok(QueuedPhoto {
            id: row.get(0)?,
            position: row.get(1)?,
            file_name: row.get(2)?,
            data_url: row.get(3)?,
            uploaded: row.get::<_, i64>(4)? != 0,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn load(conn: &Connection, id: i64) -> Result<QueuedCheckout> {
    let mut record = conn.query_row(
        &format!("SELECT {CHECKOUT_COLUMNS} FROM offline_checkouts WHERE id = ?1"),
        params![id],
        row_to_checkout,
    )?;
    record.photos = load_photos(conn, id)?;
    Ok(record)
}

fn load_where(conn: &Connection, where_clause: &str) -> Result<Vec<QueuedCheckout>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHECKOUT_COLUMNS} FROM offline_checkouts WHERE {where_clause} ORDER BY id ASC"
    ))?;
    let mut records = stmt
        .query_map([], row_to_checkout)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for record in &mut records {
        record.photos = load_photos(conn, record.id)?;
    }
    Ok(records)
}

/// Unsynced records (pending and failed), oldest first.
pub fn pending(db_state: &DbState) -> Result<Vec<QueuedCheckout>> {
    let conn = db_state.lock()?;
    load_where(&conn, "status != 'synced'")
}

pub fn status(db_state: &DbState) -> Result<QueueSummary> {
    let conn = db_state.lock()?;
    let count = |status: QueueStatus| -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM offline_checkouts WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?)
    };
    let next_retry_at: Option<String> = conn.query_row(
        "SELECT MIN(next_retry_at) FROM offline_checkouts WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?;
    Ok(QueueSummary {
        pending: count(QueueStatus::Pending)?,
        synced: count(QueueStatus::Synced)?,
        failed: count(QueueStatus::Failed)?,
        next_retry_at,
        last_sync: db::get_setting(&conn, SYNC_CATEGORY, KEY_LAST_SYNC),
    })
}

/// Whether `user_id` has a pending record due at `now`.
fn has_due_work(db_state: &DbState, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
    let conn = db_state.lock()?;
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM offline_checkouts
         WHERE status = 'pending' AND user_id = ?1
           AND (next_retry_at IS NULL OR next_retry_at <= ?2)",
        params![user_id, timestamp(now)],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

/// Move parked records back to `pending` with a fresh retry budget.
pub fn retry_failed(db_state: &DbState) -> Result<usize> {
    let conn = db_state.lock()?;
    let n = conn.execute(
        "UPDATE offline_checkouts
         SET status = 'pending', retry_count = 0, next_retry_at = NULL,
             updated_at = ?1
         WHERE status = 'failed'",
        params![timestamp(Utc::now())],
    )?;
    if n > 0 {
        info!(count = n, "failed queue records requeued");
    }
    Ok(n)
}

/// Delete synced records (their photos cascade).
pub fn clear_synced(db_state: &DbState) -> Result<usize> {
    let conn = db_state.lock()?;
    let n = conn.execute("DELETE FROM offline_checkouts WHERE status = 'synced'", [])?;
    debug!(count = n, "synced queue records cleared");
    Ok(n)
}

// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

fn set_remote_id(db_state: &DbState, id: i64, remote_id: i64) -> Result<()> {
    let conn = db_state.lock()?;
    conn.execute(
        "UPDATE offline_checkouts SET remote_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![remote_id, timestamp(Utc::now()), id],
    )?;
    Ok(())
}

fn mark_photo_uploaded(db_state: &DbState, photo_id: i64) -> Result<()> {
    let conn = db_state.lock()?;
    conn.execute(
        "UPDATE offline_photos SET uploaded = 1 WHERE id = ?1",
        params![photo_id],
    )?;
    Ok(())
}

fn mark_synced(db_state: &DbState, id: i64, now: DateTime<Utc>) -> Result<()> {
    let conn = db_state.lock()?;
    conn.execute(
        "UPDATE offline_checkouts
         SET synced = 1, status = 'synced', next_retry_at = NULL,
             last_error = NULL, updated_at = ?1
         WHERE id = ?2",
        params![timestamp(now), id],
    )?;
    Ok(())
}

/// Count a failed attempt. Returns `true` when the record is now parked.
fn mark_failed(
    db_state: &DbState,
    record: &QueuedCheckout,
    error: &ColetaError,
    now: DateTime<Utc>,
) -> Result<bool> {
    let new_count = record.retry_count + 1;
    let exhausted = new_count >= record.max_retries;
    let new_status = if exhausted {
        QueueStatus::Failed
    } else {
        QueueStatus::Pending
    };
    let next_retry_at = if exhausted {
        None
    } else {
        Some(schedule_next_retry(now, backoff_delay_ms(new_count), record.id))
    };

    let conn = db_state.lock()?;
    conn.execute(
        "UPDATE offline_checkouts
         SET status = ?1, retry_count = ?2, next_retry_at = ?3,
             last_error = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            new_status.as_str(),
            new_count,
            next_retry_at,
            error.to_string(),
            timestamp(now),
            record.id
        ],
    )?;
    Ok(exhausted)
}

/// Create (if needed) and upload the remaining photos of one record.
async fn sync_one(
    api: &dyn ColetaApi,
    db_state: &DbState,
    session: &Session,
    record: &QueuedCheckout,
    report: &mut DrainReport,
) -> Result<()> {
    let remote_id = match record.remote_id {
        Some(id) => id,
        None => {
            let entry = OdometerEntry {
                km: record.odometer_out,
                notes: record.notes.clone(),
            };
            let checkout = api
                .create_checkout(
                    session,
                    record.vehicle_id,
                    &entry,
                    Some(&record.idempotency_key),
                )
                .await?;
            set_remote_id(db_state, record.id, checkout.id)?;
            checkout.id
        }
    };

    let mut first_error: Option<ColetaError> = None;
    for photo in record.photos.iter().filter(|p| !p.uploaded) {
        let stored = PhotoRef::from_data_url(photo.file_name.as_str(), photo.data_url.as_str());
        let result = match stored.to_upload() {
            Ok(upload) => api.upload_photo(session, remote_id, &upload).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => {
                mark_photo_uploaded(db_state, photo.id)?;
                report.photos_uploaded += 1;
            }
            Err(e) => {
                warn!(
                    queue_id = record.id,
                    file = %photo.file_name,
                    error = %e,
                    "queued photo upload failed"
                );
                report.photos_failed += 1;
                if e.is_auth_failure() {
                    return Err(e);
                }
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Replay the session driver's pending records in insertion order.
///
/// A failing record is rescheduled and the drain moves on. An authentication
/// failure stops the drain and is returned: no later record can succeed
/// without a new login, and the attempt is not charged to the record.
pub async fn drain(
    api: &dyn ColetaApi,
    db_state: &DbState,
    session: &Session,
    now: DateTime<Utc>,
) -> Result<DrainReport> {
    let records = {
        let conn = db_state.lock()?;
        load_where(&conn, "status = 'pending'")?
    };
    let now_ts = timestamp(now);
    let mut report = DrainReport::default();

    for record in &records {
        let due = record
            .next_retry_at
            .as_deref()
            .map_or(true, |at| at <= now_ts.as_str());
        if record.user_id != session.user_id || !due {
            report.deferred += 1;
            continue;
        }

        report.attempted += 1;
        match sync_one(api, db_state, session, record, &mut report).await {
            Ok(()) => {
                mark_synced(db_state, record.id, now)?;
                report.synced += 1;
                info!(queue_id = record.id, "queued checkout synced");
            }
            Err(e) if e.is_auth_failure() => {
                warn!(queue_id = record.id, "authentication rejected, stopping drain");
                return Err(e);
            }
            Err(e) => {
                report.failed += 1;
                let parked = mark_failed(db_state, record, &e, now)?;
                if parked {
                    warn!(queue_id = record.id, error = %e, "queued checkout parked as failed");
                } else {
                    info!(queue_id = record.id, error = %e, "queued checkout will be retried");
                }
            }
        }
    }

    if report.attempted > 0 {
        let conn = db_state.lock()?;
        db::set_setting(&conn, SYNC_CATEGORY, KEY_LAST_SYNC, &now_ts)?;
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Background sync loop
// ---------------------------------------------------------------------------

/// Spawn the background drain loop.
///
/// Every `interval` it probes `/health`. It drains on the offline→online
/// transition and on any online tick with due work. It ends on cancellation
/// or when the server rejects the session.
pub fn start_sync_loop(
    api: Arc<dyn ColetaApi>,
    db_state: Arc<DbState>,
    session: Session,
    sync_state: Arc<SyncState>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let is_running = sync_state.is_running.clone();
    let last_sync = sync_state.last_sync.clone();
    is_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!("Sync loop started (interval: {}ms)", interval.as_millis());
        let mut previous_online: Option<bool> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let online = api.check_health().await.success;
            if !online {
                if previous_online != Some(false) {
                    info!("Network offline; keeping queue pending");
                }
                previous_online = Some(false);
                continue;
            }

            let reconnected = previous_online == Some(false);
            if reconnected {
                info!("Network restored; resuming queued sync");
            }
            previous_online = Some(true);

            let now = Utc::now();
            let due = match has_due_work(&db_state, session.user_id, now) {
                Ok(due) => due,
                Err(e) => {
                    warn!("Queue check failed: {e}");
                    false
                }
            };
            if !reconnected && !due {
                continue;
            }

            match drain(api.as_ref(), &db_state, &session, now).await {
                Ok(report) => {
                    if report.attempted > 0 {
                        info!(
                            synced = report.synced,
                            failed = report.failed,
                            "Sync cycle complete"
                        );
                    }
                    if let Ok(mut guard) = last_sync.lock() {
                        *guard = Some(timestamp(now));
                    }
                }
                Err(e) if e.is_auth_failure() => {
                    warn!("Sync loop stopped: session rejected by server");
                    break;
                }
                Err(e) => warn!("Sync cycle failed: {e}"),
            }
        }

        is_running.store(false, Ordering::SeqCst);
        info!("Sync loop stopped");
    })
}
