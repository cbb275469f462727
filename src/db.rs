//! Local SQLite database for the coleta client.
//!
//! WAL mode, a versioned migration table, and a category/key settings store.
//! Holds the session profile, the persisted API URL, and the offline checkout
//! queue.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::error::{ColetaError, Result};

/// Shared handle to the local database.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection. The guard must be dropped before any `.await`.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ColetaError::Storage(format!("database lock poisoned: {e}")))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

const DB_FILE_NAME: &str = "coleta.db";

/// Open (or create) `{data_dir}/coleta.db` and run pending migrations.
///
/// On open failure the file is deleted together with its WAL/SHM companions
/// and opened once more. The queue is a cache of unsynced work, so losing a
/// corrupt file is preferable to refusing to start.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| ColetaError::Storage(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path).map_err(|e| {
                ColetaError::Storage(format!("Database open failed after retry: {e}"))
            })?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Highest applied migration, 0 for a fresh file.
pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migration_error(version: i32, err: rusqlite::Error) -> ColetaError {
    error!("Migration v{version} failed: {err}");
    ColetaError::Storage(format!("migration v{version}: {err}"))
}

/// Migration v1: settings and the offline checkout buffer.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE TABLE IF NOT EXISTS offline_checkouts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            vehicle_id INTEGER NOT NULL,
            odometer_out REAL NOT NULL,
            notes TEXT,
            started_at TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_offline_checkouts_synced
            ON offline_checkouts(synced);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| migration_error(1, e))?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: photos of queued checkouts, one row each.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS offline_photos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            checkout_id INTEGER NOT NULL
                REFERENCES offline_checkouts(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            data_url TEXT NOT NULL,
            uploaded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now')),
            UNIQUE(checkout_id, position)
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| migration_error(2, e))?;

    info!("Applied migration v2 (offline_photos)");
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migration v3: retry scheduling, idempotency and remote id tracking.
/// Existing rows get an idempotency key and a status matching `synced`.
fn migrate_v3(conn: &Connection) -> Result<()> {
    let columns: &[(&str, &str)] = &[
        ("idempotency_key", "TEXT"),
        ("remote_id", "INTEGER"),
        ("status", "TEXT NOT NULL DEFAULT 'pending'"),
        ("retry_count", "INTEGER NOT NULL DEFAULT 0"),
        ("max_retries", "INTEGER NOT NULL DEFAULT 5"),
        ("next_retry_at", "TEXT"),
        ("last_error", "TEXT"),
        ("updated_at", "TEXT"),
    ];
    for (name, decl) in columns {
        if !column_exists(conn, "offline_checkouts", name)? {
            conn.execute_batch(&format!(
                "ALTER TABLE offline_checkouts ADD COLUMN {name} {decl};"
            ))
            .map_err(|e| migration_error(3, e))?;
        }
    }

    conn.execute_batch(
        "
        UPDATE offline_checkouts
            SET idempotency_key = lower(hex(randomblob(16)))
            WHERE idempotency_key IS NULL;
        UPDATE offline_checkouts SET status = 'synced' WHERE synced = 1;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_offline_checkouts_idempotency
            ON offline_checkouts(idempotency_key);
        CREATE INDEX IF NOT EXISTS idx_offline_checkouts_status_next_retry
            ON offline_checkouts(status, next_retry_at);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| migration_error(3, e))?;

    info!("Applied migration v3 (queue retry scheduling + idempotency)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )?;
    Ok(())
}

/// Delete all settings in a category.
pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// In-memory database with the full schema applied.
#[cfg(test)]
pub fn open_in_memory_for_test() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .expect("pragma setup");
        conn
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_create_queue_tables() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let tables = table_names(&conn);
        let expected_tables = [
            "local_settings",
            "offline_checkouts",
            "offline_photos",
            "schema_version",
        ];
        for expected in expected_tables {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
        assert!(column_exists(&conn, "offline_checkouts", "idempotency_key").unwrap());
        assert!(column_exists(&conn, "offline_checkouts", "next_retry_at").unwrap());

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run");
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION as i64);
        assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migration_v3_backfills_existing_rows() {
        let conn = test_db();
        conn.execute_batch(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TEXT);",
        )
        .unwrap();
        migrate_v1(&conn).unwrap();
        migrate_v2(&conn).unwrap();
        conn.execute(
            "INSERT INTO offline_checkouts (user_id, vehicle_id, odometer_out, started_at, synced)
             VALUES (1, 2, 100.0, '2026-01-01T08:00:00Z', 0),
                    (1, 3, 50.0, '2026-01-01T09:00:00Z', 1)",
            [],
        )
        .unwrap();

        run_migrations(&conn).expect("upgrade to v3");

        let (pending_key, pending_status): (Option<String>, String) = conn
            .query_row(
                "SELECT idempotency_key, status FROM offline_checkouts WHERE vehicle_id = 2",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(pending_key.map(|k| k.len()), Some(32));
        assert_eq!(pending_status, "pending");

        let synced_status: String = conn
            .query_row(
                "SELECT status FROM offline_checkouts WHERE vehicle_id = 3",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(synced_status, "synced");
    }

    #[test]
    fn test_photos_cascade_with_checkout() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO offline_checkouts
                 (user_id, vehicle_id, odometer_out, started_at, idempotency_key)
             VALUES (1, 1, 10.0, '2026-01-01T08:00:00Z', 'k1')",
            [],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO offline_photos (checkout_id, position, file_name, data_url)
             VALUES (?1, 0, 'a.jpg', 'data:image/jpeg;base64,AA==')",
            params![id],
        )
        .unwrap();
        conn.execute("DELETE FROM offline_checkouts WHERE id = ?1", params![id])
            .unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM offline_photos", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_wal_mode_on_file_db() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = init(dir.path()).expect("init");
        let conn = state.lock().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(state.db_path.ends_with(DB_FILE_NAME));
    }

    #[test]
    fn test_settings_crud() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        set_setting(&conn, "session", "login", "jdoe").expect("set");
        assert_eq!(get_setting(&conn, "session", "login"), Some("jdoe".to_string()));

        set_setting(&conn, "session", "login", "mary").expect("update");
        assert_eq!(get_setting(&conn, "session", "login"), Some("mary".to_string()));

        delete_setting(&conn, "session", "login").expect("delete one");
        assert!(get_setting(&conn, "session", "login").is_none());

        set_setting(&conn, "session", "a", "1").unwrap();
        set_setting(&conn, "session", "b", "2").unwrap();
        set_setting(&conn, "api", "base_url", "http://x").unwrap();
        delete_all_settings(&conn, "session").expect("delete category");
        assert!(get_setting(&conn, "session", "a").is_none());
        assert_eq!(get_setting(&conn, "api", "base_url"), Some("http://x".into()));
    }
}
