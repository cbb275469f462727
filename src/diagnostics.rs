//! Diagnostics for the coleta client.
//!
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Health**: server reachability, schema version, offline queue backlog
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::api::ColetaApi;
use crate::db::{self, DbState};
use crate::error::Result;
use crate::sync::{self, QueueSummary};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the rolling log (`coleta.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "coleta";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub git_sha: &'static str,
    pub platform: &'static str,
    pub arch: &'static str,
}

pub fn about_info() -> AboutInfo {
    AboutInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        git_sha: env!("BUILD_GIT_SHA"),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub api_url: Option<String>,
    pub online: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub schema_version: i32,
    pub db_size_bytes: u64,
    pub queue: QueueSummary,
}

/// Local state first, then one connectivity probe. The database lock is
/// released before the probe is awaited.
pub async fn health(
    api: Option<&dyn ColetaApi>,
    api_url: Option<String>,
    db_state: &DbState,
) -> Result<HealthReport> {
    let schema_version = {
        let conn = db_state.lock()?;
        db::schema_version(&conn)
    };
    let queue = sync::status(db_state)?;
    let db_size_bytes = fs::metadata(&db_state.db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let (online, latency_ms, error) = match api {
        Some(api) => {
            let probe = api.check_health().await;
            (probe.success, probe.latency_ms, probe.error)
        }
        None => (false, None, Some("API URL not configured".to_string())),
    };

    Ok(HealthReport {
        api_url,
        online,
        latency_ms,
        error,
        schema_version,
        db_size_bytes,
        queue,
    })
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeApi;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_about_info_has_required_fields() {
        let info = serde_json::to_value(about_info()).unwrap();
        assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
    }

    #[test]
    fn test_prune_keeps_newest_logs() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for i in 0..12u64 {
            let path = dir.path().join(format!("coleta.2026-03-{:02}", i + 1));
            fs::write(&path, b"log").unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(base + Duration::from_secs(i * 60)).unwrap();
        }
        fs::write(dir.path().join("other.txt"), b"keep").unwrap();

        prune_old_logs(dir.path());

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), MAX_LOG_FILES + 1);
        assert!(!names.contains(&"coleta.2026-03-01".to_string()));
        assert!(!names.contains(&"coleta.2026-03-02".to_string()));
        assert!(names.contains(&"other.txt".to_string()));
    }

    #[tokio::test]
    async fn test_health_with_empty_db() {
        let dir = tempfile::tempdir().unwrap();
        let db_state = db::init(dir.path()).unwrap();
        let api = FakeApi::new();

        let report = health(Some(&api), Some("http://localhost:8000".into()), &db_state)
            .await
            .unwrap();
        assert!(report.online);
        assert!(report.schema_version >= 3);
        assert_eq!(report.queue.pending, 0);

        api.set_online(false);
        let offline = health(Some(&api), None, &db_state).await.unwrap();
        assert!(!offline.online);
        assert!(offline.error.is_some());

        let unconfigured = health(None, None, &db_state).await.unwrap();
        assert!(!unconfigured.online);
    }
}
