//! Runtime configuration: CLI flags with environment fallbacks, plus the API
//! URL remembered in `local_settings` after first use.

use clap::builder::FalseyValueParser;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::api::normalize_base_url;
use crate::db::{self, DbState};
use crate::error::{ColetaError, Result};

pub const APP_DIR_NAME: &str = "coleta";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

const API_CATEGORY: &str = "api";
const KEY_BASE_URL: &str = "base_url";

#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Base URL of the coleta server, e.g. `https://frota.example.com`.
    #[arg(long, env = "COLETA_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Directory for the local database and logs.
    #[arg(long, env = "COLETA_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Seconds between offline queue drains in `sync watch`.
    #[arg(long, env = "COLETA_SYNC_INTERVAL_SECS", global = true)]
    pub sync_interval_secs: Option<u64>,

    /// Keep the token in the local database instead of the OS credential store.
    #[arg(
        long,
        env = "COLETA_NO_KEYRING",
        global = true,
        value_parser = FalseyValueParser::new()
    )]
    pub no_keyring: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Normalised URL given on the command line, if any.
    pub api_url: Option<String>,
    pub data_dir: PathBuf,
    pub sync_interval: Duration,
    pub use_keyring: bool,
}

impl AppConfig {
    pub fn from_args(args: &ConfigArgs) -> Result<Self> {
        let api_url = args
            .api_url
            .as_deref()
            .map(normalize_base_url)
            .filter(|u| !u.is_empty());
        let secs = args.sync_interval_secs.unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
        if secs == 0 {
            return Err(ColetaError::validation(
                "O intervalo de sincronização deve ser maior que zero",
            ));
        }
        let data_dir = match &args.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        Ok(Self {
            api_url,
            data_dir,
            sync_interval: Duration::from_secs(secs),
            use_keyring: !args.no_keyring,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        crate::diagnostics::log_dir(&self.data_dir)
    }

    /// URL to talk to: the explicit one (remembered for next time) or the
    /// last remembered one.
    pub fn resolve_api_url(&self, db_state: &DbState) -> Result<String> {
        let conn = db_state.lock()?;
        if let Some(url) = &self.api_url {
            if db::get_setting(&conn, API_CATEGORY, KEY_BASE_URL).as_deref() != Some(url) {
                db::set_setting(&conn, API_CATEGORY, KEY_BASE_URL, url)?;
                info!(api_url = %url, "API URL saved");
            }
            return Ok(url.clone());
        }
        db::get_setting(&conn, API_CATEGORY, KEY_BASE_URL)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ColetaError::validation(
                    "URL da API não configurada (use --api-url ou COLETA_API_URL)",
                )
            })
    }
}

/// Platform data directory joined with `coleta`: `$XDG_DATA_HOME` or
/// `~/.local/share` on Linux, `~/Library/Application Support` on macOS,
/// `%APPDATA%` on Windows.
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .ok_or_else(|| {
            ColetaError::validation("Diretório de dados indisponível (use --data-dir)")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn from_args_normalises_url_and_defaults() {
        let cfg = AppConfig::from_args(&ConfigArgs {
            api_url: Some("frota.example.com/api/".into()),
            data_dir: Some(PathBuf::from("/tmp/coleta-test")),
            ..ConfigArgs::default()
        })
        .unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("https://frota.example.com"));
        assert_eq!(cfg.sync_interval, Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS));
        assert!(cfg.use_keyring);
        assert_eq!(cfg.log_dir(), PathBuf::from("/tmp/coleta-test/logs"));

        let err = AppConfig::from_args(&ConfigArgs {
            sync_interval_secs: Some(0),
            ..ConfigArgs::default()
        })
        .unwrap_err();
        assert!(matches!(err, ColetaError::Validation(_)));
    }

    #[test]
    fn api_url_is_remembered() {
        let db_state = db::open_in_memory_for_test();
        let bare = AppConfig::from_args(&ConfigArgs {
            data_dir: Some(PathBuf::from("/tmp")),
            ..ConfigArgs::default()
        })
        .unwrap();
        assert!(bare.resolve_api_url(&db_state).is_err());

        let explicit = AppConfig {
            api_url: Some("http://localhost:8000".into()),
            ..bare.clone()
        };
        assert_eq!(
            explicit.resolve_api_url(&db_state).unwrap(),
            "http://localhost:8000"
        );
        assert_eq!(bare.resolve_api_url(&db_state).unwrap(), "http://localhost:8000");
    }

    #[test]
    #[serial]
    fn default_data_dir_is_platform_data_dir() {
        let expected = dirs::data_dir().map(|d| d.join("coleta"));
        assert_eq!(default_data_dir().ok(), expected);
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial]
    fn default_data_dir_prefers_xdg_on_linux() {
        let previous = std::env::var_os("XDG_DATA_HOME");
        std::env::set_var("XDG_DATA_HOME", "/srv/data");
        assert_eq!(default_data_dir().unwrap(), PathBuf::from("/srv/data/coleta"));
        match previous {
            Some(v) => std::env::set_var("XDG_DATA_HOME", v),
            None => std::env::remove_var("XDG_DATA_HOME"),
        }
    }

    #[test]
    #[serial]
    fn env_fallbacks_are_read_by_clap() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            config: ConfigArgs,
        }

        std::env::set_var("COLETA_SYNC_INTERVAL_SECS", "90");
        std::env::set_var("COLETA_NO_KEYRING", "1");
        let parsed = TestCli::try_parse_from(["coleta"]).unwrap();
        std::env::remove_var("COLETA_SYNC_INTERVAL_SECS");
        std::env::remove_var("COLETA_NO_KEYRING");

        let cfg = AppConfig::from_args(&parsed.config).unwrap();
        assert_eq!(cfg.sync_interval, Duration::from_secs(90));
        assert!(!cfg.use_keyring);
    }
}
