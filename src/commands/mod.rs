//! Handlers behind the CLI subcommands.
//!
//! Each handler takes the shared [`Context`], talks to the library modules
//! and prints a rendered view. Errors bubble up to `main` as `anyhow`.

use anyhow::Context as _;
use std::sync::Arc;

use crate::api::ApiClient;
use crate::auth::{self, Session};
use crate::cli::Command;
use crate::config::AppConfig;
use crate::db::{self, DbState};
use crate::error::ColetaError;
use crate::storage::{self, CredentialStore};

pub mod admin;
pub mod coleta;
pub mod diagnostics;
pub mod reports;
pub mod session;
pub mod sync;

/// Everything a handler needs: configuration, the local database and the
/// credential store.
pub struct Context {
    pub config: AppConfig,
    pub db: Arc<DbState>,
    pub creds: Box<dyn CredentialStore>,
}

impl Context {
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        let db = db::init(&config.data_dir)
            .with_context(|| format!("opening database in {}", config.data_dir.display()))?;
        let db = Arc::new(db);
        let creds = storage::open_store(config.use_keyring, db.clone());
        Ok(Self { config, db, creds })
    }

    pub fn client(&self) -> anyhow::Result<ApiClient> {
        let url = self.config.resolve_api_url(&self.db)?;
        Ok(ApiClient::new(&url)?)
    }

    /// Stored session, or `NotAuthenticated`.
    pub fn session(&self) -> anyhow::Result<Session> {
        auth::restore(&self.db, self.creds.as_ref())?
            .ok_or_else(|| ColetaError::NotAuthenticated.into())
    }
}

pub async fn dispatch(ctx: &Context, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { login, password } => session::login(ctx, &login, &password).await,
        Command::Logout => session::logout(ctx),
        Command::Whoami => session::whoami(ctx).await,
        Command::Veiculos => coleta::vehicles(ctx).await,
        Command::Ativa => coleta::active(ctx).await,
        Command::Retirar {
            vehicle_id,
            reading,
            photos,
            offline,
        } => coleta::retirar(ctx, vehicle_id, reading, photos, offline).await,
        Command::Devolver { reading, photos } => coleta::devolver(ctx, reading, photos).await,
        Command::Sair { reading } => coleta::start_leg(ctx, reading).await,
        Command::Retornar { reading } => coleta::end_leg(ctx, reading).await,
        Command::Viagens => coleta::legs(ctx).await,
        Command::Historico => coleta::history(ctx).await,
        Command::Sync(cmd) => sync::run(ctx, cmd).await,
        Command::Admin(cmd) => admin::run(ctx, cmd).await,
        Command::Relatorio(cmd) => reports::run(ctx, cmd).await,
        Command::About => diagnostics::about(),
        Command::Health => diagnostics::health(ctx).await,
    }
}
