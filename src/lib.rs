//! Coleta client library.
//!
//! Drivers check vehicles out (`retirar`) and back in (`devolver`) against
//! the coleta REST API; admins manage users and vehicles and read KM
//! reports. Checkouts recorded offline are queued in SQLite and replayed.

use clap::Parser;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub mod admin;
pub mod api;
pub mod auth;
pub mod checkout;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod photos;
pub mod reports;
pub mod storage;
pub mod sync;
pub mod views;

#[cfg(test)]
mod test_support;

pub use error::{ColetaError, Result};

const DEFAULT_LOG_FILTER: &str = "info,coleta_lib=debug";
const CONSOLE_LOG_FILTER: &str = "warn";

/// Structured logging: a daily rolling file in `log_dir` plus warnings on
/// stderr. `RUST_LOG` overrides both filters.
fn init_logging(log_dir: &Path) {
    diagnostics::prune_old_logs(log_dir);
    std::fs::create_dir_all(log_dir).ok();

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(CONSOLE_LOG_FILTER));

    let file_appender =
        tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_filter(file_filter);
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);
    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    // The guard flushes on drop; the process owns it until exit.
    std::mem::forget(guard);
}

/// Entry point of the `coleta` binary.
pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = config::AppConfig::from_args(&cli.config)?;

    init_logging(&config.log_dir());
    info!(
        "Starting coleta v{} (data dir {})",
        env!("CARGO_PKG_VERSION"),
        config.data_dir.display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let ctx = commands::Context::open(config)?;
        commands::dispatch(&ctx, cli.command).await
    })
}
