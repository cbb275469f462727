use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::ColetaApi;
use crate::cli::SyncCommand;
use crate::sync::{self, SyncState};
use crate::views;

use super::Context;

pub async fn run(ctx: &Context, cmd: SyncCommand) -> anyhow::Result<()> {
    match cmd {
        SyncCommand::Status => {
            print!("{}", views::render_queue_status(&sync::status(&ctx.db)?));
        }
        SyncCommand::List => {
            print!("{}", views::render_queue(&sync::pending(&ctx.db)?));
        }
        SyncCommand::Drain => {
            let api = ctx.client()?;
            let session = ctx.session()?;
            let report = sync::drain(&api, &ctx.db, &session, Utc::now()).await?;
            print!("{}", views::render_drain_report(&report));
        }
        SyncCommand::Watch => watch(ctx).await?,
        SyncCommand::Retry => {
            let n = sync::retry_failed(&ctx.db)?;
            println!("{n} registro(s) recolocado(s) na fila");
        }
        SyncCommand::Clear => {
            let n = sync::clear_synced(&ctx.db)?;
            println!("{n} registro(s) removido(s)");
        }
    }
    Ok(())
}

/// Run the background loop until Ctrl-C or until the server rejects the
/// session.
async fn watch(ctx: &Context) -> anyhow::Result<()> {
    let api: Arc<dyn ColetaApi> = Arc::new(ctx.client()?);
    let session = ctx.session()?;
    let state = Arc::new(SyncState::new());
    let cancel = CancellationToken::new();

    let handle = sync::start_sync_loop(
        api,
        ctx.db.clone(),
        session,
        state.clone(),
        ctx.config.sync_interval,
        cancel.clone(),
    );
    println!(
        "Sincronizando a cada {}s (Ctrl-C para sair)",
        ctx.config.sync_interval.as_secs()
    );

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping sync loop");
            ctrl_c.cancel();
        }
    });

    handle.await?;
    let last = state
        .last_sync
        .lock()
        .ok()
        .and_then(|guard| guard.clone());
    println!(
        "Sincronização encerrada (última: {})",
        last.as_deref().unwrap_or("nunca")
    );
    Ok(())
}
