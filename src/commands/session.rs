use crate::auth;
use crate::checkout::{self, CheckoutFlow, CheckoutState};
use crate::views;

use super::Context;

pub async fn login(ctx: &Context, login: &str, password: &str) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = auth::login(&api, &ctx.db, ctx.creds.as_ref(), login, password).await?;
    println!("Bem-vindo, {}", session.display_name);
    if session.is_admin {
        println!("Perfil: administrador");
    }
    Ok(())
}

pub fn logout(ctx: &Context) -> anyhow::Result<()> {
    auth::logout(&ctx.db, ctx.creds.as_ref())?;
    println!("Sessão encerrada");
    Ok(())
}

/// Verify the stored session and print the panel the user lands on.
pub async fn whoami(ctx: &Context) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let Some(session) = auth::restore_verified(&api, &ctx.db, ctx.creds.as_ref()).await? else {
        let panel = views::resolve_panel(None, &CheckoutState::NoActiveCheckout, Vec::new());
        println!("Tela: {}", panel.title());
        return Ok(());
    };
    let flow = CheckoutFlow::resolve_initial(&api, &session).await;
    let vehicles = if session.is_admin || flow.is_open() {
        Vec::new()
    } else {
        checkout::available_vehicles(&api, &session)
            .await
            .unwrap_or_default()
    };
    let panel = views::resolve_panel(Some(&session), flow.state(), vehicles);

    println!(
        "{} ({}){}",
        session.display_name,
        session.login,
        if session.is_admin { " [admin]" } else { "" }
    );
    println!("Tela: {}", panel.title());
    match &panel {
        views::Panel::Checkout { vehicles } => print!("{}", views::render_vehicles(vehicles)),
        views::Panel::Return { checkout } => print!("{}", views::render_checkout(checkout)),
        views::Panel::Login | views::Panel::Admin => {}
    }
    Ok(())
}
