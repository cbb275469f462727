use chrono::Utc;

use crate::checkout::{self, CheckoutFlow};
use crate::cli::{Photos, Reading};
use crate::error::Result;
use crate::photos::PhotoRef;
use crate::sync;
use crate::views;

use super::Context;

fn load_photos(photos: &Photos) -> Result<Vec<PhotoRef>> {
    photos
        .files
        .iter()
        .map(|path| PhotoRef::from_path(path))
        .collect()
}

pub async fn vehicles(ctx: &Context) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;
    let vehicles = checkout::available_vehicles(&api, &session).await?;
    print!("{}", views::render_vehicles(&vehicles));
    Ok(())
}

pub async fn active(ctx: &Context) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;
    let flow = CheckoutFlow::load_active(&api, &session).await?;
    match flow.current() {
        Some(checkout) => print!("{}", views::render_checkout(checkout)),
        None => println!("Nenhuma coleta ativa"),
    }
    Ok(())
}

pub async fn retirar(
    ctx: &Context,
    vehicle_id: i64,
    reading: Reading,
    photos: Photos,
    offline: bool,
) -> anyhow::Result<()> {
    let session = ctx.session()?;
    let attachments = load_photos(&photos)?;

    if offline {
        let queued = sync::enqueue(
            &ctx.db,
            &session,
            vehicle_id,
            reading.km,
            reading.notes.as_deref(),
            attachments,
            Utc::now(),
        )?;
        println!(
            "Coleta guardada para sincronização (fila #{}, {} foto(s))",
            queued.id,
            queued.photos.len()
        );
        return Ok(());
    }

    sync::ensure_nothing_queued(&ctx.db, &session)?;
    let api = ctx.client()?;
    let mut flow = CheckoutFlow::resolve_initial(&api, &session).await;
    let outcome = match flow
        .retirar(
            &api,
            &session,
            vehicle_id,
            reading.km,
            reading.notes.as_deref(),
            &attachments,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(e) if e.is_transient() => {
            return Err(anyhow::Error::new(e)
                .context("Servidor indisponível; tente novamente ou use --offline"));
        }
        Err(e) => return Err(e.into()),
    };
    println!("Veículo retirado");
    print!("{}", views::render_checkout(&outcome.checkout));
    print!("{}", views::render_photo_report(&outcome.photos));
    Ok(())
}

pub async fn devolver(ctx: &Context, reading: Reading, photos: Photos) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;
    let attachments = load_photos(&photos)?;

    let mut flow = CheckoutFlow::load_active(&api, &session).await?;
    let outcome = flow
        .devolver(
            &api,
            &session,
            reading.km,
            reading.notes.as_deref(),
            &attachments,
        )
        .await?;
    println!(
        "Veículo devolvido: coleta #{}, {:.1} km rodados",
        outcome.receipt.id, outcome.distance
    );
    print!("{}", views::render_photo_report(&outcome.photos));
    Ok(())
}

pub async fn start_leg(ctx: &Context, reading: Reading) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;
    let mut flow = CheckoutFlow::load_active(&api, &session).await?;
    let leg = flow
        .start_leg(&api, &session, reading.km, reading.notes.as_deref())
        .await?;
    println!("Saída registrada: viagem {}", leg.number);
    Ok(())
}

pub async fn end_leg(ctx: &Context, reading: Reading) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;
    let mut flow = CheckoutFlow::load_active(&api, &session).await?;
    let leg = flow
        .end_leg(&api, &session, reading.km, reading.notes.as_deref())
        .await?;
    match leg.distance {
        Some(km) => println!("Retorno registrado: viagem {}, {km:.1} km", leg.number),
        None => println!("Retorno registrado: viagem {}", leg.number),
    }
    Ok(())
}

pub async fn legs(ctx: &Context) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;
    let mut flow = CheckoutFlow::load_active(&api, &session).await?;
    let list = flow.list_legs(&api, &session).await?;
    print!("{}", views::render_legs(&list));
    Ok(())
}

pub async fn history(ctx: &Context) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;
    let checkouts = checkout::my_checkouts(&api, &session).await?;
    if checkouts.is_empty() {
        println!("Nenhuma coleta registrada");
    }
    for c in &checkouts {
        let plate = c.vehicle.as_ref().map_or("-", |v| v.plate.as_str());
        println!(
            "#{:<5} {:<10} {} viagem(ns) {:>8.1} km{}",
            c.id,
            plate,
            c.total_legs,
            c.total_km,
            if c.active { "  (ativa)" } else { "" }
        );
    }
    Ok(())
}
