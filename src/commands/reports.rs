use chrono::Utc;

use crate::admin::can_correct_odometer;
use crate::cli::ReportCommand;
use crate::reports;
use crate::views;

use super::Context;

pub async fn run(ctx: &Context, cmd: ReportCommand) -> anyhow::Result<()> {
    let api = ctx.client()?;
    let session = ctx.session()?;
    let today = Utc::now().date_naive();

    match cmd {
        ReportCommand::Km { period } => {
            let view = reports::km_report(&api, &session, period).await?;
            print!("{}", views::render_km_report(&view));
        }
        ReportCommand::Periodo { period } => {
            let selection = period.selection(today)?;
            let report = reports::period_report(&api, &session, &selection).await?;
            println!("{}", selection.label());
            print!("{}", views::render_period_report(&report));
        }
        ReportCommand::Usuario { login, period } => {
            let selection = period.selection(today)?;
            let report = reports::user_period_report(&api, &session, &login, &selection).await?;
            let today_key = today.format("%Y-%m-%d").to_string();
            let editable = can_correct_odometer(&session, &today_key, today)
                .then_some(today_key.as_str());
            print!("{}", views::render_user_period(&report, editable));
        }
        ReportCommand::Detalhado => {
            let report = reports::detailed_report(&api, &session).await?;
            for v in &report.vehicles {
                println!(
                    "{:<10} {} {}  total {:.1} km",
                    v.plate, v.make, v.model, v.km_total
                );
            }
            for d in &report.drivers {
                println!(
                    "{} ({}): {} coleta(s), {:.1} km",
                    d.name, d.login, d.total_coletas, d.total_km
                );
                for c in &d.checkouts {
                    println!(
                        "  #{:<5} {:<10} {:.1} km, {} viagem(ns)",
                        c.coleta_id,
                        c.plate,
                        c.km_total,
                        c.legs.len()
                    );
                }
            }
        }
        ReportCommand::Fotos { login } => {
            let gallery = reports::user_photos(&api, &session, &login).await?;
            print!("{}", views::render_gallery(&gallery));
        }
    }
    Ok(())
}
