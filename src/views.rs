//! Screen selection and plain-text rendering of view-models.

use chrono::{DateTime, Local, Utc};

use crate::auth::Session;
use crate::checkout::CheckoutState;
use crate::models::{Checkout, LegList, PeriodReport, UserPeriodReport, Vehicle};
use crate::photos::PhotoReport;
use crate::reports::{KmReportView, PhotoGallery};
use crate::sync::{DrainReport, QueueStatus, QueueSummary, QueuedCheckout};

/// Which screen the user should be looking at.
#[derive(Debug, Clone, PartialEq)]
pub enum Panel {
    Login,
    Checkout { vehicles: Vec<Vehicle> },
    Return { checkout: Checkout },
    Admin,
}

impl Panel {
    pub fn title(&self) -> &'static str {
        match self {
            Panel::Login => "Login",
            Panel::Checkout { .. } => "Retirar veículo",
            Panel::Return { .. } => "Devolver veículo",
            Panel::Admin => "Administração",
        }
    }
}

/// No session shows the login; admins land on the admin panel; a driver
/// with an open checkout sees the return screen.
pub fn resolve_panel(
    session: Option<&Session>,
    state: &CheckoutState,
    vehicles: Vec<Vehicle>,
) -> Panel {
    let Some(session) = session else {
        return Panel::Login;
    };
    if session.is_admin {
        return Panel::Admin;
    }
    match state {
        CheckoutState::CheckoutOpen(checkout) => Panel::Return {
            checkout: checkout.clone(),
        },
        CheckoutState::NoActiveCheckout => Panel::Checkout { vehicles },
    }
}

fn km(value: f64) -> String {
    format!("{value:.1} km")
}

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.with_timezone(&Local).format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_vehicles(vehicles: &[Vehicle]) -> String {
    if vehicles.is_empty() {
        return "Nenhum veículo disponível\n".to_string();
    }
    let mut out = String::new();
    for v in vehicles {
        out.push_str(&format!("{:>4}  {}\n", v.id, v.label()));
    }
    out
}

pub fn render_checkout(checkout: &Checkout) -> String {
    let vehicle = checkout
        .vehicle
        .as_ref()
        .map(Vehicle::label)
        .unwrap_or_else(|| format!("veículo #{}", checkout.vehicle_id));
    let mut out = format!("Coleta #{}  {}\n", checkout.id, vehicle);
    out.push_str(&format!("  Retirada: {}\n", when(checkout.started_at)));
    out.push_str(&format!("  KM retirada: {}\n", km(checkout.odometer_out)));
    if let Some(notes) = &checkout.notes_out {
        out.push_str(&format!("  Obs: {notes}\n"));
    }
    if let Some(leg) = checkout.open_leg() {
        out.push_str(&format!(
            "  Em trajeto: viagem {} desde {}\n",
            leg.number,
            when(leg.departed_at)
        ));
    }
    out
}

pub fn render_legs(list: &LegList) -> String {
    let mut out = format!(
        "Coleta #{}: {} viagem(ns), {}\n",
        list.checkout_id,
        list.total_legs,
        km(list.total_km)
    );
    for leg in &list.legs {
        let distance = leg.distance.map(km).unwrap_or_else(|| "em andamento".into());
        out.push_str(&format!(
            "  {:>2}. {} -> {}  {}\n",
            leg.number,
            when(leg.departed_at),
            when(leg.returned_at),
            distance
        ));
    }
    out
}

pub fn render_photo_report(report: &PhotoReport) -> String {
    report
        .notifications()
        .into_iter()
        .map(|line| format!("{line}\n"))
        .collect()
}

pub fn render_km_report(view: &KmReportView) -> String {
    let mut out = format!("Período: {}\n", view.period.label());
    if view.is_empty() {
        out.push_str("Nenhum dado disponível\n");
        return out;
    }
    for row in &view.rows {
        out.push_str(&format!(
            "  {:<10} {:<20} {:>12}\n",
            row.plate,
            row.description,
            km(row.km)
        ));
    }
    out.push_str(&format!("  {:<31} {:>12}\n", "Total", km(view.total_km)));
    out
}

pub fn render_period_report(report: &PeriodReport) -> String {
    let stats = &report.stats;
    let mut out = format!(
        "Período: {}\n",
        report.period.as_deref().unwrap_or("-")
    );
    out.push_str(&format!(
        "  {} | {} coleta(s) | {} uso(s) | {} veículo(s) | {} motorista(s)\n",
        km(stats.km_total),
        stats.total_coletas,
        stats.total_usos,
        stats.veiculos_ativos,
        stats.motoristas_ativos
    ));
    if !report.by_vehicle.is_empty() {
        out.push_str("Por veículo:\n");
        for v in &report.by_vehicle {
            out.push_str(&format!(
                "  {:<10} {:>4} uso(s) {:>12}\n",
                v.plate,
                v.total_usos,
                km(v.km_periodo)
            ));
        }
    }
    if !report.by_driver.is_empty() {
        out.push_str("Por motorista:\n");
        for d in &report.by_driver {
            out.push_str(&format!(
                "  {:<20} {:>4} coleta(s) {:>12}\n",
                d.name,
                d.total_coletas,
                km(d.km_periodo)
            ));
        }
    }
    out
}

/// Daily usage of one driver. `editable_day` marks the day whose KM an
/// admin may still correct.
pub fn render_user_period(report: &UserPeriodReport, editable_day: Option<&str>) -> String {
    let mut out = format!(
        "{} ({}): {}, {} coleta(s)\n",
        report.name,
        report.login,
        km(report.stats.km_total),
        report.stats.total_coletas
    );
    for day in &report.by_day {
        out.push_str(&format!(
            "{}  {}  {} uso(s)\n",
            day.date,
            km(day.km_total_dia),
            day.total_usos
        ));
        let editable = editable_day == Some(day.date.as_str());
        for u in &day.uses {
            out.push_str(&format!(
                "  #{:<5} {:<10} {} - {}  {}{}\n",
                u.coleta_id,
                u.plate,
                u.departed.as_deref().unwrap_or("-"),
                u.arrived.as_deref().unwrap_or("-"),
                km(u.distance),
                if editable { "  [editar km]" } else { "" }
            ));
        }
    }
    out
}

pub fn render_gallery(gallery: &PhotoGallery) -> String {
    let mut out = format!("Fotos de {} ({})\n", gallery.name, gallery.total());
    for day in &gallery.days {
        out.push_str(&format!("{}:\n", day.date));
        for p in &day.photos {
            out.push_str(&format!(
                "  {}  {:<8} {}\n",
                when(p.taken_at),
                p.etapa.as_deref().unwrap_or("-"),
                p.remote_path
            ));
        }
    }
    out
}

pub fn render_queue_status(summary: &QueueSummary) -> String {
    let mut out = format!(
        "Fila offline: {} pendente(s), {} sincronizada(s), {} com falha\n",
        summary.pending, summary.synced, summary.failed
    );
    if let Some(next) = &summary.next_retry_at {
        out.push_str(&format!("  Próxima tentativa: {next}\n"));
    }
    out.push_str(&format!(
        "  Última sincronização: {}\n",
        summary.last_sync.as_deref().unwrap_or("nunca")
    ));
    out
}

pub fn render_queue(records: &[QueuedCheckout]) -> String {
    if records.is_empty() {
        return "Fila offline vazia\n".to_string();
    }
    let mut out = String::new();
    for r in records {
        let uploaded = r.photos.iter().filter(|p| p.uploaded).count();
        out.push_str(&format!(
            "#{:<4} {:<7} veículo {} km {} fotos {}/{} tentativas {}/{}",
            r.id,
            r.status.as_str(),
            r.vehicle_id,
            r.odometer_out,
            uploaded,
            r.photos.len(),
            r.retry_count,
            r.max_retries
        ));
        if r.status != QueueStatus::Synced {
            if let Some(err) = &r.last_error {
                out.push_str(&format!("  erro: {err}"));
            }
        }
        out.push('\n');
    }
    out
}

pub fn render_drain_report(report: &DrainReport) -> String {
    let mut out = format!(
        "{} sincronizada(s), {} com falha, {} adiada(s)\n",
        report.synced, report.failed, report.deferred
    );
    out.push_str(&render_photo_report(&PhotoReport {
        photos_uploaded: report.photos_uploaded,
        photos_failed: report.photos_failed,
    }));
    out
}
