//! Command-line surface.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigArgs;
use crate::error::Result;
use crate::reports::{Period, PeriodSelection};

#[derive(Debug, Parser)]
#[command(name = "coleta", version, about = "Retirada e devolução de veículos da frota")]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in and remember the session.
    Login {
        login: String,
        #[arg(long, env = "COLETA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session.
    Logout,
    /// Show the signed-in user and the screen they would land on.
    Whoami,
    /// Vehicles available for checkout.
    Veiculos,
    /// Show the open checkout, if any.
    Ativa,
    /// Check out a vehicle.
    Retirar {
        vehicle_id: i64,
        #[command(flatten)]
        reading: Reading,
        #[command(flatten)]
        photos: Photos,
        /// Store the checkout locally and send it with `sync drain`.
        #[arg(long)]
        offline: bool,
    },
    /// Return the vehicle of the open checkout.
    Devolver {
        #[command(flatten)]
        reading: Reading,
        #[command(flatten)]
        photos: Photos,
    },
    /// Leave on a leg of the open checkout.
    Sair {
        #[command(flatten)]
        reading: Reading,
    },
    /// Come back from the current leg.
    Retornar {
        #[command(flatten)]
        reading: Reading,
    },
    /// Legs of the open checkout.
    Viagens,
    /// The driver's checkouts.
    Historico,
    #[command(subcommand)]
    Sync(SyncCommand),
    #[command(subcommand)]
    Admin(AdminCommand),
    #[command(subcommand)]
    Relatorio(ReportCommand),
    /// Version and build information.
    About,
    /// Server reachability and local queue state.
    Health,
}

#[derive(Debug, Clone, Args)]
pub struct Reading {
    /// Odometer reading in km.
    #[arg(long)]
    pub km: f64,
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct Photos {
    /// Photo file; repeat for several.
    #[arg(long = "photo", value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum SyncCommand {
    /// Queue counts and last sync time.
    Status,
    /// Unsynced queued checkouts.
    List,
    /// Replay due records once.
    Drain,
    /// Keep draining in the background until Ctrl-C.
    Watch,
    /// Requeue records parked as failed.
    Retry,
    /// Delete synced records.
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    Users,
    AddUser {
        login: String,
        name: String,
        #[arg(long, env = "COLETA_NEW_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        admin: bool,
    },
    DelUser {
        login: String,
    },
    Password {
        login: String,
        #[arg(long, env = "COLETA_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    SetAdmin {
        login: String,
        /// Revoke instead of grant.
        #[arg(long)]
        off: bool,
    },
    Vehicles,
    AddVehicle {
        plate: String,
        make: String,
        model: String,
        year: i32,
    },
    DelVehicle {
        vehicle_id: i64,
    },
    /// Correct the KM of a use made today.
    EditKm {
        checkout_id: i64,
        /// Day of the use, `YYYY-MM-DD`.
        #[arg(long)]
        day: String,
        #[arg(long)]
        km_retirada: f64,
        #[arg(long)]
        km_devolucao: f64,
    },
}

#[derive(Debug, Clone, Args)]
pub struct PeriodArgs {
    /// dia, semana, mes or total.
    #[arg(long, default_value = "dia", conflicts_with_all = ["from", "to", "custom"])]
    pub period: Period,
    /// Custom range; the last 30 days unless `--from`/`--to` are given.
    #[arg(long)]
    pub custom: bool,
    /// Start of a custom range, `YYYY-MM-DD`.
    #[arg(long)]
    pub from: Option<String>,
    /// End of a custom range, `YYYY-MM-DD`.
    #[arg(long)]
    pub to: Option<String>,
}

impl PeriodArgs {
    pub fn selection(&self, today: NaiveDate) -> Result<PeriodSelection> {
        if self.from.is_some() || self.to.is_some() {
            PeriodSelection::custom_range(self.from.as_deref(), self.to.as_deref())
        } else if self.custom {
            Ok(PeriodSelection::default_custom(today))
        } else {
            Ok(PeriodSelection::Preset(self.period))
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// KM per vehicle for one period tab.
    Km {
        #[arg(long, default_value = "dia")]
        period: Period,
    },
    /// Fleet statistics for a period.
    Periodo {
        #[command(flatten)]
        period: PeriodArgs,
    },
    /// Usage of one driver, optionally filtered by period.
    Usuario {
        login: String,
        #[command(flatten)]
        period: PeriodArgs,
    },
    /// Per-vehicle and per-driver detail.
    Detalhado,
    /// Photos of one driver grouped by day.
    Fotos {
        login: String,
    },
}
