//! Wire types for the coleta API.
//!
//! The API speaks Portuguese field names (`km_retirada`, `placa`, ...); the
//! Rust side uses English names and maps them with `serde(rename)`. Every
//! optional field defaults so that older servers which omit a field still
//! decode.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Parse a timestamp as emitted by the API. Accepts RFC 3339 and the naive
/// `YYYY-MM-DDTHH:MM:SS[.ffffff]` form (interpreted as UTC).
pub fn parse_api_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn de_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_api_datetime))
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub usuario_id: &'a str,
    pub senha: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(rename = "usuario_id")]
    pub user_id: i64,
    #[serde(rename = "usuario_nome")]
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

// ---------------------------------------------------------------------------
// Vehicles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    #[serde(rename = "placa")]
    pub plate: String,
    #[serde(rename = "marca", default)]
    pub make: String,
    #[serde(rename = "modelo", default)]
    pub model: String,
    #[serde(rename = "ano", default)]
    pub year: Option<i32>,
    #[serde(rename = "ativo", default = "default_true")]
    pub active: bool,
}

impl Vehicle {
    /// `ABC1234 - Fiat Uno`, the label used in vehicle pickers.
    pub fn label(&self) -> String {
        let name = format!("{} {}", self.make, self.model);
        let name = name.trim();
        if name.is_empty() {
            self.plate.clone()
        } else {
            format!("{} - {}", self.plate, name)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewVehicle {
    #[serde(rename = "placa")]
    pub plate: String,
    #[serde(rename = "marca")]
    pub make: String,
    #[serde(rename = "modelo")]
    pub model: String,
    #[serde(rename = "ano")]
    pub year: i32,
}

// ---------------------------------------------------------------------------
// Checkouts
// ---------------------------------------------------------------------------

/// Body of every odometer-recording call (retirar, sair, retornar, devolver).
#[derive(Debug, Clone, Serialize)]
pub struct OdometerEntry {
    pub km: f64,
    #[serde(rename = "observacoes", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One leg ("viagem") inside an open checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "numero", alias = "numero_viagem", default)]
    pub number: i64,
    #[serde(rename = "saida_horario", default, deserialize_with = "de_datetime")]
    pub departed_at: Option<DateTime<Utc>>,
    #[serde(rename = "saida_km", default)]
    pub odometer_departure: Option<f64>,
    #[serde(rename = "retorno_horario", default, deserialize_with = "de_datetime")]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(rename = "retorno_km", default)]
    pub odometer_return: Option<f64>,
    #[serde(rename = "km_rodado", default)]
    pub distance: Option<f64>,
}

impl Leg {
    pub fn is_open(&self) -> bool {
        self.returned_at.is_none() && self.odometer_return.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkout {
    pub id: i64,
    #[serde(rename = "veiculo_id")]
    pub vehicle_id: i64,
    #[serde(rename = "veiculo", default)]
    pub vehicle: Option<Vehicle>,
    #[serde(rename = "km_retirada")]
    pub odometer_out: f64,
    #[serde(rename = "km_devolucao", default)]
    pub odometer_in: Option<f64>,
    #[serde(rename = "observacoes_retirada", default)]
    pub notes_out: Option<String>,
    #[serde(rename = "observacoes_devolucao", default)]
    pub notes_in: Option<String>,
    #[serde(rename = "data_retirada", default, deserialize_with = "de_datetime")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "data_devolucao", default, deserialize_with = "de_datetime")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "ativo", default = "default_true")]
    pub active: bool,
    #[serde(rename = "viagens", default)]
    pub legs: Vec<Leg>,
}

impl Checkout {
    pub fn is_open(&self) -> bool {
        self.active && self.odometer_in.is_none()
    }

    pub fn open_leg(&self) -> Option<&Leg> {
        self.legs.iter().find(|leg| leg.is_open())
    }

    pub fn plate(&self) -> Option<&str> {
        self.vehicle.as_ref().map(|v| v.plate.as_str())
    }
}

/// Response of `POST /api/coleta/{id}/devolver`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReturnReceipt {
    pub id: i64,
    #[serde(rename = "data_devolucao", default, deserialize_with = "de_datetime")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "km_devolucao")]
    pub odometer_in: f64,
    #[serde(rename = "observacoes_devolucao", default)]
    pub notes_in: Option<String>,
    #[serde(rename = "ativo", default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegList {
    #[serde(rename = "coleta_id")]
    pub checkout_id: i64,
    #[serde(rename = "total_viagens", default)]
    pub total_legs: i64,
    #[serde(default)]
    pub total_km: f64,
    #[serde(rename = "viagens", default)]
    pub legs: Vec<Leg>,
}

/// Row of `GET /api/coleta/minhas-coletas`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSummary {
    pub id: i64,
    #[serde(rename = "veiculo", default)]
    pub vehicle: Option<Vehicle>,
    #[serde(rename = "data_retirada", default, deserialize_with = "de_datetime")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "data_devolucao", default, deserialize_with = "de_datetime")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "ativo", default)]
    pub active: bool,
    #[serde(rename = "total_viagens", default)]
    pub total_legs: i64,
    #[serde(default)]
    pub total_km: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadedPhoto {
    pub id: i64,
    #[serde(rename = "caminho")]
    pub remote_path: String,
    #[serde(rename = "tamanho_mb", default)]
    pub size_mb: f64,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Login handle (e.g. `MOTO001`).
    #[serde(rename = "usuario_id")]
    pub login: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(rename = "ativo", default = "default_true")]
    pub active: bool,
    #[serde(rename = "criado_em", default, deserialize_with = "de_datetime")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    #[serde(rename = "usuario_id")]
    pub login: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "senha")]
    pub password: String,
    pub is_admin: bool,
}

/// `{"mensagem": "..."}` acknowledgements from admin endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {
    #[serde(rename = "mensagem", default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Per-vehicle KM totals from `GET /api/admin/relatorios`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleKmSummary {
    #[serde(rename = "veiculo_id")]
    pub vehicle_id: i64,
    #[serde(rename = "placa")]
    pub plate: String,
    #[serde(rename = "marca", default)]
    pub make: String,
    #[serde(rename = "modelo", default)]
    pub model: String,
    #[serde(default)]
    pub km_hoje: f64,
    #[serde(default)]
    pub km_semana: f64,
    #[serde(default)]
    pub km_mes: f64,
    #[serde(default)]
    pub km_total: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryReport {
    #[serde(rename = "tipo", default)]
    pub kind: Option<String>,
    #[serde(rename = "relatorio", default)]
    pub rows: Vec<VehicleKmSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    #[serde(default)]
    pub coleta_id: Option<i64>,
    #[serde(rename = "data_retirada", default, deserialize_with = "de_datetime")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "data_devolucao", default, deserialize_with = "de_datetime")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "km_retirada", default)]
    pub odometer_out: Option<f64>,
    #[serde(rename = "km_devolucao", default)]
    pub odometer_in: Option<f64>,
    #[serde(rename = "km_rodado", default)]
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleUsage {
    #[serde(rename = "veiculo_id")]
    pub vehicle_id: i64,
    #[serde(rename = "placa")]
    pub plate: String,
    #[serde(rename = "marca", default)]
    pub make: String,
    #[serde(rename = "modelo", default)]
    pub model: String,
    #[serde(default)]
    pub km_total: f64,
    #[serde(default)]
    pub km_mes: f64,
    #[serde(rename = "total_retiradas", default)]
    pub total_checkouts: i64,
    #[serde(rename = "usos", default)]
    pub uses: Vec<UsageEntry>,
}

/// `GET /api/admin/relatorios/usuario/{id}` without a period filter.
#[derive(Debug, Clone, Deserialize)]
pub struct UserReport {
    #[serde(rename = "usuario_id")]
    pub login: String,
    #[serde(rename = "usuario_nome", default)]
    pub name: String,
    #[serde(default)]
    pub total_km: f64,
    #[serde(default)]
    pub total_km_mes: f64,
    #[serde(rename = "total_retiradas", default)]
    pub total_checkouts: i64,
    #[serde(rename = "total_veiculos_utilizados", default)]
    pub vehicles_used: i64,
    #[serde(rename = "uso_por_veiculo", default)]
    pub by_vehicle: Vec<VehicleUsage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeriodStats {
    #[serde(default)]
    pub km_total: f64,
    #[serde(default)]
    pub total_coletas: i64,
    #[serde(default)]
    pub total_usos: i64,
    #[serde(default)]
    pub media_km_por_dia: f64,
    #[serde(default)]
    pub media_km_por_coleta: f64,
    #[serde(default)]
    pub veiculos_ativos: i64,
    #[serde(default)]
    pub motoristas_ativos: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehiclePeriodRow {
    #[serde(rename = "placa")]
    pub plate: String,
    #[serde(rename = "marca", default)]
    pub make: String,
    #[serde(rename = "modelo", default)]
    pub model: String,
    #[serde(default)]
    pub total_usos: i64,
    #[serde(default)]
    pub km_periodo: f64,
    #[serde(default)]
    pub media_km_por_uso: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPeriodRow {
    #[serde(rename = "usuario_id")]
    pub login: String,
    #[serde(rename = "nome", default)]
    pub name: String,
    #[serde(default)]
    pub total_coletas: i64,
    #[serde(default)]
    pub km_periodo: f64,
    #[serde(default)]
    pub media_km_por_coleta: f64,
}

/// Query string of the period-filtered report endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodFilter {
    pub periodo: String,
    /// `YYYY-MM-DD`, only for `personalizado`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_inicio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_fim: Option<String>,
}

/// `GET /api/admin/relatorios/periodo`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriodReport {
    #[serde(rename = "periodo", default)]
    pub period: Option<String>,
    #[serde(rename = "estatisticas_gerais", default)]
    pub stats: PeriodStats,
    #[serde(rename = "por_veiculo", default)]
    pub by_vehicle: Vec<VehiclePeriodRow>,
    #[serde(rename = "por_motorista", default)]
    pub by_driver: Vec<DriverPeriodRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUse {
    pub coleta_id: i64,
    #[serde(rename = "veiculo_placa", default)]
    pub plate: String,
    #[serde(rename = "hora_saida", default)]
    pub departed: Option<String>,
    #[serde(rename = "hora_chegada", default)]
    pub arrived: Option<String>,
    #[serde(rename = "km_retirada", default)]
    pub odometer_out: f64,
    #[serde(rename = "km_devolucao", default)]
    pub odometer_in: f64,
    #[serde(rename = "km_rodado", default)]
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    /// `YYYY-MM-DD`.
    #[serde(rename = "data")]
    pub date: String,
    #[serde(default)]
    pub total_usos: i64,
    #[serde(default)]
    pub km_total_dia: f64,
    #[serde(rename = "usos", default)]
    pub uses: Vec<DailyUse>,
}

/// `GET /api/admin/relatorios/usuario/{id}?periodo=...`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserPeriodReport {
    #[serde(rename = "usuario_id")]
    pub login: String,
    #[serde(rename = "usuario_nome", default)]
    pub name: String,
    #[serde(rename = "estatisticas", default)]
    pub stats: PeriodStats,
    #[serde(rename = "uso_por_dia", default)]
    pub by_day: Vec<DailyUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: i64,
    pub coleta_id: i64,
    /// `saida` or `retorno`.
    #[serde(default)]
    pub etapa: Option<String>,
    #[serde(rename = "caminho")]
    pub remote_path: String,
    #[serde(rename = "criado_em", alias = "data_upload", default, deserialize_with = "de_datetime")]
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoDay {
    #[serde(rename = "data")]
    pub date: String,
    #[serde(default)]
    pub fotos: Vec<PhotoRecord>,
}

/// `GET /api/admin/fotos/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserPhotos {
    #[serde(rename = "usuario_id")]
    pub login: String,
    #[serde(rename = "usuario_nome", default)]
    pub name: String,
    #[serde(rename = "fotos_por_dia", default)]
    pub days: Vec<PhotoDay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutDetail {
    pub coleta_id: i64,
    #[serde(rename = "veiculo_placa", default)]
    pub plate: String,
    #[serde(rename = "veiculo_marca", default)]
    pub make: String,
    #[serde(rename = "veiculo_modelo", default)]
    pub model: String,
    #[serde(default)]
    pub km_total: f64,
    #[serde(rename = "data_retirada", default, deserialize_with = "de_datetime")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "data_devolucao", default, deserialize_with = "de_datetime")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "viagens", default)]
    pub legs: Vec<Leg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverDetail {
    #[serde(rename = "usuario_id")]
    pub login: String,
    #[serde(rename = "usuario_nome", default)]
    pub name: String,
    #[serde(default)]
    pub total_km: f64,
    #[serde(default)]
    pub total_coletas: i64,
    #[serde(rename = "coletas", default)]
    pub checkouts: Vec<CheckoutDetail>,
}

/// `GET /api/admin/relatorios/detalhado`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailedReport {
    #[serde(rename = "relatorio_veiculos", default)]
    pub vehicles: Vec<VehicleKmSummary>,
    #[serde(rename = "relatorio_usuarios", default)]
    pub drivers: Vec<DriverDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenCheck {
    #[serde(rename = "usuario_id")]
    pub login: String,
    #[serde(rename = "valido", default)]
    pub valid: bool,
}

/// Body of `PUT /api/admin/coleta/{id}/editar-km`.
#[derive(Debug, Clone, Serialize)]
pub struct OdometerCorrection {
    pub km_retirada: f64,
    pub km_devolucao: f64,
}
