//! Report view-models for the admin screens.
//!
//! The server does all aggregation. This module only selects the column for
//! the active period tab, sums what is displayed, validates custom date
//! ranges and orders photos for display.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::api::AdminApi;
use crate::auth::Session;
use crate::error::{ColetaError, Result};
use crate::models::{
    DetailedReport, PeriodFilter, PeriodReport, PhotoRecord, SummaryReport, UserPeriodReport,
    UserPhotos, UserReport, VehicleKmSummary,
};

/// Day key used when a photo group has no date.
pub const UNDATED_DAY: &str = "sem-data";

const DATE_FORMAT: &str = "%Y-%m-%d";
const CUSTOM_PERIOD: &str = "personalizado";
const DEFAULT_CUSTOM_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    #[default]
    Dia,
    Semana,
    Mes,
    Total,
}

impl Period {
    pub fn km(self, row: &VehicleKmSummary) -> f64 {
        match self {
            Period::Dia => row.km_hoje,
            Period::Semana => row.km_semana,
            Period::Mes => row.km_mes,
            Period::Total => row.km_total,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Dia => "Hoje",
            Period::Semana => "Última Semana",
            Period::Mes => "Último Mês",
            Period::Total => "Total",
        }
    }

    /// Value of the `periodo` query parameter.
    pub fn as_param(self) -> &'static str {
        match self {
            Period::Dia => "hoje",
            Period::Semana => "semana",
            Period::Mes => "mes",
            Period::Total => "total",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Period {
    type Err = ColetaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dia" | "hoje" => Ok(Period::Dia),
            "semana" => Ok(Period::Semana),
            "mes" | "mês" => Ok(Period::Mes),
            "total" => Ok(Period::Total),
            other => Err(ColetaError::validation(format!("Período inválido: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KmRow {
    pub vehicle_id: i64,
    pub plate: String,
    pub description: String,
    pub km: f64,
}

/// One period tab of the KM-per-vehicle summary.
#[derive(Debug, Clone, PartialEq)]
pub struct KmReportView {
    pub period: Period,
    pub rows: Vec<KmRow>,
    pub total_km: f64,
}

impl KmReportView {
    pub fn build(report: &SummaryReport, period: Period) -> Self {
        let rows: Vec<KmRow> = report
            .rows
            .iter()
            .map(|r| KmRow {
                vehicle_id: r.vehicle_id,
                plate: r.plate.clone(),
                description: format!("{} {}", r.make, r.model).trim().to_string(),
                km: period.km(r),
            })
            .collect();
        let total_km = rows.iter().map(|r| r.km).sum();
        Self {
            period,
            rows,
            total_km,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Which slice of time a period report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodSelection {
    Preset(Period),
    Custom { start: NaiveDate, end: NaiveDate },
}

impl Default for PeriodSelection {
    fn default() -> Self {
        PeriodSelection::Preset(Period::Dia)
    }
}

impl PeriodSelection {
    /// Validate a custom range typed by the user as `YYYY-MM-DD`.
    pub fn custom_range(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start.map(str::trim).filter(|s| !s.is_empty());
        let end = end.map(str::trim).filter(|s| !s.is_empty());
        let (Some(start), Some(end)) = (start, end) else {
            return Err(ColetaError::validation("Por favor, preencha ambas as datas"));
        };
        let start = parse_date(start)?;
        let end = parse_date(end)?;
        if start > end {
            return Err(ColetaError::validation(
                "A data inicial deve ser anterior ou igual à data final",
            ));
        }
        Ok(PeriodSelection::Custom { start, end })
    }

    /// Range pre-filled when the custom tab is opened: the last 30 days.
    pub fn default_custom(today: NaiveDate) -> Self {
        PeriodSelection::Custom {
            start: today - chrono::Duration::days(DEFAULT_CUSTOM_DAYS),
            end: today,
        }
    }

    pub fn to_filter(&self) -> PeriodFilter {
        match self {
            PeriodSelection::Preset(p) => PeriodFilter {
                periodo: p.as_param().to_string(),
                data_inicio: None,
                data_fim: None,
            },
            PeriodSelection::Custom { start, end } => PeriodFilter {
                periodo: CUSTOM_PERIOD.to_string(),
                data_inicio: Some(start.format(DATE_FORMAT).to_string()),
                data_fim: Some(end.format(DATE_FORMAT).to_string()),
            },
        }
    }

    pub fn label(&self) -> String {
        match self {
            PeriodSelection::Preset(p) => p.label().to_string(),
            PeriodSelection::Custom { start, end } => format!(
                "{} a {}",
                start.format("%d/%m/%Y"),
                end.format("%d/%m/%Y")
            ),
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| ColetaError::validation(format!("Data inválida: {raw} (use AAAA-MM-DD)")))
}

pub async fn km_report(
    api: &dyn AdminApi,
    session: &Session,
    period: Period,
) -> Result<KmReportView> {
    session.require_admin()?;
    let report = api.summary_report(session).await?;
    debug!(rows = report.rows.len(), period = %period, "summary report loaded");
    Ok(KmReportView::build(&report, period))
}

pub async fn period_report(
    api: &dyn AdminApi,
    session: &Session,
    selection: &PeriodSelection,
) -> Result<PeriodReport> {
    session.require_admin()?;
    api.period_report(session, &selection.to_filter()).await
}

pub async fn detailed_report(api: &dyn AdminApi, session: &Session) -> Result<DetailedReport> {
    session.require_admin()?;
    api.detailed_report(session).await
}

pub async fn user_report(api: &dyn AdminApi, session: &Session, login: &str) -> Result<UserReport> {
    session.require_admin()?;
    let login = require_login(login)?;
    api.user_report(session, login).await
}

pub async fn user_period_report(
    api: &dyn AdminApi,
    session: &Session,
    login: &str,
    selection: &PeriodSelection,
) -> Result<UserPeriodReport> {
    session.require_admin()?;
    let login = require_login(login)?;
    api.user_period_report(session, login, &selection.to_filter())
        .await
}

fn require_login(login: &str) -> Result<&str> {
    let login = login.trim();
    if login.is_empty() {
        return Err(ColetaError::validation("Selecione um usuário"));
    }
    Ok(login)
}

/// Photos taken on one day, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoDayView {
    pub date: String,
    pub photos: Vec<PhotoRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoGallery {
    pub login: String,
    pub name: String,
    pub days: Vec<PhotoDayView>,
}

impl PhotoGallery {
    pub fn total(&self) -> usize {
        self.days.iter().map(|d| d.photos.len()).sum()
    }
}

/// Keep the server's day order (newest day first) and sort each day by
/// capture time. Photos without a timestamp go last.
pub fn arrange_photos(photos: UserPhotos) -> PhotoGallery {
    let days = photos
        .days
        .into_iter()
        .map(|day| {
            let date = if day.date.trim().is_empty() {
                UNDATED_DAY.to_string()
            } else {
                day.date
            };
            let mut photos = day.fotos;
            photos.sort_by_key(|p| capture_key(p.taken_at));
            PhotoDayView { date, photos }
        })
        .collect();
    PhotoGallery {
        login: photos.login,
        name: photos.name,
        days,
    }
}

fn capture_key(taken_at: Option<DateTime<Utc>>) -> (bool, Option<DateTime<Utc>>) {
    (taken_at.is_none(), taken_at)
}

pub async fn user_photos(
    api: &dyn AdminApi,
    session: &Session,
    login: &str,
) -> Result<PhotoGallery> {
    session.require_admin()?;
    let login = require_login(login)?;
    let photos = api.user_photos(session, login).await?;
    Ok(arrange_photos(photos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{admin_session, driver_session, FakeApi};
    use chrono::TimeZone;

    fn row(id: i64, plate: &str, hoje: f64, total: f64) -> VehicleKmSummary {
        VehicleKmSummary {
            vehicle_id: id,
            plate: plate.to_string(),
            make: "Fiat".into(),
            model: "Uno".into(),
            km_hoje: hoje,
            km_semana: hoje * 2.0,
            km_mes: hoje * 3.0,
            km_total: total,
        }
    }

    fn photo(id: i64, at: Option<(u32, u32)>) -> PhotoRecord {
        PhotoRecord {
            id,
            coleta_id: 55,
            etapa: Some("saida".into()),
            remote_path: format!("uploads/{id}.jpg"),
            taken_at: at.map(|(h, m)| Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()),
        }
    }

    #[test]
    fn period_tabs_select_column_and_sum() {
        let report = SummaryReport {
            kind: None,
            rows: vec![row(1, "ABC123", 10.0, 500.0), row(2, "XYZ9876", 5.5, 120.0)],
        };
        let dia = KmReportView::build(&report, Period::Dia);
        assert_eq!(dia.total_km, 15.5);
        assert_eq!(dia.rows[0].description, "Fiat Uno");

        let semana = KmReportView::build(&report, Period::Semana);
        assert_eq!(semana.total_km, 31.0);

        let total = KmReportView::build(&report, Period::Total);
        assert_eq!(total.rows[1].km, 120.0);
        assert_eq!(total.total_km, 620.0);

        let empty = KmReportView::build(&SummaryReport::default(), Period::Mes);
        assert!(empty.is_empty());
        assert_eq!(empty.total_km, 0.0);
    }

    #[test]
    fn period_parses_tab_names() {
        assert_eq!("dia".parse::<Period>().unwrap(), Period::Dia);
        assert_eq!("hoje".parse::<Period>().unwrap(), Period::Dia);
        assert_eq!(" MES ".parse::<Period>().unwrap(), Period::Mes);
        assert!("ano".parse::<Period>().is_err());
        assert_eq!(Period::Semana.to_string(), "Última Semana");
    }

    #[test]
    fn custom_range_requires_both_dates_in_order() {
        let err = PeriodSelection::custom_range(Some("2026-03-01"), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            ColetaError::validation("Por favor, preencha ambas as datas").to_string()
        );
        assert!(PeriodSelection::custom_range(Some(" "), Some("2026-03-01")).is_err());
        assert!(PeriodSelection::custom_range(Some("01/03/2026"), Some("2026-03-02")).is_err());
        assert!(PeriodSelection::custom_range(Some("2026-03-05"), Some("2026-03-01")).is_err());

        let same_day = PeriodSelection::custom_range(Some("2026-03-01"), Some("2026-03-01"))
            .expect("single day range");
        assert_eq!(
            same_day.to_filter(),
            PeriodFilter {
                periodo: "personalizado".into(),
                data_inicio: Some("2026-03-01".into()),
                data_fim: Some("2026-03-01".into()),
            }
        );
        assert_eq!(same_day.label(), "01/03/2026 a 01/03/2026");
    }

    #[test]
    fn default_custom_range_covers_last_thirty_days() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        let filter = PeriodSelection::default_custom(today).to_filter();
        assert_eq!(filter.data_inicio.as_deref(), Some("2026-03-01"));
        assert_eq!(filter.data_fim.as_deref(), Some("2026-03-31"));
    }

    #[test]
    fn photos_sorted_within_day_missing_last() {
        let gallery = arrange_photos(UserPhotos {
            login: "jdoe".into(),
            name: "John Doe".into(),
            days: vec![
                crate::models::PhotoDay {
                    date: "2026-03-02".into(),
                    fotos: vec![photo(3, None), photo(2, Some((14, 0))), photo(1, Some((8, 30)))],
                },
                crate::models::PhotoDay {
                    date: String::new(),
                    fotos: vec![photo(4, None)],
                },
            ],
        });
        let ids: Vec<i64> = gallery.days[0].photos.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(gallery.days[1].date, UNDATED_DAY);
        assert_eq!(gallery.total(), 4);
    }

    #[tokio::test]
    async fn user_photos_arrives_grouped_and_sorted() {
        let api = FakeApi::new();
        api.set_photos(vec![crate::models::PhotoDay {
            date: "2026-03-02".into(),
            fotos: vec![photo(2, None), photo(1, Some((9, 15)))],
        }]);

        let gallery = user_photos(&api, &admin_session(), " jdoe ").await.unwrap();
        assert_eq!(gallery.login, "jdoe");
        let ids: Vec<i64> = gallery.days[0].photos.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn reports_require_admin_before_any_request() {
        let api = FakeApi::new();
        let driver = driver_session();

        assert!(km_report(&api, &driver, Period::Dia).await.is_err());
        assert!(detailed_report(&api, &driver).await.is_err());
        assert!(user_photos(&api, &driver, "jdoe").await.is_err());
        assert!(
            period_report(&api, &driver, &PeriodSelection::default())
                .await
                .is_err()
        );
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn period_reports_send_selected_filter() {
        let api = FakeApi::new();
        let admin = admin_session();
        api.set_summary_rows(vec![row(1, "ABC123", 10.0, 500.0)]);

        let view = km_report(&api, &admin, Period::Total).await.unwrap();
        assert_eq!(view.total_km, 500.0);

        let custom = PeriodSelection::custom_range(Some("2026-02-01"), Some("2026-02-28")).unwrap();
        let report = period_report(&api, &admin, &custom).await.unwrap();
        assert_eq!(report.period.as_deref(), Some("personalizado"));

        user_period_report(&api, &admin, "jdoe", &PeriodSelection::Preset(Period::Semana))
            .await
            .unwrap();
        let filters = api.period_filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].data_fim.as_deref(), Some("2026-02-28"));
        assert_eq!(filters[1].periodo, "semana");
        assert_eq!(filters[1].data_inicio, None);

        let err = user_report(&api, &admin, "  ").await.unwrap_err();
        assert!(matches!(err, ColetaError::Validation(_)));
        let report = user_report(&api, &admin, "jdoe").await.unwrap();
        assert_eq!(report.name, "John Doe");
    }
}
