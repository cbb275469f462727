//! Coleta REST API client.
//!
//! One method per endpoint, bearer-token auth, JSON bodies and multipart photo
//! upload. The driver-facing calls sit behind [`ColetaApi`] and the admin calls
//! behind [`AdminApi`] so the checkout state machine, the offline queue and the
//! admin validation can run against a scripted fake.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::auth::Session;
use crate::error::{ColetaError, Result};
use crate::models::{
    Ack, Checkout, CheckoutSummary, DetailedReport, Leg, LegList, LoginRequest, LoginResponse,
    NewUser, NewVehicle, OdometerCorrection, OdometerEntry, PeriodFilter, PeriodReport,
    ReturnReceipt, SummaryReport, TokenCheck, UploadedPhoto, User, UserPeriodReport, UserPhotos,
    UserReport, Vehicle,
};
use crate::photos::PhotoUpload;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the API base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> ColetaError {
    let message = if err.is_connect() {
        format!("Cannot reach coleta server at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid coleta server URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    ColetaError::Network(message)
}

/// Fallback text when the error payload carries no message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Sessão expirada, faça login novamente".to_string(),
        403 => "Acesso negado".to_string(),
        404 => "Recurso não encontrado".to_string(),
        s if s >= 500 => format!("Erro no servidor (HTTP {s})"),
        s => format!("Resposta inesperada do servidor (HTTP {s})"),
    }
}

/// Pull the human message out of an error body.
///
/// FastAPI answers `{"detail": "..."}`, or `{"detail": [{"msg": ...}]}` for
/// request validation errors. `error` and `message` keys are accepted too.
pub fn error_message(status: StatusCode, body_text: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body_text) else {
        return status_error(status);
    };
    let field = json
        .get("detail")
        .or_else(|| json.get("error"))
        .or_else(|| json.get("message"));
    match field {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Array(items)) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if parts.is_empty() {
                status_error(status)
            } else {
                parts.join("; ")
            }
        }
        _ => status_error(status),
    }
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Trait seams
// ---------------------------------------------------------------------------

/// Endpoints used by drivers: login, checkout lifecycle and photos.
#[async_trait]
pub trait ColetaApi: Send + Sync {
    async fn login(&self, login: &str, password: &str) -> Result<LoginResponse>;

    async fn verify_token(&self, session: &Session) -> Result<TokenCheck>;

    /// `GET /health`. Never fails; the outcome is in the result.
    async fn check_health(&self) -> ConnectivityResult;

    async fn available_vehicles(&self, session: &Session) -> Result<Vec<Vehicle>>;

    /// `Ok(None)` when the server reports no open checkout (`null` or 404).
    async fn active_checkout(&self, session: &Session) -> Result<Option<Checkout>>;

    async fn create_checkout(
        &self,
        session: &Session,
        vehicle_id: i64,
        entry: &OdometerEntry,
        idempotency_key: Option<&str>,
    ) -> Result<Checkout>;

    async fn return_checkout(
        &self,
        session: &Session,
        checkout_id: i64,
        entry: &OdometerEntry,
    ) -> Result<ReturnReceipt>;

    async fn start_leg(&self, session: &Session, checkout_id: i64, entry: &OdometerEntry)
        -> Result<Leg>;

    async fn end_leg(&self, session: &Session, checkout_id: i64, entry: &OdometerEntry)
        -> Result<Leg>;

    async fn list_legs(&self, session: &Session, checkout_id: i64) -> Result<LegList>;

    async fn upload_photo(
        &self,
        session: &Session,
        checkout_id: i64,
        photo: &PhotoUpload,
    ) -> Result<UploadedPhoto>;

    async fn my_checkouts(&self, session: &Session) -> Result<Vec<CheckoutSummary>>;
}

/// Administrator endpoints under `/api/admin`. Users are addressed by login.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn list_users(&self, session: &Session) -> Result<Vec<User>>;
    async fn create_user(&self, session: &Session, user: &NewUser) -> Result<User>;
    async fn delete_user(&self, session: &Session, login: &str) -> Result<Ack>;
    async fn change_password(&self, session: &Session, login: &str, password: &str)
        -> Result<Ack>;
    async fn set_admin(&self, session: &Session, login: &str, is_admin: bool) -> Result<Ack>;

    async fn list_vehicles(&self, session: &Session) -> Result<Vec<Vehicle>>;
    async fn create_vehicle(&self, session: &Session, vehicle: &NewVehicle) -> Result<Vehicle>;
    async fn delete_vehicle(&self, session: &Session, vehicle_id: i64) -> Result<Ack>;

    async fn summary_report(&self, session: &Session) -> Result<SummaryReport>;
    async fn detailed_report(&self, session: &Session) -> Result<DetailedReport>;
    async fn period_report(&self, session: &Session, filter: &PeriodFilter)
        -> Result<PeriodReport>;
    async fn user_report(&self, session: &Session, login: &str) -> Result<UserReport>;
    async fn user_period_report(
        &self,
        session: &Session,
        login: &str,
        filter: &PeriodFilter,
    ) -> Result<UserPeriodReport>;
    async fn user_photos(&self, session: &Session, login: &str) -> Result<UserPhotos>;

    async fn correct_odometer(
        &self,
        session: &Session,
        checkout_id: i64,
        correction: &OdometerCorrection,
    ) -> Result<Ack>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = normalize_base_url(base_url);
        Url::parse(&base_url)
            .map_err(|e| ColetaError::validation(format!("Invalid server URL {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ColetaError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ColetaError::validation(format!("Invalid server URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ColetaError::validation(format!("Invalid server URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, session: Option<&Session>) -> RequestBuilder {
        debug!(%method, %url, "coleta api request");
        let req = self.client.request(method, url);
        match session {
            Some(s) => req.bearer_auth(s.token()),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        req.send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))
    }

    /// Decode a JSON body, or map a non-success status to `ColetaError::Request`.
    async fn read_json<T: DeserializeOwned>(&self, resp: Response) -> Result<T> {
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        if !status.is_success() {
            let message = error_message(status, &body_text);
            warn!(status = status.as_u16(), %message, "coleta api error");
            return Err(ColetaError::Request {
                status: status.as_u16(),
                message,
            });
        }

        let text = if body_text.trim().is_empty() {
            "null"
        } else {
            body_text.as_str()
        };
        serde_json::from_str(text).map_err(|e| ColetaError::InvalidResponse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, session: &Session, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        let resp = self.send(self.request(Method::GET, url, Some(session))).await?;
        self.read_json(resp).await
    }

    async fn get_with_query<T, Q>(
        &self,
        session: &Session,
        segments: &[&str],
        query: &Q,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        let req = self.request(Method::GET, url, Some(session)).query(query);
        let resp = self.send(req).await?;
        self.read_json(resp).await
    }

    async fn send_json<T, B>(
        &self,
        method: Method,
        session: &Session,
        segments: &[&str],
        body: &B,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        let resp = self
            .send(self.request(method, url, Some(session)).json(body))
            .await?;
        self.read_json(resp).await
    }

    async fn delete<T: DeserializeOwned>(&self, session: &Session, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        let resp = self
            .send(self.request(Method::DELETE, url, Some(session)))
            .await?;
        self.read_json(resp).await
    }
}

#[async_trait]
impl ColetaApi for ApiClient {
    async fn login(&self, login: &str, password: &str) -> Result<LoginResponse> {
        let url = self.endpoint(&["api", "auth", "login"])?;
        let body = LoginRequest {
            usuario_id: login,
            senha: password,
        };
        let resp = self
            .send(self.request(Method::POST, url, None).json(&body))
            .await?;
        self.read_json(resp).await
    }

    async fn verify_token(&self, session: &Session) -> Result<TokenCheck> {
        let url = self.endpoint(&["api", "auth", "verificar-token"])?;
        let req = self
            .request(Method::POST, url, None)
            .query(&[("token", session.token())]);
        let resp = self.send(req).await?;
        self.read_json(resp).await
    }

    async fn check_health(&self) -> ConnectivityResult {
        let url = match self.endpoint(&["health"]) {
            Ok(u) => u,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let start = Instant::now();
        let resp = match self
            .client
            .get(url)
            .timeout(CONNECTIVITY_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(friendly_error(&self.base_url, &e).to_string()),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        if status.is_success() {
            debug!(latency_ms = latency, "connectivity test passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(status_error(status)),
            }
        }
    }

    async fn available_vehicles(&self, session: &Session) -> Result<Vec<Vehicle>> {
        self.get(session, &["api", "coleta", "veiculos"]).await
    }

    async fn active_checkout(&self, session: &Session) -> Result<Option<Checkout>> {
        match self.get(session, &["api", "coleta", "ativa"]).await {
            Err(e) if e.status() == Some(404) => Ok(None),
            other => other,
        }
    }

    async fn create_checkout(
        &self,
        session: &Session,
        vehicle_id: i64,
        entry: &OdometerEntry,
        idempotency_key: Option<&str>,
    ) -> Result<Checkout> {
        let id = vehicle_id.to_string();
        let url = self.endpoint(&["api", "coleta", "retirar", &id])?;
        let mut req = self.request(Method::POST, url, Some(session)).json(entry);
        if let Some(key) = idempotency_key {
            req = req.header(IDEMPOTENCY_HEADER, key);
        }
        let resp = self.send(req).await?;
        let checkout: Checkout = self.read_json(resp).await?;
        info!(checkout_id = checkout.id, vehicle_id, "checkout created");
        Ok(checkout)
    }

    async fn return_checkout(
        &self,
        session: &Session,
        checkout_id: i64,
        entry: &OdometerEntry,
    ) -> Result<ReturnReceipt> {
        let id = checkout_id.to_string();
        self.send_json(Method::POST, session, &["api", "coleta", &id, "devolver"], entry)
            .await
    }

    async fn start_leg(
        &self,
        session: &Session,
        checkout_id: i64,
        entry: &OdometerEntry,
    ) -> Result<Leg> {
        let id = checkout_id.to_string();
        self.send_json(Method::POST, session, &["api", "coleta", &id, "sair"], entry)
            .await
    }

    async fn end_leg(
        &self,
        session: &Session,
        checkout_id: i64,
        entry: &OdometerEntry,
    ) -> Result<Leg> {
        let id = checkout_id.to_string();
        self.send_json(Method::POST, session, &["api", "coleta", &id, "retornar"], entry)
            .await
    }

    async fn list_legs(&self, session: &Session, checkout_id: i64) -> Result<LegList> {
        let id = checkout_id.to_string();
        self.get(session, &["api", "coleta", &id, "viagens"]).await
    }

    async fn upload_photo(
        &self,
        session: &Session,
        checkout_id: i64,
        photo: &PhotoUpload,
    ) -> Result<UploadedPhoto> {
        let id = checkout_id.to_string();
        let url = self.endpoint(&["api", "coleta", &id, "upload-foto"])?;
        let part = Part::bytes(photo.bytes.clone())
            .file_name(photo.file_name.clone())
            .mime_str(&photo.content_type)
            .map_err(|e| ColetaError::validation(format!("Invalid photo type: {e}")))?;
        let form = Form::new().part("file", part);
        let resp = self
            .send(self.request(Method::POST, url, Some(session)).multipart(form))
            .await?;
        self.read_json(resp).await
    }

    async fn my_checkouts(&self, session: &Session) -> Result<Vec<CheckoutSummary>> {
        self.get(session, &["api", "coleta", "minhas-coletas"]).await
    }
}

#[async_trait]
impl AdminApi for ApiClient {
    async fn list_users(&self, session: &Session) -> Result<Vec<User>> {
        self.get(session, &["api", "admin", "usuarios"]).await
    }

    async fn create_user(&self, session: &Session, user: &NewUser) -> Result<User> {
        self.send_json(Method::POST, session, &["api", "admin", "usuarios"], user)
            .await
    }

    async fn delete_user(&self, session: &Session, login: &str) -> Result<Ack> {
        self.delete(session, &["api", "admin", "usuarios", login]).await
    }

    async fn change_password(
        &self,
        session: &Session,
        login: &str,
        password: &str,
    ) -> Result<Ack> {
        let body = serde_json::json!({ "nova_senha": password });
        self.send_json(
            Method::PUT,
            session,
            &["api", "admin", "usuarios", login, "senha"],
            &body,
        )
        .await
    }

    async fn set_admin(&self, session: &Session, login: &str, is_admin: bool) -> Result<Ack> {
        let body = serde_json::json!({ "is_admin": is_admin });
        self.send_json(
            Method::PUT,
            session,
            &["api", "admin", "usuarios", login, "admin"],
            &body,
        )
        .await
    }

    async fn list_vehicles(&self, session: &Session) -> Result<Vec<Vehicle>> {
        self.get(session, &["api", "admin", "veiculos"]).await
    }

    async fn create_vehicle(&self, session: &Session, vehicle: &NewVehicle) -> Result<Vehicle> {
        self.send_json(Method::POST, session, &["api", "admin", "veiculos"], vehicle)
            .await
    }

    async fn delete_vehicle(&self, session: &Session, vehicle_id: i64) -> Result<Ack> {
        let id = vehicle_id.to_string();
        self.delete(session, &["api", "admin", "veiculos", &id]).await
    }

    async fn summary_report(&self, session: &Session) -> Result<SummaryReport> {
        self.get(session, &["api", "admin", "relatorios"]).await
    }

    async fn detailed_report(&self, session: &Session) -> Result<DetailedReport> {
        self.get(session, &["api", "admin", "relatorios", "detalhado"])
            .await
    }

    async fn period_report(
        &self,
        session: &Session,
        filter: &PeriodFilter,
    ) -> Result<PeriodReport> {
        self.get_with_query(session, &["api", "admin", "relatorios", "periodo"], filter)
            .await
    }

    async fn user_report(&self, session: &Session, login: &str) -> Result<UserReport> {
        self.get(session, &["api", "admin", "relatorios", "usuario", login])
            .await
    }

    async fn user_period_report(
        &self,
        session: &Session,
        login: &str,
        filter: &PeriodFilter,
    ) -> Result<UserPeriodReport> {
        self.get_with_query(
            session,
            &["api", "admin", "relatorios", "usuario", login],
            filter,
        )
        .await
    }

    async fn user_photos(&self, session: &Session, login: &str) -> Result<UserPhotos> {
        self.get(session, &["api", "admin", "fotos", login]).await
    }

    async fn correct_odometer(
        &self,
        session: &Session,
        checkout_id: i64,
        correction: &OdometerCorrection,
    ) -> Result<Ack> {
        let id = checkout_id.to_string();
        self.send_json(
            Method::PUT,
            session,
            &["api", "admin", "coleta", &id, "editar-km"],
            correction,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("coleta.example.com/"), "https://coleta.example.com");
        assert_eq!(normalize_base_url("localhost:8000/api/"), "http://localhost:8000");
        assert_eq!(
            normalize_base_url("  https://host.example/base/api  "),
            "https://host.example/base"
        );
        assert_eq!(normalize_base_url("http://127.0.0.1:8000"), "http://127.0.0.1:8000");
        assert_eq!(normalize_base_url(""), "");
    }

    #[test]
    fn test_error_message_extraction() {
        let bad = StatusCode::BAD_REQUEST;
        assert_eq!(
            error_message(bad, r#"{"detail":"Você já possui uma coleta ativa"}"#),
            "Você já possui uma coleta ativa"
        );
        assert_eq!(error_message(bad, r#"{"error":"boom"}"#), "boom");
        assert_eq!(error_message(bad, r#"{"message":"nope"}"#), "nope");
        assert_eq!(
            error_message(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"detail":[{"loc":["body","km"],"msg":"field required"},{"msg":"bad"}]}"#
            ),
            "field required; bad"
        );
        assert_eq!(
            error_message(StatusCode::UNAUTHORIZED, "<html>"),
            "Sessão expirada, faça login novamente"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "{}"),
            "Erro no servidor (HTTP 502)"
        );
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = ApiClient::new("https://host.example/base/").unwrap();
        let url = client
            .endpoint(&["api", "admin", "usuarios", "joão silva"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://host.example/base/api/admin/usuarios/jo%C3%A3o%20silva"
        );
        let root = ApiClient::new("localhost:8000").unwrap();
        assert_eq!(
            root.endpoint(&["health"]).unwrap().as_str(),
            "http://localhost:8000/health"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(ApiClient::new("").is_err());
    }
}
