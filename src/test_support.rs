//! In-process stand-in for the coleta server, used by unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{AdminApi, ColetaApi, ConnectivityResult};
use crate::auth::Session;
use crate::error::{ColetaError, Result};
use crate::models::*;
use crate::photos::PhotoUpload;

struct Account {
    id: i64,
    password: String,
    name: String,
    is_admin: bool,
}

#[derive(Default)]
struct FakeState {
    online: bool,
    token_valid: bool,
    accounts: HashMap<String, Account>,
    vehicles: Vec<Vehicle>,
    next_checkout_id: i64,
    next_leg_id: i64,
    next_photo_id: i64,
    active: HashMap<i64, Checkout>,
    by_idempotency_key: HashMap<String, Checkout>,
    creates: Vec<(i64, Option<String>)>,
    uploads: Vec<(i64, String)>,
    failing_uploads: HashSet<String>,
    create_failures: VecDeque<ColetaError>,
    summary_rows: Vec<VehicleKmSummary>,
    photos: Vec<PhotoDay>,
    period_filters: Vec<PeriodFilter>,
    corrections: Vec<(i64, OdometerCorrection)>,
}

pub struct FakeApi {
    state: Mutex<FakeState>,
    calls: AtomicUsize,
}

pub fn vehicle(id: i64, plate: &str) -> Vehicle {
    Vehicle {
        id,
        plate: plate.to_string(),
        make: "Fiat".into(),
        model: "Uno".into(),
        year: Some(2019),
        active: true,
    }
}

pub fn driver_session() -> Session {
    Session::new(7, "jdoe", "John Doe", false, "token-jdoe")
}

pub fn admin_session() -> Session {
    Session::new(1, "admin", "Administrador", true, "token-admin")
}

impl FakeApi {
    pub fn new() -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            "jdoe".to_string(),
            Account {
                id: 7,
                password: "pw123".into(),
                name: "John Doe".into(),
                is_admin: false,
            },
        );
        accounts.insert(
            "admin".to_string(),
            Account {
                id: 1,
                password: "admin123".into(),
                name: "Administrador".into(),
                is_admin: true,
            },
        );
        Self {
            state: Mutex::new(FakeState {
                online: true,
                token_valid: true,
                accounts,
                vehicles: vec![vehicle(1, "ABC123")],
                next_checkout_id: 55,
                next_leg_id: 1,
                next_photo_id: 1,
                ..FakeState::default()
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state lock")
    }

    /// Count the call and fail when offline.
    fn enter(&self) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if !state.online {
            return Err(ColetaError::Network("Cannot reach coleta server".into()));
        }
        Ok(state)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    pub fn set_token_valid(&self, valid: bool) {
        self.state().token_valid = valid;
    }

    pub fn set_vehicles(&self, vehicles: Vec<Vehicle>) {
        self.state().vehicles = vehicles;
    }

    pub fn fail_upload(&self, file_name: &str) {
        self.state().failing_uploads.insert(file_name.to_string());
    }

    pub fn heal_uploads(&self) {
        self.state().failing_uploads.clear();
    }

    pub fn fail_next_create(&self, err: ColetaError) {
        self.state().create_failures.push_back(err);
    }

    pub fn set_summary_rows(&self, rows: Vec<VehicleKmSummary>) {
        self.state().summary_rows = rows;
    }

    pub fn set_photos(&self, days: Vec<PhotoDay>) {
        self.state().photos = days;
    }

    /// `(vehicle_id, idempotency_key)` of every checkout actually created.
    pub fn creates(&self) -> Vec<(i64, Option<String>)> {
        self.state().creates.clone()
    }

    /// `(checkout_id, file_name)` of every successful upload.
    pub fn uploads(&self) -> Vec<(i64, String)> {
        self.state().uploads.clone()
    }

    pub fn period_filters(&self) -> Vec<PeriodFilter> {
        self.state().period_filters.clone()
    }

    pub fn corrections(&self) -> Vec<(i64, OdometerCorrection)> {
        self.state().corrections.clone()
    }

    fn authorize(state: &FakeState, _session: &Session) -> Result<()> {
        if state.token_valid {
            Ok(())
        } else {
            Err(bad_request(401, "Token inválido"))
        }
    }
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new()
    }
}

fn bad_request(status: u16, message: &str) -> ColetaError {
    ColetaError::Request {
        status,
        message: message.to_string(),
    }
}

fn find_open<'a>(
    state: &'a mut FakeState,
    session: &Session,
    checkout_id: i64,
) -> Result<&'a mut Checkout> {
    match state.active.get_mut(&session.user_id) {
        Some(c) if c.id == checkout_id => Ok(c),
        _ => Err(bad_request(404, "Coleta não encontrada")),
    }
}

#[async_trait]
impl ColetaApi for FakeApi {
    async fn login(&self, login: &str, password: &str) -> Result<LoginResponse> {
        let state = self.enter()?;
        match state.accounts.get(login) {
            Some(acc) if acc.password == password => Ok(LoginResponse {
                access_token: format!("token-{login}"),
                token_type: Some("bearer".into()),
                user_id: acc.id,
                display_name: acc.name.clone(),
                is_admin: acc.is_admin,
            }),
            _ => Err(bad_request(401, "Usuário ou senha incorretos")),
        }
    }

    async fn verify_token(&self, session: &Session) -> Result<TokenCheck> {
        let state = self.enter()?;
        Self::authorize(&state, session)?;
        Ok(TokenCheck {
            login: session.login.clone(),
            valid: true,
        })
    }

    async fn check_health(&self) -> ConnectivityResult {
        match self.enter() {
            Ok(_) => ConnectivityResult {
                success: true,
                latency_ms: Some(1),
                error: None,
            },
            Err(e) => ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn available_vehicles(&self, session: &Session) -> Result<Vec<Vehicle>> {
        let state = self.enter()?;
        Self::authorize(&state, session)?;
        let busy: HashSet<i64> = state.active.values().map(|c| c.vehicle_id).collect();
        Ok(state
            .vehicles
            .iter()
            .filter(|v| v.active && !busy.contains(&v.id))
            .cloned()
            .collect())
    }

    async fn active_checkout(&self, session: &Session) -> Result<Option<Checkout>> {
        let state = self.enter()?;
        Self::authorize(&state, session)?;
        Ok(state.active.get(&session.user_id).cloned())
    }

    async fn create_checkout(
        &self,
        session: &Session,
        vehicle_id: i64,
        entry: &OdometerEntry,
        idempotency_key: Option<&str>,
    ) -> Result<Checkout> {
        let mut state = self.enter()?;
        Self::authorize(&state, session)?;
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        if let Some(existing) = idempotency_key.and_then(|k| state.by_idempotency_key.get(k)) {
            return Ok(existing.clone());
        }
        if state.active.contains_key(&session.user_id) {
            return Err(bad_request(400, "Você já possui uma coleta ativa"));
        }
        let vehicle = state
            .vehicles
            .iter()
            .find(|v| v.id == vehicle_id)
            .cloned()
            .ok_or_else(|| bad_request(404, "Veículo não encontrado"))?;

        let checkout = Checkout {
            id: state.next_checkout_id,
            vehicle_id,
            vehicle: Some(vehicle),
            odometer_out: entry.km,
            odometer_in: None,
            notes_out: entry.notes.clone(),
            notes_in: None,
            started_at: Some(Utc::now()),
            ended_at: None,
            active: true,
            legs: Vec::new(),
        };
        state.next_checkout_id += 1;
        state.active.insert(session.user_id, checkout.clone());
        state
            .creates
            .push((vehicle_id, idempotency_key.map(str::to_string)));
        if let Some(key) = idempotency_key {
            state.by_idempotency_key.insert(key.to_string(), checkout.clone());
        }
        Ok(checkout)
    }

    async fn return_checkout(
        &self,
        session: &Session,
        checkout_id: i64,
        entry: &OdometerEntry,
    ) -> Result<ReturnReceipt> {
        let mut state = self.enter()?;
        Self::authorize(&state, session)?;
        let checkout = find_open(&mut state, session, checkout_id)?;
        if checkout.open_leg().is_some() {
            return Err(bad_request(
                400,
                "Você precisa retornar do trajeto atual antes de devolver o veículo",
            ));
        }
        if entry.km < checkout.odometer_out {
            return Err(bad_request(400, "KM de devolução menor que KM de retirada"));
        }
        state.active.remove(&session.user_id);
        Ok(ReturnReceipt {
            id: checkout_id,
            ended_at: Some(Utc::now()),
            odometer_in: entry.km,
            notes_in: entry.notes.clone(),
            active: false,
        })
    }

    async fn start_leg(
        &self,
        session: &Session,
        checkout_id: i64,
        entry: &OdometerEntry,
    ) -> Result<Leg> {
        let mut state = self.enter()?;
        Self::authorize(&state, session)?;
        let leg_id = state.next_leg_id;
        let checkout = find_open(&mut state, session, checkout_id)?;
        if checkout.open_leg().is_some() {
            return Err(bad_request(
                400,
                "Você precisa retornar do trajeto anterior antes de fazer uma nova saída",
            ));
        }
        let leg = Leg {
            id: leg_id,
            number: checkout.legs.len() as i64 + 1,
            departed_at: Some(Utc::now()),
            odometer_departure: Some(entry.km),
            returned_at: None,
            odometer_return: None,
            distance: None,
        };
        checkout.legs.push(leg.clone());
        state.next_leg_id += 1;
        Ok(leg)
    }

    async fn end_leg(
        &self,
        session: &Session,
        checkout_id: i64,
        entry: &OdometerEntry,
    ) -> Result<Leg> {
        let mut state = self.enter()?;
        Self::authorize(&state, session)?;
        let checkout = find_open(&mut state, session, checkout_id)?;
        let leg = checkout
            .legs
            .iter_mut()
            .find(|l| l.is_open())
            .ok_or_else(|| bad_request(400, "Nenhuma saída registrada para retornar"))?;
        leg.returned_at = Some(Utc::now());
        leg.odometer_return = Some(entry.km);
        leg.distance = leg.odometer_departure.map(|d| entry.km - d);
        Ok(leg.clone())
    }

    async fn list_legs(&self, session: &Session, checkout_id: i64) -> Result<LegList> {
        let mut state = self.enter()?;
        Self::authorize(&state, session)?;
        let checkout = find_open(&mut state, session, checkout_id)?;
        Ok(LegList {
            checkout_id,
            total_legs: checkout.legs.len() as i64,
            total_km: checkout.legs.iter().filter_map(|l| l.distance).sum(),
            legs: checkout.legs.clone(),
        })
    }

    async fn upload_photo(
        &self,
        session: &Session,
        checkout_id: i64,
        photo: &PhotoUpload,
    ) -> Result<UploadedPhoto> {
        let mut state = self.enter()?;
        Self::authorize(&state, session)?;
        if state.failing_uploads.contains(&photo.file_name) {
            return Err(bad_request(500, "Erro ao salvar foto"));
        }
        let id = state.next_photo_id;
        state.next_photo_id += 1;
        state.uploads.push((checkout_id, photo.file_name.clone()));
        Ok(UploadedPhoto {
            id,
            remote_path: format!("uploads/{checkout_id}_{}", photo.file_name),
            size_mb: photo.bytes.len() as f64 / 1_048_576.0,
        })
    }

    async fn my_checkouts(&self, session: &Session) -> Result<Vec<CheckoutSummary>> {
        let state = self.enter()?;
        Self::authorize(&state, session)?;
        Ok(state
            .active
            .get(&session.user_id)
            .map(|c| CheckoutSummary {
                id: c.id,
                vehicle: c.vehicle.clone(),
                started_at: c.started_at,
                ended_at: None,
                active: true,
                total_legs: c.legs.len() as i64,
                total_km: 0.0,
            })
            .into_iter()
            .collect())
    }
}

#[async_trait]
impl AdminApi for FakeApi {
    async fn list_users(&self, _session: &Session) -> Result<Vec<User>> {
        let state = self.enter()?;
        let mut users: Vec<User> = state
            .accounts
            .iter()
            .map(|(login, acc)| User {
                id: acc.id,
                login: login.clone(),
                name: acc.name.clone(),
                is_admin: acc.is_admin,
                active: true,
                created_at: None,
            })
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn create_user(&self, _session: &Session, user: &NewUser) -> Result<User> {
        let mut state = self.enter()?;
        if state.accounts.contains_key(&user.login) {
            return Err(bad_request(400, "Usuário já existe"));
        }
        let id = state.accounts.len() as i64 + 100;
        state.accounts.insert(
            user.login.clone(),
            Account {
                id,
                password: user.password.clone(),
                name: user.name.clone(),
                is_admin: user.is_admin,
            },
        );
        Ok(User {
            id,
            login: user.login.clone(),
            name: user.name.clone(),
            is_admin: user.is_admin,
            active: true,
            created_at: Some(Utc::now()),
        })
    }

    async fn delete_user(&self, _session: &Session, login: &str) -> Result<Ack> {
        let mut state = self.enter()?;
        state
            .accounts
            .remove(login)
            .map(|_| Ack {
                message: Some("Usuário deletado".into()),
            })
            .ok_or_else(|| bad_request(404, "Usuário não encontrado"))
    }

    async fn change_password(
        &self,
        _session: &Session,
        login: &str,
        password: &str,
    ) -> Result<Ack> {
        let mut state = self.enter()?;
        let acc = state
            .accounts
            .get_mut(login)
            .ok_or_else(|| bad_request(404, "Usuário não encontrado"))?;
        acc.password = password.to_string();
        Ok(Ack::default())
    }

    async fn set_admin(&self, _session: &Session, login: &str, is_admin: bool) -> Result<Ack> {
        let mut state = self.enter()?;
        let acc = state
            .accounts
            .get_mut(login)
            .ok_or_else(|| bad_request(404, "Usuário não encontrado"))?;
        acc.is_admin = is_admin;
        Ok(Ack::default())
    }

    async fn list_vehicles(&self, _session: &Session) -> Result<Vec<Vehicle>> {
        Ok(self.enter()?.vehicles.clone())
    }

    async fn create_vehicle(&self, _session: &Session, new: &NewVehicle) -> Result<Vehicle> {
        let mut state = self.enter()?;
        if state.vehicles.iter().any(|v| v.plate == new.plate) {
            return Err(bad_request(400, "Placa já cadastrada"));
        }
        let created = Vehicle {
            id: state.vehicles.len() as i64 + 1,
            plate: new.plate.clone(),
            make: new.make.clone(),
            model: new.model.clone(),
            year: Some(new.year),
            active: true,
        };
        state.vehicles.push(created.clone());
        Ok(created)
    }

    async fn delete_vehicle(&self, _session: &Session, vehicle_id: i64) -> Result<Ack> {
        let mut state = self.enter()?;
        let before = state.vehicles.len();
        state.vehicles.retain(|v| v.id != vehicle_id);
        if state.vehicles.len() == before {
            return Err(bad_request(404, "Veículo não encontrado"));
        }
        Ok(Ack::default())
    }

    async fn summary_report(&self, _session: &Session) -> Result<SummaryReport> {
        let state = self.enter()?;
        Ok(SummaryReport {
            kind: Some("km_por_veiculo".into()),
            rows: state.summary_rows.clone(),
        })
    }

    async fn detailed_report(&self, _session: &Session) -> Result<DetailedReport> {
        let state = self.enter()?;
        Ok(DetailedReport {
            vehicles: state.summary_rows.clone(),
            drivers: Vec::new(),
        })
    }

    async fn period_report(
        &self,
        _session: &Session,
        filter: &PeriodFilter,
    ) -> Result<PeriodReport> {
        let mut state = self.enter()?;
        state.period_filters.push(filter.clone());
        Ok(PeriodReport {
            period: Some(filter.periodo.clone()),
            ..PeriodReport::default()
        })
    }

    async fn user_report(&self, _session: &Session, login: &str) -> Result<UserReport> {
        let state = self.enter()?;
        let acc = state
            .accounts
            .get(login)
            .ok_or_else(|| bad_request(404, "Usuário não encontrado"))?;
        Ok(UserReport {
            login: login.to_string(),
            name: acc.name.clone(),
            total_km: 0.0,
            total_km_mes: 0.0,
            total_checkouts: 0,
            vehicles_used: 0,
            by_vehicle: Vec::new(),
        })
    }

    async fn user_period_report(
        &self,
        _session: &Session,
        login: &str,
        filter: &PeriodFilter,
    ) -> Result<UserPeriodReport> {
        let mut state = self.enter()?;
        state.period_filters.push(filter.clone());
        Ok(UserPeriodReport {
            login: login.to_string(),
            name: String::new(),
            stats: PeriodStats::default(),
            by_day: Vec::new(),
        })
    }

    async fn user_photos(&self, _session: &Session, login: &str) -> Result<UserPhotos> {
        let state = self.enter()?;
        Ok(UserPhotos {
            login: login.to_string(),
            name: String::new(),
            days: state.photos.clone(),
        })
    }

    async fn correct_odometer(
        &self,
        _session: &Session,
        checkout_id: i64,
        correction: &OdometerCorrection,
    ) -> Result<Ack> {
        let mut state = self.enter()?;
        state.corrections.push((checkout_id, correction.clone()));
        Ok(Ack::default())
    }
}
