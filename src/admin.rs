//! Admin operations: users, vehicles and odometer corrections.
//!
//! Every function checks the session is an admin and validates its input
//! before a request is issued.

use chrono::{Datelike, NaiveDate, Utc};
use tracing::info;

use crate::api::AdminApi;
use crate::auth::Session;
use crate::checkout::validate_odometer;
use crate::error::{ColetaError, Result};
use crate::models::{Ack, NewUser, NewVehicle, OdometerCorrection, User, Vehicle};

const MIN_VEHICLE_YEAR: i32 = 1900;

fn required(value: &str, message: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ColetaError::validation(message));
    }
    Ok(value.to_string())
}

pub async fn list_users(api: &dyn AdminApi, session: &Session) -> Result<Vec<User>> {
    session.require_admin()?;
    api.list_users(session).await
}

pub async fn create_user(
    api: &dyn AdminApi,
    session: &Session,
    login: &str,
    name: &str,
    password: &str,
    is_admin: bool,
) -> Result<User> {
    session.require_admin()?;
    let user = NewUser {
        login: required(login, "Informe o login do usuário")?,
        name: required(name, "Informe o nome do usuário")?,
        password: required(password, "Informe a senha")?,
        is_admin,
    };
    let created = api.create_user(session, &user).await?;
    info!(login = %created.login, is_admin, "user created");
    Ok(created)
}

pub async fn delete_user(api: &dyn AdminApi, session: &Session, login: &str) -> Result<Ack> {
    session.require_admin()?;
    let login = required(login, "Selecione um usuário")?;
    if login == session.login {
        return Err(ColetaError::validation(
            "Você não pode remover o próprio usuário",
        ));
    }
    let ack = api.delete_user(session, &login).await?;
    info!(login = %login, "user deleted");
    Ok(ack)
}

pub async fn change_password(
    api: &dyn AdminApi,
    session: &Session,
    login: &str,
    password: &str,
) -> Result<Ack> {
    session.require_admin()?;
    let login = required(login, "Selecione um usuário")?;
    let password = required(password, "Informe a nova senha")?;
    let ack = api.change_password(session, &login, &password).await?;
    info!(login = %login, "password changed");
    Ok(ack)
}

pub async fn set_admin(
    api: &dyn AdminApi,
    session: &Session,
    login: &str,
    is_admin: bool,
) -> Result<Ack> {
    session.require_admin()?;
    let login = required(login, "Selecione um usuário")?;
    let ack = api.set_admin(session, &login, is_admin).await?;
    info!(login = %login, is_admin, "admin flag updated");
    Ok(ack)
}

pub async fn list_vehicles(api: &dyn AdminApi, session: &Session) -> Result<Vec<Vehicle>> {
    session.require_admin()?;
    api.list_vehicles(session).await
}

/// Build a vehicle registration, checking the year against `this_year`.
pub fn new_vehicle(
    plate: &str,
    make: &str,
    model: &str,
    year: i32,
    this_year: i32,
) -> Result<NewVehicle> {
    let plate = required(plate, "Informe a placa")?.to_uppercase();
    let make = required(make, "Informe a marca")?;
    let model = required(model, "Informe o modelo")?;
    if !(MIN_VEHICLE_YEAR..=this_year + 1).contains(&year) {
        return Err(ColetaError::validation(format!(
            "Ano inválido: {year} (entre {MIN_VEHICLE_YEAR} e {})",
            this_year + 1
        )));
    }
    Ok(NewVehicle {
        plate,
        make,
        model,
        year,
    })
}

pub async fn create_vehicle(
    api: &dyn AdminApi,
    session: &Session,
    plate: &str,
    make: &str,
    model: &str,
    year: i32,
) -> Result<Vehicle> {
    session.require_admin()?;
    let vehicle = new_vehicle(plate, make, model, year, Utc::now().year())?;
    let created = api.create_vehicle(session, &vehicle).await?;
    info!(vehicle_id = created.id, plate = %created.plate, "vehicle created");
    Ok(created)
}

pub async fn delete_vehicle(api: &dyn AdminApi, session: &Session, vehicle_id: i64) -> Result<Ack> {
    session.require_admin()?;
    if vehicle_id <= 0 {
        return Err(ColetaError::validation("Selecione um veículo"));
    }
    let ack = api.delete_vehicle(session, vehicle_id).await?;
    info!(vehicle_id, "vehicle deleted");
    Ok(ack)
}

/// KM of a use may only be corrected by an admin on the day it happened.
/// `use_day` is the `YYYY-MM-DD` key of the daily usage report.
pub fn can_correct_odometer(session: &Session, use_day: &str, today: NaiveDate) -> bool {
    session.is_admin
        && NaiveDate::parse_from_str(use_day.trim(), "%Y-%m-%d").is_ok_and(|day| day == today)
}

pub async fn correct_odometer(
    api: &dyn AdminApi,
    session: &Session,
    checkout_id: i64,
    use_day: &str,
    correction: &OdometerCorrection,
    today: NaiveDate,
) -> Result<Ack> {
    session.require_admin()?;
    if !can_correct_odometer(session, use_day, today) {
        return Err(ColetaError::validation(
            "A quilometragem só pode ser corrigida no mesmo dia do uso",
        ));
    }
    validate_odometer(correction.km_retirada)?;
    validate_odometer(correction.km_devolucao)?;
    if correction.km_devolucao < correction.km_retirada {
        return Err(ColetaError::validation(
            "KM de devolução deve ser maior ou igual ao KM de retirada",
        ));
    }
    let ack = api
        .correct_odometer(session, checkout_id, correction)
        .await?;
    info!(
        checkout_id,
        km_retirada = correction.km_retirada,
        km_devolucao = correction.km_devolucao,
        "odometer corrected"
    );
    Ok(ack)
}
