//! Checkout state machine.
//!
//! `NoActiveCheckout` --retirar--> `CheckoutOpen` --devolver--> `NoActiveCheckout`.
//!
//! Validation runs before any request is issued. Photos are uploaded one at a
//! time after the checkout call succeeds; an upload failure is counted and
//! never undoes the checkout or the return.

use tracing::{debug, info, warn};

use crate::api::ColetaApi;
use crate::auth::Session;
use crate::error::{ColetaError, Result};
use crate::models::{
    Checkout, CheckoutSummary, Leg, LegList, OdometerEntry, ReturnReceipt, Vehicle,
};
use crate::photos::{check_extension, PhotoRef, PhotoReport, MAX_PHOTOS_PER_SIDE};

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutState {
    NoActiveCheckout,
    CheckoutOpen(Checkout),
}

/// Result of a successful retirar.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub checkout: Checkout,
    pub photos: PhotoReport,
}

/// Result of a successful devolver.
#[derive(Debug, Clone)]
pub struct ReturnOutcome {
    pub receipt: ReturnReceipt,
    /// KM driven over the whole checkout.
    pub distance: f64,
    pub photos: PhotoReport,
}

pub(crate) fn validate_odometer(km: f64) -> Result<()> {
    if !km.is_finite() || km < 0.0 {
        return Err(ColetaError::validation("Informe uma quilometragem válida"));
    }
    Ok(())
}

fn validate_photos(photos: &[PhotoRef]) -> Result<()> {
    if photos.is_empty() {
        return Err(ColetaError::validation("Tire pelo menos uma foto"));
    }
    if photos.len() > MAX_PHOTOS_PER_SIDE {
        return Err(ColetaError::validation(format!(
            "Máximo de {MAX_PHOTOS_PER_SIDE} fotos"
        )));
    }
    for photo in photos {
        check_extension(&photo.file_name)?;
    }
    Ok(())
}

pub(crate) fn clean_notes(notes: Option<&str>) -> Option<String> {
    notes
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Upload photos sequentially in insertion order.
async fn upload_photos(
    api: &dyn ColetaApi,
    session: &Session,
    checkout_id: i64,
    photos: &[PhotoRef],
) -> PhotoReport {
    let mut report = PhotoReport::default();
    for photo in photos {
        let result = match photo.to_upload() {
            Ok(upload) => api.upload_photo(session, checkout_id, &upload).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(uploaded) => {
                debug!(checkout_id, path = %uploaded.remote_path, "photo uploaded");
                report.record(true);
            }
            Err(e) => {
                warn!(checkout_id, file = %photo.file_name, error = %e, "photo upload failed");
                report.record(false);
            }
        }
    }
    report
}

#[derive(Debug, Clone)]
pub struct CheckoutFlow {
    state: CheckoutState,
}

impl Default for CheckoutFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckoutFlow {
    pub fn new() -> Self {
        Self {
            state: CheckoutState::NoActiveCheckout,
        }
    }

    /// Ask the server for the driver's open checkout.
    ///
    /// Any failure (offline, 5xx, expired token) falls back to
    /// `NoActiveCheckout`; the server still refuses a second checkout.
    pub async fn resolve_initial(api: &dyn ColetaApi, session: &Session) -> Self {
        let state = match api.active_checkout(session).await {
            Ok(Some(checkout)) => {
                info!(checkout_id = checkout.id, "open checkout found");
                CheckoutState::CheckoutOpen(checkout)
            }
            Ok(None) => CheckoutState::NoActiveCheckout,
            Err(e) => {
                warn!(error = %e, "could not load open checkout, assuming none");
                CheckoutState::NoActiveCheckout
            }
        };
        Self { state }
    }

    /// Load the open checkout before acting on it. Request failures are
    /// returned, so an unreachable server is not mistaken for "no checkout".
    pub async fn load_active(api: &dyn ColetaApi, session: &Session) -> Result<Self> {
        let state = match api.active_checkout(session).await? {
            Some(checkout) => CheckoutState::CheckoutOpen(checkout),
            None => CheckoutState::NoActiveCheckout,
        };
        Ok(Self { state })
    }

    pub fn state(&self) -> &CheckoutState {
        &self.state
    }

    pub fn current(&self) -> Option<&Checkout> {
        match &self.state {
            CheckoutState::CheckoutOpen(c) => Some(c),
            CheckoutState::NoActiveCheckout => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.current().is_some()
    }

    fn require_open(&self) -> Result<&Checkout> {
        self.current()
            .ok_or_else(|| ColetaError::validation("Nenhuma coleta ativa"))
    }

    /// Check out a vehicle.
    pub async fn retirar(
        &mut self,
        api: &dyn ColetaApi,
        session: &Session,
        vehicle_id: i64,
        odometer_out: f64,
        notes: Option<&str>,
        photos: &[PhotoRef],
    ) -> Result<CheckoutOutcome> {
        if self.is_open() {
            return Err(ColetaError::validation("Você já possui uma coleta ativa"));
        }
        if vehicle_id <= 0 {
            return Err(ColetaError::validation("Selecione um veículo"));
        }
        validate_odometer(odometer_out)?;
        validate_photos(photos)?;

        let entry = OdometerEntry {
            km: odometer_out,
            notes: clean_notes(notes),
        };
        let checkout = api.create_checkout(session, vehicle_id, &entry, None).await?;
        info!(
            checkout_id = checkout.id,
            vehicle_id,
            odometer_out,
            "vehicle checked out"
        );
        self.state = CheckoutState::CheckoutOpen(checkout.clone());

        let report = upload_photos(api, session, checkout.id, photos).await;
        Ok(CheckoutOutcome {
            checkout,
            photos: report,
        })
    }

    /// Return the vehicle of the open checkout.
    pub async fn devolver(
        &mut self,
        api: &dyn ColetaApi,
        session: &Session,
        odometer_in: f64,
        notes: Option<&str>,
        photos: &[PhotoRef],
    ) -> Result<ReturnOutcome> {
        let checkout = self.require_open()?;
        validate_odometer(odometer_in)?;
        if self.distance_preview(odometer_in).is_none() {
            return Err(ColetaError::validation(format!(
                "KM de devolução ({odometer_in}) menor que KM de retirada ({})",
                checkout.odometer_out
            )));
        }
        if checkout.open_leg().is_some() {
            return Err(ColetaError::validation(
                "Registre o retorno do trajeto atual antes de devolver o veículo",
            ));
        }
        validate_photos(photos)?;

        let checkout_id = checkout.id;
        let odometer_out = checkout.odometer_out;
        let entry = OdometerEntry {
            km: odometer_in,
            notes: clean_notes(notes),
        };
        let receipt = api.return_checkout(session, checkout_id, &entry).await?;
        let distance = receipt.odometer_in - odometer_out;
        info!(checkout_id, odometer_in, distance, "vehicle returned");
        self.state = CheckoutState::NoActiveCheckout;

        let report = upload_photos(api, session, checkout_id, photos).await;
        Ok(ReturnOutcome {
            receipt,
            distance,
            photos: report,
        })
    }

    /// KM driven so far if the vehicle were returned at `odometer_in`.
    pub fn distance_preview(&self, odometer_in: f64) -> Option<f64> {
        let checkout = self.current()?;
        if !odometer_in.is_finite() {
            return None;
        }
        let distance = odometer_in - checkout.odometer_out;
        (distance >= 0.0).then_some(distance)
    }

    /// Leave on a leg of the open checkout (`sair`).
    pub async fn start_leg(
        &mut self,
        api: &dyn ColetaApi,
        session: &Session,
        odometer: f64,
        notes: Option<&str>,
    ) -> Result<Leg> {
        let checkout = self.require_open()?;
        validate_odometer(odometer)?;
        if checkout.open_leg().is_some() {
            return Err(ColetaError::validation(
                "Registre o retorno do trajeto anterior antes de uma nova saída",
            ));
        }
        let checkout_id = checkout.id;
        let entry = OdometerEntry {
            km: odometer,
            notes: clean_notes(notes),
        };
        let leg = api.start_leg(session, checkout_id, &entry).await?;
        info!(checkout_id, leg = leg.number, odometer, "leg started");
        if let CheckoutState::CheckoutOpen(c) = &mut self.state {
            c.legs.push(leg.clone());
        }
        Ok(leg)
    }

    /// Come back from the open leg (`retornar`).
    pub async fn end_leg(
        &mut self,
        api: &dyn ColetaApi,
        session: &Session,
        odometer: f64,
        notes: Option<&str>,
    ) -> Result<Leg> {
        let checkout = self.require_open()?;
        validate_odometer(odometer)?;
        let open = checkout
            .open_leg()
            .ok_or_else(|| ColetaError::validation("Nenhuma saída registrada para retornar"))?;
        if let Some(departure) = open.odometer_departure {
            if odometer < departure {
                return Err(ColetaError::validation(format!(
                    "KM de retorno ({odometer}) menor que KM de saída ({departure})"
                )));
            }
        }
        let checkout_id = checkout.id;
        let open_id = open.id;
        let entry = OdometerEntry {
            km: odometer,
            notes: clean_notes(notes),
        };
        let returned = api.end_leg(session, checkout_id, &entry).await?;
        info!(checkout_id, leg = returned.number, distance = ?returned.distance, "leg ended");

        if let CheckoutState::CheckoutOpen(c) = &mut self.state {
            if let Some(leg) = c.legs.iter_mut().find(|l| l.id == open_id) {
                leg.returned_at = returned.returned_at;
                leg.odometer_return = returned.odometer_return.or(Some(odometer));
                leg.distance = returned.distance;
            }
        }
        Ok(returned)
    }

    /// Legs of the open checkout, as the server knows them.
    pub async fn list_legs(&mut self, api: &dyn ColetaApi, session: &Session) -> Result<LegList> {
        let checkout_id = self.require_open()?.id;
        let list = api.list_legs(session, checkout_id).await?;
        if let CheckoutState::CheckoutOpen(c) = &mut self.state {
            c.legs = list.legs.clone();
        }
        Ok(list)
    }
}

/// Vehicles the driver can check out right now.
pub async fn available_vehicles(api: &dyn ColetaApi, session: &Session) -> Result<Vec<Vehicle>> {
    api.available_vehicles(session).await
}

pub async fn my_checkouts(api: &dyn ColetaApi, session: &Session) -> Result<Vec<CheckoutSummary>> {
    api.my_checkouts(session).await
}
