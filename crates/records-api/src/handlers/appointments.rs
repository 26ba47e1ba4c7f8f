//! Appointment booking, status updates and HTK payment

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use medledger_chain::TxReceipt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{doctors::load_doctor, own_patient};
use crate::{
    auth::AuthUser,
    error::ApiError,
    models::{Appointment, AppointmentStatus, Booking, Role},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: Option<String>,
}

impl CreateAppointmentRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.end_time <= self.start_time {
            return Err(ApiError::unprocessable("endTime must be after startTime"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentResponse {
    pub appointment: Appointment,
}

#[derive(Debug, Serialize)]
pub struct AppointmentsListResponse {
    pub appointments: Vec<Appointment>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub appointment: Appointment,
    pub transaction: TxReceipt,
}

/// Book an appointment with a doctor
pub async fn create_appointment_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentResponse>), ApiError> {
    auth.require_role(&[Role::Patient])?;
    payload.validate()?;

    let patient = own_patient(&state, &auth).await?;
    let doctor = load_doctor(&state, payload.doctor_id).await?;
    if !doctor.available {
        return Err(ApiError::unprocessable(format!(
            "Doctor {} is not accepting appointments",
            doctor.id
        )));
    }

    info!(
        "Booking doctor {} for patient {}: {} - {}",
        doctor.id, patient.id, payload.start_time, payload.end_time
    );

    let now = Utc::now();
    let appointment = Appointment {
        id: Uuid::new_v4(),
        doctor_id: doctor.id,
        patient_id: patient.id,
        start_time: payload.start_time,
        end_time: payload.end_time,
        status: AppointmentStatus::Pending,
        reason: payload.reason,
        notes: None,
        paid: false,
        payment_tx: None,
        created_at: now,
        updated_at: now,
    };

    match state.store.book_appointment(&appointment).await? {
        Booking::Booked => Ok((
            StatusCode::CREATED,
            Json(AppointmentResponse { appointment }),
        )),
        Booking::Overlaps(existing) => Err(ApiError::conflict(format!(
            "Doctor already has appointment {} in this time slot",
            existing
        ))),
    }
}

/// Own appointments for patients and doctors, all for admins
pub async fn list_appointments_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(filter): Query<AppointmentFilter>,
) -> Result<Json<AppointmentsListResponse>, ApiError> {
    let appointments = match auth.user.role {
        Role::Admin => state.store.list_appointments().await?,
        Role::Patient => match state.store.get_patient_by_user(auth.user.id).await? {
            Some(patient) => state.store.list_appointments_for_patient(patient.id).await?,
            None => Vec::new(),
        },
        Role::Doctor => match state.store.get_doctor_by_user(auth.user.id).await? {
            Some(doctor) => state.store.list_appointments_for_doctor(doctor.id).await?,
            None => Vec::new(),
        },
    };

    let appointments: Vec<Appointment> = appointments
        .into_iter()
        .filter(|a| filter.status.map_or(true, |s| a.status == s))
        .collect();

    let total = appointments.len();
    Ok(Json(AppointmentsListResponse {
        appointments,
        total,
    }))
}

pub async fn get_appointment_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let appointment = load_appointment(&state, id).await?;
    if !auth.is_admin() && participant_role(&state, &auth, &appointment).await?.is_none() {
        return Err(ApiError::forbidden("Not a participant of this appointment"));
    }
    Ok(Json(AppointmentResponse { appointment }))
}

/// Replace status and/or notes
pub async fn update_appointment_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAppointmentRequest>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let mut appointment = load_appointment(&state, id).await?;

    let acting_as = if auth.is_admin() {
        Role::Admin
    } else {
        participant_role(&state, &auth, &appointment)
            .await?
            .ok_or_else(|| ApiError::forbidden("Not a participant of this appointment"))?
    };

    if let Some(status) = payload.status {
        if acting_as == Role::Patient && status != AppointmentStatus::Cancelled {
            return Err(ApiError::forbidden("Patients may only cancel appointments"));
        }

        // Moving a released appointment back into a slot-holding status must
        // not double-book the doctor.
        if status.holds_slot() && !appointment.status.holds_slot() {
            let clash = state
                .store
                .list_appointments_for_doctor(appointment.doctor_id)
                .await?
                .into_iter()
                .find(|other| {
                    other.id != appointment.id
                        && other.conflicts_with(appointment.start_time, appointment.end_time)
                });
            if let Some(other) = clash {
                return Err(ApiError::conflict(format!(
                    "Doctor already has appointment {} in this time slot",
                    other.id
                )));
            }
        }

        info!(
            "Appointment {} status {:?} -> {:?}",
            id, appointment.status, status
        );
        appointment.status = status;
    }
    if payload.notes.is_some() {
        appointment.notes = payload.notes;
    }
    appointment.updated_at = Utc::now();

    state.store.update_appointment(&appointment).await?;
    Ok(Json(AppointmentResponse { appointment }))
}

/// Pay the doctor's consultation fee in HTK
pub async fn pay_appointment_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, ApiError> {
    auth.require_role(&[Role::Patient])?;

    let appointment = load_appointment(&state, id).await?;
    let patient = own_patient(&state, &auth).await?;
    if appointment.patient_id != patient.id {
        return Err(ApiError::forbidden("Only the booking patient may pay"));
    }

    // Held across the transfer so concurrent requests cannot both pay
    if !state.store.reserve_payment(id).await? {
        return Err(ApiError::conflict(format!(
            "Payment for appointment {} is already in progress",
            id
        )));
    }

    let outcome = settle_payment(&state, &auth, id).await;
    if outcome.is_err() {
        state.store.release_payment(id).await?;
    }
    outcome.map(Json)
}

/// Runs under the payment reservation; reloads the appointment so a
/// payment completed by an earlier request is seen
async fn settle_payment(
    state: &AppState,
    auth: &AuthUser,
    id: Uuid,
) -> Result<PaymentResponse, ApiError> {
    let mut appointment = load_appointment(state, id).await?;
    if appointment.paid {
        return Err(ApiError::conflict(format!("Appointment {} is already paid", id)));
    }
    if appointment.status == AppointmentStatus::Cancelled {
        return Err(ApiError::unprocessable("Cannot pay for a cancelled appointment"));
    }

    let doctor = load_doctor(state, appointment.doctor_id).await?;
    if doctor.consultation_fee == 0 {
        return Err(ApiError::unprocessable("Doctor charges no consultation fee"));
    }

    let payer = auth.wallet()?;
    let payee = state
        .store
        .get_user(doctor.user_id)
        .await?
        .and_then(|u| u.wallet_address)
        .ok_or_else(|| ApiError::unprocessable("Doctor has no wallet linked"))?;

    info!(
        "Paying {} HTK from {} to {} for appointment {}",
        doctor.consultation_fee, payer, payee, id
    );
    let receipt = state
        .chain
        .pay_doctor(payer, &payee, doctor.consultation_fee)
        .await
        .map_err(|e| {
            warn!("payDoctor for appointment {} failed: {}", id, e);
            ApiError::from(e)
        })?;

    appointment.paid = true;
    appointment.payment_tx = Some(receipt.tx_hash.clone());
    appointment.updated_at = Utc::now();
    state.store.update_appointment(&appointment).await?;

    Ok(PaymentResponse {
        appointment,
        transaction: receipt,
    })
}

async fn load_appointment(state: &AppState, id: Uuid) -> Result<Appointment, ApiError> {
    state
        .store
        .get_appointment(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Appointment not found: {}", id)))
}

/// The side the caller is on, if they take part in the appointment
async fn participant_role(
    state: &AppState,
    auth: &AuthUser,
    appointment: &Appointment,
) -> Result<Option<Role>, ApiError> {
    match auth.user.role {
        Role::Patient => {
            let owns = state
                .store
                .get_patient(appointment.patient_id)
                .await?
                .is_some_and(|p| p.user_id == auth.user.id);
            Ok(owns.then_some(Role::Patient))
        }
        Role::Doctor => {
            let owns = state
                .store
                .get_doctor(appointment.doctor_id)
                .await?
                .is_some_and(|d| d.user_id == auth.user.id);
            Ok(owns.then_some(Role::Doctor))
        }
        Role::Admin => Ok(Some(Role::Admin)),
    }
}
