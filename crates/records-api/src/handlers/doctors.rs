//! Doctor profile handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::chain_outcome;
use crate::{
    auth::AuthUser,
    error::ApiError,
    models::{ChainSync, Doctor, Role},
    validation::require_non_blank,
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDoctorRequest {
    pub specialization: String,
    pub license_number: String,
    pub hospital: Option<String>,
    #[serde(default)]
    pub consultation_fee: u64,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl CreateDoctorRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_non_blank("specialization", &self.specialization)?;
        require_non_blank("licenseNumber", &self.license_number)
    }
}

/// Fields present in the body replace the stored ones. The license number
/// is fixed once registered on-chain.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDoctorRequest {
    pub specialization: Option<String>,
    pub hospital: Option<String>,
    pub consultation_fee: Option<u64>,
    pub available: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DoctorFilter {
    pub specialization: Option<String>,
    pub available: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DoctorResponse {
    pub doctor: Doctor,
}

#[derive(Debug, Serialize)]
pub struct DoctorsListResponse {
    pub doctors: Vec<Doctor>,
    pub total: usize,
}

/// Create the caller's doctor profile and register it on-chain
pub async fn create_doctor_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateDoctorRequest>,
) -> Result<(StatusCode, Json<DoctorResponse>), ApiError> {
    auth.require_role(&[Role::Doctor])?;
    payload.validate()?;
    info!(
        "Creating doctor profile for user {} (license {})",
        auth.user.id, payload.license_number
    );

    let now = Utc::now();
    let mut doctor = Doctor {
        id: Uuid::new_v4(),
        user_id: auth.user.id,
        specialization: payload.specialization.trim().to_string(),
        license_number: payload.license_number.trim().to_string(),
        hospital: payload.hospital,
        consultation_fee: payload.consultation_fee,
        available: payload.available,
        chain: ChainSync::pending(),
        created_at: now,
        updated_at: now,
    };

    if !state.store.create_doctor(&doctor).await? {
        return Err(ApiError::conflict(format!(
            "Doctor profile exists or license already registered: {}",
            doctor.license_number
        )));
    }

    doctor.chain = match auth.user.wallet_address.as_deref() {
        Some(wallet) => chain_outcome(
            state
                .chain
                .register_doctor(wallet, &doctor.id.to_string(), &doctor.license_number)
                .await,
            "registerDoctor",
            doctor.id,
        ),
        None => ChainSync::skipped("no wallet linked"),
    };
    state.store.update_doctor(&doctor).await?;

    Ok((StatusCode::CREATED, Json(DoctorResponse { doctor })))
}

/// List doctors, optionally filtered by specialization and availability
pub async fn list_doctors_handler(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(filter): Query<DoctorFilter>,
) -> Result<Json<DoctorsListResponse>, ApiError> {
    let doctors: Vec<Doctor> = state
        .store
        .list_doctors()
        .await?
        .into_iter()
        .filter(|d| {
            filter
                .specialization
                .as_deref()
                .map_or(true, |s| d.specialization.eq_ignore_ascii_case(s))
        })
        .filter(|d| filter.available.map_or(true, |a| d.available == a))
        .collect();

    let total = doctors.len();
    Ok(Json(DoctorsListResponse { doctors, total }))
}

pub async fn get_doctor_handler(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DoctorResponse>, ApiError> {
    let doctor = load_doctor(&state, id).await?;
    Ok(Json(DoctorResponse { doctor }))
}

pub async fn update_doctor_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDoctorRequest>,
) -> Result<Json<DoctorResponse>, ApiError> {
    let mut doctor = load_doctor(&state, id).await?;
    if !auth.is_admin() && doctor.user_id != auth.user.id {
        return Err(ApiError::forbidden("Only the doctor or an admin may edit this profile"));
    }
    info!("Updating doctor {}", id);

    if let Some(specialization) = payload.specialization {
        require_non_blank("specialization", &specialization)?;
        doctor.specialization = specialization.trim().to_string();
    }
    if payload.hospital.is_some() {
        doctor.hospital = payload.hospital;
    }
    if let Some(fee) = payload.consultation_fee {
        doctor.consultation_fee = fee;
    }
    if let Some(available) = payload.available {
        doctor.available = available;
    }
    doctor.updated_at = Utc::now();

    state.store.update_doctor(&doctor).await?;
    Ok(Json(DoctorResponse { doctor }))
}

pub(crate) async fn load_doctor(state: &AppState, id: Uuid) -> Result<Doctor, ApiError> {
    state
        .store
        .get_doctor(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Doctor not found: {}", id)))
}
