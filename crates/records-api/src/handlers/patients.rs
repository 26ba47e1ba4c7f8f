//! Patient profile handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{chain_outcome, doctor_can_view_patient, own_doctor, own_patient};
use crate::{
    auth::AuthUser,
    error::ApiError,
    models::{ChainSync, Patient, Role},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    pub date_of_birth: NaiveDate,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub blood_type: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
}

impl CreatePatientRequest {
    fn validate(&self) -> Result<(), ApiError> {
        validate_date_of_birth(self.date_of_birth)
    }
}

fn validate_date_of_birth(dob: NaiveDate) -> Result<(), ApiError> {
    if dob > Utc::now().date_naive() {
        return Err(ApiError::unprocessable("dateOfBirth is in the future"));
    }
    Ok(())
}

/// Fields present in the body replace the stored ones
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub blood_type: Option<String>,
    pub allergies: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct PatientResponse {
    pub patient: Patient,
}

#[derive(Debug, Serialize)]
pub struct PatientsListResponse {
    pub patients: Vec<Patient>,
    pub total: usize,
}

/// Create the caller's patient profile and register it on-chain
pub async fn create_patient_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<PatientResponse>), ApiError> {
    auth.require_role(&[Role::Patient])?;
    payload.validate()?;
    info!("Creating patient profile for user {}", auth.user.id);

    let now = Utc::now();
    let mut patient = Patient {
        id: Uuid::new_v4(),
        user_id: auth.user.id,
        date_of_birth: payload.date_of_birth,
        gender: payload.gender,
        phone: payload.phone,
        address: payload.address,
        blood_type: payload.blood_type,
        allergies: payload.allergies,
        chain: ChainSync::pending(),
        created_at: now,
        updated_at: now,
    };

    if !state.store.create_patient(&patient).await? {
        return Err(ApiError::conflict("Patient profile already exists"));
    }

    patient.chain = match auth.user.wallet_address.as_deref() {
        Some(wallet) => chain_outcome(
            state
                .chain
                .register_patient(wallet, &patient.id.to_string())
                .await,
            "registerPatient",
            patient.id,
        ),
        None => ChainSync::skipped("no wallet linked"),
    };
    state.store.update_patient(&patient).await?;

    Ok((StatusCode::CREATED, Json(PatientResponse { patient })))
}

/// List patients. Doctors only see patients they have access to.
pub async fn list_patients_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<PatientsListResponse>, ApiError> {
    auth.require_role(&[Role::Doctor, Role::Admin])?;

    let all = state.store.list_patients().await?;
    let patients = if auth.is_admin() {
        all
    } else {
        let doctor = own_doctor(&state, &auth).await?;
        let mut visible = Vec::new();
        for patient in all {
            if doctor_can_view_patient(&state, doctor.id, patient.id).await? {
                visible.push(patient);
            }
        }
        visible
    };

    let total = patients.len();
    Ok(Json(PatientsListResponse { patients, total }))
}

pub async fn my_patient_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<PatientResponse>, ApiError> {
    auth.require_role(&[Role::Patient])?;
    let patient = own_patient(&state, &auth).await?;
    Ok(Json(PatientResponse { patient }))
}

pub async fn get_patient_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PatientResponse>, ApiError> {
    let patient = load_patient(&state, id).await?;

    let allowed = match auth.user.role {
        Role::Admin => true,
        Role::Patient => patient.user_id == auth.user.id,
        Role::Doctor => {
            let doctor = own_doctor(&state, &auth).await?;
            doctor_can_view_patient(&state, doctor.id, patient.id).await?
        }
    };
    if !allowed {
        return Err(ApiError::forbidden("No access to this patient's records"));
    }

    Ok(Json(PatientResponse { patient }))
}

pub async fn update_patient_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePatientRequest>,
) -> Result<Json<PatientResponse>, ApiError> {
    let mut patient = load_patient(&state, id).await?;
    if !auth.is_admin() && patient.user_id != auth.user.id {
        return Err(ApiError::forbidden("Only the patient or an admin may edit this profile"));
    }
    if let Some(dob) = payload.date_of_birth {
        validate_date_of_birth(dob)?;
    }
    info!("Updating patient {}", id);

    if let Some(dob) = payload.date_of_birth {
        patient.date_of_birth = dob;
    }
    if payload.gender.is_some() {
        patient.gender = payload.gender;
    }
    if payload.phone.is_some() {
        patient.phone = payload.phone;
    }
    if payload.address.is_some() {
        patient.address = payload.address;
    }
    if payload.blood_type.is_some() {
        patient.blood_type = payload.blood_type;
    }
    if let Some(allergies) = payload.allergies {
        patient.allergies = allergies;
    }
    patient.updated_at = Utc::now();

    state.store.update_patient(&patient).await?;
    Ok(Json(PatientResponse { patient }))
}

pub(crate) async fn load_patient(state: &AppState, id: Uuid) -> Result<Patient, ApiError> {
    state
        .store
        .get_patient(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Patient not found: {}", id)))
}
