//! Prescription issuance; the content hash is anchored on-chain

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use medledger_common::{Medication, PrescriptionContent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{chain_outcome, own_doctor, patients::load_patient};
use crate::{
    auth::AuthUser,
    error::ApiError,
    models::{ChainSync, Prescription, Role},
    validation::require_non_blank,
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrescriptionRequest {
    pub patient_id: Uuid,
    pub diagnosis: String,
    pub medications: Vec<Medication>,
    pub notes: Option<String>,
    pub valid_until: Option<NaiveDate>,
}

impl CreatePrescriptionRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_non_blank("diagnosis", &self.diagnosis)?;
        validate_medications(&self.medications)
    }
}

/// At least one medication, each with name, dosage and frequency
pub(crate) fn validate_medications(medications: &[Medication]) -> Result<(), ApiError> {
    if medications.is_empty() {
        return Err(ApiError::unprocessable("At least one medication is required"));
    }
    for med in medications {
        require_non_blank("medication name", &med.name)?;
        require_non_blank("medication dosage", &med.dosage)?;
        require_non_blank("medication frequency", &med.frequency)?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct PrescriptionResponse {
    pub prescription: Prescription,
}

#[derive(Debug, Serialize)]
pub struct PrescriptionsListResponse {
    pub prescriptions: Vec<Prescription>,
    pub total: usize,
}

/// Issue a prescription to a patient
pub async fn create_prescription_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreatePrescriptionRequest>,
) -> Result<(StatusCode, Json<PrescriptionResponse>), ApiError> {
    auth.require_role(&[Role::Doctor])?;
    payload.validate()?;

    let doctor = own_doctor(&state, &auth).await?;
    let patient = load_patient(&state, payload.patient_id).await?;
    info!(
        "Doctor {} issuing prescription for patient {} ({} medications)",
        doctor.id,
        patient.id,
        payload.medications.len()
    );

    let mut prescription = Prescription {
        id: Uuid::new_v4(),
        doctor_id: doctor.id,
        patient_id: patient.id,
        diagnosis: payload.diagnosis.trim().to_string(),
        medications: payload.medications,
        notes: payload.notes,
        valid_until: payload.valid_until,
        issued_at: Utc::now(),
        chain: ChainSync::pending(),
    };
    state.store.create_prescription(&prescription).await?;

    let patient_wallet = state
        .store
        .get_user(patient.user_id)
        .await?
        .and_then(|u| u.wallet_address);

    prescription.chain = match (patient_wallet, auth.user.wallet_address.as_deref()) {
        (Some(patient_wallet), Some(doctor_wallet)) => {
            let content = PrescriptionContent::new(
                prescription.medications.clone(),
                prescription.diagnosis.clone(),
                doctor.id.to_string(),
                prescription.issued_at.timestamp_millis(),
            );
            chain_outcome(
                state
                    .chain
                    .issue_prescription(
                        &prescription.id.to_string(),
                        &patient_wallet,
                        doctor_wallet,
                        content.hash(),
                    )
                    .await,
                "issuePrescription",
                prescription.id,
            )
        }
        _ => ChainSync::skipped("patient or doctor has no wallet linked"),
    };
    state.store.update_prescription(&prescription).await?;

    Ok((
        StatusCode::CREATED,
        Json(PrescriptionResponse { prescription }),
    ))
}

/// Own prescriptions for patients, issued ones for doctors, all for admins
pub async fn list_prescriptions_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<PrescriptionsListResponse>, ApiError> {
    let prescriptions = match auth.user.role {
        Role::Admin => state.store.list_prescriptions().await?,
        Role::Patient => match state.store.get_patient_by_user(auth.user.id).await? {
            Some(patient) => state.store.list_prescriptions_for_patient(patient.id).await?,
            None => Vec::new(),
        },
        Role::Doctor => match state.store.get_doctor_by_user(auth.user.id).await? {
            Some(doctor) => state.store.list_prescriptions_for_doctor(doctor.id).await?,
            None => Vec::new(),
        },
    };

    let total = prescriptions.len();
    Ok(Json(PrescriptionsListResponse {
        prescriptions,
        total,
    }))
}

pub async fn get_prescription_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PrescriptionResponse>, ApiError> {
    let prescription = state
        .store
        .get_prescription(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Prescription not found: {}", id)))?;

    let allowed = match auth.user.role {
        Role::Admin => true,
        Role::Patient => state
            .store
            .get_patient(prescription.patient_id)
            .await?
            .is_some_and(|p| p.user_id == auth.user.id),
        Role::Doctor => state
            .store
            .get_doctor(prescription.doctor_id)
            .await?
            .is_some_and(|d| d.user_id == auth.user.id),
    };
    if !allowed {
        return Err(ApiError::forbidden("No access to this prescription"));
    }

    Ok(Json(PrescriptionResponse { prescription }))
}
