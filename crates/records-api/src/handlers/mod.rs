//! API request handlers

pub mod access;
pub mod anonymous;
pub mod appointments;
pub mod auth;
pub mod doctors;
pub mod patients;
pub mod prescriptions;
pub mod tokens;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use medledger_chain::TxReceipt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{AccessStatus, ChainSync, Doctor, Patient};
use crate::AppState;

/// Health check endpoint
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.health_check().await {
        Ok(()) => Json(serde_json::json!({
            "status": "healthy",
            "service": "records-api"
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "service": "records-api",
                "error": format!("Storage unavailable: {}", e)
            })),
        )
            .into_response(),
    }
}

/// Record the outcome of a mirroring call. The store write has already
/// happened, so a chain failure is kept on the record instead of failing
/// the request.
pub(crate) fn chain_outcome(
    result: medledger_common::Result<TxReceipt>,
    method: &str,
    record_id: Uuid,
) -> ChainSync {
    match result {
        Ok(receipt) => {
            info!(
                "{} for {} mined in block {} ({})",
                method, record_id, receipt.block_number, receipt.tx_hash
            );
            ChainSync::confirmed(receipt)
        }
        Err(e) => {
            warn!("{} for {} failed, record kept off-chain: {}", method, record_id, e);
            ChainSync::failed(e.to_string())
        }
    }
}

/// Patient profile of the calling user
pub(crate) async fn own_patient(state: &AppState, auth: &AuthUser) -> Result<Patient, ApiError> {
    state
        .store
        .get_patient_by_user(auth.user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient profile not found; create it first"))
}

/// Doctor profile of the calling user
pub(crate) async fn own_doctor(state: &AppState, auth: &AuthUser) -> Result<Doctor, ApiError> {
    state
        .store
        .get_doctor_by_user(auth.user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Doctor profile not found; create it first"))
}

/// A doctor may read a patient's records after an approved access request
/// or once they share an appointment.
pub(crate) async fn doctor_can_view_patient(
    state: &AppState,
    doctor_id: Uuid,
    patient_id: Uuid,
) -> anyhow::Result<bool> {
    let approved = state
        .store
        .list_access_requests_for_doctor(doctor_id)
        .await?
        .iter()
        .any(|r| r.patient_id == patient_id && r.status == AccessStatus::Approved);
    if approved {
        return Ok(true);
    }

    Ok(state
        .store
        .list_appointments_for_doctor(doctor_id)
        .await?
        .iter()
        .any(|a| a.patient_id == patient_id))
}
