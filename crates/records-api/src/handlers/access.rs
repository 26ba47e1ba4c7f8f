//! Doctor requests for access to a patient's records

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{own_doctor, own_patient, patients::load_patient};
use crate::{
    auth::AuthUser,
    error::ApiError,
    models::{AccessRequest, AccessStatus, Role},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccessRequest {
    pub patient_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondAccessRequest {
    pub status: AccessStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestResponse {
    pub access_request: AccessRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestsListResponse {
    pub access_requests: Vec<AccessRequest>,
    pub total: usize,
}

pub async fn create_access_request_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<CreateAccessRequest>,
) -> Result<(StatusCode, Json<AccessRequestResponse>), ApiError> {
    auth.require_role(&[Role::Doctor])?;
    let doctor = own_doctor(&state, &auth).await?;
    let patient = load_patient(&state, payload.patient_id).await?;

    let already_pending = state
        .store
        .list_access_requests_for_doctor(doctor.id)
        .await?
        .iter()
        .any(|r| r.patient_id == patient.id && r.status == AccessStatus::Pending);
    if already_pending {
        return Err(ApiError::conflict(format!(
            "An access request for patient {} is already pending",
            patient.id
        )));
    }

    let access_request = AccessRequest {
        id: Uuid::new_v4(),
        doctor_id: doctor.id,
        patient_id: patient.id,
        reason: payload.reason,
        status: AccessStatus::Pending,
        created_at: Utc::now(),
        responded_at: None,
    };
    state.store.create_access_request(&access_request).await?;
    info!(
        "Doctor {} requested access to patient {} ({})",
        doctor.id, patient.id, access_request.id
    );

    Ok((
        StatusCode::CREATED,
        Json(AccessRequestResponse { access_request }),
    ))
}

/// Incoming requests for patients, outgoing for doctors, all for admins
pub async fn list_access_requests_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccessRequestsListResponse>, ApiError> {
    let access_requests = match auth.user.role {
        Role::Admin => state.store.list_access_requests().await?,
        Role::Patient => match state.store.get_patient_by_user(auth.user.id).await? {
            Some(patient) => state.store.list_access_requests_for_patient(patient.id).await?,
            None => Vec::new(),
        },
        Role::Doctor => match state.store.get_doctor_by_user(auth.user.id).await? {
            Some(doctor) => state.store.list_access_requests_for_doctor(doctor.id).await?,
            None => Vec::new(),
        },
    };

    let total = access_requests.len();
    Ok(Json(AccessRequestsListResponse {
        access_requests,
        total,
    }))
}

/// Approve or reject a pending request addressed to the caller
pub async fn respond_access_request_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RespondAccessRequest>,
) -> Result<Json<AccessRequestResponse>, ApiError> {
    auth.require_role(&[Role::Patient])?;
    if payload.status == AccessStatus::Pending {
        return Err(ApiError::unprocessable("status must be APPROVED or REJECTED"));
    }

    let mut access_request = state
        .store
        .get_access_request(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Access request not found: {}", id)))?;

    let patient = own_patient(&state, &auth).await?;
    if access_request.patient_id != patient.id {
        return Err(ApiError::forbidden("Access request is addressed to another patient"));
    }
    if access_request.status != AccessStatus::Pending {
        return Err(ApiError::conflict(format!(
            "Access request {} was already answered",
            id
        )));
    }

    access_request.status = payload.status;
    access_request.responded_at = Some(Utc::now());
    state.store.update_access_request(&access_request).await?;
    info!("Access request {} -> {:?}", id, payload.status);

    Ok(Json(AccessRequestResponse { access_request }))
}
