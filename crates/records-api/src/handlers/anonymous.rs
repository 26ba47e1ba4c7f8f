//! Anonymous prescriptions
//!
//! Only the commitment is stored and anchored. The issuing doctor receives
//! the content and secret key once, and whoever holds them can later prove
//! ownership by disclosing both (the opening). Redemption spends a
//! nullifier so the same opening cannot be redeemed twice.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use medledger_common::{
    Commitment, Error as CommonError, Medication, Opening, PrescriptionContent, SecretKey,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{own_doctor, prescriptions::validate_medications};
use crate::{
    auth::AuthUser,
    error::ApiError,
    models::{AnonymousPrescription, ChainSync, Role},
    validation::require_non_blank,
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueAnonymousRequest {
    pub diagnosis: String,
    pub medications: Vec<Medication>,
}

impl IssueAnonymousRequest {
    fn validate(&self) -> Result<(), ApiError> {
        require_non_blank("diagnosis", &self.diagnosis)?;
        validate_medications(&self.medications)
    }
}

/// Everything the holder needs to open the commitment later.
/// The secret key is not kept server-side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueAnonymousResponse {
    pub id: Uuid,
    pub commitment: Commitment,
    pub secret_key: SecretKey,
    pub doctor_id: Uuid,
    pub timestamp: i64,
    pub content: PrescriptionContent,
    pub chain: ChainSync,
}

#[derive(Debug, Deserialize)]
pub struct VerifyAnonymousRequest {
    pub id: Uuid,
    #[serde(flatten)]
    pub opening: Opening,
}

#[derive(Debug, Serialize)]
pub struct VerifyAnonymousResponse {
    pub valid: bool,
    pub commitment: Commitment,
}

#[derive(Debug, Serialize)]
pub struct AnonymousPrescriptionResponse {
    pub prescription: AnonymousPrescription,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub redeemed: bool,
    pub nullifier: String,
}

/// Issue a commitment-only prescription
pub async fn issue_anonymous_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<IssueAnonymousRequest>,
) -> Result<(StatusCode, Json<IssueAnonymousResponse>), ApiError> {
    auth.require_role(&[Role::Doctor])?;
    payload.validate()?;
    let doctor = own_doctor(&state, &auth).await?;

    let issued_at = Utc::now();
    let content = PrescriptionContent::new(
        payload.medications,
        payload.diagnosis.trim().to_string(),
        doctor.id.to_string(),
        issued_at.timestamp_millis(),
    );
    let secret_key = SecretKey::generate();
    let commitment = Commitment::derive(&content, &secret_key);

    let mut record = AnonymousPrescription {
        id: Uuid::new_v4(),
        doctor_id: doctor.id,
        commitment,
        issued_at,
        redeemed: false,
        redeemed_at: None,
        chain: ChainSync::pending(),
    };
    if !state.store.create_anonymous(&record).await? {
        return Err(ApiError::conflict(format!(
            "Commitment {} is already recorded",
            commitment
        )));
    }
    info!(
        "Doctor {} issuing anonymous prescription {} ({})",
        doctor.id, record.id, commitment
    );

    // An unanchored commitment can never verify, so the record goes too.
    let receipt = match state
        .chain
        .issue_anonymous_prescription(&record.id.to_string(), &commitment)
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!("issueAnonymousPrescription for {} failed: {}", record.id, e);
            state.store.delete_anonymous(record.id).await?;
            return Err(ApiError::bad_gateway(format!(
                "Failed to anchor commitment: {}",
                e
            )));
        }
    };

    record.chain = ChainSync::confirmed(receipt);
    state.store.update_anonymous(&record).await?;

    Ok((
        StatusCode::CREATED,
        Json(IssueAnonymousResponse {
            id: record.id,
            commitment,
            secret_key,
            doctor_id: doctor.id,
            timestamp: content.timestamp,
            content,
            chain: record.chain,
        }),
    ))
}

/// Check an opening against the on-chain commitment
pub async fn verify_anonymous_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyAnonymousRequest>,
) -> Result<Json<VerifyAnonymousResponse>, ApiError> {
    let commitment = anchored_commitment(&state, payload.id).await?;
    let valid = payload.opening.matches(&commitment);
    info!("Verification of anonymous prescription {}: {}", payload.id, valid);

    Ok(Json(VerifyAnonymousResponse { valid, commitment }))
}

/// Public commitment record; carries no content
pub async fn get_anonymous_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnonymousPrescriptionResponse>, ApiError> {
    let prescription = load_anonymous(&state, id).await?;
    Ok(Json(AnonymousPrescriptionResponse { prescription }))
}

/// Redeem with a valid opening, at most once
pub async fn redeem_anonymous_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(opening): Json<Opening>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let mut record = load_anonymous(&state, id).await?;
    let commitment = anchored_commitment(&state, id).await?;

    let nullifier = opening.verify(&commitment).map_err(|e| {
        warn!("Rejected opening for anonymous prescription {}", id);
        ApiError::from(e)
    })?;

    if !state.store.claim_nullifier(&nullifier).await? {
        warn!("Replayed redemption of {} (nullifier {})", id, nullifier);
        return Err(CommonError::NullifierReplay.into());
    }

    record.redeemed = true;
    record.redeemed_at = Some(Utc::now());
    state.store.update_anonymous(&record).await?;
    info!("Anonymous prescription {} redeemed", id);

    Ok(Json(RedeemResponse {
        redeemed: true,
        nullifier: nullifier.to_hex(),
    }))
}

async fn load_anonymous(state: &AppState, id: Uuid) -> Result<AnonymousPrescription, ApiError> {
    state
        .store
        .get_anonymous(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Anonymous prescription not found: {}", id)))
}

/// The chain holds the authoritative commitment
async fn anchored_commitment(state: &AppState, id: Uuid) -> Result<Commitment, ApiError> {
    state
        .chain
        .get_anonymous_commitment(&id.to_string())
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No commitment anchored for {}", id)))
}
