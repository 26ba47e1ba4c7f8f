//! Password hashing, session tokens and the authenticated-user extractor

use anyhow::Result;
use argon2::{
    password_hash::{
        rand_core::OsRng as SaltRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{TimeDelta, Utc};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{Role, Session, User};
use crate::AppState;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut SaltRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// 256-bit random bearer token
pub fn new_session(user_id: uuid::Uuid, ttl_secs: u64) -> Result<Session> {
    let expires_at = i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| anyhow::anyhow!("Session TTL of {}s is out of range", ttl_secs))?;

    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);

    Ok(Session {
        token: hex::encode(bytes),
        user_id,
        expires_at,
    })
}

/// The caller, resolved from `Authorization: Bearer <token>`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.user.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Role {:?} is not permitted for this action",
                self.user.role
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }

    pub fn wallet(&self) -> Result<&str, ApiError> {
        self.user
            .wallet_address
            .as_deref()
            .ok_or_else(|| ApiError::unprocessable("No wallet linked to this account"))
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Expected a Bearer token"))?;

        let session = state
            .store
            .get_session(token)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Session expired or invalid"))?;

        let user = state.store.get_user(session.user_id).await?.ok_or_else(|| {
            debug!("Session {} points at a deleted user", session.user_id);
            ApiError::unauthorized("Session expired or invalid")
        })?;

        Ok(AuthUser {
            user,
            token: token.to_string(),
        })
    }
}
