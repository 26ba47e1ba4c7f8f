//! Account registration, login and session handlers

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    auth::{self, AuthUser},
    error::ApiError,
    models::{PublicUser, Role, User},
    validation::{self, MIN_PASSWORD_LEN},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if !validation::is_valid_email(&self.email) {
            return Err(ApiError::unprocessable(format!(
                "Invalid email address: {}",
                self.email
            )));
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            return Err(ApiError::unprocessable(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        validation::require_non_blank("name", &self.name)?;
        if self.role == Role::Admin {
            return Err(ApiError::unprocessable(
                "Admin accounts cannot be self-registered",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkWalletRequest {
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: PublicUser,
}

/// Create an account
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    payload.validate()?;
    info!("Registering {:?} account: {}", payload.role, payload.email);

    let hash = auth::hash_password(&payload.password)?;
    let user = User::new(payload.email, payload.name.trim().to_string(), payload.role, hash);

    if !state.store.create_user(&user).await? {
        return Err(ApiError::conflict(format!(
            "Email already registered: {}",
            user.email
        )));
    }

    Ok((StatusCode::CREATED, Json(UserResponse { user: user.public() })))
}

/// Exchange credentials for a bearer token
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = payload.email.trim().to_lowercase();

    let user = match state.store.get_user_by_email(&email).await? {
        Some(user) if auth::verify_password(&payload.password, &user.password_hash) => user,
        _ => {
            warn!("Failed login for {}", email);
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
    };

    let session = auth::new_session(user.id, state.session_ttl_secs)?;
    state.store.create_session(&session).await?;
    info!("User {} logged in", user.id);

    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        user: user.public(),
    }))
}

/// Drop the caller's session
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<StatusCode, ApiError> {
    state.store.delete_session(&auth.token).await?;
    info!("User {} logged out", auth.user.id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn session_handler(auth: AuthUser) -> Json<UserResponse> {
    Json(UserResponse {
        user: auth.user.public(),
    })
}

/// Link a wallet address to the caller's account
pub async fn link_wallet_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<LinkWalletRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let wallet = payload.wallet_address.trim();
    if !validation::is_valid_wallet(wallet) {
        return Err(ApiError::unprocessable(format!(
            "Invalid wallet address: {}",
            wallet
        )));
    }

    let mut user = auth.user;
    user.wallet_address = Some(wallet.to_string());
    state.store.update_user(&user).await?;
    info!("Linked wallet {} to user {}", wallet, user.id);

    Ok(Json(UserResponse {
        user: user.public(),
    }))
}
