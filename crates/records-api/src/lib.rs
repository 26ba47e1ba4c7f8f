//! Records API
//!
//! REST service for patient/doctor registration, appointment booking and
//! prescription issuance, mirrored on-chain through a [`ChainClient`].
//!
//! ## Endpoints
//!
//! - `POST /api/auth/register`, `POST /api/auth/login`, `POST /api/auth/logout`
//! - `GET /api/auth/session`, `PUT /api/auth/wallet`
//! - `/api/patients`, `/api/doctors` - profiles (registered on-chain)
//! - `/api/appointments` - booking with per-doctor overlap checks, HTK payment
//! - `/api/prescriptions` - issuance (content hash anchored on-chain)
//! - `/api/prescriptions/anonymous` - commitment-only prescriptions
//! - `/api/access-requests` - doctor access to patient records
//! - `/api/tokens` - HTK purchase and balance
//! - `GET /health` - Health check

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod storage;
pub mod validation;

use anyhow::{Context, Result};
use axum::{
    routing::{get, patch, post, put},
    Router,
};
use medledger_chain::ChainClient;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::models::{Role, User};
pub use crate::storage::{MemoryStore, RedisStore, Store};

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub chain: Arc<dyn ChainClient>,
    pub session_ttl_secs: u64,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, chain: Arc<dyn ChainClient>, session_ttl_secs: u64) -> Self {
        Self {
            store,
            chain,
            session_ttl_secs,
        }
    }
}

/// Create the admin account if no user holds that email yet
pub async fn bootstrap_admin(state: &AppState, email: &str, password: &str) -> Result<()> {
    if state.store.get_user_by_email(email).await?.is_some() {
        info!("Admin account {} already exists", email);
        return Ok(());
    }

    let hash = auth::hash_password(password)?;
    let admin = User::new(email.to_string(), "Administrator".to_string(), Role::Admin, hash);
    state
        .store
        .create_user(&admin)
        .await
        .context("Failed to create admin account")?;

    info!("Created admin account {}", email);
    Ok(())
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_handler))
        // Accounts and sessions
        .route("/api/auth/register", post(handlers::auth::register_handler))
        .route("/api/auth/login", post(handlers::auth::login_handler))
        .route("/api/auth/logout", post(handlers::auth::logout_handler))
        .route("/api/auth/session", get(handlers::auth::session_handler))
        .route("/api/auth/wallet", put(handlers::auth::link_wallet_handler))
        // Patients
        .route(
            "/api/patients",
            post(handlers::patients::create_patient_handler)
                .get(handlers::patients::list_patients_handler),
        )
        .route("/api/patients/me", get(handlers::patients::my_patient_handler))
        .route(
            "/api/patients/{id}",
            get(handlers::patients::get_patient_handler)
                .put(handlers::patients::update_patient_handler),
        )
        // Doctors
        .route(
            "/api/doctors",
            post(handlers::doctors::create_doctor_handler)
                .get(handlers::doctors::list_doctors_handler),
        )
        .route(
            "/api/doctors/{id}",
            get(handlers::doctors::get_doctor_handler)
                .put(handlers::doctors::update_doctor_handler),
        )
        // Appointments
        .route(
            "/api/appointments",
            post(handlers::appointments::create_appointment_handler)
                .get(handlers::appointments::list_appointments_handler),
        )
        .route(
            "/api/appointments/{id}",
            get(handlers::appointments::get_appointment_handler)
                .patch(handlers::appointments::update_appointment_handler),
        )
        .route(
            "/api/appointments/{id}/pay",
            post(handlers::appointments::pay_appointment_handler),
        )
        // Prescriptions
        .route(
            "/api/prescriptions",
            post(handlers::prescriptions::create_prescription_handler)
                .get(handlers::prescriptions::list_prescriptions_handler),
        )
        .route(
            "/api/prescriptions/{id}",
            get(handlers::prescriptions::get_prescription_handler),
        )
        // Anonymous prescriptions
        .route(
            "/api/prescriptions/anonymous",
            post(handlers::anonymous::issue_anonymous_handler),
        )
        .route(
            "/api/prescriptions/anonymous/verify",
            post(handlers::anonymous::verify_anonymous_handler),
        )
        .route(
            "/api/prescriptions/anonymous/{id}",
            get(handlers::anonymous::get_anonymous_handler),
        )
        .route(
            "/api/prescriptions/anonymous/{id}/redeem",
            post(handlers::anonymous::redeem_anonymous_handler),
        )
        // Access requests
        .route(
            "/api/access-requests",
            post(handlers::access::create_access_request_handler)
                .get(handlers::access::list_access_requests_handler),
        )
        .route(
            "/api/access-requests/{id}",
            patch(handlers::access::respond_access_request_handler),
        )
        // HTK token
        .route("/api/tokens/buy", post(handlers::tokens::buy_tokens_handler))
        .route("/api/tokens/balance", get(handlers::tokens::balance_handler))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
