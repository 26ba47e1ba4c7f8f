//! Integration tests for the Records API

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use async_trait::async_trait;
use medledger_chain::{ChainClient, MockChain, TxReceipt};
use medledger_common::{Commitment, Result as ChainResult};
use records_api::{create_router, AppState, MemoryStore};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt; // for `oneshot`

const PATIENT_WALLET: &str = "0x1111111111111111111111111111111111111111";
const DOCTOR_WALLET: &str = "0x2222222222222222222222222222222222222222";

/// Router over an in-memory store, plus a handle on the mock chain
fn create_test_app() -> (Router, Arc<MockChain>) {
    let chain = Arc::new(MockChain::new());
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        chain.clone() as Arc<dyn ChainClient>,
        3600,
    );
    (create_router(state), chain)
}

/// Mock chain whose transfers take a while to be mined
struct SlowChain {
    inner: Arc<MockChain>,
    latency: Duration,
}

#[async_trait]
impl ChainClient for SlowChain {
    async fn register_patient(&self, wallet: &str, patient_id: &str) -> ChainResult<TxReceipt> {
        self.inner.register_patient(wallet, patient_id).await
    }

    async fn register_doctor(
        &self,
        wallet: &str,
        doctor_id: &str,
        license_number: &str,
    ) -> ChainResult<TxReceipt> {
        self.inner
            .register_doctor(wallet, doctor_id, license_number)
            .await
    }

    async fn issue_prescription(
        &self,
        prescription_id: &str,
        patient_wallet: &str,
        doctor_wallet: &str,
        content_hash: [u8; 32],
    ) -> ChainResult<TxReceipt> {
        self.inner
            .issue_prescription(prescription_id, patient_wallet, doctor_wallet, content_hash)
            .await
    }

    async fn issue_anonymous_prescription(
        &self,
        record_id: &str,
        commitment: &Commitment,
    ) -> ChainResult<TxReceipt> {
        self.inner
            .issue_anonymous_prescription(record_id, commitment)
            .await
    }

    async fn get_anonymous_commitment(&self, record_id: &str) -> ChainResult<Option<Commitment>> {
        self.inner.get_anonymous_commitment(record_id).await
    }

    async fn pay_doctor(&self, from: &str, to: &str, amount: u64) -> ChainResult<TxReceipt> {
        tokio::time::sleep(self.latency).await;
        self.inner.pay_doctor(from, to, amount).await
    }

    async fn buy_tokens(&self, wallet: &str, amount: u64) -> ChainResult<TxReceipt> {
        self.inner.buy_tokens(wallet, amount).await
    }

    async fn token_balance(&self, wallet: &str) -> ChainResult<u64> {
        self.inner.token_balance(wallet).await
    }

    async fn block_number(&self) -> ChainResult<u64> {
        self.inner.block_number().await
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn register(app: &Router, email: &str, role: &str) -> StatusCode {
    let (status, _) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "email": email,
            "password": "s3cure-pass",
            "name": "Test User",
            "role": role
        })),
    )
    .await;
    status
}

async fn login(app: &Router, email: &str) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": email, "password": "s3cure-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    json["token"].as_str().unwrap().to_string()
}

async fn link_wallet(app: &Router, token: &str, wallet: &str) {
    let (status, _) = send(
        app,
        "PUT",
        "/api/auth/wallet",
        Some(token),
        Some(json!({ "walletAddress": wallet })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

/// Patient with a wallet and a profile; returns (token, patient id)
async fn setup_patient(app: &Router, email: &str) -> (String, String) {
    assert_eq!(register(app, email, "PATIENT").await, StatusCode::CREATED);
    let token = login(app, email).await;
    link_wallet(app, &token, PATIENT_WALLET).await;

    let (status, json) = send(
        app,
        "POST",
        "/api/patients",
        Some(&token),
        Some(json!({ "dateOfBirth": "1990-04-12", "allergies": ["penicillin"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = json["patient"]["id"].as_str().unwrap().to_string();
    (token, id)
}

/// Doctor with a wallet and a profile; returns (token, doctor id)
async fn setup_doctor(app: &Router, email: &str, license: &str, fee: u64) -> (String, String) {
    assert_eq!(register(app, email, "DOCTOR").await, StatusCode::CREATED);
    let token = login(app, email).await;
    link_wallet(app, &token, DOCTOR_WALLET).await;

    let (status, json) = send(
        app,
        "POST",
        "/api/doctors",
        Some(&token),
        Some(json!({
            "specialization": "Cardiology",
            "licenseNumber": license,
            "consultationFee": fee
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = json["doctor"]["id"].as_str().unwrap().to_string();
    (token, id)
}

async fn book(
    app: &Router,
    token: &str,
    doctor_id: &str,
    start: &str,
    end: &str,
) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/appointments",
        Some(token),
        Some(json!({ "doctorId": doctor_id, "startTime": start, "endTime": end })),
    )
    .await
}

fn prescription_body(patient_id: &str) -> Value {
    json!({
        "patientId": patient_id,
        "diagnosis": "Hypertension",
        "medications": [
            { "name": "Lisinopril", "dosage": "10mg", "frequency": "once daily" }
        ]
    })
}

#[tokio::test]
async fn test_health_check() {
    let (app, _chain) = create_test_app();

    let (status, json) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "records-api");
}

#[tokio::test]
async fn test_registration_rules() {
    let (app, _chain) = create_test_app();

    assert_eq!(register(&app, "jane@clinic.org", "PATIENT").await, StatusCode::CREATED);
    // Emails are case-insensitive
    assert_eq!(register(&app, "Jane@Clinic.org", "DOCTOR").await, StatusCode::CONFLICT);
    assert_eq!(
        register(&app, "not-an-email", "PATIENT").await,
        StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
        register(&app, "root@clinic.org", "ADMIN").await,
        StatusCode::UNPROCESSABLE_ENTITY
    );

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "email": "short@clinic.org",
            "password": "short",
            "name": "Short",
            "role": "PATIENT"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_login_session_logout() {
    let (app, _chain) = create_test_app();
    register(&app, "sam@clinic.org", "PATIENT").await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "sam@clinic.org", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].is_string());

    let token = login(&app, "sam@clinic.org").await;
    let (status, json) = send(&app, "GET", "/api/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["email"], "sam@clinic.org");
    assert!(json["user"].get("passwordHash").is_none());

    let (status, _) = send(&app, "POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "GET", "/api/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_and_role_checks() {
    let (app, _chain) = create_test_app();

    let (status, _) = send(&app, "GET", "/api/patients/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/api/patients/me", Some("bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (patient_token, _) = setup_patient(&app, "pat@clinic.org").await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/doctors",
        Some(&patient_token),
        Some(json!({ "specialization": "Cardiology", "licenseNumber": "LIC-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "GET", "/api/patients", Some(&patient_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_wallet_must_be_well_formed() {
    let (app, _chain) = create_test_app();
    register(&app, "w@clinic.org", "PATIENT").await;
    let token = login(&app, "w@clinic.org").await;

    let (status, _) = send(
        &app,
        "PUT",
        "/api/auth/wallet",
        Some(&token),
        Some(json!({ "walletAddress": "0x1234" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_patient_profile_is_registered_on_chain() {
    let (app, _chain) = create_test_app();
    let (token, id) = setup_patient(&app, "pat@clinic.org").await;

    let (status, json) = send(&app, "GET", "/api/patients/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["patient"]["id"], id.as_str());
    assert_eq!(json["patient"]["chain"]["status"], "CONFIRMED");
    assert!(json["patient"]["chain"]["txHash"].as_str().unwrap().starts_with("0x"));

    let (status, _) = send(
        &app,
        "POST",
        "/api/patients",
        Some(&token),
        Some(json!({ "dateOfBirth": "1990-04-12" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_profile_without_wallet_skips_chain() {
    let (app, _chain) = create_test_app();
    register(&app, "nowallet@clinic.org", "PATIENT").await;
    let token = login(&app, "nowallet@clinic.org").await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/patients",
        Some(&token),
        Some(json!({ "dateOfBirth": "1985-01-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["patient"]["chain"]["status"], "SKIPPED");
}

#[tokio::test]
async fn test_duplicate_license_rejected() {
    let (app, _chain) = create_test_app();
    setup_doctor(&app, "doc1@clinic.org", "LIC-42", 0).await;

    register(&app, "doc2@clinic.org", "DOCTOR").await;
    let token = login(&app, "doc2@clinic.org").await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/doctors",
        Some(&token),
        Some(json!({ "specialization": "Dermatology", "licenseNumber": "LIC-42" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_doctor_listing_filters() {
    let (app, _chain) = create_test_app();
    let (token, _) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;

    let (status, json) = send(
        &app,
        "GET",
        "/api/doctors?specialization=cardiology",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);

    let (_, json) = send(
        &app,
        "GET",
        "/api/doctors?specialization=Neurology",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(json["total"], 0);
}

#[tokio::test]
async fn test_appointment_overlap_rules() {
    let (app, _chain) = create_test_app();
    let (_, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (patient, _) = setup_patient(&app, "pat@clinic.org").await;

    let (status, first) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["appointment"]["status"], "PENDING");

    // Partial overlap
    let (status, _) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:30:00Z",
        "2030-01-01T11:30:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Back-to-back is fine
    let (status, _) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T11:00:00Z",
        "2030-01-01T12:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // End before start
    let (status, _) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T15:00:00Z",
        "2030-01-01T14:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = book(
        &app,
        &patient,
        "00000000-0000-0000-0000-000000000000",
        "2030-01-01T15:00:00Z",
        "2030-01-01T16:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancelled_appointment_frees_slot() {
    let (app, _chain) = create_test_app();
    let (_, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (patient, _) = setup_patient(&app, "pat@clinic.org").await;

    let (_, first) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    let first_id = first["appointment"]["id"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        "PATCH",
        &format!("/api/appointments/{}", first_id),
        Some(&patient),
        Some(json!({ "status": "CANCELLED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["appointment"]["status"], "CANCELLED");

    let (status, _) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, json) = send(
        &app,
        "GET",
        "/api/appointments?status=CANCELLED",
        Some(&patient),
        None,
    )
    .await;
    assert_eq!(json["total"], 1);
}

#[tokio::test]
async fn test_patient_may_only_cancel() {
    let (app, _chain) = create_test_app();
    let (doctor, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (patient, _) = setup_patient(&app, "pat@clinic.org").await;

    let (_, json) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    let uri = format!("/api/appointments/{}", json["appointment"]["id"].as_str().unwrap());

    let (status, _) = send(
        &app,
        "PATCH",
        &uri,
        Some(&patient),
        Some(json!({ "status": "CONFIRMED" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &app,
        "PATCH",
        &uri,
        Some(&doctor),
        Some(json!({ "status": "CONFIRMED", "notes": "Bring previous ECG" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["appointment"]["status"], "CONFIRMED");
    assert_eq!(json["appointment"]["notes"], "Bring previous ECG");
}

#[tokio::test]
async fn test_prescription_anchored_on_chain() {
    let (app, _chain) = create_test_app();
    let (doctor, _) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (patient, patient_id) = setup_patient(&app, "pat@clinic.org").await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&doctor),
        Some(prescription_body(&patient_id)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["prescription"]["chain"]["status"], "CONFIRMED");
    let id = json["prescription"]["id"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/prescriptions/{}", id),
        Some(&patient),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prescription"]["diagnosis"], "Hypertension");

    let (_, json) = send(&app, "GET", "/api/prescriptions", Some(&patient), None).await;
    assert_eq!(json["total"], 1);
}

#[tokio::test]
async fn test_prescription_kept_when_chain_fails() {
    let (app, chain) = create_test_app();
    let (doctor, _) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (_, patient_id) = setup_patient(&app, "pat@clinic.org").await;

    chain.set_offline(true);
    let (status, json) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&doctor),
        Some(prescription_body(&patient_id)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["prescription"]["chain"]["status"], "FAILED");
    assert!(json["prescription"]["chain"]["error"].is_string());
}

#[tokio::test]
async fn test_prescription_validation() {
    let (app, _chain) = create_test_app();
    let (doctor, _) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (_, patient_id) = setup_patient(&app, "pat@clinic.org").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&doctor),
        Some(json!({ "patientId": patient_id, "diagnosis": "Flu", "medications": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        "POST",
        "/api/prescriptions",
        Some(&doctor),
        Some(prescription_body("00000000-0000-0000-0000-000000000000")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_anonymous_prescription_lifecycle() {
    let (app, _chain) = create_test_app();
    let (doctor, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;

    let (status, issued) = send(
        &app,
        "POST",
        "/api/prescriptions/anonymous",
        Some(&doctor),
        Some(json!({
            "diagnosis": "Anxiety",
            "medications": [
                { "name": "Sertraline", "dosage": "50mg", "frequency": "daily" }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(issued["doctorId"], doctor_id.as_str());
    assert_eq!(issued["chain"]["status"], "CONFIRMED");
    assert_eq!(issued["secretKey"].as_str().unwrap().len(), 64);
    let id = issued["id"].as_str().unwrap().to_string();

    // Public record carries no content
    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/prescriptions/anonymous/{}", id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prescription"]["commitment"], issued["commitment"]);
    assert!(json["prescription"].get("diagnosis").is_none());

    let mut opening = issued["content"].clone();
    opening["secretKey"] = issued["secretKey"].clone();

    let mut verify = opening.clone();
    verify["id"] = json!(id);
    let (status, json) = send(
        &app,
        "POST",
        "/api/prescriptions/anonymous/verify",
        None,
        Some(verify.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);

    verify["diagnosis"] = json!("Something else");
    let (_, json) = send(
        &app,
        "POST",
        "/api/prescriptions/anonymous/verify",
        None,
        Some(verify),
    )
    .await;
    assert_eq!(json["valid"], false);

    let redeem_uri = format!("/api/prescriptions/anonymous/{}/redeem", id);

    let mut forged = opening.clone();
    forged["secretKey"] = json!("00".repeat(32));
    let (status, _) = send(&app, "POST", &redeem_uri, None, Some(forged)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(&app, "POST", &redeem_uri, None, Some(opening.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["redeemed"], true);
    assert_eq!(json["nullifier"].as_str().unwrap().len(), 64);

    let (status, _) = send(&app, "POST", &redeem_uri, None, Some(opening)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_verify_unknown_anonymous_prescription() {
    let (app, _chain) = create_test_app();

    let (status, _) = send(
        &app,
        "POST",
        "/api/prescriptions/anonymous/verify",
        None,
        Some(json!({
            "id": "00000000-0000-0000-0000-000000000000",
            "medications": [],
            "diagnosis": "x",
            "doctorId": "d",
            "timestamp": 0,
            "secretKey": "00".repeat(32)
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_anonymous_issuance_fails_without_chain() {
    let (app, chain) = create_test_app();
    let (doctor, _) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;

    chain.set_offline(true);
    let (status, json) = send(
        &app,
        "POST",
        "/api/prescriptions/anonymous",
        Some(&doctor),
        Some(json!({
            "diagnosis": "Anxiety",
            "medications": [
                { "name": "Sertraline", "dosage": "50mg", "frequency": "daily" }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json.get("secretKey").is_none());
}

#[tokio::test]
async fn test_access_request_flow() {
    let (app, _chain) = create_test_app();
    let (doctor, _) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (patient, patient_id) = setup_patient(&app, "pat@clinic.org").await;
    let patient_uri = format!("/api/patients/{}", patient_id);

    let (status, _) = send(&app, "GET", &patient_uri, Some(&doctor), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &app,
        "POST",
        "/api/access-requests",
        Some(&doctor),
        Some(json!({ "patientId": patient_id, "reason": "Referral" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let request_id = json["accessRequest"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        "/api/access-requests",
        Some(&doctor),
        Some(json!({ "patientId": patient_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, json) = send(&app, "GET", "/api/access-requests", Some(&patient), None).await;
    assert_eq!(json["total"], 1);

    let respond_uri = format!("/api/access-requests/{}", request_id);
    let (status, _) = send(
        &app,
        "PATCH",
        &respond_uri,
        Some(&doctor),
        Some(json!({ "status": "APPROVED" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &app,
        "PATCH",
        &respond_uri,
        Some(&patient),
        Some(json!({ "status": "APPROVED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accessRequest"]["status"], "APPROVED");

    let (status, _) = send(&app, "GET", &patient_uri, Some(&doctor), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = send(&app, "GET", "/api/patients", Some(&doctor), None).await;
    assert_eq!(json["total"], 1);

    let (status, _) = send(
        &app,
        "PATCH",
        &respond_uri,
        Some(&patient),
        Some(json!({ "status": "REJECTED" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_token_purchase_and_appointment_payment() {
    let (app, chain) = create_test_app();
    let (doctor, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 30).await;
    let (patient, _) = setup_patient(&app, "pat@clinic.org").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/tokens/buy",
        Some(&patient),
        Some(json!({ "amount": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, json) = send(
        &app,
        "POST",
        "/api/tokens/buy",
        Some(&patient),
        Some(json!({ "amount": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["balance"], 100);

    let (_, json) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    let pay_uri = format!(
        "/api/appointments/{}/pay",
        json["appointment"]["id"].as_str().unwrap()
    );

    let (status, json) = send(&app, "POST", &pay_uri, Some(&patient), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["appointment"]["paid"], true);
    assert!(json["transaction"]["txHash"].is_string());

    let (status, _) = send(&app, "POST", &pay_uri, Some(&patient), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, json) = send(&app, "GET", "/api/tokens/balance", Some(&patient), None).await;
    assert_eq!(json["balance"], 70);
    let (_, json) = send(&app, "GET", "/api/tokens/balance", Some(&doctor), None).await;
    assert_eq!(json["balance"], 30);

    chain.set_offline(true);
    let (status, _) = send(
        &app,
        "POST",
        "/api/tokens/buy",
        Some(&patient),
        Some(json!({ "amount": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_payment_requires_balance() {
    let (app, _chain) = create_test_app();
    let (_, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 30).await;
    let (patient, _) = setup_patient(&app, "pat@clinic.org").await;

    let (_, json) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    let appointment_id = json["appointment"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/appointments/{}/pay", appointment_id),
        Some(&patient),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, json) = send(
        &app,
        "GET",
        &format!("/api/appointments/{}", appointment_id),
        Some(&patient),
        None,
    )
    .await;
    assert_eq!(json["appointment"]["paid"], false);

    // A failed transfer must not leave the appointment locked
    send(
        &app,
        "POST",
        "/api/tokens/buy",
        Some(&patient),
        Some(json!({ "amount": 50 })),
    )
    .await;
    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/appointments/{}/pay", appointment_id),
        Some(&patient),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["appointment"]["paid"], true);
}

#[tokio::test]
async fn test_balance_requires_wallet() {
    let (app, _chain) = create_test_app();
    register(&app, "nowallet@clinic.org", "PATIENT").await;
    let token = login(&app, "nowallet@clinic.org").await;

    let (status, _) = send(&app, "GET", "/api/tokens/balance", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_concurrent_payments_charge_once() {
    let chain = Arc::new(MockChain::new());
    let slow = SlowChain {
        inner: chain.clone(),
        latency: Duration::from_millis(50),
    };
    let app = create_router(AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(slow),
        3600,
    ));
    let (_, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 30).await;
    let (patient, _) = setup_patient(&app, "pat@clinic.org").await;
    chain.buy_tokens(PATIENT_WALLET, 100).await.unwrap();

    let (_, json) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    let pay_uri = format!(
        "/api/appointments/{}/pay",
        json["appointment"]["id"].as_str().unwrap()
    );

    let ((first, _), (second, _)) = tokio::join!(
        send(&app, "POST", &pay_uri, Some(&patient), None),
        send(&app, "POST", &pay_uri, Some(&patient), None),
    );
    let mut statuses = [first, second];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

    assert_eq!(chain.token_balance(PATIENT_WALLET).await.unwrap(), 70);
    assert_eq!(chain.token_balance(DOCTOR_WALLET).await.unwrap(), 30);
}

#[tokio::test]
async fn test_reactivating_cancelled_appointment_into_taken_slot() {
    let (app, _chain) = create_test_app();
    let (doctor, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (patient, _) = setup_patient(&app, "pat@clinic.org").await;

    let (_, first) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    let first_uri = format!(
        "/api/appointments/{}",
        first["appointment"]["id"].as_str().unwrap()
    );

    let (status, _) = send(
        &app,
        "PATCH",
        &first_uri,
        Some(&patient),
        Some(json!({ "status": "CANCELLED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:30:00Z",
        "2030-01-01T11:30:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "PATCH",
        &first_uri,
        Some(&doctor),
        Some(json!({ "status": "CONFIRMED" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, json) = send(&app, "GET", &first_uri, Some(&doctor), None).await;
    assert_eq!(json["appointment"]["status"], "CANCELLED");
}

#[tokio::test]
async fn test_completed_appointment_frees_slot() {
    let (app, _chain) = create_test_app();
    let (doctor, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (patient, _) = setup_patient(&app, "pat@clinic.org").await;

    let (_, json) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/api/appointments/{}", json["appointment"]["id"].as_str().unwrap()),
        Some(&doctor),
        Some(json!({ "status": "COMPLETED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_doctor_sees_patient_through_shared_appointment() {
    let (app, _chain) = create_test_app();
    let (doctor, doctor_id) = setup_doctor(&app, "doc@clinic.org", "LIC-1", 0).await;
    let (patient, patient_id) = setup_patient(&app, "pat@clinic.org").await;
    let patient_uri = format!("/api/patients/{}", patient_id);

    let (status, _) = send(&app, "GET", &patient_uri, Some(&doctor), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    book(
        &app,
        &patient,
        &doctor_id,
        "2030-01-01T10:00:00Z",
        "2030-01-01T11:00:00Z",
    )
    .await;

    let (_, json) = send(&app, "GET", "/api/access-requests", Some(&doctor), None).await;
    assert_eq!(json["total"], 0);

    let (status, json) = send(&app, "GET", &patient_uri, Some(&doctor), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["patient"]["id"], patient_id.as_str());
}

#[tokio::test]
async fn test_patient_update_rejects_future_birth_date() {
    let (app, _chain) = create_test_app();
    let (patient, patient_id) = setup_patient(&app, "pat@clinic.org").await;
    let patient_uri = format!("/api/patients/{}", patient_id);

    let (status, _) = send(
        &app,
        "PUT",
        &patient_uri,
        Some(&patient),
        Some(json!({ "dateOfBirth": "2999-01-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, json) = send(&app, "GET", &patient_uri, Some(&patient), None).await;
    assert_eq!(json["patient"]["dateOfBirth"], "1990-04-12");

    let (status, json) = send(
        &app,
        "PUT",
        &patient_uri,
        Some(&patient),
        Some(json!({ "dateOfBirth": "1991-05-20" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["patient"]["dateOfBirth"], "1991-05-20");
}

#[tokio::test]
async fn test_out_of_range_session_ttl_fails_login_cleanly() {
    let app = create_router(AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MockChain::new()),
        u64::MAX,
    ));
    assert_eq!(
        register(&app, "pat@clinic.org", "PATIENT").await,
        StatusCode::CREATED
    );

    let (status, json) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "pat@clinic.org", "password": "s3cure-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("out of range"));
}
