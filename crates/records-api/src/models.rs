//! Data models for the records service

use chrono::{DateTime, NaiveDate, Utc};
use medledger_chain::TxReceipt;
use medledger_common::{Commitment, Medication};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

/// Account record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,

    /// Stored lower-cased; unique
    pub email: String,

    pub name: String,

    pub role: Role,

    /// Argon2 PHC string
    pub password_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// User as returned by the API (no password hash)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, name: String, role: Role, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_lowercase(),
            name,
            role,
            password_hash,
            wallet_address: None,
            created_at: Utc::now(),
        }
    }

    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
            wallet_address: self.wallet_address.clone(),
            created_at: self.created_at,
        }
    }
}

/// Bearer-token session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Pending,
    Confirmed,
    Failed,
    Skipped,
}

/// Outcome of mirroring a record on-chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSync {
    pub status: ChainStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChainSync {
    pub fn pending() -> Self {
        Self {
            status: ChainStatus::Pending,
            tx_hash: None,
            block_number: None,
            error: None,
        }
    }

    pub fn skipped(reason: &str) -> Self {
        Self {
            status: ChainStatus::Skipped,
            tx_hash: None,
            block_number: None,
            error: Some(reason.to_string()),
        }
    }

    pub fn confirmed(receipt: TxReceipt) -> Self {
        Self {
            status: ChainStatus::Confirmed,
            tx_hash: Some(receipt.tx_hash),
            block_number: Some(receipt.block_number),
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: ChainStatus::Failed,
            tx_hash: None,
            block_number: None,
            error: Some(error),
        }
    }
}

/// Patient profile, one per PATIENT user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date_of_birth: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub chain: ChainSync,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Doctor profile, one per DOCTOR user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub specialization: String,

    /// Unique across doctors
    pub license_number: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital: Option<String>,

    /// Fee per appointment in HTK
    pub consultation_fee: u64,

    pub available: bool,
    pub chain: ChainSync,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Whether an appointment in this status occupies the doctor's time
    pub fn holds_slot(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Half-open interval overlap against a slot-holding appointment.
    /// Back-to-back appointments (`end == other.start`) do not overlap.
    pub fn conflicts_with(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.status.holds_slot() && start < self.end_time && self.start_time < end
    }
}

/// Outcome of an atomic booking attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Booking {
    Booked,
    Overlaps(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub diagnosis: String,
    pub medications: Vec<Medication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<NaiveDate>,
    pub issued_at: DateTime<Utc>,
    pub chain: ChainSync,
}

/// Commitment-only prescription record; holds no patient identity or content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousPrescription {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub commitment: Commitment,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub redeemed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_at: Option<DateTime<Utc>>,
    pub chain: ChainSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessStatus {
    Pending,
    Approved,
    Rejected,
}

/// A doctor's request to view a patient's records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub status: AccessStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}
