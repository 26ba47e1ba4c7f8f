//! Redis storage for the records service
//!
//! Data model:
//! - {entity}:{id} → JSON document
//! - {entities}:all → Set of ids
//! - {entities}:{owner}:{id} → Set of ids per doctor/patient
//! - user:email:{email}, patient:user:{id}, doctor:user:{id},
//!   doctor:license:{license} → unique lookups, claimed with SET NX
//! - session:{token} → JSON with EX ttl
//! - anon:commitment:{hex} → anonymous prescription id, claimed with SET NX
//! - nullifier:{hex} → "1", claimed with SET NX
//! - payment:appointment:{id} → payment reservation, SET NX EX
//! - lock:doctor:{id} → short-lived booking lock holding the owner's token

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use medledger_common::Nullifier;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Store;
use crate::models::{
    AccessRequest, AnonymousPrescription, Appointment, Booking, Doctor, Patient, Prescription,
    Session, User,
};

const BOOKING_LOCK_TTL_MS: u64 = 5_000;
const BOOKING_LOCK_ATTEMPTS: u32 = 50;
const BOOKING_LOCK_BACKOFF: Duration = Duration::from_millis(20);
const PAYMENT_RESERVATION_TTL_SECS: u64 = 300;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis storage backend
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Create a new storage instance
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)
            .with_context(|| format!("Failed to serialize {}", key))?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, json).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(key).await?;

        match json {
            Some(data) => {
                let value = serde_json::from_str(&data)
                    .with_context(|| format!("Failed to deserialize {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Load every document whose id is in `set`, skipping dangling ids
    async fn load_set<T: DeserializeOwned>(&self, set: &str, prefix: &str) -> Result<Vec<T>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(set).await?;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_json(&format!("{}:{}", prefix, id)).await? {
                Some(value) => out.push(value),
                None => warn!("Index {} references missing {}:{}", set, prefix, id),
            }
        }
        Ok(out)
    }

    async fn index(&self, sets: &[String], id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        for set in sets {
            conn.sadd::<_, _, ()>(set, id.to_string()).await?;
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let created: bool = conn.set_nx(key, value).await?;
        Ok(created)
    }

    async fn get_id(&self, key: &str) -> Result<Option<Uuid>> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(key).await?;
        id.map(|s| Uuid::parse_str(&s).context("Corrupt id in lookup key"))
            .transpose()
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// SET NX PX with retries; the TTL bounds how long a crashed holder
    /// can block other bookings. Returns the key and this holder's token.
    async fn acquire_booking_lock(&self, doctor_id: Uuid) -> Result<(String, String)> {
        let key = format!("lock:doctor:{}", doctor_id);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        for _ in 0..BOOKING_LOCK_ATTEMPTS {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(BOOKING_LOCK_TTL_MS)
                .query_async(&mut conn)
                .await?;

            if acquired.is_some() {
                return Ok((key, token));
            }
            tokio::time::sleep(BOOKING_LOCK_BACKOFF).await;
        }

        anyhow::bail!("Timed out waiting for booking lock on doctor {}", doctor_id)
    }

    /// Delete the lock only while it still holds our token, so a holder whose
    /// lock expired cannot release the next holder's lock
    async fn release_booking_lock(&self, key: &str, token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let released: i32 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            warn!("Booking lock {} expired before release", key);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn create_user(&self, user: &User) -> Result<bool> {
        let email_key = format!("user:email:{}", user.email);
        if !self.set_nx(&email_key, &user.id.to_string()).await? {
            debug!("Email already registered: {}", user.email);
            return Ok(false);
        }

        self.put_json(&format!("user:{}", user.id), user).await?;
        self.index(&["users:all".to_string()], user.id).await?;

        info!("Created user {} ({:?})", user.id, user.role);
        Ok(true)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.get_json(&format!("user:{}", id)).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        match self
            .get_id(&format!("user:email:{}", email.to_lowercase()))
            .await?
        {
            Some(id) => self.get_user(id).await,
            None => Ok(None),
        }
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.put_json(&format!("user:{}", user.id), user).await
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session).context("Failed to serialize session")?;
        let ttl = (session.expires_at - Utc::now()).num_seconds().max(1);

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(format!("session:{}", session.token))
            .arg(json)
            .arg("EX")
            .arg(ttl)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let session: Option<Session> = self.get_json(&format!("session:{}", token)).await?;
        Ok(session.filter(|s| !s.is_expired()))
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        self.del(&format!("session:{}", token)).await
    }

    async fn create_patient(&self, patient: &Patient) -> Result<bool> {
        let owner_key = format!("patient:user:{}", patient.user_id);
        if !self.set_nx(&owner_key, &patient.id.to_string()).await? {
            return Ok(false);
        }

        self.put_json(&format!("patient:{}", patient.id), patient)
            .await?;
        self.index(&["patients:all".to_string()], patient.id).await?;

        info!("Created patient {} for user {}", patient.id, patient.user_id);
        Ok(true)
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        self.get_json(&format!("patient:{}", id)).await
    }

    async fn get_patient_by_user(&self, user_id: Uuid) -> Result<Option<Patient>> {
        match self.get_id(&format!("patient:user:{}", user_id)).await? {
            Some(id) => self.get_patient(id).await,
            None => Ok(None),
        }
    }

    async fn update_patient(&self, patient: &Patient) -> Result<()> {
        self.put_json(&format!("patient:{}", patient.id), patient)
            .await
    }

    async fn list_patients(&self) -> Result<Vec<Patient>> {
        let mut patients: Vec<Patient> = self.load_set("patients:all", "patient").await?;
        patients.sort_by_key(|p| p.created_at);
        Ok(patients)
    }

    async fn create_doctor(&self, doctor: &Doctor) -> Result<bool> {
        let owner_key = format!("doctor:user:{}", doctor.user_id);
        let license_key = format!("doctor:license:{}", doctor.license_number);
        let id = doctor.id.to_string();

        if !self.set_nx(&owner_key, &id).await? {
            return Ok(false);
        }
        if !self.set_nx(&license_key, &id).await? {
            self.del(&owner_key).await?;
            return Ok(false);
        }

        self.put_json(&format!("doctor:{}", doctor.id), doctor)
            .await?;
        self.index(&["doctors:all".to_string()], doctor.id).await?;

        info!("Created doctor {} for user {}", doctor.id, doctor.user_id);
        Ok(true)
    }

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>> {
        self.get_json(&format!("doctor:{}", id)).await
    }

    async fn get_doctor_by_user(&self, user_id: Uuid) -> Result<Option<Doctor>> {
        match self.get_id(&format!("doctor:user:{}", user_id)).await? {
            Some(id) => self.get_doctor(id).await,
            None => Ok(None),
        }
    }

    async fn get_doctor_by_license(&self, license_number: &str) -> Result<Option<Doctor>> {
        match self
            .get_id(&format!("doctor:license:{}", license_number))
            .await?
        {
            Some(id) => self.get_doctor(id).await,
            None => Ok(None),
        }
    }

    async fn update_doctor(&self, doctor: &Doctor) -> Result<()> {
        self.put_json(&format!("doctor:{}", doctor.id), doctor).await
    }

    async fn list_doctors(&self) -> Result<Vec<Doctor>> {
        let mut doctors: Vec<Doctor> = self.load_set("doctors:all", "doctor").await?;
        doctors.sort_by_key(|d| d.created_at);
        Ok(doctors)
    }

    async fn book_appointment(&self, appointment: &Appointment) -> Result<Booking> {
        let (lock_key, lock_token) = self.acquire_booking_lock(appointment.doctor_id).await?;

        let outcome: Result<Booking> = async {
            let existing = self
                .list_appointments_for_doctor(appointment.doctor_id)
                .await?;
            if let Some(clash) = existing.iter().find(|a| {
                a.id != appointment.id
                    && a.conflicts_with(appointment.start_time, appointment.end_time)
            }) {
                return Ok(Booking::Overlaps(clash.id));
            }

            self.put_json(&format!("appointment:{}", appointment.id), appointment)
                .await?;
            self.index(
                &[
                    "appointments:all".to_string(),
                    format!("appointments:doctor:{}", appointment.doctor_id),
                    format!("appointments:patient:{}", appointment.patient_id),
                ],
                appointment.id,
            )
            .await?;
            Ok(Booking::Booked)
        }
        .await;

        self.release_booking_lock(&lock_key, &lock_token).await?;
        outcome
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        self.get_json(&format!("appointment:{}", id)).await
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<()> {
        self.put_json(&format!("appointment:{}", appointment.id), appointment)
            .await
    }

    async fn list_appointments_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>> {
        let mut list: Vec<Appointment> = self
            .load_set(&format!("appointments:doctor:{}", doctor_id), "appointment")
            .await?;
        list.sort_by_key(|a| a.start_time);
        Ok(list)
    }

    async fn list_appointments_for_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>> {
        let mut list: Vec<Appointment> = self
            .load_set(&format!("appointments:patient:{}", patient_id), "appointment")
            .await?;
        list.sort_by_key(|a| a.start_time);
        Ok(list)
    }

    async fn list_appointments(&self) -> Result<Vec<Appointment>> {
        let mut list: Vec<Appointment> = self.load_set("appointments:all", "appointment").await?;
        list.sort_by_key(|a| a.start_time);
        Ok(list)
    }

    async fn create_prescription(&self, prescription: &Prescription) -> Result<()> {
        self.put_json(&format!("prescription:{}", prescription.id), prescription)
            .await?;
        self.index(
            &[
                "prescriptions:all".to_string(),
                format!("prescriptions:doctor:{}", prescription.doctor_id),
                format!("prescriptions:patient:{}", prescription.patient_id),
            ],
            prescription.id,
        )
        .await
    }

    async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>> {
        self.get_json(&format!("prescription:{}", id)).await
    }

    async fn update_prescription(&self, prescription: &Prescription) -> Result<()> {
        self.put_json(&format!("prescription:{}", prescription.id), prescription)
            .await
    }

    async fn list_prescriptions_for_patient(&self, patient_id: Uuid) -> Result<Vec<Prescription>> {
        let mut list: Vec<Prescription> = self
            .load_set(&format!("prescriptions:patient:{}", patient_id), "prescription")
            .await?;
        list.sort_by_key(|p| p.issued_at);
        Ok(list)
    }

    async fn list_prescriptions_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<Prescription>> {
        let mut list: Vec<Prescription> = self
            .load_set(&format!("prescriptions:doctor:{}", doctor_id), "prescription")
            .await?;
        list.sort_by_key(|p| p.issued_at);
        Ok(list)
    }

    async fn list_prescriptions(&self) -> Result<Vec<Prescription>> {
        let mut list: Vec<Prescription> =
            self.load_set("prescriptions:all", "prescription").await?;
        list.sort_by_key(|p| p.issued_at);
        Ok(list)
    }

    async fn create_anonymous(&self, record: &AnonymousPrescription) -> Result<bool> {
        let commitment_key = format!("anon:commitment:{}", record.commitment.to_hex());
        if !self.set_nx(&commitment_key, &record.id.to_string()).await? {
            debug!("Commitment already recorded: {}", record.commitment);
            return Ok(false);
        }
        self.put_json(&format!("anon:{}", record.id), record).await?;
        Ok(true)
    }

    async fn get_anonymous(&self, id: Uuid) -> Result<Option<AnonymousPrescription>> {
        self.get_json(&format!("anon:{}", id)).await
    }

    async fn update_anonymous(&self, record: &AnonymousPrescription) -> Result<()> {
        self.put_json(&format!("anon:{}", record.id), record).await
    }

    async fn delete_anonymous(&self, id: Uuid) -> Result<()> {
        if let Some(record) = self.get_anonymous(id).await? {
            self.del(&format!("anon:commitment:{}", record.commitment.to_hex()))
                .await?;
        }
        self.del(&format!("anon:{}", id)).await
    }

    async fn claim_nullifier(&self, nullifier: &Nullifier) -> Result<bool> {
        let key = format!("nullifier:{}", nullifier.to_hex());
        self.set_nx(&key, "1").await
    }

    async fn reserve_payment(&self, appointment_id: Uuid) -> Result<bool> {
        let key = format!("payment:appointment:{}", appointment_id);
        let mut conn = self.conn.clone();
        let reserved: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(PAYMENT_RESERVATION_TTL_SECS)
            .query_async(&mut conn)
            .await?;

        if reserved.is_none() {
            warn!("Payment already in progress for appointment {}", appointment_id);
        }
        Ok(reserved.is_some())
    }

    async fn release_payment(&self, appointment_id: Uuid) -> Result<()> {
        self.del(&format!("payment:appointment:{}", appointment_id))
            .await
    }

    async fn create_access_request(&self, request: &AccessRequest) -> Result<()> {
        self.put_json(&format!("access:{}", request.id), request)
            .await?;
        self.index(
            &[
                "access:all".to_string(),
                format!("access:doctor:{}", request.doctor_id),
                format!("access:patient:{}", request.patient_id),
            ],
            request.id,
        )
        .await
    }

    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>> {
        self.get_json(&format!("access:{}", id)).await
    }

    async fn update_access_request(&self, request: &AccessRequest) -> Result<()> {
        self.put_json(&format!("access:{}", request.id), request)
            .await
    }

    async fn list_access_requests_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<AccessRequest>> {
        let mut list: Vec<AccessRequest> = self
            .load_set(&format!("access:patient:{}", patient_id), "access")
            .await?;
        list.sort_by_key(|r| r.created_at);
        Ok(list)
    }

    async fn list_access_requests_for_doctor(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<AccessRequest>> {
        let mut list: Vec<AccessRequest> = self
            .load_set(&format!("access:doctor:{}", doctor_id), "access")
            .await?;
        list.sort_by_key(|r| r.created_at);
        Ok(list)
    }

    async fn list_access_requests(&self) -> Result<Vec<AccessRequest>> {
        let mut list: Vec<AccessRequest> = self.load_set("access:all", "access").await?;
        list.sort_by_key(|r| r.created_at);
        Ok(list)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
