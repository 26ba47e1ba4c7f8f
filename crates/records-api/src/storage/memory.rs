//! In-memory storage for development and tests

use anyhow::Result;
use async_trait::async_trait;
use medledger_common::Nullifier;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::Store;
use crate::models::{
    AccessRequest, AnonymousPrescription, Appointment, Booking, Doctor, Patient, Prescription,
    Session, User,
};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>,
    patients: HashMap<Uuid, Patient>,
    doctors: HashMap<Uuid, Doctor>,
    appointments: HashMap<Uuid, Appointment>,
    prescriptions: HashMap<Uuid, Prescription>,
    anonymous: HashMap<Uuid, AnonymousPrescription>,
    nullifiers: HashSet<[u8; 32]>,
    payment_reservations: HashSet<Uuid>,
    access_requests: HashMap<Uuid, AccessRequest>,
}

/// Mutex-guarded maps; every operation holds the lock for its full duration
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn collect_sorted<T: Clone, K: Ord>(
    items: impl Iterator<Item = T>,
    key: impl Fn(&T) -> K,
) -> Vec<T> {
    let mut out: Vec<T> = items.collect();
    out.sort_by_key(key);
    out
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            debug!("Email already registered: {}", user.email);
            return Ok(false);
        }
        state.users.insert(user.id, user.clone());
        Ok(true)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_lowercase();
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.state.lock().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        let expired = match state.sessions.get(token) {
            Some(session) => session.is_expired(),
            None => return Ok(None),
        };
        if expired {
            state.sessions.remove(token);
            return Ok(None);
        }
        Ok(state.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        self.state.lock().await.sessions.remove(token);
        Ok(())
    }

    async fn create_patient(&self, patient: &Patient) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.patients.values().any(|p| p.user_id == patient.user_id) {
            return Ok(false);
        }
        state.patients.insert(patient.id, patient.clone());
        Ok(true)
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.state.lock().await.patients.get(&id).cloned())
    }

    async fn get_patient_by_user(&self, user_id: Uuid) -> Result<Option<Patient>> {
        let state = self.state.lock().await;
        Ok(state
            .patients
            .values()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn update_patient(&self, patient: &Patient) -> Result<()> {
        self.state
            .lock()
            .await
            .patients
            .insert(patient.id, patient.clone());
        Ok(())
    }

    async fn list_patients(&self) -> Result<Vec<Patient>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(state.patients.values().cloned(), |p| p.created_at))
    }

    async fn create_doctor(&self, doctor: &Doctor) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.doctors.values().any(|d| {
            d.user_id == doctor.user_id || d.license_number == doctor.license_number
        }) {
            return Ok(false);
        }
        state.doctors.insert(doctor.id, doctor.clone());
        Ok(true)
    }

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>> {
        Ok(self.state.lock().await.doctors.get(&id).cloned())
    }

    async fn get_doctor_by_user(&self, user_id: Uuid) -> Result<Option<Doctor>> {
        let state = self.state.lock().await;
        Ok(state.doctors.values().find(|d| d.user_id == user_id).cloned())
    }

    async fn get_doctor_by_license(&self, license_number: &str) -> Result<Option<Doctor>> {
        let state = self.state.lock().await;
        Ok(state
            .doctors
            .values()
            .find(|d| d.license_number == license_number)
            .cloned())
    }

    async fn update_doctor(&self, doctor: &Doctor) -> Result<()> {
        self.state
            .lock()
            .await
            .doctors
            .insert(doctor.id, doctor.clone());
        Ok(())
    }

    async fn list_doctors(&self) -> Result<Vec<Doctor>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(state.doctors.values().cloned(), |d| d.created_at))
    }

    async fn book_appointment(&self, appointment: &Appointment) -> Result<Booking> {
        let mut state = self.state.lock().await;

        let clash = state.appointments.values().find(|a| {
            a.doctor_id == appointment.doctor_id
                && a.id != appointment.id
                && a.conflicts_with(appointment.start_time, appointment.end_time)
        });
        if let Some(existing) = clash {
            return Ok(Booking::Overlaps(existing.id));
        }

        state
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(Booking::Booked)
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        Ok(self.state.lock().await.appointments.get(&id).cloned())
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<()> {
        self.state
            .lock()
            .await
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn list_appointments_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(
            state
                .appointments
                .values()
                .filter(|a| a.doctor_id == doctor_id)
                .cloned(),
            |a| a.start_time,
        ))
    }

    async fn list_appointments_for_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(
            state
                .appointments
                .values()
                .filter(|a| a.patient_id == patient_id)
                .cloned(),
            |a| a.start_time,
        ))
    }

    async fn list_appointments(&self) -> Result<Vec<Appointment>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(state.appointments.values().cloned(), |a| a.start_time))
    }

    async fn create_prescription(&self, prescription: &Prescription) -> Result<()> {
        self.state
            .lock()
            .await
            .prescriptions
            .insert(prescription.id, prescription.clone());
        Ok(())
    }

    async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>> {
        Ok(self.state.lock().await.prescriptions.get(&id).cloned())
    }

    async fn update_prescription(&self, prescription: &Prescription) -> Result<()> {
        self.create_prescription(prescription).await
    }

    async fn list_prescriptions_for_patient(&self, patient_id: Uuid) -> Result<Vec<Prescription>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(
            state
                .prescriptions
                .values()
                .filter(|p| p.patient_id == patient_id)
                .cloned(),
            |p| p.issued_at,
        ))
    }

    async fn list_prescriptions_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<Prescription>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(
            state
                .prescriptions
                .values()
                .filter(|p| p.doctor_id == doctor_id)
                .cloned(),
            |p| p.issued_at,
        ))
    }

    async fn list_prescriptions(&self) -> Result<Vec<Prescription>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(state.prescriptions.values().cloned(), |p| p.issued_at))
    }

    async fn create_anonymous(&self, record: &AnonymousPrescription) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state
            .anonymous
            .values()
            .any(|a| a.commitment == record.commitment)
        {
            debug!("Commitment already recorded: {}", record.commitment);
            return Ok(false);
        }
        state.anonymous.insert(record.id, record.clone());
        Ok(true)
    }

    async fn get_anonymous(&self, id: Uuid) -> Result<Option<AnonymousPrescription>> {
        Ok(self.state.lock().await.anonymous.get(&id).cloned())
    }

    async fn update_anonymous(&self, record: &AnonymousPrescription) -> Result<()> {
        self.state
            .lock()
            .await
            .anonymous
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn delete_anonymous(&self, id: Uuid) -> Result<()> {
        self.state.lock().await.anonymous.remove(&id);
        Ok(())
    }

    async fn claim_nullifier(&self, nullifier: &Nullifier) -> Result<bool> {
        Ok(self.state.lock().await.nullifiers.insert(nullifier.0))
    }

    async fn reserve_payment(&self, appointment_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .payment_reservations
            .insert(appointment_id))
    }

    async fn release_payment(&self, appointment_id: Uuid) -> Result<()> {
        self.state
            .lock()
            .await
            .payment_reservations
            .remove(&appointment_id);
        Ok(())
    }

    async fn create_access_request(&self, request: &AccessRequest) -> Result<()> {
        self.state
            .lock()
            .await
            .access_requests
            .insert(request.id, request.clone());
        Ok(())
    }

    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>> {
        Ok(self.state.lock().await.access_requests.get(&id).cloned())
    }

    async fn update_access_request(&self, request: &AccessRequest) -> Result<()> {
        self.create_access_request(request).await
    }

    async fn list_access_requests_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<AccessRequest>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(
            state
                .access_requests
                .values()
                .filter(|r| r.patient_id == patient_id)
                .cloned(),
            |r| r.created_at,
        ))
    }

    async fn list_access_requests_for_doctor(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<AccessRequest>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(
            state
                .access_requests
                .values()
                .filter(|r| r.doctor_id == doctor_id)
                .cloned(),
            |r| r.created_at,
        ))
    }

    async fn list_access_requests(&self) -> Result<Vec<AccessRequest>> {
        let state = self.state.lock().await;
        Ok(collect_sorted(
            state.access_requests.values().cloned(),
            |r| r.created_at,
        ))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
