//! Record storage
//!
//! [`Store`] is implemented by [`RedisStore`] for deployments and
//! [`MemoryStore`] for development and tests. Inserts guarded by a unique
//! key return `Ok(false)` when the key is already taken.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use anyhow::Result;
use async_trait::async_trait;
use medledger_common::Nullifier;
use uuid::Uuid;

use crate::models::{
    AccessRequest, AnonymousPrescription, Appointment, Booking, Doctor, Patient, Prescription,
    Session, User,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `Ok(false)` if the email is taken
    async fn create_user(&self, user: &User) -> Result<bool>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_user(&self, user: &User) -> Result<()>;

    async fn create_session(&self, session: &Session) -> Result<()>;
    /// Expired sessions read as `None`
    async fn get_session(&self, token: &str) -> Result<Option<Session>>;
    async fn delete_session(&self, token: &str) -> Result<()>;

    /// Fails with `Ok(false)` if the user already has a patient profile
    async fn create_patient(&self, patient: &Patient) -> Result<bool>;
    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>>;
    async fn get_patient_by_user(&self, user_id: Uuid) -> Result<Option<Patient>>;
    async fn update_patient(&self, patient: &Patient) -> Result<()>;
    async fn list_patients(&self) -> Result<Vec<Patient>>;

    /// Fails with `Ok(false)` if the user has a profile or the license is taken
    async fn create_doctor(&self, doctor: &Doctor) -> Result<bool>;
    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>>;
    async fn get_doctor_by_user(&self, user_id: Uuid) -> Result<Option<Doctor>>;
    async fn get_doctor_by_license(&self, license_number: &str) -> Result<Option<Doctor>>;
    async fn update_doctor(&self, doctor: &Doctor) -> Result<()>;
    async fn list_doctors(&self) -> Result<Vec<Doctor>>;

    /// Insert unless the doctor has a slot-holding appointment overlapping
    /// the new one. The check and the insert are atomic per doctor.
    async fn book_appointment(&self, appointment: &Appointment) -> Result<Booking>;
    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>>;
    async fn update_appointment(&self, appointment: &Appointment) -> Result<()>;
    async fn list_appointments_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>>;
    async fn list_appointments_for_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>>;
    async fn list_appointments(&self) -> Result<Vec<Appointment>>;

    async fn create_prescription(&self, prescription: &Prescription) -> Result<()>;
    async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>>;
    async fn update_prescription(&self, prescription: &Prescription) -> Result<()>;
    async fn list_prescriptions_for_patient(&self, patient_id: Uuid) -> Result<Vec<Prescription>>;
    async fn list_prescriptions_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<Prescription>>;
    async fn list_prescriptions(&self) -> Result<Vec<Prescription>>;

    /// Fails with `Ok(false)` if the commitment is already recorded
    async fn create_anonymous(&self, record: &AnonymousPrescription) -> Result<bool>;
    async fn get_anonymous(&self, id: Uuid) -> Result<Option<AnonymousPrescription>>;
    async fn update_anonymous(&self, record: &AnonymousPrescription) -> Result<()>;
    async fn delete_anonymous(&self, id: Uuid) -> Result<()>;

    /// Atomically mark a nullifier as spent.
    /// `Ok(true)` the first time, `Ok(false)` on replay.
    async fn claim_nullifier(&self, nullifier: &Nullifier) -> Result<bool>;

    /// Reserve an appointment's payment before the transfer is sent.
    /// `Ok(false)` while another payment for it is reserved.
    async fn reserve_payment(&self, appointment_id: Uuid) -> Result<bool>;
    /// Drop a reservation whose transfer failed
    async fn release_payment(&self, appointment_id: Uuid) -> Result<()>;

    async fn create_access_request(&self, request: &AccessRequest) -> Result<()>;
    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>>;
    async fn update_access_request(&self, request: &AccessRequest) -> Result<()>;
    async fn list_access_requests_for_patient(&self, patient_id: Uuid)
        -> Result<Vec<AccessRequest>>;
    async fn list_access_requests_for_doctor(&self, doctor_id: Uuid)
        -> Result<Vec<AccessRequest>>;
    async fn list_access_requests(&self) -> Result<Vec<AccessRequest>>;

    /// Connectivity probe for `/health`
    async fn health_check(&self) -> Result<()>;
}
