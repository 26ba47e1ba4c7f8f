//! Shared types for MedLedger services.
//!
//! The anonymous-prescription scheme lives here so the records API and the
//! chain client agree on byte-level encodings:
//!
//! ```text
//! content_hash = H(encode(medications, diagnosis, doctor_id, timestamp))
//! secret_hash  = H(secret_key)
//! commitment   = H(content_hash || secret_hash)
//! ```

pub mod commitment;
pub mod content;
pub mod error;
pub mod nullifier;
pub mod opening;

pub use commitment::{Commitment, SecretKey};
pub use content::{Medication, PrescriptionContent};
pub use error::{Error, Result};
pub use nullifier::Nullifier;
pub use opening::Opening;
