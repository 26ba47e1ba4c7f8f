//! Prescription content and its canonical byte encoding.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain tag prepended to every encoded content blob.
const CONTENT_TAG: &[u8] = b"medledger.prescription.v1";

/// A single prescribed medication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// The committed part of a prescription.
///
/// `timestamp` is unix milliseconds so the value survives JSON round trips
/// without precision loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionContent {
    pub medications: Vec<Medication>,
    pub diagnosis: String,
    pub doctor_id: String,
    pub timestamp: i64,
}

impl PrescriptionContent {
    pub fn new(
        medications: Vec<Medication>,
        diagnosis: String,
        doctor_id: String,
        timestamp: i64,
    ) -> Self {
        Self {
            medications,
            diagnosis,
            doctor_id,
            timestamp,
        }
    }

    /// Canonical encoding: tag, medication count, each medication's fields,
    /// diagnosis, doctor id, timestamp. Strings are u32-BE length prefixed,
    /// absent optionals encode as empty strings.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(CONTENT_TAG);

        buf.extend_from_slice(&(self.medications.len() as u32).to_be_bytes());
        for med in &self.medications {
            put_str(&mut buf, &med.name);
            put_str(&mut buf, &med.dosage);
            put_str(&mut buf, &med.frequency);
            put_str(&mut buf, med.duration.as_deref().unwrap_or(""));
            put_str(&mut buf, med.instructions.as_deref().unwrap_or(""));
        }

        put_str(&mut buf, &self.diagnosis);
        put_str(&mut buf, &self.doctor_id);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf
    }

    /// SHA-256 of the canonical encoding
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.encode()).into()
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}
