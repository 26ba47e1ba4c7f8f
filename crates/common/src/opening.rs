use serde::{Deserialize, Serialize};

use crate::{Commitment, Error, Nullifier, PrescriptionContent, Result, SecretKey};

/// Disclosed content plus secret key, presented to prove ownership
/// of an anonymous prescription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opening {
    #[serde(flatten)]
    pub content: PrescriptionContent,
    pub secret_key: SecretKey,
}

impl Opening {
    pub fn new(content: PrescriptionContent, secret_key: SecretKey) -> Self {
        Self {
            content,
            secret_key,
        }
    }

    pub fn matches(&self, commitment: &Commitment) -> bool {
        commitment.verify(&self.content, &self.secret_key)
    }

    /// Check the opening against the anchored commitment and return the
    /// nullifier used to mark it redeemed.
    pub fn verify(&self, commitment: &Commitment) -> Result<Nullifier> {
        if !self.matches(commitment) {
            return Err(Error::OpeningMismatch);
        }
        Ok(Nullifier::derive(&self.secret_key, commitment))
    }
}
