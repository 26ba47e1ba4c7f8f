use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Commitment, SecretKey};

const NULLIFIER_TAG: &[u8] = b"medledger.nullifier";

/// Set-once marker for redeeming an anonymous prescription.
///
/// Derived from the secret key and the commitment, so it can only be
/// produced by the key holder and is unique per prescription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    pub fn derive(secret: &SecretKey, commitment: &Commitment) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(NULLIFIER_TAG);
        hasher.update(secret.as_bytes());
        hasher.update(commitment.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
