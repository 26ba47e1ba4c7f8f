use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::{content::PrescriptionContent, Error, Result};

/// 32-byte secret held by the prescription owner.
///
/// Disclosing it together with the content opens the commitment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Draw a fresh key from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        decode_32(s)
            .map(Self)
            .map_err(|e| Error::InvalidSecretKey(e.to_string()))
    }

    /// H(secret_key)
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.0).into()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl TryFrom<String> for SecretKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<SecretKey> for String {
    fn from(key: SecretKey) -> Self {
        key.to_hex()
    }
}

/// Hash commitment binding prescription content to a secret key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Commitment([u8; 32]);

impl Commitment {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// commitment = H(H(content) || H(secret_key))
    pub fn derive(content: &PrescriptionContent, secret: &SecretKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.hash());
        hasher.update(secret.hash());
        Self(hasher.finalize().into())
    }

    /// Recompute from a disclosed opening and compare in constant time
    pub fn verify(&self, content: &PrescriptionContent, secret: &SecretKey) -> bool {
        let recomputed = Self::derive(content, secret);
        self.0.ct_eq(&recomputed.0).into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Accepts an optional `0x` prefix, as returned by contract calls
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_32(s)
            .map(Self)
            .map_err(|e| Error::InvalidCommitment(e.to_string()))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for Commitment {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<Commitment> for String {
    fn from(c: Commitment) -> Self {
        c.to_hex()
    }
}

fn decode_32(s: &str) -> std::result::Result<[u8; 32], hex::FromHexError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
