use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid commitment: {0}")]
    InvalidCommitment(String),

    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("Commitment opening does not match")]
    OpeningMismatch,

    #[error("Nullifier replay detected")]
    NullifierReplay,

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Insufficient HTK balance: have {available}, need {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
