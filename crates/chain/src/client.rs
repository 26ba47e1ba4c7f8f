use async_trait::async_trait;
use medledger_common::{Commitment, Result};
use serde::{Deserialize, Serialize};

/// Receipt for a mined contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}

/// Calls against the records and HTK token contracts.
///
/// Wallet addresses are `0x`-prefixed hex strings; implementations compare
/// them case-insensitively.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// `registerPatient(wallet, patientId)`
    async fn register_patient(&self, wallet: &str, patient_id: &str) -> Result<TxReceipt>;

    /// `registerDoctor(wallet, doctorId, licenseNumber)`
    async fn register_doctor(
        &self,
        wallet: &str,
        doctor_id: &str,
        license_number: &str,
    ) -> Result<TxReceipt>;

    /// `issuePrescription(prescriptionId, patient, doctor, contentHash)`
    async fn issue_prescription(
        &self,
        prescription_id: &str,
        patient_wallet: &str,
        doctor_wallet: &str,
        content_hash: [u8; 32],
    ) -> Result<TxReceipt>;

    /// `issueAnonymousPrescription(recordId, commitment)`
    async fn issue_anonymous_prescription(
        &self,
        record_id: &str,
        commitment: &Commitment,
    ) -> Result<TxReceipt>;

    /// `getAnonymousCommitment(recordId)`
    async fn get_anonymous_commitment(&self, record_id: &str) -> Result<Option<Commitment>>;

    /// `payDoctor(from, to, amount)` in HTK
    async fn pay_doctor(&self, from: &str, to: &str, amount: u64) -> Result<TxReceipt>;

    /// `buyTokens(wallet, amount)` in HTK
    async fn buy_tokens(&self, wallet: &str, amount: u64) -> Result<TxReceipt>;

    /// `balanceOf(wallet)` in HTK
    async fn token_balance(&self, wallet: &str) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;
}
