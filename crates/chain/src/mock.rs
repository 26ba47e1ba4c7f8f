//! In-memory contract simulation for development and testing
//!
//! Behaves like the deployed contracts closely enough for the records API:
//! duplicate registrations revert, transfers check balances, and every write
//! mines a block.

use async_trait::async_trait;
use medledger_common::{Commitment, Error, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{ChainClient, TxReceipt};

const GENESIS_HEIGHT: u64 = 100_000;

#[derive(Default)]
struct MockState {
    block_number: u64,
    patients: HashMap<String, String>,
    doctors: HashMap<String, String>,
    prescriptions: HashMap<String, [u8; 32]>,
    commitments: HashMap<String, Commitment>,
    balances: HashMap<String, u64>,
}

/// Mock records + HTK token contracts
pub struct MockChain {
    state: Mutex<MockState>,
    offline: AtomicBool,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                block_number: GENESIS_HEIGHT,
                ..Default::default()
            }),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate an unreachable node: every call fails until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Chain("mock chain offline".to_string()));
        }
        Ok(())
    }

    /// Mine one block and produce a deterministic tx hash
    fn mine(state: &mut MockState, method: &str, key: &str) -> TxReceipt {
        state.block_number += 1;

        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(key.as_bytes());
        hasher.update(state.block_number.to_be_bytes());
        let digest: [u8; 32] = hasher.finalize().into();

        let receipt = TxReceipt {
            tx_hash: format!("0x{}", hex::encode(digest)),
            block_number: state.block_number,
        };
        debug!(
            "Mock chain: {}({}) mined in block {}",
            method, key, receipt.block_number
        );
        receipt
    }
}

fn wallet_key(wallet: &str) -> String {
    wallet.to_ascii_lowercase()
}

fn revert(reason: &str) -> Error {
    Error::Chain(format!("execution reverted: {}", reason))
}

#[async_trait]
impl ChainClient for MockChain {
    async fn register_patient(&self, wallet: &str, patient_id: &str) -> Result<TxReceipt> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;

        let key = wallet_key(wallet);
        if state.patients.contains_key(&key) {
            return Err(revert("patient already registered"));
        }
        state.patients.insert(key, patient_id.to_string());

        Ok(Self::mine(&mut state, "registerPatient", patient_id))
    }

    async fn register_doctor(
        &self,
        wallet: &str,
        doctor_id: &str,
        _license_number: &str,
    ) -> Result<TxReceipt> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;

        let key = wallet_key(wallet);
        if state.doctors.contains_key(&key) {
            return Err(revert("doctor already registered"));
        }
        state.doctors.insert(key, doctor_id.to_string());

        Ok(Self::mine(&mut state, "registerDoctor", doctor_id))
    }

    async fn issue_prescription(
        &self,
        prescription_id: &str,
        _patient_wallet: &str,
        doctor_wallet: &str,
        content_hash: [u8; 32],
    ) -> Result<TxReceipt> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;

        if !state.doctors.contains_key(&wallet_key(doctor_wallet)) {
            return Err(revert("caller is not a registered doctor"));
        }
        if state.prescriptions.contains_key(prescription_id) {
            return Err(revert("prescription exists"));
        }
        state
            .prescriptions
            .insert(prescription_id.to_string(), content_hash);

        Ok(Self::mine(&mut state, "issuePrescription", prescription_id))
    }

    async fn issue_anonymous_prescription(
        &self,
        record_id: &str,
        commitment: &Commitment,
    ) -> Result<TxReceipt> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;

        if state.commitments.contains_key(record_id) {
            return Err(revert("commitment exists"));
        }
        state.commitments.insert(record_id.to_string(), *commitment);

        Ok(Self::mine(&mut state, "issueAnonymousPrescription", record_id))
    }

    async fn get_anonymous_commitment(&self, record_id: &str) -> Result<Option<Commitment>> {
        self.ensure_online()?;
        let state = self.state.lock().await;
        Ok(state.commitments.get(record_id).copied())
    }

    async fn pay_doctor(&self, from: &str, to: &str, amount: u64) -> Result<TxReceipt> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;

        let from_key = wallet_key(from);
        let to_key = wallet_key(to);

        let available = state.balances.get(&from_key).copied().unwrap_or(0);
        if available < amount {
            return Err(Error::InsufficientBalance {
                available,
                required: amount,
            });
        }

        // Self-payment leaves the balance untouched
        if from_key != to_key {
            let credited = state
                .balances
                .get(&to_key)
                .copied()
                .unwrap_or(0)
                .checked_add(amount)
                .ok_or_else(|| revert("balance overflow"))?;
            state.balances.insert(from_key, available - amount);
            state.balances.insert(to_key, credited);
        }

        Ok(Self::mine(&mut state, "payDoctor", to))
    }

    async fn buy_tokens(&self, wallet: &str, amount: u64) -> Result<TxReceipt> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;

        let balance = state.balances.entry(wallet_key(wallet)).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| revert("balance overflow"))?;

        Ok(Self::mine(&mut state, "buyTokens", wallet))
    }

    async fn token_balance(&self, wallet: &str) -> Result<u64> {
        self.ensure_online()?;
        let state = self.state.lock().await;
        Ok(state.balances.get(&wallet_key(wallet)).copied().unwrap_or(0))
    }

    async fn block_number(&self) -> Result<u64> {
        self.ensure_online()?;
        Ok(self.state.lock().await.block_number)
    }
}
