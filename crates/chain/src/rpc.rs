//! JSON-RPC client for the contract relayer
//!
//! The relayer holds the signing key and contract ABI; this client only
//! names the contract method and passes arguments.

use async_trait::async_trait;
use medledger_common::{Commitment, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::client::{ChainClient, TxReceipt};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Value,
}

/// Client for a JSON-RPC provider fronting the records contract
pub struct RpcChainClient {
    rpc_url: String,
    contract_address: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcChainClient {
    pub fn new(rpc_url: String, contract_address: String) -> Self {
        Self {
            rpc_url,
            contract_address,
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!("RPC call {} (id {}) to {}", method, request.id, self.rpc_url);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Chain(format!("RPC transport error: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Chain(format!(
                "RPC endpoint returned {}",
                response.status()
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Chain(format!("Failed to parse RPC response: {}", e)))?;

        if let Some(err) = body.error {
            warn!("RPC {} failed: {} ({})", method, err.message, err.code);
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }

    /// Contract method call: `[{ "to": contract, ...args }]`
    async fn contract_call(&self, method: &str, mut args: Value) -> Result<Value> {
        if let Value::Object(ref mut map) = args {
            map.insert("to".to_string(), json!(self.contract_address));
        }
        self.call(method, json!([args])).await
    }

    async fn contract_write(&self, method: &str, args: Value) -> Result<TxReceipt> {
        let result = self.contract_call(method, args).await?;
        parse_receipt(result)
    }
}

fn parse_receipt(value: Value) -> Result<TxReceipt> {
    let raw: RawReceipt = serde_json::from_value(value)?;
    Ok(TxReceipt {
        tx_hash: raw.transaction_hash,
        block_number: parse_quantity(&raw.block_number)?,
    })
}

/// Quantities arrive either as JSON numbers or `0x` hex strings
fn parse_quantity(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::Chain(format!("Invalid quantity: {}", n))),
        Value::String(s) => {
            let parsed = match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse(),
            };
            parsed.map_err(|_| Error::Chain(format!("Invalid quantity: {}", s)))
        }
        other => Err(Error::Chain(format!("Invalid quantity: {}", other))),
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn register_patient(&self, wallet: &str, patient_id: &str) -> Result<TxReceipt> {
        self.contract_write(
            "registerPatient",
            json!({ "wallet": wallet, "patientId": patient_id }),
        )
        .await
    }

    async fn register_doctor(
        &self,
        wallet: &str,
        doctor_id: &str,
        license_number: &str,
    ) -> Result<TxReceipt> {
        self.contract_write(
            "registerDoctor",
            json!({
                "wallet": wallet,
                "doctorId": doctor_id,
                "licenseNumber": license_number,
            }),
        )
        .await
    }

    async fn issue_prescription(
        &self,
        prescription_id: &str,
        patient_wallet: &str,
        doctor_wallet: &str,
        content_hash: [u8; 32],
    ) -> Result<TxReceipt> {
        self.contract_write(
            "issuePrescription",
            json!({
                "prescriptionId": prescription_id,
                "patient": patient_wallet,
                "doctor": doctor_wallet,
                "contentHash": format!("0x{}", hex::encode(content_hash)),
            }),
        )
        .await
    }

    async fn issue_anonymous_prescription(
        &self,
        record_id: &str,
        commitment: &Commitment,
    ) -> Result<TxReceipt> {
        self.contract_write(
            "issueAnonymousPrescription",
            json!({
                "recordId": record_id,
                "commitment": format!("0x{}", commitment.to_hex()),
            }),
        )
        .await
    }

    async fn get_anonymous_commitment(&self, record_id: &str) -> Result<Option<Commitment>> {
        let result = self
            .contract_call("getAnonymousCommitment", json!({ "recordId": record_id }))
            .await?;

        match result {
            Value::Null => Ok(None),
            Value::String(s) => {
                let commitment = Commitment::from_hex(&s)?;
                // The contract returns bytes32(0) for unknown ids
                if commitment.as_bytes() == &[0u8; 32] {
                    Ok(None)
                } else {
                    Ok(Some(commitment))
                }
            }
            other => Err(Error::Chain(format!("Unexpected commitment value: {}", other))),
        }
    }

    async fn pay_doctor(&self, from: &str, to: &str, amount: u64) -> Result<TxReceipt> {
        self.contract_write(
            "payDoctor",
            json!({ "from": from, "doctor": to, "amount": amount }),
        )
        .await
    }

    async fn buy_tokens(&self, wallet: &str, amount: u64) -> Result<TxReceipt> {
        self.contract_write("buyTokens", json!({ "wallet": wallet, "amount": amount }))
            .await
    }

    async fn token_balance(&self, wallet: &str) -> Result<u64> {
        let result = self
            .contract_call("balanceOf", json!({ "wallet": wallet }))
            .await?;
        parse_quantity(&result)
    }

    async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }
}
