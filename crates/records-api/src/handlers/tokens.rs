//! HTK token purchase and balance

use axum::{extract::State, Json};
use medledger_chain::TxReceipt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{auth::AuthUser, error::ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct BuyTokensRequest {
    pub amount: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyTokensResponse {
    pub wallet_address: String,
    pub amount: u64,
    pub balance: u64,
    pub transaction: TxReceipt,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub wallet_address: String,
    pub balance: u64,
}

/// Mint HTK to the caller's wallet
pub async fn buy_tokens_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<BuyTokensRequest>,
) -> Result<Json<BuyTokensResponse>, ApiError> {
    if payload.amount == 0 {
        return Err(ApiError::unprocessable("amount must be greater than zero"));
    }
    let wallet = auth.wallet()?;
    info!("Buying {} HTK for {}", payload.amount, wallet);

    let transaction = state
        .chain
        .buy_tokens(wallet, payload.amount)
        .await
        .map_err(|e| {
            warn!("buyTokens for {} failed: {}", wallet, e);
            ApiError::from(e)
        })?;
    let balance = state.chain.token_balance(wallet).await?;

    Ok(Json(BuyTokensResponse {
        wallet_address: wallet.to_string(),
        amount: payload.amount,
        balance,
        transaction,
    }))
}

pub async fn balance_handler(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let wallet = auth.wallet()?;
    let balance = state.chain.token_balance(wallet).await?;

    Ok(Json(BalanceResponse {
        wallet_address: wallet.to_string(),
        balance,
    }))
}
