//! Over Protocol JSON-RPC client.
//!
//! Read-only chain queries: the ledger never writes on-chain. Balances come
//! back as hex wei quantities and are converted to [`Amount`] once, at this
//! boundary.

use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::amount::Amount;
use crate::model::WalletAddress;

/// Over Protocol mainnet chain id.
pub const CHAIN_ID: u64 = 54176;

pub const DEFAULT_RPC_URL: &str = "https://rpc.overprotocol.com";

const NETWORK_NAME: &str = "Over Protocol";
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc error: {message} ({code})")]
    Rpc { code: i64, message: String },

    #[error("no result in rpc response")]
    MissingResult,

    #[error("malformed quantity: {0}")]
    BadQuantity(String),

    #[error("cost arithmetic overflow")]
    Overflow,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Chain-level facts reported to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub chain_id: u64,
    pub network_name: &'static str,
    pub latest_block: u64,
    /// Current gas price in wei, decimal string.
    pub gas_price_wei: String,
}

/// Native OVER held by the wallet on chain, distinct from the off-chain
/// ledger balance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainBalance {
    pub address: WalletAddress,
    pub balance: Amount,
    pub wei: String,
}

/// Cost breakdown for a plain OVER transfer at current gas prices.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub gas_estimate: u64,
    pub gas_price_wei: String,
    /// Fee alone (gas * price), in OVER.
    pub transaction_cost_over: Amount,
    /// Fee plus the transferred value, in OVER.
    pub total_cost_over: Amount,
}

/// Throughput snapshot derived from the two most recent blocks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    pub latest_block_number: u64,
    pub latest_block_timestamp: u64,
    pub latest_block_transactions: usize,
    pub average_block_time_seconds: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub gas_utilization_percent: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    timestamp: String,
    gas_limit: String,
    gas_used: String,
    transactions: Vec<Value>,
}

pub struct OverRpc {
    http_client: HttpClient,
    rpc_url: String,
}

impl OverRpc {
    pub fn new(rpc_url: String) -> Self {
        let http_client = HttpClient::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            rpc_url,
        }
    }

    /// Cheap connectivity probe for the health endpoint.
    pub async fn connected(&self) -> bool {
        self.call::<String>("eth_blockNumber", json!([])).await.is_ok()
    }

    pub async fn network_info(&self) -> Result<NetworkInfo, ChainError> {
        let block: String = self.call("eth_blockNumber", json!([])).await?;
        let gas: String = self.call("eth_gasPrice", json!([])).await?;

        Ok(NetworkInfo {
            chain_id: CHAIN_ID,
            network_name: NETWORK_NAME,
            latest_block: parse_quantity(&block)? as u64,
            gas_price_wei: parse_quantity(&gas)?.to_string(),
        })
    }

    pub async fn onchain_balance(
        &self,
        wallet: &WalletAddress,
    ) -> Result<OnchainBalance, ChainError> {
        let raw: String = self
            .call("eth_getBalance", json!([wallet.as_str(), "latest"]))
            .await?;
        let wei = parse_quantity(&raw)?;
        let balance =
            Amount::from_wei(wei).ok_or_else(|| ChainError::BadQuantity(raw.clone()))?;

        Ok(OnchainBalance {
            address: wallet.clone(),
            balance,
            wei: wei.to_string(),
        })
    }

    /// Estimate the all-in cost of transferring `amount` OVER between two
    /// addresses at the current gas price.
    pub async fn estimate_gas(
        &self,
        from: &WalletAddress,
        to: &WalletAddress,
        amount: Amount,
    ) -> Result<GasEstimate, ChainError> {
        let value = amount_to_wei(amount)?;
        let call_obj = json!({
            "from": from.as_str(),
            "to": to.as_str(),
            "value": to_hex_quantity(value),
        });

        let gas: String = self.call("eth_estimateGas", json!([call_obj])).await?;
        let price: String = self.call("eth_gasPrice", json!([])).await?;

        let gas = parse_quantity(&gas)?;
        let price = parse_quantity(&price)?;
        let fee = gas.checked_mul(price).ok_or(ChainError::Overflow)?;
        let total = fee.checked_add(value).ok_or(ChainError::Overflow)?;

        Ok(GasEstimate {
            gas_estimate: gas as u64,
            gas_price_wei: price.to_string(),
            transaction_cost_over: Amount::from_wei(fee).ok_or(ChainError::Overflow)?,
            total_cost_over: Amount::from_wei(total).ok_or(ChainError::Overflow)?,
        })
    }

    /// Network throughput stats from the latest block and its parent.
    pub async fn network_stats(&self) -> Result<NetworkStats, ChainError> {
        let latest: RpcBlock = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;

        let number = parse_quantity(&latest.number)? as u64;
        let timestamp = parse_quantity(&latest.timestamp)? as u64;
        let gas_limit = parse_quantity(&latest.gas_limit)? as u64;
        let gas_used = parse_quantity(&latest.gas_used)? as u64;

        let average_block_time_seconds = if number > 0 {
            let prev: RpcBlock = self
                .call(
                    "eth_getBlockByNumber",
                    json!([to_hex_quantity((number - 1) as u128), false]),
                )
                .await?;
            timestamp.saturating_sub(parse_quantity(&prev.timestamp)? as u64)
        } else {
            0
        };

        Ok(NetworkStats {
            latest_block_number: number,
            latest_block_timestamp: timestamp,
            latest_block_transactions: latest.transactions.len(),
            average_block_time_seconds,
            gas_limit,
            gas_used,
            gas_utilization_percent: utilization_percent(gas_used, gas_limit),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .http_client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await?;

        let rpc_resp: RpcResponse<T> = resp.json().await?;

        if let Some(error) = rpc_resp.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        rpc_resp.result.ok_or(ChainError::MissingResult)
    }
}

fn amount_to_wei(amount: Amount) -> Result<u128, ChainError> {
    u128::try_from(amount.to_scaled()).map_err(|_| ChainError::BadQuantity(amount.to_string()))
}

fn to_hex_quantity(value: u128) -> String {
    format!("0x{value:x}")
}

fn utilization_percent(gas_used: u64, gas_limit: u64) -> f64 {
    if gas_limit == 0 {
        return 0.0;
    }
    gas_used as f64 / gas_limit as f64 * 100.0
}

/// Parse an EVM hex quantity ("0x1b4") into a wei count.
fn parse_quantity(raw: &str) -> Result<u128, ChainError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::BadQuantity(raw.to_string()))?;
    if digits.is_empty() {
        return Err(ChainError::BadQuantity(raw.to_string()));
    }
    u128::from_str_radix(digits, 16).map_err(|_| ChainError::BadQuantity(raw.to_string()))
}
