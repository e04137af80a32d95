// Domain types and API payloads for the Arkade balance ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::amount::Amount;

/// A verified player wallet address: lowercase hex, 20-byte value prefixed
/// `0x`, exactly 42 characters. The primary key for balances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid wallet address: {0}")]
pub struct AddressError(String);

impl WalletAddress {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let normalized = input.trim().to_ascii_lowercase();
        let hex_part = normalized
            .strip_prefix("0x")
            .ok_or_else(|| AddressError(input.to_string()))?;

        let bytes = hex::decode(hex_part).map_err(|_| AddressError(input.to_string()))?;
        if bytes.len() != 20 {
            return Err(AddressError(input.to_string()));
        }

        Ok(WalletAddress(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        WalletAddress::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

/// The arcade games that pay out score rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Tetris,
    Snake,
    Pacman,
}

impl GameKind {
    /// OVER reward per 1000 points of score.
    pub fn reward_rate(self) -> Amount {
        match self {
            GameKind::Tetris => Amount::from_float(0.001),
            GameKind::Snake => Amount::from_float(0.0015),
            GameKind::Pacman => Amount::from_float(0.002),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameKind::Tetris => "tetris",
            GameKind::Snake => "snake",
            GameKind::Pacman => "pacman",
        }
    }
}

/// The kind of a recorded balance transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    ChipPurchase,
    TokenWithdrawal,
    VideoReward,
    ScoreReward,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::ChipPurchase => "chip_purchase",
            TxKind::TokenWithdrawal => "token_withdrawal",
            TxKind::VideoReward => "video_reward",
            TxKind::ScoreReward => "score_reward",
        }
    }
}

impl FromStr for TxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chip_purchase" => Ok(TxKind::ChipPurchase),
            "token_withdrawal" => Ok(TxKind::TokenWithdrawal),
            "video_reward" => Ok(TxKind::VideoReward),
            "score_reward" => Ok(TxKind::ScoreReward),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// Lifecycle of a transaction: pending -> confirmed | failed, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "confirmed" => Ok(TxStatus::Confirmed),
            "failed" => Ok(TxStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// One player account. Balances are never allowed to go negative; every
/// mutation is validated before commit and bumps `version`, which doubles as
/// the storage compare-and-set token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub wallet: WalletAddress,
    pub game_chips: i64,
    pub token_balance: Amount,
    /// Monotonically non-decreasing sum of all in-game token rewards.
    pub total_earnings: Amount,
    /// Set when the first chip since the last daily grant was consumed.
    pub reset_anchor: Option<DateTime<Utc>>,
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

impl Account {
    pub fn new(wallet: WalletAddress, starting_chips: i64, now: DateTime<Utc>) -> Self {
        Self {
            wallet,
            game_chips: starting_chips,
            token_balance: Amount::ZERO,
            total_earnings: Amount::ZERO,
            reset_anchor: None,
            version: 1,
            last_updated: now,
        }
    }
}

/// Durable record of one attempted balance mutation. `tx_hash` is the
/// globally unique idempotency key; replays return the original outcome
/// instead of re-applying the deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_hash: String,
    pub wallet: WalletAddress,
    pub kind: TxKind,
    pub amount_chips: i64,
    pub amount_tokens: Amount,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Append-only audit record of a privileged or security-relevant action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_wallet: String,
    pub action_type: String,
    pub target_wallet: Option<String>,
    pub details: serde_json::Value,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter for audit log queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub success: Option<bool>,
    pub action_type: Option<String>,
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

/// Authoritative balance snapshot returned by `GET /api/balance`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: WalletAddress,
    pub over_tokens: Amount,
    pub game_chips: i64,
    pub total_earnings: Amount,
    pub last_updated: DateTime<Utc>,
    /// `HH:MM:SS` until the next free chip grant, or "not started".
    pub reset_countdown: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameResponse {
    pub game_chips: i64,
    pub reset_countdown: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub game_type: GameKind,
    pub score: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResponse {
    pub score: u64,
    pub over_reward: Amount,
    pub game_type: GameKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub chip_amount: i64,
    pub over_amount: Amount,
    /// Optional client idempotency key; server generates one when absent.
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub tx_hash: String,
    pub chip_amount: i64,
    pub over_cost: Amount,
    pub status: TxStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub over_amount: Amount,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub tx_hash: String,
    pub amount: Amount,
    pub status: TxStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRewardResponse {
    pub success: bool,
    pub reward_amount: i64,
    pub new_balance: i64,
    pub daily_videos_watched: u32,
    pub daily_limit: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAdjustRequest {
    pub target_wallet: WalletAddress,
    #[serde(default)]
    pub chips_delta: i64,
    #[serde(default)]
    pub tokens_delta: Option<Amount>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimateRequest {
    pub from_address: WalletAddress,
    pub to_address: WalletAddress,
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub success: Option<bool>,
    pub action: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}
