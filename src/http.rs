//! HTTP surface of the balance ledger.
//!
//! The caller's verified wallet arrives in the `X-Wallet-Address` header,
//! populated by the signature-verifying gateway in front of this service.
//! Handlers stay thin: parse, call the ledger, shape the response.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::amount::Amount;
use crate::cache::{BalanceCache, BalanceView};
use crate::chain::{GasEstimate, NetworkInfo, NetworkStats, OnchainBalance, OverRpc, CHAIN_ID};
use crate::ledger::{Ledger, LedgerError};
use crate::model::{
    AdminAdjustRequest, AuditEntry, AuditFilter, AuditQuery, BalanceResponse, GasEstimateRequest,
    PurchaseRequest, PurchaseResponse, ScoreRequest, ScoreResponse, StartGameResponse, TxStatus,
    VideoRewardResponse, WalletAddress, WithdrawRequest, WithdrawResponse,
};

pub const WALLET_HEADER: &str = "x-wallet-address";

/// Application state shared across handlers
pub struct AppState {
    pub ledger: Ledger,
    pub cache: Arc<BalanceCache>,
    pub chain: OverRpc,
    pub admin_wallets: HashSet<WalletAddress>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/balance", get(get_balance))
        .route("/api/balance/view", get(get_balance_view))
        .route("/api/game/start", post(start_game))
        .route("/api/score", post(submit_score))
        .route("/api/chips/purchase", post(purchase_chips))
        .route("/api/tokens/withdraw", post(withdraw_tokens))
        .route("/api/rewards/video", post(claim_video_reward))
        .route("/api/admin/adjust", post(admin_adjust))
        .route("/api/admin/audit", get(list_audit))
        .route("/network/info", get(network_info))
        .route("/balance/onchain", get(onchain_balance))
        .route("/transaction/estimate-gas", post(estimate_gas))
        .route("/analytics/network-stats", get(network_stats))
        .with_state(state)
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match &self {
            LedgerError::InvalidAmount(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            LedgerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::DailyLimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,
            LedgerError::ConcurrentConflict => StatusCode::CONFLICT,
            LedgerError::Unauthorized => StatusCode::UNAUTHORIZED,
            LedgerError::Network(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        }));
        (status, body).into_response()
    }
}

/// Aggregated health: the store carries the ledger, so it decides the status
/// code; chain connectivity is reported but informational.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_ok = state.ledger.healthy().await;
    let chain_ok = state.chain.connected().await;

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if store_ok { "ok" } else { "degraded" },
            "storeConnected": store_ok,
            "overProtocolConnected": chain_ok,
            "chainId": CHAIN_ID,
        })),
    )
}

/// Authoritative balance read. Also warms the display cache.
async fn get_balance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BalanceResponse>, LedgerError> {
    let wallet = wallet_from_headers(&headers)?;
    let (account, reset_countdown) = state.ledger.get_balance(&wallet, Utc::now()).await?;
    state.cache.store(&account).await;

    Ok(Json(BalanceResponse {
        address: account.wallet,
        over_tokens: account.token_balance,
        game_chips: account.game_chips,
        total_earnings: account.total_earnings,
        last_updated: account.last_updated,
        reset_countdown,
    }))
}

/// Display-only balance. Serves cached data or a flagged fallback and never
/// touches storage.
async fn get_balance_view(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BalanceView>, LedgerError> {
    let wallet = wallet_from_headers(&headers)?;
    Ok(Json(state.cache.view_or_fallback(&wallet).await))
}

async fn start_game(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StartGameResponse>, LedgerError> {
    let wallet = wallet_from_headers(&headers)?;
    let (result, reset_countdown) = state.ledger.start_game(&wallet, Utc::now()).await?;

    Ok(Json(StartGameResponse {
        game_chips: result.new_chips,
        reset_countdown,
    }))
}

async fn submit_score(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ScoreRequest>,
) -> Result<Json<ScoreResponse>, LedgerError> {
    let wallet = wallet_from_headers(&headers)?;
    let reward = state
        .ledger
        .submit_score(&wallet, req.game_type, req.score, Utc::now())
        .await?;

    Ok(Json(ScoreResponse {
        score: req.score,
        over_reward: reward,
        game_type: req.game_type,
    }))
}

async fn purchase_chips(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, LedgerError> {
    let wallet = wallet_from_headers(&headers)?;
    let result = state
        .ledger
        .purchase_chips(
            &wallet,
            req.chip_amount,
            req.over_amount,
            req.client_ref,
            Utc::now(),
        )
        .await?;

    let tx_hash = result
        .tx_hash
        .ok_or_else(|| LedgerError::Network("purchase committed without record".to_string()))?;

    Ok(Json(PurchaseResponse {
        tx_hash,
        chip_amount: req.chip_amount,
        over_cost: req.over_amount,
        status: TxStatus::Confirmed,
    }))
}

async fn withdraw_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<WithdrawRequest>,
) -> Result<Json<WithdrawResponse>, LedgerError> {
    let wallet = wallet_from_headers(&headers)?;
    let result = state
        .ledger
        .withdraw_tokens(&wallet, req.over_amount, Utc::now())
        .await?;

    let tx_hash = result
        .tx_hash
        .ok_or_else(|| LedgerError::Network("withdrawal committed without record".to_string()))?;

    Ok(Json(WithdrawResponse {
        tx_hash,
        amount: req.over_amount,
        status: TxStatus::Confirmed,
    }))
}

async fn claim_video_reward(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<VideoRewardResponse>, LedgerError> {
    let wallet = wallet_from_headers(&headers)?;
    let outcome = state.ledger.claim_video_reward(&wallet, Utc::now()).await?;

    Ok(Json(VideoRewardResponse {
        success: true,
        reward_amount: outcome.reward_chips,
        new_balance: outcome.new_balance,
        daily_videos_watched: outcome.watched_today,
        daily_limit: outcome.daily_limit,
    }))
}

async fn admin_adjust(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AdminAdjustRequest>,
) -> Result<Json<Value>, LedgerError> {
    let actor = wallet_from_headers(&headers)?;

    if !state.admin_wallets.contains(&actor) {
        // Rejected privileged attempts are audit-worthy too.
        state
            .ledger
            .record_audit(AuditEntry {
                actor_wallet: actor.to_string(),
                action_type: "balance_adjustment".to_string(),
                target_wallet: Some(req.target_wallet.to_string()),
                details: json!({ "reason": req.reason }),
                success: false,
                error_message: Some("unauthorized".to_string()),
                created_at: Utc::now(),
            })
            .await;
        return Err(LedgerError::Unauthorized);
    }

    let tokens_delta = req.tokens_delta.unwrap_or(Amount::ZERO);
    let result = state
        .ledger
        .admin_adjust(
            &actor,
            &req.target_wallet,
            req.chips_delta,
            tokens_delta,
            &req.reason,
            Utc::now(),
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "gameChips": result.new_chips,
        "overTokens": result.new_tokens,
    })))
}

async fn list_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, LedgerError> {
    let actor = wallet_from_headers(&headers)?;
    if !state.admin_wallets.contains(&actor) {
        return Err(LedgerError::Unauthorized);
    }

    let filter = AuditFilter {
        success: query.success,
        action_type: query.action,
    };
    let entries = state
        .ledger
        .query_audit(&filter, query.limit, query.offset)
        .await?;

    Ok(Json(json!({ "entries": entries })))
}

async fn network_info(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NetworkInfo>, LedgerError> {
    Ok(Json(state.chain.network_info().await?))
}

async fn onchain_balance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<OnchainBalance>, LedgerError> {
    let wallet = wallet_from_headers(&headers)?;
    Ok(Json(state.chain.onchain_balance(&wallet).await?))
}

async fn estimate_gas(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GasEstimateRequest>,
) -> Result<Json<GasEstimate>, LedgerError> {
    if !req.amount.is_positive() {
        return Err(LedgerError::InvalidAmount(format!(
            "transfer amount must be positive: {}",
            req.amount
        )));
    }

    let estimate = state
        .chain
        .estimate_gas(&req.from_address, &req.to_address, req.amount)
        .await?;
    Ok(Json(estimate))
}

async fn network_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NetworkStats>, LedgerError> {
    Ok(Json(state.chain.network_stats().await?))
}

fn wallet_from_headers(headers: &HeaderMap) -> Result<WalletAddress, LedgerError> {
    let raw = headers
        .get(WALLET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(LedgerError::Unauthorized)?;
    WalletAddress::parse(raw).map_err(|_| LedgerError::InvalidAddress(raw.to_string()))
}
