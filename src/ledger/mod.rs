//! Balance ledger core.
//!
//! Every chip or token mutation in the system funnels through
//! [`Ledger::commit`]: it validates amounts before commit, applies deltas
//! against the stored account under a version compare-and-set, records the
//! transaction in the same indivisible step, and replays idempotently when a
//! known transaction reference is presented again.

pub mod error;
pub mod reset;

pub use error::LedgerError;

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use rand::RngCore;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::amount::Amount;
use crate::model::{
    Account, AuditEntry, AuditFilter, GameKind, TxKind, TxRecord, TxStatus, WalletAddress,
};
use crate::store::{LedgerStore, StoreError};
use reset::{ResetPhase, RESET_GRANT_CHIPS};

/// Chips seeded into a lazily created account.
pub const STARTING_CHIPS: i64 = 5;

/// Chips consumed to start one game session.
pub const GAME_SESSION_CHIPS: i64 = 1;

/// Chips granted per validated video view.
pub const VIDEO_REWARD_CHIPS: i64 = 1;

/// Maximum video reward claims per UTC calendar day.
pub const VIDEO_DAILY_LIMIT: u32 = 5;

/// Score points per reward unit.
pub const SCORE_UNIT: u64 = 1000;

/// Invalidation signal published after every successful mutation.
#[derive(Debug, Clone)]
pub struct BalanceEvent {
    pub wallet: WalletAddress,
    pub game_chips: i64,
    pub token_balance: Amount,
}

/// The four primitive balance operations.
#[derive(Debug, Clone, Copy)]
pub enum BalanceOp {
    SpendChips { amount: i64 },
    AddChips { amount: i64 },
    SpendTokens { amount: Amount },
    AddTokens { amount: Amount },
}

/// Request to record the mutation as a durable transaction. When `tx_ref`
/// is absent the ledger generates a random 32-byte hash, so every reward
/// claim gets a unique idempotency key without trusting client clocks.
#[derive(Debug, Clone)]
pub struct TxIntent {
    pub kind: TxKind,
    pub tx_ref: Option<String>,
}

impl TxIntent {
    pub fn new(kind: TxKind) -> Self {
        Self { kind, tx_ref: None }
    }

    pub fn with_ref(kind: TxKind, tx_ref: Option<String>) -> Self {
        Self { kind, tx_ref }
    }
}

/// Post-state of a successful mutation.
#[derive(Debug, Clone)]
pub struct OpResult {
    pub new_chips: i64,
    pub new_tokens: Amount,
    pub tx_hash: Option<String>,
    /// True when an idempotent replay short-circuited the mutation.
    pub replayed: bool,
}

/// Outcome of a video reward claim.
#[derive(Debug, Clone)]
pub struct VideoOutcome {
    pub reward_chips: i64,
    pub new_balance: i64,
    pub watched_today: u32,
    pub daily_limit: u32,
}

/// Signed deltas applied in one commit. `earned` feeds the monotonic
/// total-earnings accumulator and is only set for in-game rewards.
#[derive(Debug, Clone, Copy, Default)]
struct Deltas {
    chips: i64,
    tokens: Amount,
    earned: Amount,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    events: broadcast::Sender<BalanceEvent>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self { store, events }
    }

    /// Subscribe to balance invalidation events.
    pub fn subscribe(&self) -> broadcast::Receiver<BalanceEvent> {
        self.events.subscribe()
    }

    pub async fn healthy(&self) -> bool {
        self.store.healthy().await
    }

    /// Authoritative balance read. Lazily creates the account with its
    /// starting chip grant and applies the daily reset when it is due.
    /// Reset transitions are detected on observation, not by a background
    /// job.
    pub async fn get_balance(
        &self,
        wallet: &WalletAddress,
        now: DateTime<Utc>,
    ) -> Result<(Account, String), LedgerError> {
        let mut account = match self.store.get_account(wallet).await? {
            Some(account) => account,
            None => {
                let seeded = Account::new(wallet.clone(), STARTING_CHIPS, now);
                let stored = self.store.create_account(seeded).await?;
                info!(wallet = %wallet, chips = stored.game_chips, "account created");
                stored
            }
        };

        if let ResetPhase::Due = reset::phase(account.reset_anchor, now) {
            account = self.grant_daily_reset(account, now).await?;
        }

        let countdown = reset::countdown_label(account.reset_anchor, now);
        Ok((account, countdown))
    }

    /// Spend one chip to start a game session. The first consumption since
    /// the last grant arms the reset anchor, persisted in the same commit.
    pub async fn start_game(
        &self,
        wallet: &WalletAddress,
        now: DateTime<Utc>,
    ) -> Result<(OpResult, String), LedgerError> {
        let deltas = Deltas {
            chips: -GAME_SESSION_CHIPS,
            ..Deltas::default()
        };
        let (result, account) = self.commit(wallet, deltas, None, false, now).await?;
        let countdown = reset::countdown_label(account.reset_anchor, now);
        Ok((result, countdown))
    }

    /// Apply one primitive balance operation.
    pub async fn apply(
        &self,
        wallet: &WalletAddress,
        op: BalanceOp,
        intent: Option<TxIntent>,
        now: DateTime<Utc>,
    ) -> Result<OpResult, LedgerError> {
        let (deltas, lazy_create) = match op {
            BalanceOp::SpendChips { amount } => {
                require_positive_chips(amount)?;
                (
                    Deltas {
                        chips: -amount,
                        ..Deltas::default()
                    },
                    false,
                )
            }
            BalanceOp::AddChips { amount } => {
                require_positive_chips(amount)?;
                (
                    Deltas {
                        chips: amount,
                        ..Deltas::default()
                    },
                    true,
                )
            }
            BalanceOp::SpendTokens { amount } => {
                require_positive_tokens(amount)?;
                (
                    Deltas {
                        tokens: -amount,
                        ..Deltas::default()
                    },
                    false,
                )
            }
            BalanceOp::AddTokens { amount } => {
                require_positive_tokens(amount)?;
                (
                    Deltas {
                        tokens: amount,
                        ..Deltas::default()
                    },
                    true,
                )
            }
        };

        let (result, _) = self.commit(wallet, deltas, intent, lazy_create, now).await?;
        Ok(result)
    }

    /// Exchange OVER for chips: both deltas land in one commit with one
    /// transaction record, never only one of the two.
    pub async fn purchase_chips(
        &self,
        wallet: &WalletAddress,
        chip_amount: i64,
        over_cost: Amount,
        client_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<OpResult, LedgerError> {
        require_positive_chips(chip_amount)?;
        require_positive_tokens(over_cost)?;

        let deltas = Deltas {
            chips: chip_amount,
            tokens: -over_cost,
            earned: Amount::ZERO,
        };
        let intent = TxIntent::with_ref(TxKind::ChipPurchase, client_ref);
        let (result, _) = self.commit(wallet, deltas, Some(intent), false, now).await?;
        Ok(result)
    }

    /// Withdraw OVER from the off-chain mirror balance.
    pub async fn withdraw_tokens(
        &self,
        wallet: &WalletAddress,
        over_amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<OpResult, LedgerError> {
        require_positive_tokens(over_amount)?;

        let deltas = Deltas {
            tokens: -over_amount,
            ..Deltas::default()
        };
        let intent = TxIntent::new(TxKind::TokenWithdrawal);
        let (result, _) = self.commit(wallet, deltas, Some(intent), false, now).await?;
        Ok(result)
    }

    /// Credit the score reward: `floor(score / 1000) * rate`. A score below
    /// one reward unit returns zero without touching the ledger.
    pub async fn submit_score(
        &self,
        wallet: &WalletAddress,
        game: GameKind,
        score: u64,
        now: DateTime<Utc>,
    ) -> Result<Amount, LedgerError> {
        let units = (score / SCORE_UNIT) as i64;
        let reward = game
            .reward_rate()
            .checked_mul_units(units)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("score out of range: {score}")))?;

        if !reward.is_positive() {
            return Ok(Amount::ZERO);
        }

        let deltas = Deltas {
            chips: 0,
            tokens: reward,
            earned: reward,
        };
        let intent = TxIntent::new(TxKind::ScoreReward);
        self.commit(wallet, deltas, Some(intent), true, now).await?;
        Ok(reward)
    }

    /// Daily-capped chip reward for a validated video view.
    ///
    /// The cap check and the credit are not one atomic unit: two
    /// near-simultaneous claims can both pass the count at `cap - 1`. The
    /// account-version CAS forces the commits to serialize, but the recount
    /// happens only on retry, so the worst case is a single over-grant per
    /// race. Bounded and accepted; see DESIGN.md.
    pub async fn claim_video_reward(
        &self,
        wallet: &WalletAddress,
        now: DateTime<Utc>,
    ) -> Result<VideoOutcome, LedgerError> {
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let watched = self
            .store
            .count_confirmed_since(wallet, TxKind::VideoReward, day_start)
            .await?;

        if watched >= VIDEO_DAILY_LIMIT {
            return Err(LedgerError::DailyLimitReached {
                action: "video_reward",
                limit: VIDEO_DAILY_LIMIT,
            });
        }

        let deltas = Deltas {
            chips: VIDEO_REWARD_CHIPS,
            ..Deltas::default()
        };
        let intent = TxIntent::new(TxKind::VideoReward);
        let (result, _) = self.commit(wallet, deltas, Some(intent), true, now).await?;

        Ok(VideoOutcome {
            reward_chips: VIDEO_REWARD_CHIPS,
            new_balance: result.new_chips,
            watched_today: watched + 1,
            daily_limit: VIDEO_DAILY_LIMIT,
        })
    }

    /// Privileged balance adjustment. The outcome is audit-logged either
    /// way; an audit write failure never rolls the adjustment back.
    pub async fn admin_adjust(
        &self,
        actor: &WalletAddress,
        target: &WalletAddress,
        chips_delta: i64,
        tokens_delta: Amount,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<OpResult, LedgerError> {
        let outcome = if chips_delta == 0 && tokens_delta == Amount::ZERO {
            Err(LedgerError::InvalidAmount(
                "adjustment must change at least one balance".to_string(),
            ))
        } else {
            let deltas = Deltas {
                chips: chips_delta,
                tokens: tokens_delta,
                earned: Amount::ZERO,
            };
            // Pure grants may create the account; debits require one.
            let lazy_create = chips_delta >= 0 && !tokens_delta.is_negative();
            self.commit(target, deltas, None, lazy_create, now)
                .await
                .map(|(result, _)| result)
        };

        self.record_audit(AuditEntry {
            actor_wallet: actor.to_string(),
            action_type: "balance_adjustment".to_string(),
            target_wallet: Some(target.to_string()),
            details: serde_json::json!({
                "chipsDelta": chips_delta,
                "tokensDelta": tokens_delta,
                "reason": reason,
            }),
            success: outcome.is_ok(),
            error_message: outcome.as_ref().err().map(|e| e.to_string()),
            created_at: now,
        })
        .await;

        outcome
    }

    /// Append an audit entry. Never fails: a failed write is logged and the
    /// action it describes stands.
    pub async fn record_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(entry).await {
            error!("audit write failed: {e}");
        }
    }

    pub async fn query_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, LedgerError> {
        let page = self
            .store
            .query_audit(filter, limit.clamp(1, 500), offset.max(0))
            .await?;
        Ok(page)
    }
}

/// Private API
impl Ledger {
    /// The sole authorized mutation path: validate, apply deltas, commit
    /// account row and transaction record in one indivisible step.
    async fn commit(
        &self,
        wallet: &WalletAddress,
        deltas: Deltas,
        intent: Option<TxIntent>,
        lazy_create: bool,
        now: DateTime<Utc>,
    ) -> Result<(OpResult, Account), LedgerError> {
        // Idempotent replay: a known confirmed reference returns the prior
        // outcome without re-applying the deltas.
        if let Some(tx_ref) = intent.as_ref().and_then(|i| i.tx_ref.as_deref()) {
            if let Some(prior) = self.store.get_tx(tx_ref).await? {
                return self.replay(wallet, prior).await;
            }
        }

        let account = match self.store.get_account(wallet).await? {
            Some(account) => account,
            None if lazy_create => {
                let seeded = Account::new(wallet.clone(), STARTING_CHIPS, now);
                let stored = self.store.create_account(seeded).await?;
                info!(wallet = %wallet, chips = stored.game_chips, "account created");
                stored
            }
            None => return Err(LedgerError::AccountNotFound(wallet.clone())),
        };

        let expected_version = account.version;
        let mut updated = account;
        apply_deltas(&mut updated, deltas, now)?;

        let record = intent.map(|i| TxRecord {
            tx_hash: i.tx_ref.unwrap_or_else(generate_tx_hash),
            wallet: wallet.clone(),
            kind: i.kind,
            amount_chips: deltas.chips,
            amount_tokens: deltas.tokens,
            status: TxStatus::Confirmed,
            created_at: now,
            confirmed_at: Some(now),
        });

        match self
            .store
            .commit(&updated, expected_version, record.as_ref())
            .await
        {
            Ok(()) => {
                info!(
                    wallet = %updated.wallet,
                    chips = updated.game_chips,
                    tokens = %updated.token_balance,
                    kind = record.as_ref().map(|r| r.kind.as_str()).unwrap_or("untracked"),
                    "balance mutation applied"
                );
                self.publish(&updated);
                let result = OpResult {
                    new_chips: updated.game_chips,
                    new_tokens: updated.token_balance,
                    tx_hash: record.map(|r| r.tx_hash),
                    replayed: false,
                };
                Ok((result, updated))
            }
            Err(StoreError::DuplicateTx(hash)) => {
                // Lost a replay race: the same reference committed first.
                match self.store.get_tx(&hash).await? {
                    Some(prior) => self.replay(wallet, prior).await,
                    None => Err(LedgerError::ConcurrentConflict),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve an idempotent replay against the current account state.
    async fn replay(
        &self,
        wallet: &WalletAddress,
        prior: TxRecord,
    ) -> Result<(OpResult, Account), LedgerError> {
        let account = self
            .store
            .get_account(wallet)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(wallet.clone()))?;

        info!(wallet = %wallet, tx = %prior.tx_hash, "replayed transaction, deltas not re-applied");
        let result = OpResult {
            new_chips: account.game_chips,
            new_tokens: account.token_balance,
            tx_hash: Some(prior.tx_hash),
            replayed: true,
        };
        Ok((result, account))
    }

    /// Apply the due daily grant under CAS. Losing the race is not an
    /// error: the winning session already granted (or otherwise advanced)
    /// the account, so the fresh state is returned as-is.
    async fn grant_daily_reset(
        &self,
        account: Account,
        now: DateTime<Utc>,
    ) -> Result<Account, LedgerError> {
        let expected_version = account.version;
        let mut updated = account;
        updated.game_chips = updated
            .game_chips
            .checked_add(RESET_GRANT_CHIPS)
            .ok_or_else(|| LedgerError::InvalidAmount("chip balance overflow".to_string()))?;
        updated.reset_anchor = None;
        updated.version += 1;
        updated.last_updated = now;

        match self.store.commit(&updated, expected_version, None).await {
            Ok(()) => {
                info!(wallet = %updated.wallet, granted = RESET_GRANT_CHIPS, "daily chip grant applied");
                self.publish(&updated);
                Ok(updated)
            }
            Err(StoreError::Conflict) => {
                warn!(wallet = %updated.wallet, "daily chip grant lost a concurrent race");
                self.store
                    .get_account(&updated.wallet)
                    .await?
                    .ok_or_else(|| LedgerError::AccountNotFound(updated.wallet.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn publish(&self, account: &Account) {
        // No subscribers is fine.
        let _ = self.events.send(BalanceEvent {
            wallet: account.wallet.clone(),
            game_chips: account.game_chips,
            token_balance: account.token_balance,
        });
    }
}

/// Validate and apply signed deltas to an account in memory. Balances are
/// checked before the commit ever happens; a failed validation leaves the
/// caller's stored state untouched.
fn apply_deltas(
    account: &mut Account,
    deltas: Deltas,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let new_chips = account
        .game_chips
        .checked_add(deltas.chips)
        .ok_or_else(|| LedgerError::InvalidAmount("chip balance overflow".to_string()))?;
    if new_chips < 0 {
        return Err(LedgerError::InsufficientBalance {
            available: account.game_chips.to_string(),
            requested: (-deltas.chips).to_string(),
        });
    }

    let new_tokens = account
        .token_balance
        .checked_add(deltas.tokens)
        .ok_or_else(|| LedgerError::InvalidAmount("token balance overflow".to_string()))?;
    if new_tokens.is_negative() {
        return Err(LedgerError::InsufficientBalance {
            available: account.token_balance.to_string(),
            requested: (-deltas.tokens).to_string(),
        });
    }

    let new_earnings = account
        .total_earnings
        .checked_add(deltas.earned)
        .ok_or_else(|| LedgerError::InvalidAmount("earnings overflow".to_string()))?;

    // First chip consumed since the last grant arms the reset window.
    if deltas.chips < 0 && account.reset_anchor.is_none() {
        account.reset_anchor = Some(now);
    }

    account.game_chips = new_chips;
    account.token_balance = new_tokens;
    account.total_earnings = new_earnings;
    account.version += 1;
    account.last_updated = now;
    Ok(())
}

fn require_positive_chips(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "chip amount must be positive: {amount}"
        )));
    }
    Ok(())
}

fn require_positive_tokens(amount: Amount) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(format!(
            "token amount must be positive: {amount}"
        )));
    }
    Ok(())
}

fn generate_tx_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}
