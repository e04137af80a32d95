//! Read-side balance cache.
//!
//! Serves cheap, possibly-stale balance views so render paths never block on
//! the database. Entries are refreshed from the ledger's invalidation events;
//! a miss falls back to a conservative placeholder that is clearly marked
//! non-authoritative.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::amount::Amount;
use crate::ledger::BalanceEvent;
use crate::model::{Account, WalletAddress};

/// Chips shown when no cached or stored balance is reachable. Conservative
/// on purpose: low enough to not promise chips the ledger may refuse.
pub const FALLBACK_CHIPS: i64 = 3;

const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// A balance snapshot for display. Only the ledger read path produces
/// `authoritative: true`; anything from the fallback is flagged so clients
/// never treat it as spendable truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub game_chips: i64,
    pub token_balance: Amount,
    pub authoritative: bool,
}

impl BalanceView {
    pub fn fallback() -> Self {
        Self {
            game_chips: FALLBACK_CHIPS,
            token_balance: Amount::ZERO,
            authoritative: false,
        }
    }
}

struct CacheSlot {
    view: BalanceView,
    stored_at: Instant,
}

pub struct BalanceCache {
    slots: Mutex<HashMap<WalletAddress, CacheSlot>>,
    ttl: Duration,
}

impl Default for BalanceCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl BalanceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Store an authoritative snapshot taken from the ledger.
    pub async fn store(&self, account: &Account) {
        let view = BalanceView {
            game_chips: account.game_chips,
            token_balance: account.token_balance,
            authoritative: true,
        };
        self.put(account.wallet.clone(), view).await;
    }

    /// Fresh cached view, if any.
    pub async fn get(&self, wallet: &WalletAddress) -> Option<BalanceView> {
        let mut slots = self.slots.lock().await;
        match slots.get(wallet) {
            Some(slot) if slot.stored_at.elapsed() < self.ttl => Some(slot.view.clone()),
            Some(_) => {
                slots.remove(wallet);
                None
            }
            None => None,
        }
    }

    /// Cached view or the non-authoritative fallback. Never fails.
    pub async fn view_or_fallback(&self, wallet: &WalletAddress) -> BalanceView {
        match self.get(wallet).await {
            Some(view) => view,
            None => BalanceView::fallback(),
        }
    }

    pub async fn invalidate(&self, wallet: &WalletAddress) {
        self.slots.lock().await.remove(wallet);
    }

    /// Consume ledger invalidation events until the ledger is dropped. Each
    /// event overwrites the slot with the post-mutation balances; a lagged
    /// receiver clears the whole cache rather than serve missed updates as
    /// fresh.
    pub async fn follow(&self, mut events: broadcast::Receiver<BalanceEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let view = BalanceView {
                        game_chips: event.game_chips,
                        token_balance: event.token_balance,
                        authoritative: true,
                    };
                    self.put(event.wallet, view).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "balance cache lagged, dropping all entries");
                    self.slots.lock().await.clear();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn put(&self, wallet: WalletAddress, view: BalanceView) {
        self.slots.lock().await.insert(
            wallet,
            CacheSlot {
                view,
                stored_at: Instant::now(),
            },
        );
    }
}
