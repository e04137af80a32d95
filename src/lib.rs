//! Arkade balance ledger: the off-chain chip and OVER token economy behind
//! the arcade portal.

pub mod amount;
pub mod cache;
pub mod chain;
pub mod http;
pub mod ledger;
pub mod model;
pub mod store;

pub use amount::Amount;
pub use cache::{BalanceCache, BalanceView};
pub use chain::OverRpc;
pub use http::AppState;
pub use ledger::{BalanceOp, Ledger, LedgerError};
pub use model::{Account, GameKind, WalletAddress};
pub use store::{LedgerStore, MemStore, PgStore};
