//! Storage layer for the balance ledger.
//!
//! The ledger core talks to storage through [`LedgerStore`]. Per-wallet
//! serialization is a storage-layer guarantee: every account write is a
//! compare-and-set on the account `version`, so two concurrent mutations of
//! the same wallet can never both land on the same observed state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Account, AuditEntry, AuditFilter, TxKind, TxRecord, WalletAddress};

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The account row changed between read and write; the caller must
    /// re-read and retry.
    #[error("concurrent update conflict")]
    Conflict,

    /// A transaction with this hash is already recorded.
    #[error("transaction {0} already recorded")]
    DuplicateTx(String),

    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Durable home of accounts, transactions and the audit log.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_account(&self, wallet: &WalletAddress) -> Result<Option<Account>, StoreError>;

    /// Insert the account if absent. Returns the stored row either way, so a
    /// lazy-creation race between two sessions resolves to one seed grant.
    async fn create_account(&self, account: Account) -> Result<Account, StoreError>;

    /// Atomically persist an updated account and, when present, one
    /// transaction record. The write succeeds only if the stored version
    /// still equals `expected_version`; otherwise nothing is written and
    /// [`StoreError::Conflict`] is returned.
    async fn commit(
        &self,
        account: &Account,
        expected_version: i64,
        tx: Option<&TxRecord>,
    ) -> Result<(), StoreError>;

    async fn get_tx(&self, tx_hash: &str) -> Result<Option<TxRecord>, StoreError>;

    /// Count confirmed transactions of `kind` for `wallet` created at or
    /// after `since`. Backs the daily reward cap.
    async fn count_confirmed_since(
        &self,
        wallet: &WalletAddress,
        kind: TxKind,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError>;

    /// Append-only; the audit log has no update or delete path.
    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Newest-first audit page, optionally filtered by success and action.
    async fn query_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    async fn healthy(&self) -> bool;
}
