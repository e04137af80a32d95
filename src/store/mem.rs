//! In-memory ledger store.
//!
//! Used by tests and as the fallback when no DATABASE_URL is configured.
//! A single mutex guards the whole state, so each store call is atomic;
//! the version compare-and-set still applies because the ledger reads and
//! commits in separate calls.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::model::{Account, AuditEntry, AuditFilter, TxKind, TxRecord, TxStatus, WalletAddress};

use super::{LedgerStore, StoreError};

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    txs: HashMap<String, TxRecord>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn get_account(&self, wallet: &WalletAddress) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(wallet.as_str()).cloned())
    }

    async fn create_account(&self, account: Account) -> Result<Account, StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .accounts
            .entry(account.wallet.as_str().to_string())
            .or_insert(account);
        Ok(stored.clone())
    }

    async fn commit(
        &self,
        account: &Account,
        expected_version: i64,
        tx: Option<&TxRecord>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        let current = inner
            .accounts
            .get(account.wallet.as_str())
            .ok_or(StoreError::Conflict)?;
        if current.version != expected_version {
            return Err(StoreError::Conflict);
        }

        if let Some(tx) = tx {
            if inner.txs.contains_key(&tx.tx_hash) {
                return Err(StoreError::DuplicateTx(tx.tx_hash.clone()));
            }
            inner.txs.insert(tx.tx_hash.clone(), tx.clone());
        }

        inner
            .accounts
            .insert(account.wallet.as_str().to_string(), account.clone());
        Ok(())
    }

    async fn get_tx(&self, tx_hash: &str) -> Result<Option<TxRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.txs.get(tx_hash).cloned())
    }

    async fn count_confirmed_since(
        &self,
        wallet: &WalletAddress,
        kind: TxKind,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let inner = self.inner.lock().await;
        let count = inner
            .txs
            .values()
            .filter(|tx| {
                tx.wallet == *wallet
                    && tx.kind == kind
                    && tx.status == TxStatus::Confirmed
                    && tx.created_at >= since
            })
            .count();
        Ok(count as u32)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.audit.push(entry);
        Ok(())
    }

    async fn query_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let page = inner
            .audit
            .iter()
            .rev()
            .filter(|entry| {
                filter.success.map_or(true, |want| entry.success == want)
                    && filter
                        .action_type
                        .as_deref()
                        .map_or(true, |want| entry.action_type == want)
            })
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn healthy(&self) -> bool {
        true
    }
}
