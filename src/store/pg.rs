//! Postgres ledger store.
//!
//! Account writes go through a single UPDATE guarded by the row version,
//! inside one database transaction with the transaction-record insert, so a
//! commit is all-or-nothing and lost updates surface as conflicts instead of
//! being silently overwritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::amount::Amount;
use crate::model::{Account, AuditEntry, AuditFilter, TxKind, TxRecord, TxStatus, WalletAddress};

use super::{LedgerStore, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and run migrations.
    pub async fn init(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database");

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    wallet_address: String,
    game_chips: i64,
    token_balance: String,
    total_earnings: String,
    reset_anchor: Option<DateTime<Utc>>,
    version: i64,
    last_updated: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> Result<Account, StoreError> {
        Ok(Account {
            wallet: WalletAddress::parse(&self.wallet_address)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            game_chips: self.game_chips,
            token_balance: parse_amount(&self.token_balance)?,
            total_earnings: parse_amount(&self.total_earnings)?,
            reset_anchor: self.reset_anchor,
            version: self.version,
            last_updated: self.last_updated,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TxRow {
    tx_hash: String,
    wallet_address: String,
    kind: String,
    amount_chips: i64,
    amount_tokens: String,
    status: String,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TxRow {
    fn into_record(self) -> Result<TxRecord, StoreError> {
        Ok(TxRecord {
            tx_hash: self.tx_hash,
            wallet: WalletAddress::parse(&self.wallet_address)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            kind: self.kind.parse::<TxKind>().map_err(StoreError::Decode)?,
            amount_chips: self.amount_chips,
            amount_tokens: parse_amount(&self.amount_tokens)?,
            status: self.status.parse::<TxStatus>().map_err(StoreError::Decode)?,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    actor_wallet: String,
    action_type: String,
    target_wallet: Option<String>,
    details: String,
    success: bool,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditEntry, StoreError> {
        Ok(AuditEntry {
            actor_wallet: self.actor_wallet,
            action_type: self.action_type,
            target_wallet: self.target_wallet,
            details: serde_json::from_str(&self.details)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            success: self.success,
            error_message: self.error_message,
            created_at: self.created_at,
        })
    }
}

fn parse_amount(text: &str) -> Result<Amount, StoreError> {
    text.parse()
        .map_err(|e: crate::amount::ParseAmountError| StoreError::Decode(e.to_string()))
}

const SELECT_ACCOUNT: &str = r#"
    SELECT wallet_address, game_chips,
           token_balance::text AS token_balance,
           total_earnings::text AS total_earnings,
           reset_anchor, version, last_updated
    FROM accounts
    WHERE wallet_address = $1
"#;

#[async_trait]
impl LedgerStore for PgStore {
    async fn get_account(&self, wallet: &WalletAddress) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(SELECT_ACCOUNT)
            .bind(wallet.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn create_account(&self, account: Account) -> Result<Account, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                wallet_address, game_chips, token_balance, total_earnings,
                reset_anchor, version, last_updated
            ) VALUES ($1, $2, $3::numeric, $4::numeric, $5, $6, $7)
            ON CONFLICT (wallet_address) DO NOTHING
            "#,
        )
        .bind(account.wallet.as_str())
        .bind(account.game_chips)
        .bind(account.token_balance.to_string())
        .bind(account.total_earnings.to_string())
        .bind(account.reset_anchor)
        .bind(account.version)
        .bind(account.last_updated)
        .execute(&self.pool)
        .await?;

        // Return whichever row won the creation race.
        let row = sqlx::query_as::<_, AccountRow>(SELECT_ACCOUNT)
            .bind(account.wallet.as_str())
            .fetch_one(&self.pool)
            .await?;
        row.into_account()
    }

    async fn commit(
        &self,
        account: &Account,
        expected_version: i64,
        tx: Option<&TxRecord>,
    ) -> Result<(), StoreError> {
        let mut txn = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET game_chips = $2,
                token_balance = $3::numeric,
                total_earnings = $4::numeric,
                reset_anchor = $5,
                version = $6,
                last_updated = $7
            WHERE wallet_address = $1 AND version = $8
            "#,
        )
        .bind(account.wallet.as_str())
        .bind(account.game_chips)
        .bind(account.token_balance.to_string())
        .bind(account.total_earnings.to_string())
        .bind(account.reset_anchor)
        .bind(account.version)
        .bind(account.last_updated)
        .bind(expected_version)
        .execute(&mut *txn)
        .await?;

        if updated.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StoreError::Conflict);
        }

        if let Some(tx) = tx {
            sqlx::query(
                r#"
                INSERT INTO transactions (
                    tx_hash, wallet_address, kind, amount_chips, amount_tokens,
                    status, created_at, confirmed_at
                ) VALUES ($1, $2, $3, $4, $5::numeric, $6, $7, $8)
                "#,
            )
            .bind(&tx.tx_hash)
            .bind(tx.wallet.as_str())
            .bind(tx.kind.as_str())
            .bind(tx.amount_chips)
            .bind(tx.amount_tokens.to_string())
            .bind(tx.status.as_str())
            .bind(tx.created_at)
            .bind(tx.confirmed_at)
            .execute(&mut *txn)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db)
                    if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
                {
                    StoreError::DuplicateTx(tx.tx_hash.clone())
                }
                _ => StoreError::Database(e),
            })?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn get_tx(&self, tx_hash: &str) -> Result<Option<TxRecord>, StoreError> {
        let row = sqlx::query_as::<_, TxRow>(
            r#"
            SELECT tx_hash, wallet_address, kind, amount_chips,
                   amount_tokens::text AS amount_tokens,
                   status, created_at, confirmed_at
            FROM transactions
            WHERE tx_hash = $1
            "#,
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TxRow::into_record).transpose()
    }

    async fn count_confirmed_since(
        &self,
        wallet: &WalletAddress,
        kind: TxKind,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM transactions
            WHERE wallet_address = $1
              AND kind = $2
              AND status = 'confirmed'
              AND created_at >= $3
            "#,
        )
        .bind(wallet.as_str())
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u32)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                actor_wallet, action_type, target_wallet, details,
                success, error_message, created_at
            ) VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7)
            "#,
        )
        .bind(&entry.actor_wallet)
        .bind(&entry.action_type)
        .bind(&entry.target_wallet)
        .bind(entry.details.to_string())
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_audit(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT actor_wallet, action_type, target_wallet,
                   details::text AS details,
                   success, error_message, created_at
            FROM audit_log
            WHERE ($1::boolean IS NULL OR success = $1)
              AND ($2::text IS NULL OR action_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.success)
        .bind(filter.action_type.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditRow::into_entry).collect()
    }

    async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
