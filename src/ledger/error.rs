//! Error taxonomy for balance ledger operations.

use thiserror::Error;

use crate::model::WalletAddress;
use crate::store::StoreError;

/// Every caller of a balance mutation receives one of these; nothing is
/// silently swallowed.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: String, requested: String },

    #[error("account {0} not found")]
    AccountNotFound(WalletAddress),

    #[error("daily limit of {limit} {action} claims reached")]
    DailyLimitReached { action: &'static str, limit: u32 },

    /// The account changed under the operation; the caller should retry.
    #[error("concurrent balance update, retry the request")]
    ConcurrentConflict,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unauthorized: no verified wallet")]
    Unauthorized,

    #[error("network error: {0}")]
    Network(String),
}

impl LedgerError {
    /// Stable machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::AccountNotFound(_) => "account_not_found",
            LedgerError::DailyLimitReached { .. } => "daily_limit_reached",
            LedgerError::ConcurrentConflict => "concurrent_conflict",
            LedgerError::InvalidAddress(_) => "invalid_address",
            LedgerError::Unauthorized => "unauthorized",
            LedgerError::Network(_) => "network_error",
        }
    }

    /// Whether an automatic retry by the caller is reasonable. Terminal
    /// results like insufficient balance must be shown, not retried.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrentConflict | LedgerError::Network(_)
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            // Both are lost-update races; the caller re-reads and retries.
            StoreError::Conflict | StoreError::DuplicateTx(_) => LedgerError::ConcurrentConflict,
            other => LedgerError::Network(other.to_string()),
        }
    }
}

impl From<crate::chain::ChainError> for LedgerError {
    fn from(e: crate::chain::ChainError) -> Self {
        LedgerError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(LedgerError::InvalidAmount("x".into()).code(), "invalid_amount");
        assert_eq!(LedgerError::ConcurrentConflict.code(), "concurrent_conflict");
        assert_eq!(LedgerError::Unauthorized.code(), "unauthorized");
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(LedgerError::ConcurrentConflict.retryable());
        assert!(LedgerError::Network("timeout".into()).retryable());
        assert!(!LedgerError::InsufficientBalance {
            available: "0".into(),
            requested: "1".into()
        }
        .retryable());
        assert!(!LedgerError::DailyLimitReached {
            action: "video_reward",
            limit: 5
        }
        .retryable());
    }
}
