use crate::domain::money::{Amount, Balance};
use crate::domain::wallet::WalletAddress;
use thiserror::Error;

/// Failures reported by a [`TransactionStore`](crate::domain::ports::TransactionStore)
/// or [`WalletStore`](crate::domain::ports::WalletStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transaction id `{0}` already exists")]
    DuplicateId(String),
    #[error("wallet address `{0}` already exists")]
    DuplicateAddress(String),
    #[error("transaction `{0}` not found")]
    NotFound(String),
    #[error("transaction `{0}` is already terminal")]
    AlreadyTerminal(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Conflicts point at a logic bug or a genuine race, never at a flaky backend.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateId(_)
                | StoreError::DuplicateAddress(_)
                | StoreError::AlreadyTerminal(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Balance, requested: Amount },
    #[error("Ledger rejected the transfer: {0}")]
    LedgerRejected(String),
    #[error("Ledger outcome unknown, pending reconciliation: {0}")]
    LedgerUnknown(String),
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(StoreError),
    #[error("Storage error: {0}")]
    Storage(StoreError),
    #[error("Notification failed: {0}")]
    NotificationFailed(String),
    #[error("Wallet {address} was created on the ledger but could not be persisted: {source}")]
    WalletNotPersisted {
        address: WalletAddress,
        #[source]
        source: StoreError,
    },
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for PaymentError {
    fn from(err: StoreError) -> Self {
        if err.is_conflict() {
            PaymentError::PersistenceConflict(err)
        } else {
            PaymentError::Storage(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
