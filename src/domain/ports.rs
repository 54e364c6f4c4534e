use super::money::{Amount, Balance, Currency};
use super::transaction::{ExternalTxId, TransactionId, TransactionRecord};
use super::wallet::{Wallet, WalletAddress};
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Transport-level failures of a ledger call. None of these say anything about
/// whether a submitted transfer went through.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("ledger request timed out after {0} ms")]
    Timeout(u64),
    #[error("ledger transport error: {0}")]
    Transport(String),
}

/// A transfer handed to the ledger. `id` is the orchestrator-issued key the
/// ledger must remember so the outcome can be looked up later.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferInstruction {
    pub id: TransactionId,
    pub sender: WalletAddress,
    pub recipient: WalletAddress,
    pub amount: Amount,
    pub currency: Currency,
}

impl From<&TransactionRecord> for TransferInstruction {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            id: record.id.clone(),
            sender: record.sender.clone(),
            recipient: record.recipient.clone(),
            amount: record.amount,
            currency: record.currency.clone(),
        }
    }
}

/// What the ledger said about a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerSubmission {
    Submitted(ExternalTxId),
    Rejected(String),
    /// No definitive answer: the transfer may or may not have happened.
    Unknown(String),
}

/// Ledger view of a previously submitted transfer, used by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerTxStatus {
    Confirmed(ExternalTxId),
    Rejected(String),
    /// The ledger never received a transfer with this id.
    NotFound,
    Unknown,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn check_balance(&self, address: &WalletAddress) -> Result<Balance, LedgerError>;
    async fn send_transaction(&self, instruction: &TransferInstruction) -> LedgerSubmission;
    async fn create_wallet(&self) -> Result<WalletAddress, LedgerError>;
    async fn transaction_status(&self, id: &TransactionId) -> Result<LedgerTxStatus, LedgerError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers `text` to `channel`, returning the message id.
    async fn send(&self, channel: &str, text: &str) -> Result<String, NotifyError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create_pending(&self, record: TransactionRecord) -> Result<(), StoreError>;
    async fn mark_committed(
        &self,
        id: &TransactionId,
        external_tx_id: ExternalTxId,
    ) -> Result<TransactionRecord, StoreError>;
    async fn mark_failed(
        &self,
        id: &TransactionId,
        reason: &str,
    ) -> Result<TransactionRecord, StoreError>;
    async fn get(&self, id: &TransactionId) -> Result<Option<TransactionRecord>, StoreError>;
    async fn get_by_address(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
    async fn pending(&self) -> Result<Vec<TransactionRecord>, StoreError>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn insert_wallet(&self, wallet: Wallet) -> Result<(), StoreError>;
    async fn get_wallet(&self, address: &WalletAddress) -> Result<Option<Wallet>, StoreError>;
}

pub type LedgerRef = Arc<dyn LedgerClient>;
pub type NotifierRef = Arc<dyn Notifier>;
pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type WalletStoreRef = Arc<dyn WalletStore>;
