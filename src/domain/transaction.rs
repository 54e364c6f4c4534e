use super::money::{Amount, Currency};
use super::wallet::WalletAddress;
use crate::error::{PaymentError, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Locally issued idempotency key of a transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the ledger assigned to a submitted transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalTxId(pub String);

impl From<&str> for ExternalTxId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ExternalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum TransactionStatus {
    Pending,
    Committed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Committed => "Committed",
            TransactionStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// Durable audit entry of one transfer attempt.
///
/// A record is written as `Pending` before the ledger is contacted and moves to
/// `Committed` or `Failed` exactly once. Terminal records are never rewritten.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub external_tx_id: Option<ExternalTxId>,
    pub sender: WalletAddress,
    pub recipient: WalletAddress,
    pub amount: Amount,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// Creates a `Pending` record. Fails when sender and recipient coincide.
    pub fn pending(
        id: TransactionId,
        sender: WalletAddress,
        recipient: WalletAddress,
        amount: Amount,
        currency: Currency,
    ) -> Result<Self, PaymentError> {
        if sender == recipient {
            return Err(PaymentError::Validation(
                "Sender and recipient must differ".to_string(),
            ));
        }

        Ok(Self {
            id,
            external_tx_id: None,
            sender,
            recipient,
            amount,
            currency,
            status: TransactionStatus::Pending,
            failure_reason: None,
            created_at: Utc::now(),
            committed_at: None,
        })
    }

    /// Pending -> Committed. Any other starting state is refused.
    pub fn commit(&mut self, external_tx_id: ExternalTxId) -> Result<(), StoreError> {
        self.ensure_pending()?;
        self.status = TransactionStatus::Committed;
        self.external_tx_id = Some(external_tx_id);
        self.committed_at = Some(Utc::now());
        Ok(())
    }

    /// Pending -> Failed. Any other starting state is refused.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), StoreError> {
        self.ensure_pending()?;
        self.status = TransactionStatus::Failed;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn involves(&self, address: &WalletAddress) -> bool {
        &self.sender == address || &self.recipient == address
    }

    fn ensure_pending(&self) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            Err(StoreError::AlreadyTerminal(self.id.0.clone()))
        } else {
            Ok(())
        }
    }
}
