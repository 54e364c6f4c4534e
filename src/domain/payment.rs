//! Request and response shapes of a payment, independent of any transport.

use super::transaction::{TransactionId, TransactionRecord, TransactionStatus};
use crate::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// On-ledger transfer between two wallets.
    Wallet,
    Card,
    BankTransfer,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
        };
        f.write_str(label)
    }
}

/// An already-admitted payment request.
///
/// Fields arrive raw and are validated by the orchestrator before any side
/// effect, so an invalid amount or address surfaces as a validation error
/// instead of a decoding failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Caller-chosen idempotency key. Re-submitting with the same key never
    /// transfers twice.
    #[serde(default)]
    pub idempotency_key: Option<TransactionId>,
    pub recipient: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
}

/// How the ledger step ended for a returned record.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Committed,
    Rejected { reason: String },
    /// The ledger gave no definitive answer. The record stays `Pending`.
    Unknown { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationStatus {
    Sent { message_id: String },
    Failed { reason: String },
    /// No notification was due (rejected, unknown, or an idempotent replay).
    Skipped,
}

/// Result of `process_payment` whenever a transaction record exists.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub record: TransactionRecord,
    pub disposition: Disposition,
    pub notification: NotificationStatus,
}

impl PaymentOutcome {
    pub fn from_record(record: TransactionRecord) -> Self {
        let disposition = match record.status {
            TransactionStatus::Committed => Disposition::Committed,
            TransactionStatus::Failed => Disposition::Rejected {
                reason: record.failure_reason.clone().unwrap_or_default(),
            },
            TransactionStatus::Pending => Disposition::Unknown {
                reason: "awaiting reconciliation".to_string(),
            },
        };

        Self {
            record,
            disposition,
            notification: NotificationStatus::Skipped,
        }
    }

    /// The error class of a non-committed outcome, if any.
    pub fn error(&self) -> Option<PaymentError> {
        match &self.disposition {
            Disposition::Committed => None,
            Disposition::Rejected { reason } => Some(PaymentError::LedgerRejected(reason.clone())),
            Disposition::Unknown { reason } => Some(PaymentError::LedgerUnknown(reason.clone())),
        }
    }

    /// A notification failure never fails the payment; it is reported here instead.
    pub fn warning(&self) -> Option<PaymentError> {
        match &self.notification {
            NotificationStatus::Failed { reason } => {
                Some(PaymentError::NotificationFailed(reason.clone()))
            }
            _ => None,
        }
    }
}

/// Coarse status of a response, mirroring the HTTP status class a web layer
/// would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusClass {
    Ok,
    Accepted,
    BadRequest,
    InternalError,
    BadGateway,
    ServiceUnavailable,
}

impl StatusClass {
    pub fn code(&self) -> u16 {
        match self {
            StatusClass::Ok => 200,
            StatusClass::Accepted => 202,
            StatusClass::BadRequest => 400,
            StatusClass::InternalError => 500,
            StatusClass::BadGateway => 502,
            StatusClass::ServiceUnavailable => 503,
        }
    }
}

/// Response shape handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentResponse {
    /// External ledger id once committed, otherwise the local transaction id.
    /// Empty when no record was created.
    pub transaction_id: String,
    pub status: String,
    pub code: u16,
    pub message: String,
}

impl PaymentResponse {
    pub fn class(&self) -> StatusClass {
        match self.code {
            200 => StatusClass::Ok,
            202 => StatusClass::Accepted,
            400 => StatusClass::BadRequest,
            502 => StatusClass::BadGateway,
            503 => StatusClass::ServiceUnavailable,
            _ => StatusClass::InternalError,
        }
    }
}

impl From<&PaymentOutcome> for PaymentResponse {
    fn from(outcome: &PaymentOutcome) -> Self {
        let record = &outcome.record;
        let transaction_id = record
            .external_tx_id
            .as_ref()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| record.id.0.clone());

        let (class, message) = match &outcome.disposition {
            Disposition::Committed => {
                let mut message = format!(
                    "Sent {} {} to {}",
                    record.amount, record.currency, record.recipient
                );
                if let Some(warning) = outcome.warning() {
                    message.push_str(&format!(" (warning: {})", warning));
                }
                (StatusClass::Ok, message)
            }
            Disposition::Rejected { reason } => (
                StatusClass::BadGateway,
                format!("Ledger rejected the transfer: {}", reason),
            ),
            Disposition::Unknown { reason } => (
                StatusClass::Accepted,
                format!("Transfer pending reconciliation: {}", reason),
            ),
        };

        Self {
            transaction_id,
            status: record.status.to_string(),
            code: class.code(),
            message,
        }
    }
}

impl From<&PaymentError> for PaymentResponse {
    fn from(err: &PaymentError) -> Self {
        let class = match err {
            PaymentError::Validation(_) | PaymentError::InsufficientFunds { .. } => {
                StatusClass::BadRequest
            }
            PaymentError::LedgerRejected(_) => StatusClass::BadGateway,
            PaymentError::LedgerUnknown(_) => StatusClass::Accepted,
            PaymentError::LedgerUnavailable(_) => StatusClass::ServiceUnavailable,
            _ => StatusClass::InternalError,
        };

        Self {
            transaction_id: String::new(),
            status: "Rejected".to_string(),
            code: class.code(),
            message: err.to_string(),
        }
    }
}

impl From<&Result<PaymentOutcome, PaymentError>> for PaymentResponse {
    fn from(result: &Result<PaymentOutcome, PaymentError>) -> Self {
        match result {
            Ok(outcome) => outcome.into(),
            Err(err) => err.into(),
        }
    }
}
