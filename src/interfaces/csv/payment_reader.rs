use crate::domain::payment::{PaymentMethod, PaymentRequest};
use crate::domain::transaction::TransactionId;
use crate::domain::wallet::WalletAddress;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One row of a payments file: `id, sender, recipient, amount, currency, payment_method`.
///
/// `id` is the optional idempotency key. Addresses, amount sign and currency
/// are not checked here; the orchestrator validates them.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct PaymentRow {
    pub id: Option<String>,
    pub sender: String,
    pub recipient: String,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
}

impl PaymentRow {
    /// Splits the row into the paying wallet and the request it makes.
    pub fn into_request(self) -> Result<(WalletAddress, PaymentRequest)> {
        let sender = WalletAddress::parse(&self.sender)?;
        let idempotency_key = self
            .id
            .filter(|id| !id.is_empty())
            .map(TransactionId);

        Ok((
            sender,
            PaymentRequest {
                idempotency_key,
                recipient: self.recipient,
                amount: self.amount,
                currency: self.currency,
                payment_method: self.payment_method,
            },
        ))
    }
}

/// Reads payment rows from a CSV source.
///
/// Whitespace around fields is trimmed and rows may be short, so a missing
/// trailing column surfaces as a per-row error instead of aborting the file.
pub struct PaymentReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PaymentReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows, one `Result` per record.
    pub fn payments(self) -> impl Iterator<Item = Result<PaymentRow>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
