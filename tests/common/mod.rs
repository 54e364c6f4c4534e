#![allow(dead_code)]

use async_trait::async_trait;
use payflow::domain::money::{Amount, Currency};
use payflow::domain::ports::{Notifier, NotifyError, TransactionStore};
use payflow::domain::transaction::{ExternalTxId, TransactionId, TransactionRecord};
use payflow::domain::wallet::WalletAddress;
use payflow::error::StoreError;
use payflow::infrastructure::in_memory::InMemoryTransactionStore;
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn alice() -> WalletAddress {
    WalletAddress::from_bytes([0x11; 20])
}

pub fn bob() -> WalletAddress {
    WalletAddress::from_bytes([0x22; 20])
}

pub fn pending_record(id: &str, amount: Decimal) -> TransactionRecord {
    TransactionRecord::pending(
        TransactionId::from(id),
        alice(),
        bob(),
        Amount::new(amount).unwrap(),
        Currency::parse("ETH").unwrap(),
    )
    .unwrap()
}

/// Notifier that remembers every `(channel, text)` it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel: &str, text: &str) -> Result<String, NotifyError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((channel.to_string(), text.to_string()));
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Transaction store that counts writes and can fail terminal writes on demand.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryTransactionStore,
    pub writes: AtomicUsize,
    pub failing_terminal_writes: AtomicUsize,
}

impl CountingStore {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let remaining = self.failing_terminal_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_terminal_writes
                .store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("write timed out".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for CountingStore {
    async fn create_pending(&self, record: TransactionRecord) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.create_pending(record).await
    }

    async fn mark_committed(
        &self,
        id: &TransactionId,
        external_tx_id: ExternalTxId,
    ) -> Result<TransactionRecord, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        self.inner.mark_committed(id, external_tx_id).await
    }

    async fn mark_failed(
        &self,
        id: &TransactionId,
        reason: &str,
    ) -> Result<TransactionRecord, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail()?;
        self.inner.mark_failed(id, reason).await
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<TransactionRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn get_by_address(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        self.inner.get_by_address(address).await
    }

    async fn pending(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        self.inner.pending().await
    }
}
