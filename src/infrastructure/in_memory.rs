use crate::domain::ports::{TransactionStore, WalletStore};
use crate::domain::transaction::{ExternalTxId, TransactionId, TransactionRecord};
use crate::domain::wallet::{Wallet, WalletAddress};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for registered wallets.
#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    wallets: Arc<RwLock<HashMap<WalletAddress, Wallet>>>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn insert_wallet(&self, wallet: Wallet) -> Result<(), StoreError> {
        let mut wallets = self.wallets.write().await;
        match wallets.entry(wallet.address.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateAddress(wallet.address.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(wallet);
                Ok(())
            }
        }
    }

    async fn get_wallet(&self, address: &WalletAddress) -> Result<Option<Wallet>, StoreError> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(address).cloned())
    }
}

/// A thread-safe in-memory store for transaction records.
///
/// Every state transition runs under a single write guard, so concurrent
/// terminalizations of one record are linearized: the first writer wins and
/// the rest observe `AlreadyTerminal`.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<TransactionId, TransactionRecord>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }

    async fn transition<F>(
        &self,
        id: &TransactionId,
        apply: F,
    ) -> Result<TransactionRecord, StoreError>
    where
        F: FnOnce(&mut TransactionRecord) -> Result<(), StoreError> + Send,
    {
        let mut transactions = self.transactions.write().await;
        let record = transactions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply(record)?;
        Ok(record.clone())
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create_pending(&self, record: TransactionRecord) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().await;
        match transactions.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId(record.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn mark_committed(
        &self,
        id: &TransactionId,
        external_tx_id: ExternalTxId,
    ) -> Result<TransactionRecord, StoreError> {
        self.transition(id, move |record| record.commit(external_tx_id))
            .await
    }

    async fn mark_failed(
        &self,
        id: &TransactionId,
        reason: &str,
    ) -> Result<TransactionRecord, StoreError> {
        self.transition(id, |record| record.fail(reason)).await
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<TransactionRecord>, StoreError> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(id).cloned())
    }

    async fn get_by_address(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let transactions = self.transactions.read().await;
        let mut records: Vec<TransactionRecord> = transactions
            .values()
            .filter(|record| record.involves(address))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn pending(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let transactions = self.transactions.read().await;
        let mut records: Vec<TransactionRecord> = transactions
            .values()
            .filter(|record| !record.status.is_terminal())
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::transaction::TransactionStatus;
    use crate::domain::wallet::OwnerRef;
    use rust_decimal_macros::dec;

    fn record(id: &str, sender: u8, recipient: u8) -> TransactionRecord {
        TransactionRecord::pending(
            TransactionId::from(id),
            WalletAddress::from_bytes([sender; 20]),
            WalletAddress::from_bytes([recipient; 20]),
            Amount::new(dec!(10)).unwrap(),
            Currency::parse("ETH").unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_wallet_store() {
        let store = InMemoryWalletStore::new();
        let wallet = Wallet::new(WalletAddress::from_bytes([7; 20]), OwnerRef::from("user-1"));

        store.insert_wallet(wallet.clone()).await.unwrap();
        let retrieved = store.get_wallet(&wallet.address).await.unwrap().unwrap();
        assert_eq!(retrieved, wallet);

        assert_eq!(
            store.insert_wallet(wallet.clone()).await,
            Err(StoreError::DuplicateAddress(wallet.address.to_string()))
        );
        assert!(
            store
                .get_wallet(&WalletAddress::from_bytes([8; 20]))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_create_pending_rejects_duplicate_id() {
        let store = InMemoryTransactionStore::new();
        store.create_pending(record("t-1", 1, 2)).await.unwrap();

        let result = store.create_pending(record("t-1", 3, 4)).await;
        assert_eq!(result, Err(StoreError::DuplicateId("t-1".to_string())));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_terminal_transitions_first_writer_wins() {
        let store = InMemoryTransactionStore::new();
        store.create_pending(record("t-1", 1, 2)).await.unwrap();

        let committed = store
            .mark_committed(&TransactionId::from("t-1"), ExternalTxId::from("tx-1"))
            .await
            .unwrap();
        assert_eq!(committed.status, TransactionStatus::Committed);

        let second = store.mark_failed(&TransactionId::from("t-1"), "late").await;
        assert_eq!(second, Err(StoreError::AlreadyTerminal("t-1".to_string())));

        let stored = store.get(&TransactionId::from("t-1")).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Committed);
        assert_eq!(stored.failure_reason, None);
    }

    #[tokio::test]
    async fn test_transition_on_missing_record() {
        let store = InMemoryTransactionStore::new();
        let result = store
            .mark_committed(&TransactionId::from("missing"), ExternalTxId::from("tx-1"))
            .await;
        assert_eq!(result, Err(StoreError::NotFound("missing".to_string())));
    }

    #[tokio::test]
    async fn test_get_by_address_and_pending() {
        let store = InMemoryTransactionStore::new();
        store.create_pending(record("t-1", 1, 2)).await.unwrap();
        store.create_pending(record("t-2", 2, 3)).await.unwrap();
        store.create_pending(record("t-3", 3, 4)).await.unwrap();
        store
            .mark_failed(&TransactionId::from("t-3"), "rejected")
            .await
            .unwrap();

        let for_two = store
            .get_by_address(&WalletAddress::from_bytes([2; 20]))
            .await
            .unwrap();
        let ids: Vec<&str> = for_two.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"t-1") && ids.contains(&"t-2"));

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|r| r.status == TransactionStatus::Pending));
    }
}
