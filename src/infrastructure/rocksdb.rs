use crate::domain::ports::{TransactionStore, WalletStore};
use crate::domain::transaction::{ExternalTxId, TransactionId, TransactionRecord};
use crate::domain::wallet::{Wallet, WalletAddress};
use crate::error::StoreError;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for registered wallets, keyed by address.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for transaction records, keyed by local transaction id.
pub const CF_TRANSACTIONS: &str = "transactions";

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A persistent store implementation using RocksDB.
///
/// Wallets and transactions live in separate Column Families. Every
/// check-then-write sequence (duplicate detection, state transitions) runs
/// under `write_lock`, which makes each record's transitions linearizable
/// across clones of the store.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// the `wallets` and `transactions` column families when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_wallets = ColumnFamilyDescriptor::new(CF_WALLETS, Options::default());
        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_wallets, cf_transactions])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("{} column family not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, StoreError> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("Deserialization error: {}", e))),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<(), StoreError> {
        let handle = self.cf(cf)?;
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StoreError::Backend(format!("Serialization error: {}", e)))?;
        self.db.put_cf(handle, key, bytes)?;
        Ok(())
    }

    fn scan_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let handle = self.cf(CF_TRANSACTIONS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (_key, value) = item?;
            let record: TransactionRecord = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Backend(format!("Failed to deserialize record: {}", e)))?;
            records.push(record);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn transition<F>(
        &self,
        id: &TransactionId,
        apply: F,
    ) -> Result<TransactionRecord, StoreError>
    where
        F: FnOnce(&mut TransactionRecord) -> Result<(), StoreError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut record: TransactionRecord = self
            .read(CF_TRANSACTIONS, id.as_str().as_bytes())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply(&mut record)?;
        self.write(CF_TRANSACTIONS, id.as_str().as_bytes(), &record)?;
        Ok(record)
    }
}

#[async_trait]
impl WalletStore for RocksDBStore {
    async fn insert_wallet(&self, wallet: Wallet) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = wallet.address.as_str().as_bytes();
        if self.read::<Wallet>(CF_WALLETS, key)?.is_some() {
            return Err(StoreError::DuplicateAddress(wallet.address.to_string()));
        }
        self.write(CF_WALLETS, key, &wallet)
    }

    async fn get_wallet(&self, address: &WalletAddress) -> Result<Option<Wallet>, StoreError> {
        self.read(CF_WALLETS, address.as_str().as_bytes())
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn create_pending(&self, record: TransactionRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = record.id.as_str().as_bytes();
        let handle = self.cf(CF_TRANSACTIONS)?;
        if self.db.get_pinned_cf(handle, key)?.is_some() {
            return Err(StoreError::DuplicateId(record.id.to_string()));
        }
        self.write(CF_TRANSACTIONS, key, &record)
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
        self.read(CF_TRANSACTIONS, id.as_str().as_bytes())
    }

    async fn get_by_address(
        &self,
        address: &WalletAddress,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .scan_transactions()?
            .into_iter()
            .filter(|record| record.involves(address))
            .collect())
    }

    async fn pending(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .scan_transactions()?
            .into_iter()
            .filter(|record| !record.status.is_terminal())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::transaction::TransactionStatus;
    use crate::domain::wallet::OwnerRef;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn record(id: &str) -> TransactionRecord {
        TransactionRecord::pending(
            TransactionId::from(id),
            WalletAddress::from_bytes([1; 20]),
            WalletAddress::from_bytes([2; 20]),
            Amount::new(dec!(100.0)).unwrap(),
            Currency::parse("ETH").unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_WALLETS).is_some());
        assert!(store.db.cf_handle(CF_TRANSACTIONS).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_wallet_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let wallet = Wallet::new(WalletAddress::from_bytes([9; 20]), OwnerRef::from("user-9"));

        store.insert_wallet(wallet.clone()).await.unwrap();
        let retrieved = store.get_wallet(&wallet.address).await.unwrap().unwrap();
        assert_eq!(retrieved, wallet);

        assert!(matches!(
            store.insert_wallet(wallet).await,
            Err(StoreError::DuplicateAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_transaction_lifecycle() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        store.create_pending(record("t-1")).await.unwrap();
        assert!(matches!(
            store.create_pending(record("t-1")).await,
            Err(StoreError::DuplicateId(_))
        ));
        assert_eq!(store.pending().await.unwrap().len(), 1);

        let committed = store
            .mark_committed(&TransactionId::from("t-1"), ExternalTxId::from("tx-1"))
            .await
            .unwrap();
        assert_eq!(committed.status, TransactionStatus::Committed);
        assert!(matches!(
            store.mark_failed(&TransactionId::from("t-1"), "late").await,
            Err(StoreError::AlreadyTerminal(_))
        ));

        let retrieved = store.get(&TransactionId::from("t-1")).await.unwrap().unwrap();
        assert_eq!(retrieved, committed);
        assert!(store.pending().await.unwrap().is_empty());
        assert_eq!(
            store
                .get_by_address(&WalletAddress::from_bytes([2; 20]))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.create_pending(record("t-1")).await.unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, TransactionId::from("t-1"));
    }
}
