use crate::config::ProvisionerConfig;
use crate::domain::ports::{LedgerError, LedgerRef, WalletStoreRef};
use crate::domain::wallet::{OwnerRef, Wallet};
use crate::error::{PaymentError, Result, StoreError};
use tokio::time::timeout;

/// Creates wallets on the ledger and records them locally.
///
/// The ledger creation is not retried. A failed local write is retried with
/// backoff; if it still fails, the wallet exists on the ledger without a local
/// record and the error names the orphaned address.
#[derive(Clone)]
pub struct WalletProvisioner {
    ledger: LedgerRef,
    wallets: WalletStoreRef,
    config: ProvisionerConfig,
}

impl WalletProvisioner {
    pub fn new(ledger: LedgerRef, wallets: WalletStoreRef, config: ProvisionerConfig) -> Self {
        Self {
            ledger,
            wallets,
            config,
        }
    }

    #[tracing::instrument(skip_all, fields(owner = %owner_ref.0))]
    pub async fn create_wallet(&self, owner_ref: OwnerRef) -> Result<Wallet> {
        let address = match timeout(self.config.ledger_timeout, self.ledger.create_wallet()).await {
            Ok(Ok(address)) => address,
            Ok(Err(e)) => return Err(PaymentError::LedgerUnavailable(e.to_string())),
            Err(_) => {
                let elapsed = LedgerError::Timeout(self.config.ledger_timeout.as_millis() as u64);
                return Err(PaymentError::LedgerUnavailable(elapsed.to_string()));
            }
        };

        let wallet = Wallet::new(address, owner_ref);
        let policy = self.config.persistence_retry;
        let mut last_error = StoreError::Backend("no write attempted".to_string());

        for attempt in 0..policy.max_attempts.max(1) {
            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.wallets.insert_wallet(wallet.clone()).await {
                Ok(()) => {
                    tracing::info!(address = %wallet.address, "wallet provisioned");
                    return Ok(wallet);
                }
                // An earlier attempt may have landed before its answer was lost.
                Err(StoreError::DuplicateAddress(_)) => {
                    match self.wallets.get_wallet(&wallet.address).await {
                        Ok(Some(stored)) if stored.owner_ref == wallet.owner_ref => {
                            return Ok(stored);
                        }
                        Ok(None) => {
                            tracing::warn!(address = %wallet.address, attempt, "duplicate address reported but no wallet stored");
                            last_error = StoreError::DuplicateAddress(wallet.address.to_string());
                        }
                        Ok(Some(_)) => {
                            let err = StoreError::DuplicateAddress(wallet.address.to_string());
                            tracing::error!(alert = true, address = %wallet.address, "address already owned by another wallet");
                            return Err(PaymentError::WalletNotPersisted {
                                address: wallet.address,
                                source: err,
                            });
                        }
                        Err(e) => last_error = e,
                    }
                }
                Err(e) => {
                    tracing::warn!(address = %wallet.address, attempt, error = %e, "wallet write failed");
                    last_error = e;
                }
            }
        }

        tracing::error!(
            alert = true,
            address = %wallet.address,
            error = %last_error,
            "wallet exists on the ledger but was not persisted"
        );
        Err(PaymentError::WalletNotPersisted {
            address: wallet.address,
            source: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::domain::ports::WalletStore;
    use crate::domain::wallet::WalletAddress;
    use crate::infrastructure::in_memory::InMemoryWalletStore;
    use crate::infrastructure::ledger::SimulatedLedger;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` writes with `error`, then delegates.
    struct FlakyWallets {
        inner: InMemoryWalletStore,
        failures: usize,
        error: StoreError,
        attempts: AtomicUsize,
    }

    impl FlakyWallets {
        fn new(failures: usize, error: StoreError) -> Self {
            Self {
                inner: InMemoryWalletStore::new(),
                failures,
                error,
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WalletStore for FlakyWallets {
        async fn insert_wallet(&self, wallet: Wallet) -> std::result::Result<(), StoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(self.error.clone());
            }
            self.inner.insert_wallet(wallet).await
        }

        async fn get_wallet(
            &self,
            address: &WalletAddress,
        ) -> std::result::Result<Option<Wallet>, StoreError> {
            self.inner.get_wallet(address).await
        }
    }

    fn busy() -> StoreError {
        StoreError::Backend("disk busy".to_string())
    }

    fn config(max_attempts: u32) -> ProvisionerConfig {
        ProvisionerConfig {
            ledger_timeout: Duration::from_secs(1),
            persistence_retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        }
    }

    #[tokio::test]
    async fn test_create_wallet_persists_record() {
        let wallets = InMemoryWalletStore::new();
        let provisioner = WalletProvisioner::new(
            Arc::new(SimulatedLedger::new()),
            Arc::new(wallets.clone()),
            config(3),
        );

        let wallet = provisioner.create_wallet(OwnerRef::from("user-1")).await.unwrap();
        let stored = wallets.get_wallet(&wallet.address).await.unwrap().unwrap();
        assert_eq!(stored, wallet);
        assert_eq!(stored.owner_ref, OwnerRef::from("user-1"));
    }

    #[tokio::test]
    async fn test_transient_write_failures_are_retried() {
        let wallets = Arc::new(FlakyWallets::new(2, busy()));
        let provisioner =
            WalletProvisioner::new(Arc::new(SimulatedLedger::new()), wallets.clone(), config(3));

        let wallet = provisioner.create_wallet(OwnerRef::from("user-2")).await.unwrap();
        assert_eq!(wallets.attempts.load(Ordering::SeqCst), 3);
        assert!(wallets.get_wallet(&wallet.address).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_orphaned_address() {
        let wallets = Arc::new(FlakyWallets::new(usize::MAX, busy()));
        let provisioner =
            WalletProvisioner::new(Arc::new(SimulatedLedger::new()), wallets.clone(), config(3));

        let err = provisioner
            .create_wallet(OwnerRef::from("user-3"))
            .await
            .unwrap_err();

        match err {
            PaymentError::WalletNotPersisted { address, source } => {
                assert!(wallets.get_wallet(&address).await.unwrap().is_none());
                assert_eq!(source, busy());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(wallets.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_duplicate_without_stored_wallet_is_retried() {
        let wallets = Arc::new(FlakyWallets::new(
            1,
            StoreError::DuplicateAddress("phantom".to_string()),
        ));
        let provisioner =
            WalletProvisioner::new(Arc::new(SimulatedLedger::new()), wallets.clone(), config(3));

        let wallet = provisioner.create_wallet(OwnerRef::from("user-5")).await.unwrap();
        assert_eq!(wallets.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(
            wallets.get_wallet(&wallet.address).await.unwrap().unwrap().owner_ref,
            OwnerRef::from("user-5")
        );
    }

    #[tokio::test]
    async fn test_unavailable_ledger_creates_nothing() {
        let ledger = SimulatedLedger::new();
        ledger.set_unavailable(true);
        let wallets = InMemoryWalletStore::new();
        let provisioner =
            WalletProvisioner::new(Arc::new(ledger), Arc::new(wallets.clone()), config(3));

        let result = provisioner.create_wallet(OwnerRef::from("user-4")).await;
        assert!(matches!(result, Err(PaymentError::LedgerUnavailable(_))));
    }
}
