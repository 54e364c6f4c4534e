//! Application layer: the use cases that drive payments through the ports.
//!
//! `PaymentOrchestrator` owns the request path, `Reconciler` resolves records
//! whose ledger outcome was unknown, and `WalletProvisioner` creates wallets.

pub mod orchestrator;
pub mod provisioner;
pub mod reconciler;
