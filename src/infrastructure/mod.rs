//! Adapters behind the domain ports.

pub mod in_memory;
pub mod ledger;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
