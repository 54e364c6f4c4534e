//! Domain types and the ports the application layer talks through.

pub mod money;
pub mod payment;
pub mod ports;
pub mod transaction;
pub mod wallet;
