use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const ADDRESS_PREFIX: &str = "0x";
const ADDRESS_HEX_LEN: usize = 40;

/// An address on the ledger: `0x` followed by 40 hex digits.
///
/// Addresses are normalized to lowercase so that equality and store keys do not
/// depend on how the caller typed them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self, PaymentError> {
        let raw = raw.trim();
        let body = raw
            .strip_prefix(ADDRESS_PREFIX)
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| {
                PaymentError::Validation(format!("Wallet address `{}` must start with 0x", raw))
            })?;

        if body.len() != ADDRESS_HEX_LEN || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PaymentError::Validation(format!(
                "Wallet address `{}` must have {} hex digits",
                raw, ADDRESS_HEX_LEN
            )));
        }

        Ok(Self(format!("{}{}", ADDRESS_PREFIX, body.to_ascii_lowercase())))
    }

    /// Builds an address from the 20 raw bytes handed out by a ledger.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("{}{}", ADDRESS_PREFIX, hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for WalletAddress {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to whoever owns a wallet (a user id, an account handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef(pub String);

impl From<&str> for OwnerRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A wallet registered in the local store.
///
/// The address is assigned by the ledger and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: WalletAddress,
    pub owner_ref: OwnerRef,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(address: WalletAddress, owner_ref: OwnerRef) -> Self {
        Self {
            address,
            owner_ref,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    #[test]
    fn test_parse_normalizes_case() {
        let address = WalletAddress::parse(VALID).unwrap();
        assert_eq!(
            address.as_str(),
            "0x52908400098527886e0f7030069857d2e4169ee7"
        );
        assert_eq!(address, WalletAddress::parse(&VALID.to_lowercase()).unwrap());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "",
            "52908400098527886E0F7030069857D2E4169EE7",
            "0x1234",
            "0x52908400098527886E0F7030069857D2E4169EZ7",
            "0x52908400098527886E0F7030069857D2E4169EE7aa",
        ] {
            assert!(
                matches!(WalletAddress::parse(raw), Err(PaymentError::Validation(_))),
                "expected `{}` to be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_from_bytes_round_trips_through_parse() {
        let address = WalletAddress::from_bytes([0xab; 20]);
        assert_eq!(address.as_str().len(), 42);
        assert_eq!(WalletAddress::parse(address.as_str()).unwrap(), address);
    }
}
