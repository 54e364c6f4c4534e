//! Runtime configuration.
//!
//! The binary reads everything from the command line (with environment
//! fallbacks) and turns it into the typed configs the application layer takes.

use crate::domain::money::Balance;
use crate::domain::payment::PaymentMethod;
use crate::domain::wallet::WalletAddress;
use crate::logging::LogFormat;
use clap::{Parser, ValueEnum};
use rand::Rng;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Retry schedule for local persistence writes.
///
/// Ledger submissions are never retried with this policy: re-sending a
/// transfer with an unknown outcome risks a double spend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with up to 10% jitter. Attempt 0 has no delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(2u64.saturating_pow(attempt - 1))
            .min(max_ms);

        let jitter_range = delay_ms / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(delay_ms + jitter)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on a single ledger call. Expiry on a submission means
    /// "outcome unknown", not failure.
    pub ledger_timeout: Duration,
    pub notify_timeout: Duration,
    pub supported_methods: Vec<PaymentMethod>,
    pub persistence_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ledger_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(5),
            supported_methods: vec![PaymentMethod::Wallet],
            persistence_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub ledger_timeout: Duration,
    pub persistence_retry: RetryPolicy,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            ledger_timeout: Duration::from_secs(10),
            persistence_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// A `Pending` record unknown to the ledger is only failed once it is at
    /// least this old, so an in-flight submission is not failed prematurely.
    pub not_found_grace: Duration,
    pub ledger_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            not_found_grace: Duration::from_secs(300),
            ledger_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LedgerBackend {
    /// In-process ledger, for local runs and tests.
    Simulated,
}

/// Initial balance for a wallet on the simulated ledger, given as `ADDRESS=AMOUNT`.
#[derive(Debug, Clone, PartialEq)]
pub struct Funding {
    pub address: WalletAddress,
    pub balance: Balance,
}

impl FromStr for Funding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, amount) = s
            .split_once('=')
            .ok_or_else(|| format!("expected ADDRESS=AMOUNT, got `{}`", s))?;
        let address = WalletAddress::parse(address).map_err(|e| e.to_string())?;
        let amount = Decimal::from_str(amount.trim())
            .map_err(|e| format!("invalid amount `{}`: {}", amount, e))?;
        Ok(Self {
            address,
            balance: Balance::new(amount),
        })
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input payments CSV file
    pub input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "PAYFLOW_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Ledger network adapter
    #[arg(long, value_enum, default_value_t = LedgerBackend::Simulated)]
    pub ledger: LedgerBackend,

    /// Seed a balance on the simulated ledger (repeatable)
    #[arg(long = "fund", value_name = "ADDRESS=AMOUNT")]
    pub funding: Vec<Funding>,

    /// Create a wallet for OWNER before processing payments (repeatable)
    #[arg(long = "provision", value_name = "OWNER")]
    pub provision: Vec<String>,

    /// Timeout for a single ledger call, in milliseconds
    #[arg(long, env = "PAYFLOW_LEDGER_TIMEOUT_MS", default_value_t = 10_000)]
    pub ledger_timeout_ms: u64,

    /// Payment methods accepted by the orchestrator
    #[arg(long = "method", value_enum, default_values_t = vec![PaymentMethod::Wallet])]
    pub methods: Vec<PaymentMethod>,

    /// Maximum number of payments processed concurrently
    #[arg(long, default_value_t = 8)]
    pub concurrency: usize,

    /// Attempts for a persistence write before giving up
    #[arg(long, default_value_t = 5)]
    pub persistence_attempts: u32,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "PAYFLOW_LOG", default_value = "warn")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.persistence_attempts.max(1),
            ..RetryPolicy::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            ledger_timeout: Duration::from_millis(self.ledger_timeout_ms),
            supported_methods: self.methods.clone(),
            persistence_retry: self.retry_policy(),
            ..OrchestratorConfig::default()
        }
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            ledger_timeout: Duration::from_millis(self.ledger_timeout_ms),
            persistence_retry: self.retry_policy(),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            ledger_timeout: Duration::from_millis(self.ledger_timeout_ms),
            ..ReconcilerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert!(policy.delay_for(1) >= Duration::from_millis(100));
        assert!(policy.delay_for(2) >= Duration::from_millis(200));
        assert!(policy.delay_for(10) >= Duration::from_millis(1000));
        assert!(policy.delay_for(10) < Duration::from_millis(1100));
    }

    #[test]
    fn test_funding_parse() {
        let funding: Funding = "0x52908400098527886E0F7030069857D2E4169EE7=100.5"
            .parse()
            .unwrap();
        assert_eq!(funding.balance, Balance::new(dec!(100.5)));

        assert!("0x1234=10".parse::<Funding>().is_err());
        assert!("no-separator".parse::<Funding>().is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["payflow", "payments.csv"]);
        assert_eq!(cli.ledger, LedgerBackend::Simulated);
        assert_eq!(cli.methods, vec![PaymentMethod::Wallet]);
        assert!(cli.provision.is_empty());

        let config = cli.orchestrator_config();
        assert_eq!(config.ledger_timeout, Duration::from_secs(10));
        assert_eq!(config.persistence_retry.max_attempts, 5);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "payflow",
            "payments.csv",
            "--ledger-timeout-ms",
            "250",
            "--method",
            "wallet",
            "--method",
            "card",
            "--fund",
            "0x52908400098527886E0F7030069857D2E4169EE7=10",
        ]);

        assert_eq!(cli.methods, vec![PaymentMethod::Wallet, PaymentMethod::Card]);
        assert_eq!(cli.funding.len(), 1);
        assert_eq!(
            cli.orchestrator_config().ledger_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_method_names_match_csv_spelling() {
        let cli = Cli::parse_from(["payflow", "payments.csv", "--method", "bank_transfer"]);
        assert_eq!(cli.methods, vec![PaymentMethod::BankTransfer]);
        assert!(
            Cli::try_parse_from(["payflow", "payments.csv", "--method", "bank-transfer"]).is_err()
        );
    }
}
