//! In-process ledger network.
//!
//! Holds balances, applies transfers, hands out sequential external ids
//! (`tx-1`, `tx-2`, ...) and remembers every submission by the
//! orchestrator-issued id so reconciliation can query it. Submission
//! behaviour can be scripted to reproduce rejections, ambiguous answers and
//! stalls.

use crate::domain::money::Balance;
use crate::domain::ports::{
    LedgerClient, LedgerError, LedgerSubmission, LedgerTxStatus, TransferInstruction,
};
use crate::domain::transaction::{ExternalTxId, TransactionId};
use crate::domain::wallet::WalletAddress;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitBehavior {
    /// Apply the transfer if the sender can cover it, otherwise reject.
    Accept,
    Reject(String),
    /// Answer ambiguously without applying anything.
    Unknown(String),
    /// Apply the transfer, then never answer the caller.
    AcceptThenStall,
    /// Never answer and never apply.
    Stall,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<WalletAddress, Balance>,
    submissions: HashMap<TransactionId, LedgerTxStatus>,
    script: VecDeque<SubmitBehavior>,
    next_tx: u64,
}

#[derive(Clone, Default)]
pub struct SimulatedLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: Arc<AtomicBool>,
    balance_checks: Arc<AtomicUsize>,
    submissions: Arc<AtomicUsize>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the balance of `address`, creating the wallet if needed.
    pub async fn fund(&self, address: &WalletAddress, balance: Balance) {
        let mut state = self.state.lock().await;
        state.balances.insert(address.clone(), balance);
    }

    /// Queues behaviours consumed by the next submissions, in order. Once the
    /// queue is empty submissions fall back to [`SubmitBehavior::Accept`].
    pub async fn script(&self, behaviors: impl IntoIterator<Item = SubmitBehavior>) {
        let mut state = self.state.lock().await;
        state.script.extend(behaviors);
    }

    /// Makes every call except submission fail at the transport level.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn balance_of(&self, address: &WalletAddress) -> Balance {
        let state = self.state.lock().await;
        state.balances.get(address).copied().unwrap_or(Balance::ZERO)
    }

    pub fn balance_checks(&self) -> usize {
        self.balance_checks.load(Ordering::SeqCst)
    }

    /// Number of `send_transaction` calls received, whatever their outcome.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LedgerError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn apply(state: &mut LedgerState, instruction: &TransferInstruction) -> LedgerTxStatus {
        let available = state
            .balances
            .get(&instruction.sender)
            .copied()
            .unwrap_or(Balance::ZERO);

        let status = if available.covers(instruction.amount) {
            let amount = Balance::from(instruction.amount);
            state
                .balances
                .insert(instruction.sender.clone(), available - amount);
            *state
                .balances
                .entry(instruction.recipient.clone())
                .or_insert(Balance::ZERO) += amount;
            state.next_tx += 1;
            LedgerTxStatus::Confirmed(ExternalTxId(format!("tx-{}", state.next_tx)))
        } else {
            LedgerTxStatus::Rejected("insufficient balance on ledger".to_string())
        };

        state
            .submissions
            .insert(instruction.id.clone(), status.clone());
        status
    }
}

fn as_submission(status: LedgerTxStatus) -> LedgerSubmission {
    match status {
        LedgerTxStatus::Confirmed(external_id) => LedgerSubmission::Submitted(external_id),
        LedgerTxStatus::Rejected(reason) => LedgerSubmission::Rejected(reason),
        LedgerTxStatus::NotFound | LedgerTxStatus::Unknown => {
            LedgerSubmission::Unknown("no ledger answer".to_string())
        }
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn check_balance(&self, address: &WalletAddress) -> Result<Balance, LedgerError> {
        self.balance_checks.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        Ok(self.balance_of(address).await)
    }

    async fn send_transaction(&self, instruction: &TransferInstruction) -> LedgerSubmission {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.state.lock().await;

            // The ledger deduplicates on the issued id, like a nonce.
            if let Some(previous) = state.submissions.get(&instruction.id) {
                return as_submission(previous.clone());
            }

            match state.script.pop_front().unwrap_or(SubmitBehavior::Accept) {
                SubmitBehavior::Accept => return as_submission(Self::apply(&mut state, instruction)),
                SubmitBehavior::Reject(reason) => {
                    state
                        .submissions
                        .insert(instruction.id.clone(), LedgerTxStatus::Rejected(reason.clone()));
                    return LedgerSubmission::Rejected(reason);
                }
                SubmitBehavior::Unknown(reason) => return LedgerSubmission::Unknown(reason),
                SubmitBehavior::AcceptThenStall => {
                    Self::apply(&mut state, instruction);
                }
                SubmitBehavior::Stall => {}
            }
        }

        tracing::debug!(id = %instruction.id, "simulated ledger stalling");
        std::future::pending::<LedgerSubmission>().await
    }

    async fn create_wallet(&self) -> Result<WalletAddress, LedgerError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        loop {
            let address = WalletAddress::from_bytes(rand::random::<[u8; 20]>());
            if !state.balances.contains_key(&address) {
                state.balances.insert(address.clone(), Balance::ZERO);
                return Ok(address);
            }
        }
    }

    async fn transaction_status(&self, id: &TransactionId) -> Result<LedgerTxStatus, LedgerError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state
            .submissions
            .get(id)
            .cloned()
            .unwrap_or(LedgerTxStatus::NotFound))
    }
}
