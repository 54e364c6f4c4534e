use crate::application::reconciler::{Reconciler, Resolution};
use crate::config::{OrchestratorConfig, ReconcilerConfig};
use crate::domain::money::{Amount, Balance, Currency};
use crate::domain::payment::{Disposition, NotificationStatus, PaymentOutcome, PaymentRequest};
use crate::domain::ports::{
    LedgerError, LedgerRef, LedgerSubmission, Notifier, NotifierRef, TransactionStoreRef,
    TransferInstruction,
};
use crate::domain::transaction::{ExternalTxId, TransactionId, TransactionRecord, TransactionStatus};
use crate::domain::wallet::WalletAddress;
use crate::error::{PaymentError, Result, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// A request that passed every precondition.
struct ValidatedPayment {
    idempotency_key: Option<TransactionId>,
    recipient: WalletAddress,
    amount: Amount,
    currency: Currency,
}

/// Terminal state the orchestrator wants to write.
enum Terminal {
    Committed(ExternalTxId),
    Failed(String),
}

impl Terminal {
    fn status(&self) -> TransactionStatus {
        match self {
            Terminal::Committed(_) => TransactionStatus::Committed,
            Terminal::Failed(_) => TransactionStatus::Failed,
        }
    }
}

/// Drives a payment from request to durable outcome.
///
/// `PaymentOrchestrator` holds no per-payment state: every call is independent
/// and all shared state lives in the transaction store. Cloning is cheap and
/// clones share the same collaborators.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    ledger: LedgerRef,
    store: TransactionStoreRef,
    notifier: NotifierRef,
    reconciler: Reconciler,
    config: Arc<OrchestratorConfig>,
}

impl PaymentOrchestrator {
    pub fn new(
        ledger: LedgerRef,
        store: TransactionStoreRef,
        notifier: NotifierRef,
        config: OrchestratorConfig,
    ) -> Self {
        let reconciler = Reconciler::new(
            ledger.clone(),
            store.clone(),
            ReconcilerConfig {
                ledger_timeout: config.ledger_timeout,
                ..ReconcilerConfig::default()
            },
        );

        Self {
            ledger,
            store,
            notifier,
            reconciler,
            config: Arc::new(config),
        }
    }

    /// Processes one payment from `sender`.
    ///
    /// Precondition and balance failures return an error with no durable
    /// trace. Once the `Pending` record is written, the ledger call and the
    /// terminal write run on a detached task, so dropping the returned future
    /// does not abandon the record. Ledger rejections and unknown outcomes are
    /// reported through [`PaymentOutcome::disposition`].
    #[tracing::instrument(skip_all, fields(sender = %sender, recipient = %request.recipient))]
    pub async fn process_payment(
        &self,
        request: PaymentRequest,
        sender: &WalletAddress,
    ) -> Result<PaymentOutcome> {
        let payment = self.validate(&request, sender)?;

        if let Some(key) = &payment.idempotency_key
            && let Some(existing) = self.store.get(key).await?
        {
            return self.replay(existing, sender, &payment).await;
        }

        let balance = self.check_balance(sender).await?;
        if !balance.covers(payment.amount) {
            tracing::info!(available = %balance, requested = %payment.amount, "insufficient funds");
            return Err(PaymentError::InsufficientFunds {
                available: balance,
                requested: payment.amount,
            });
        }

        let id = payment
            .idempotency_key
            .clone()
            .unwrap_or_else(TransactionId::generate);
        let record = TransactionRecord::pending(
            id,
            sender.clone(),
            payment.recipient.clone(),
            payment.amount,
            payment.currency.clone(),
        )?;

        let this = self.clone();
        let sender = sender.clone();
        let task =
            tokio::spawn(async move { this.write_ahead_and_submit(record, sender, payment).await });

        task.await
            .map_err(|e| PaymentError::Internal(format!("payment task aborted: {}", e)))?
    }

    fn validate(&self, request: &PaymentRequest, sender: &WalletAddress) -> Result<ValidatedPayment> {
        if !self.config.supported_methods.contains(&request.payment_method) {
            return Err(PaymentError::Validation(format!(
                "Payment method `{}` is not supported",
                request.payment_method
            )));
        }

        let amount = Amount::new(request.amount)?;
        let recipient = WalletAddress::parse(&request.recipient)?;
        if &recipient == sender {
            return Err(PaymentError::Validation(
                "Sender and recipient must differ".to_string(),
            ));
        }
        let currency = Currency::parse(&request.currency)?;

        Ok(ValidatedPayment {
            idempotency_key: request.idempotency_key.clone(),
            recipient,
            amount,
            currency,
        })
    }

    async fn check_balance(&self, sender: &WalletAddress) -> Result<Balance> {
        match timeout(self.config.ledger_timeout, self.ledger.check_balance(sender)).await {
            Ok(Ok(balance)) => Ok(balance),
            Ok(Err(e)) => Err(PaymentError::LedgerUnavailable(e.to_string())),
            Err(_) => {
                let elapsed = LedgerError::Timeout(self.config.ledger_timeout.as_millis() as u64);
                Err(PaymentError::LedgerUnavailable(elapsed.to_string()))
            }
        }
    }

    async fn write_ahead_and_submit(
        &self,
        record: TransactionRecord,
        sender: WalletAddress,
        payment: ValidatedPayment,
    ) -> Result<PaymentOutcome> {
        match self.store.create_pending(record.clone()).await {
            Ok(()) => {}
            // Lost a race against a concurrent request with the same key.
            Err(StoreError::DuplicateId(_)) if payment.idempotency_key.is_some() => {
                let existing = self
                    .store
                    .get(&record.id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(record.id.to_string()))?;
                return self.replay(existing, &sender, &payment).await;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(id = %record.id, "pending record written");

        let instruction = TransferInstruction::from(&record);
        let submission =
            match timeout(self.config.ledger_timeout, self.ledger.send_transaction(&instruction)).await {
                Ok(submission) => submission,
                Err(_) => LedgerSubmission::Unknown(format!(
                    "no ledger answer within {} ms",
                    self.config.ledger_timeout.as_millis()
                )),
            };

        match submission {
            LedgerSubmission::Submitted(external_tx_id) => {
                let (committed, written_here) = self
                    .terminalize(&record.id, Terminal::Committed(external_tx_id))
                    .await?;
                tracing::info!(
                    id = %committed.id,
                    external_tx_id = ?committed.external_tx_id,
                    amount = %committed.amount,
                    "payment committed"
                );
                // Whoever performs the transition notifies, so the recipient hears once.
                let notification = if written_here {
                    notify_recipient(self.notifier.as_ref(), &committed, self.config.notify_timeout)
                        .await
                } else {
                    NotificationStatus::Skipped
                };
                Ok(PaymentOutcome {
                    record: committed,
                    disposition: Disposition::Committed,
                    notification,
                })
            }
            LedgerSubmission::Rejected(reason) => {
                tracing::warn!(id = %record.id, %reason, "ledger rejected payment");
                let (failed, _) = self
                    .terminalize(&record.id, Terminal::Failed(reason.clone()))
                    .await?;
                Ok(PaymentOutcome {
                    record: failed,
                    disposition: Disposition::Rejected { reason },
                    notification: NotificationStatus::Skipped,
                })
            }
            LedgerSubmission::Unknown(reason) => {
                tracing::warn!(
                    id = %record.id,
                    %reason,
                    "ledger outcome unknown, leaving record pending for reconciliation"
                );
                Ok(PaymentOutcome {
                    record,
                    disposition: Disposition::Unknown { reason },
                    notification: NotificationStatus::Skipped,
                })
            }
        }
    }

    /// Writes a terminal state, retrying transient store failures. The flag is
    /// `false` when a concurrent writer had already stored the same outcome.
    ///
    /// When every attempt fails the record is left `Pending`; the ledger knows
    /// the outcome, so reconciliation can still resolve it.
    async fn terminalize(
        &self,
        id: &TransactionId,
        target: Terminal,
    ) -> Result<(TransactionRecord, bool)> {
        let policy = self.config.persistence_retry;
        let mut last_error = StoreError::Backend("no write attempted".to_string());

        for attempt in 0..policy.max_attempts.max(1) {
            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let written = match &target {
                Terminal::Committed(external_tx_id) => {
                    self.store.mark_committed(id, external_tx_id.clone()).await
                }
                Terminal::Failed(reason) => self.store.mark_failed(id, reason).await,
            };

            match written {
                Ok(record) => return Ok((record, true)),
                Err(StoreError::AlreadyTerminal(_)) => {
                    let existing = self.accept_existing(id, &target).await?;
                    return Ok((existing, false));
                }
                Err(e @ StoreError::NotFound(_)) => {
                    tracing::error!(alert = true, %id, error = %e, "pending record vanished");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(%id, attempt, error = %e, "terminal write failed");
                    last_error = e;
                }
            }
        }

        tracing::error!(
            %id,
            error = %last_error,
            "terminal write exhausted retries, record left pending for reconciliation"
        );
        Err(last_error.into())
    }

    /// Someone else terminalized the record first. Agreeing outcomes are fine;
    /// disagreeing ones mean the audit trail and the ledger diverged.
    async fn accept_existing(&self, id: &TransactionId, target: &Terminal) -> Result<TransactionRecord> {
        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if current.status == target.status() {
            tracing::debug!(%id, status = %current.status, "record already resolved");
            Ok(current)
        } else {
            tracing::error!(
                alert = true,
                %id,
                stored = %current.status,
                wanted = %target.status(),
                "conflicting terminal state"
            );
            Err(PaymentError::PersistenceConflict(StoreError::AlreadyTerminal(
                id.to_string(),
            )))
        }
    }

    /// Answers a re-invocation carrying a key that is already on record.
    async fn replay(
        &self,
        existing: TransactionRecord,
        sender: &WalletAddress,
        payment: &ValidatedPayment,
    ) -> Result<PaymentOutcome> {
        let same_request = &existing.sender == sender
            && existing.recipient == payment.recipient
            && existing.amount == payment.amount
            && existing.currency == payment.currency;
        if !same_request {
            return Err(PaymentError::Validation(format!(
                "Idempotency key `{}` was already used for a different payment",
                existing.id
            )));
        }

        tracing::debug!(id = %existing.id, status = %existing.status, "idempotent replay");
        if existing.status.is_terminal() {
            return Ok(PaymentOutcome::from_record(existing));
        }

        match self.reconciler.resolve(&existing).await? {
            Resolution::Committed(record) => {
                let notification =
                    notify_recipient(self.notifier.as_ref(), &record, self.config.notify_timeout)
                        .await;
                Ok(PaymentOutcome {
                    record,
                    disposition: Disposition::Committed,
                    notification,
                })
            }
            Resolution::Failed(record) | Resolution::AlreadyResolved(record) => {
                Ok(PaymentOutcome::from_record(record))
            }
            Resolution::StillPending => Ok(PaymentOutcome::from_record(existing)),
        }
    }
}

/// Tells the recipient of a committed transfer about it. Best effort: a
/// failure or timeout is logged and reported, never raised.
pub(crate) async fn notify_recipient(
    notifier: &dyn Notifier,
    record: &TransactionRecord,
    limit: Duration,
) -> NotificationStatus {
    let reference = record
        .external_tx_id
        .as_ref()
        .map(|id| id.0.as_str())
        .unwrap_or(record.id.as_str());
    let text = format!(
        "You received {} {} from {} (transaction {})",
        record.amount, record.currency, record.sender, reference
    );

    match timeout(limit, notifier.send(record.recipient.as_str(), &text)).await {
        Ok(Ok(message_id)) => NotificationStatus::Sent { message_id },
        Ok(Err(e)) => {
            tracing::warn!(id = %record.id, error = %e, "notification failed");
            NotificationStatus::Failed {
                reason: e.to_string(),
            }
        }
        Err(_) => {
            tracing::warn!(id = %record.id, "notification timed out");
            NotificationStatus::Failed {
                reason: "notifier timed out".to_string(),
            }
        }
    }
}
