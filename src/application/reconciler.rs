use crate::application::orchestrator::notify_recipient;
use crate::config::ReconcilerConfig;
use crate::domain::ports::{LedgerRef, LedgerTxStatus, NotifierRef, TransactionStoreRef};
use crate::domain::transaction::{TransactionRecord, TransactionStatus};
use crate::error::{Result, StoreError};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, timeout};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Result of resolving one `Pending` record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Committed(TransactionRecord),
    Failed(TransactionRecord),
    /// A concurrent writer stored the terminal state first.
    AlreadyResolved(TransactionRecord),
    StillPending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub committed: usize,
    pub failed: usize,
    pub still_pending: usize,
}

impl ReconcileReport {
    pub fn resolved(&self) -> usize {
        self.committed + self.failed
    }
}

/// Resolves records left `Pending` by an unknown ledger outcome.
///
/// Each pass asks the ledger about every pending record by the id the
/// orchestrator issued. Records the ledger has no answer for stay pending and
/// are retried on the next pass. The reconciler never submits transfers.
#[derive(Clone)]
pub struct Reconciler {
    ledger: LedgerRef,
    store: TransactionStoreRef,
    notifier: Option<(NotifierRef, Duration)>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(ledger: LedgerRef, store: TransactionStoreRef, config: ReconcilerConfig) -> Self {
        Self {
            ledger,
            store,
            notifier: None,
            config,
        }
    }

    /// Notify recipients of transfers committed by [`Reconciler::reconcile_once`].
    pub fn with_notifier(mut self, notifier: NotifierRef, notify_timeout: Duration) -> Self {
        self.notifier = Some((notifier, notify_timeout));
        self
    }

    /// Runs a single pass over every pending record.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in self.store.pending().await? {
            match self.resolve(&record).await {
                Ok(Resolution::Committed(committed)) => {
                    report.committed += 1;
                    if let Some((notifier, limit)) = &self.notifier {
                        notify_recipient(notifier.as_ref(), &committed, *limit).await;
                    }
                }
                Ok(Resolution::Failed(_)) => report.failed += 1,
                Ok(Resolution::AlreadyResolved(_)) => {}
                Ok(Resolution::StillPending) => report.still_pending += 1,
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "reconciliation of record failed");
                    report.still_pending += 1;
                }
            }
        }

        Ok(report)
    }

    /// Queries the ledger for `record` and writes the terminal state it reports.
    pub async fn resolve(&self, record: &TransactionRecord) -> Result<Resolution> {
        let status = match timeout(
            self.config.ledger_timeout,
            self.ledger.transaction_status(&record.id),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::debug!(id = %record.id, error = %e, "ledger status lookup failed");
                return Ok(Resolution::StillPending);
            }
            Err(_) => {
                tracing::debug!(id = %record.id, "ledger status lookup timed out");
                return Ok(Resolution::StillPending);
            }
        };

        let written = match status {
            LedgerTxStatus::Confirmed(external_tx_id) => {
                self.store.mark_committed(&record.id, external_tx_id).await
            }
            LedgerTxStatus::Rejected(reason) => self.store.mark_failed(&record.id, &reason).await,
            LedgerTxStatus::NotFound if self.grace_elapsed(record) => {
                self.store
                    .mark_failed(&record.id, "transfer never reached the ledger")
                    .await
            }
            LedgerTxStatus::NotFound | LedgerTxStatus::Unknown => {
                return Ok(Resolution::StillPending);
            }
        };

        let resolved = match written {
            Ok(record) => record,
            // Resolved concurrently, most likely by the request path itself.
            Err(StoreError::AlreadyTerminal(_)) => {
                return match self.store.get(&record.id).await? {
                    Some(current) => Ok(Resolution::AlreadyResolved(current)),
                    None => Err(StoreError::NotFound(record.id.to_string()).into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(id = %resolved.id, status = %resolved.status, "reconciled pending transaction");
        Ok(match resolved.status {
            TransactionStatus::Committed => Resolution::Committed(resolved),
            TransactionStatus::Failed => Resolution::Failed(resolved),
            TransactionStatus::Pending => Resolution::StillPending,
        })
    }

    /// Polls every `every` until `shutdown` flips to `true` or its sender is
    /// dropped. Returns resolved totals over all passes and the pending count
    /// of the last one. A zero `every` is treated as one millisecond.
    pub async fn run(self, every: Duration, mut shutdown: watch::Receiver<bool>) -> ReconcileReport {
        let mut totals = ReconcileReport::default();
        let mut ticker = tokio::time::interval(every.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.reconcile_once().await {
                    Ok(report) => {
                        if report.resolved() > 0 {
                            tracing::info!(
                                committed = report.committed,
                                failed = report.failed,
                                still_pending = report.still_pending,
                                "reconciliation pass"
                            );
                        }
                        totals.committed += report.committed;
                        totals.failed += report.failed;
                        totals.still_pending = report.still_pending;
                    }
                    Err(e) => tracing::warn!(error = %e, "reconciliation pass failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        totals
    }

    fn grace_elapsed(&self, record: &TransactionRecord) -> bool {
        let age = Utc::now().signed_duration_since(record.created_at);
        match chrono::Duration::from_std(self.config.not_found_grace) {
            Ok(grace) => age >= grace,
            Err(_) => false,
        }
    }
}
