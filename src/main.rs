use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payflow::application::orchestrator::PaymentOrchestrator;
use payflow::application::provisioner::WalletProvisioner;
use payflow::application::reconciler::Reconciler;
use payflow::config::{Cli, LedgerBackend};
use payflow::domain::payment::PaymentResponse;
use payflow::domain::ports::{LedgerRef, NotifierRef, TransactionStoreRef, WalletStoreRef};
use payflow::domain::wallet::OwnerRef;
use payflow::infrastructure::ledger::SimulatedLedger;
use payflow::infrastructure::notifier::{QueueNotifier, spawn_log_delivery};
use payflow::interfaces::csv::payment_reader::PaymentReader;
use payflow::interfaces::csv::response_writer::ResponseWriter;
use payflow::logging::init_logging;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const OUTBOX_CAPACITY: usize = 1024;

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<(WalletStoreRef, TransactionStoreRef)> {
    use payflow::infrastructure::in_memory::{InMemoryTransactionStore, InMemoryWalletStore};
    use payflow::infrastructure::rocksdb::RocksDBStore;

    let Some(path) = db_path else {
        let wallets: WalletStoreRef = Arc::new(InMemoryWalletStore::new());
        let transactions: TransactionStoreRef = Arc::new(InMemoryTransactionStore::new());
        return Ok((wallets, transactions));
    };

    let store = RocksDBStore::open(path).into_diagnostic()?;
    let wallets: WalletStoreRef = Arc::new(store.clone());
    let transactions: TransactionStoreRef = Arc::new(store);
    Ok((wallets, transactions))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<(WalletStoreRef, TransactionStoreRef)> {
    use payflow::infrastructure::in_memory::{InMemoryTransactionStore, InMemoryWalletStore};

    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    let wallets: WalletStoreRef = Arc::new(InMemoryWalletStore::new());
    let transactions: TransactionStoreRef = Arc::new(InMemoryTransactionStore::new());
    Ok((wallets, transactions))
}

async fn connect_ledger(cli: &Cli) -> LedgerRef {
    match cli.ledger {
        LedgerBackend::Simulated => {
            let ledger = SimulatedLedger::new();
            for funding in &cli.funding {
                ledger.fund(&funding.address, funding.balance).await;
            }
            Arc::new(ledger)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let (wallets, transactions) = open_stores(cli.db_path.as_deref())?;
    let ledger = connect_ledger(&cli).await;
    let (notifier, outbox) = QueueNotifier::new(OUTBOX_CAPACITY);
    let notifier: NotifierRef = Arc::new(notifier);
    let delivery = spawn_log_delivery(outbox);

    let provisioner = WalletProvisioner::new(ledger.clone(), wallets, cli.provisioner_config());
    for owner in &cli.provision {
        match provisioner.create_wallet(OwnerRef(owner.clone())).await {
            Ok(wallet) => eprintln!("Provisioned wallet {} for {}", wallet.address, owner),
            Err(e) => eprintln!("Error provisioning wallet for {}: {}", owner, e),
        }
    }

    let config = cli.orchestrator_config();
    let notify_timeout = config.notify_timeout;
    let orchestrator =
        PaymentOrchestrator::new(ledger.clone(), transactions.clone(), notifier.clone(), config);

    // Payments run concurrently; responses keep input order.
    let file = File::open(&cli.input).into_diagnostic()?;
    let semaphore = Arc::new(Semaphore::new(cli.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut responses: Vec<Option<PaymentResponse>> = Vec::new();

    for row in PaymentReader::new(file).payments() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                eprintln!("Error reading payment: {}", e);
                continue;
            }
        };

        let index = responses.len();
        responses.push(None);
        match row.into_request() {
            Ok((sender, request)) => {
                let permit = semaphore.clone().acquire_owned().await.into_diagnostic()?;
                let orchestrator = orchestrator.clone();
                tasks.spawn(async move {
                    let result = orchestrator.process_payment(request, &sender).await;
                    drop(permit);
                    (index, PaymentResponse::from(&result))
                });
            }
            Err(e) => responses[index] = Some(PaymentResponse::from(&e)),
        }
    }

    while let Some(joined) = tasks.join_next().await {
        let (index, response) = joined.into_diagnostic()?;
        responses[index] = Some(response);
    }

    let report = Reconciler::new(ledger, transactions, cli.reconciler_config())
        .with_notifier(notifier, notify_timeout)
        .reconcile_once()
        .await
        .into_diagnostic()?;
    tracing::info!(
        committed = report.committed,
        failed = report.failed,
        still_pending = report.still_pending,
        "reconciliation pass after batch"
    );

    drop(orchestrator);
    let delivered = delivery.await.into_diagnostic()?;
    tracing::debug!(delivered, "notification outbox drained");

    let stdout = io::stdout();
    let mut writer = ResponseWriter::new(stdout.lock());
    writer
        .write_responses(responses.into_iter().flatten())
        .into_diagnostic()?;

    Ok(())
}
