#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

const ALICE: &str = "0x1111111111111111111111111111111111111111";
const BOB: &str = "0x2222222222222222222222222222222222222222";

#[test]
fn test_committed_payment_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "id, sender, recipient, amount, currency, payment_method").unwrap();
    writeln!(csv, "order-1, {ALICE}, {BOB}, 40.0, ETH, wallet").unwrap();

    // 1. First run: the funded sender pays and the record is committed on disk.
    let mut cmd1 = Command::new(cargo_bin!("payflow"));
    cmd1.arg(csv.path())
        .arg("--db-path")
        .arg(&db_path)
        .arg("--fund")
        .arg(format!("{ALICE}=100"));

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("tx-1,Committed,200"));

    // 2. Second run with the same idempotency key and no funding: the stored
    // record is replayed instead of hitting the (fresh, empty) ledger again.
    let mut cmd2 = Command::new(cargo_bin!("payflow"));
    cmd2.arg(csv.path()).arg("--db-path").arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("tx-1,Committed,200"));
    assert!(!stdout2.contains("Insufficient funds"));
}

#[test]
fn test_key_reuse_across_restart_is_rejected() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut first = tempfile::NamedTempFile::new().unwrap();
    writeln!(first, "id, sender, recipient, amount, currency, payment_method").unwrap();
    writeln!(first, "order-1, {ALICE}, {BOB}, 40.0, ETH, wallet").unwrap();

    let mut second = tempfile::NamedTempFile::new().unwrap();
    writeln!(second, "id, sender, recipient, amount, currency, payment_method").unwrap();
    writeln!(second, "order-1, {ALICE}, {BOB}, 41.0, ETH, wallet").unwrap();

    let status = Command::new(cargo_bin!("payflow"))
        .arg(first.path())
        .arg("--db-path")
        .arg(&db_path)
        .arg("--fund")
        .arg(format!("{ALICE}=100"))
        .status()
        .unwrap();
    assert!(status.success());

    let output = Command::new(cargo_bin!("payflow"))
        .arg(second.path())
        .arg("--db-path")
        .arg(&db_path)
        .arg("--fund")
        .arg(format!("{ALICE}=100"))
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("already used for a different payment"));
}
