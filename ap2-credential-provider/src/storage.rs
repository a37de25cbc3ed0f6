//! Durable storage for the Credential Provider: passkeys, the payment-method
//! catalogue and receipts.

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
pub struct PasskeyCredential {
    pub credential_id: String,
    pub user_id: String,
    pub public_key_cose: Vec<u8>,
    pub sign_count: u32,
    pub transports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentMethod {
    pub id: String,
    pub user_id: String,
    pub method_type: String,
    pub brand: String,
    pub last4: String,
    pub holder_name: String,
    pub requires_step_up: bool,
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

        info!(db_path, "credential provider storage initialized");
        Ok(Self { pool })
    }

    /// Insert a passkey, idempotent on `credential_id` (§4.7).
    pub async fn register_passkey(&self, credential: PasskeyCredential) -> Result<()> {
        let pool = self.pool.clone();
        let now = Utc::now().to_rfc3339();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO passkey_credentials (credential_id, user_id, public_key_cose, sign_count, transports, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(credential_id) DO NOTHING",
                params![
                    credential.credential_id,
                    credential.user_id,
                    credential.public_key_cose,
                    credential.sign_count,
                    serde_json::to_string(&credential.transports).unwrap_or_default(),
                    now,
                ],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    pub async fn find_passkey(&self, credential_id: &str) -> Result<Option<PasskeyCredential>> {
        let pool = self.pool.clone();
        let credential_id = credential_id.to_string();
        let found = task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.query_row(
                "SELECT credential_id, user_id, public_key_cose, sign_count, transports
                 FROM passkey_credentials WHERE credential_id = ?1",
                params![credential_id],
                |row| {
                    let transports: String = row.get(4)?;
                    Ok(PasskeyCredential {
                        credential_id: row.get(0)?,
                        user_id: row.get(1)?,
                        public_key_cose: row.get(2)?,
                        sign_count: row.get(3)?,
                        transports: serde_json::from_str(&transports).unwrap_or_default(),
                    })
                },
            )
            .optional()
            .map_err(Error::from)
        })
        .await??;
        Ok(found)
    }

    /// Persist the new signature counter after a successful verification
    /// (§4.7 step "updates `sign_count` atomically").
    pub async fn advance_sign_count(&self, credential_id: &str, new_count: u32) -> Result<()> {
        let pool = self.pool.clone();
        let credential_id = credential_id.to_string();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "UPDATE passkey_credentials SET sign_count = ?1 WHERE credential_id = ?2",
                params![new_count, credential_id],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    pub async fn seed_payment_method(&self, method: PaymentMethod) -> Result<()> {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO payment_methods (id, user_id, type, brand, last4, holder_name, requires_step_up)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET requires_step_up = excluded.requires_step_up",
                params![
                    method.id,
                    method.user_id,
                    method.method_type,
                    method.brand,
                    method.last4,
                    method.holder_name,
                    method.requires_step_up as i64,
                ],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    pub async fn list_payment_methods(&self, user_id: &str) -> Result<Vec<PaymentMethod>> {
        let pool = self.pool.clone();
        let user_id = user_id.to_string();
        let methods = task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, type, brand, last4, holder_name, requires_step_up
                 FROM payment_methods WHERE user_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok(PaymentMethod {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        method_type: row.get(2)?,
                        brand: row.get(3)?,
                        last4: row.get(4)?,
                        holder_name: row.get(5)?,
                        requires_step_up: row.get::<_, i64>(6)? != 0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<Vec<PaymentMethod>, Error>(rows)
        })
        .await??;
        Ok(methods)
    }

    pub async fn find_payment_method(&self, payment_method_id: &str) -> Result<Option<PaymentMethod>> {
        let pool = self.pool.clone();
        let payment_method_id = payment_method_id.to_string();
        let found = task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.query_row(
                "SELECT id, user_id, type, brand, last4, holder_name, requires_step_up
                 FROM payment_methods WHERE id = ?1",
                params![payment_method_id],
                |row| {
                    Ok(PaymentMethod {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        method_type: row.get(2)?,
                        brand: row.get(3)?,
                        last4: row.get(4)?,
                        holder_name: row.get(5)?,
                        requires_step_up: row.get::<_, i64>(6)? != 0,
                    })
                },
            )
            .optional()
            .map_err(Error::from)
        })
        .await??;
        Ok(found)
    }

    /// Idempotent on `transaction_id` (§4.7).
    pub async fn record_receipt(&self, transaction_id: &str, payer_id: &str, receipt_url: &str, amount: &str, timestamp: &str) -> Result<()> {
        let pool = self.pool.clone();
        let (transaction_id, payer_id, receipt_url, amount, timestamp) =
            (transaction_id.to_string(), payer_id.to_string(), receipt_url.to_string(), amount.to_string(), timestamp.to_string());
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO receipts (transaction_id, payer_id, receipt_url, amount, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(transaction_id) DO NOTHING",
                params![transaction_id, payer_id, receipt_url, amount, timestamp],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    pub async fn list_receipts(&self, payer_id: &str) -> Result<Vec<(String, String, String, String)>> {
        let pool = self.pool.clone();
        let payer_id = payer_id.to_string();
        let rows = task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT transaction_id, receipt_url, amount, timestamp FROM receipts WHERE payer_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![payer_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<Vec<(String, String, String, String)>, Error>(rows)
        })
        .await??;
        Ok(rows)
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

    #[tokio::test]
    async fn passkey_registration_is_idempotent() {
        let (storage, _dir) = test_storage().await;
        let cred = PasskeyCredential {
            credential_id: "cred_1".into(),
            user_id: "user_1".into(),
            public_key_cose: vec![1, 2, 3],
            sign_count: 0,
            transports: vec!["internal".into()],
        };
        storage.register_passkey(cred.clone()).await.unwrap();
        storage.register_passkey(cred).await.unwrap();

        let found = storage.find_passkey("cred_1").await.unwrap().unwrap();
        assert_eq!(found.sign_count, 0);
    }

    #[tokio::test]
    async fn sign_count_advances() {
        let (storage, _dir) = test_storage().await;
        storage
            .register_passkey(PasskeyCredential {
                credential_id: "cred_1".into(),
                user_id: "user_1".into(),
                public_key_cose: vec![1],
                sign_count: 0,
                transports: vec![],
            })
            .await
            .unwrap();
        storage.advance_sign_count("cred_1", 7).await.unwrap();
        assert_eq!(storage.find_passkey("cred_1").await.unwrap().unwrap().sign_count, 7);
    }

    #[tokio::test]
    async fn receipts_are_idempotent_on_transaction_id() {
        let (storage, _dir) = test_storage().await;
        storage.record_receipt("txn_1", "user_1", "http://x/r.pdf", "8068", "2026-01-01T00:00:00Z").await.unwrap();
        storage.record_receipt("txn_1", "user_1", "http://x/r.pdf", "8068", "2026-01-01T00:00:00Z").await.unwrap();
        let receipts = storage.list_receipts("user_1").await.unwrap();
        assert_eq!(receipts.len(), 1);
    }
}
