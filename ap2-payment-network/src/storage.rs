//! Durable storage for the Payment Network: issued `agent_token` records.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
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
pub struct AgentTokenRecord {
    pub agent_token: String,
    pub pm_token: String,
    pub payment_mandate_id: String,
    pub payer_id: String,
    pub amount: String,
    pub network_name: String,
    pub attestation_verified: bool,
    pub expires_at: DateTime<Utc>,
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

        info!(db_path, "payment network storage initialized");
        Ok(Self { pool })
    }

    pub async fn insert_agent_token(&self, record: AgentTokenRecord) -> Result<()> {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO agent_tokens
                 (agent_token, pm_token, payment_mandate_id, payer_id, amount, network_name, attestation_verified, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.agent_token,
                    record.pm_token,
                    record.payment_mandate_id,
                    record.payer_id,
                    record.amount,
                    record.network_name,
                    record.attestation_verified as i64,
                    record.expires_at.to_rfc3339(),
                ],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    /// `true` iff `agent_token` exists and has not expired.
    pub async fn verify_agent_token(&self, agent_token: &str) -> Result<bool> {
        let pool = self.pool.clone();
        let agent_token = agent_token.to_string();
        let now = Utc::now().to_rfc3339();
        let verified = task::spawn_blocking(move || {
            let conn = pool.get()?;
            let expires_at: Option<String> = conn
                .query_row(
                    "SELECT expires_at FROM agent_tokens WHERE agent_token = ?1",
                    params![agent_token],
                    |row| row.get(0),
                )
                .ok();
            Ok::<bool, Error>(expires_at.is_some_and(|expiry| expiry.as_str() > now.as_str()))
        })
        .await??;
        Ok(verified)
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
    async fn fresh_token_verifies_and_expired_does_not() {
        let (storage, _dir) = test_storage().await;
        storage
            .insert_agent_token(AgentTokenRecord {
                agent_token: "agent_tok_core_1".into(),
                pm_token: "tok_1".into(),
                payment_mandate_id: "pm_1".into(),
                payer_id: "did:ap2:user:alice".into(),
                amount: "8068".into(),
                network_name: "core-network".into(),
                attestation_verified: true,
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
            .await
            .unwrap();
        assert!(storage.verify_agent_token("agent_tok_core_1").await.unwrap());

        storage
            .insert_agent_token(AgentTokenRecord {
                agent_token: "agent_tok_core_2".into(),
                pm_token: "tok_2".into(),
                payment_mandate_id: "pm_2".into(),
                payer_id: "did:ap2:user:alice".into(),
                amount: "100".into(),
                network_name: "core-network".into(),
                attestation_verified: true,
                expires_at: Utc::now() - chrono::Duration::hours(1),
            })
            .await
            .unwrap();
        assert!(!storage.verify_agent_token("agent_tok_core_2").await.unwrap());
        assert!(!storage.verify_agent_token("agent_tok_unknown").await.unwrap());
    }
}
