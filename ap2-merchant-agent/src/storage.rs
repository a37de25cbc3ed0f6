//! Durable storage for the Merchant Agent: the audit log the design requires
//! for every inbound and outbound envelope (§4.6). Mirrors `ap2-merchant`'s
//! `storage.rs`: an `r2d2`-pooled `rusqlite` connection, migrations run once
//! at startup, every query wrapped in `tokio::task::spawn_blocking`.

use crate::error::{Error, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use rusqlite_migration::{Migrations, M};
use serde::Serialize;
use std::sync::OnceLock;
use tokio::task;
use tracing::info;

const MIGRATIONS_SQL: &str = include_str!("../migrations/0001_init.sql");

fn migrations() -> &'static Migrations<'static> {
    static MIGRATIONS: OnceLock<Migrations<'static>> = OnceLock::new();
    MIGRATIONS.get_or_init(|| Migrations::new(vec![M::up(MIGRATIONS_SQL)]))
}

/// Which side of the wire this entry records: the envelope that arrived, or
/// the one the agent sent out in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// One audit row: `{message_id, sender, recipient, timestamp, type, summary}`
/// plus the direction it travelled.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub message_id: String,
    pub sender: String,
    pub recipient: String,
    pub timestamp: String,
    pub data_type: String,
    pub direction: Direction,
    pub summary: String,
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

        info!(db_path, "merchant agent storage initialized");
        Ok(Self { pool })
    }

    /// Record one audit entry. Never fails the surrounding request if it
    /// can't be persisted matters less than this being best-effort
    /// transparency; callers log on failure rather than abort the relay.
    pub async fn record_audit_entry(&self, entry: AuditEntry) -> Result<()> {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO audit_log (message_id, sender, recipient, timestamp, type, direction, summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.message_id,
                    entry.sender,
                    entry.recipient,
                    entry.timestamp,
                    entry.data_type,
                    entry.direction.as_str(),
                    entry.summary,
                ],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    /// Audit rows recorded for a given `message_id`, oldest first. Used by
    /// tests to confirm both legs of a relay were logged.
    #[cfg(test)]
    pub async fn audit_entries_for(&self, message_id: &str) -> Result<Vec<(String, String)>> {
        let pool = self.pool.clone();
        let message_id = message_id.to_string();
        let rows = task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT direction, summary FROM audit_log WHERE message_id = ?1 ORDER BY id ASC",
            )?;
            let rows: Vec<(String, String)> = stmt
                .query_map(params![message_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<Vec<(String, String)>, Error>(rows)
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
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(db_path.to_str().unwrap()).await.unwrap();
        (storage, dir)
    }

    #[tokio::test]
    async fn audit_entries_round_trip() {
        let (storage, _dir) = test_storage().await;
        storage
            .record_audit_entry(AuditEntry {
                message_id: "msg-1".into(),
                sender: "did:ap2:shopping-agent:alice".into(),
                recipient: "did:ap2:merchant-agent:acme".into(),
                timestamp: "2026-01-01T00:00:00Z".into(),
                data_type: "ap2.mandates.IntentMandate".into(),
                direction: Direction::Inbound,
                summary: "received intent intent_1".into(),
            })
            .await
            .unwrap();
        storage
            .record_audit_entry(AuditEntry {
                message_id: "msg-1".into(),
                sender: "did:ap2:merchant-agent:acme".into(),
                recipient: "did:ap2:shopping-agent:alice".into(),
                timestamp: "2026-01-01T00:00:01Z".into(),
                data_type: "ap2.responses.CartCandidates".into(),
                direction: Direction::Outbound,
                summary: "returned 3 cart candidates".into(),
            })
            .await
            .unwrap();

        let rows = storage.audit_entries_for("msg-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "inbound");
        assert_eq!(rows[1].0, "outbound");
    }
}
