//! Durable storage for the Merchant: inventory counts, held reservations and
//! signed-cart records. Mirrors the reference node's `storage/db.rs`: an
//! `r2d2`-pooled `rusqlite` connection, migrations run once at startup, and
//! every query wrapped in `tokio::task::spawn_blocking` so the blocking
//! SQLite driver never runs on the async reactor thread.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use std::sync::OnceLock;
use tokio::task;
use tracing::{debug, info};

const MIGRATIONS_SQL: &str = include_str!("../migrations/0001_init.sql");

fn migrations() -> &'static Migrations<'static> {
    static MIGRATIONS: OnceLock<Migrations<'static>> = OnceLock::new();
    MIGRATIONS.get_or_init(|| Migrations::new(vec![M::up(MIGRATIONS_SQL)]))
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

        info!(db_path, "merchant storage initialized");
        Ok(Self { pool })
    }

    /// Set (or top up) the available count for a SKU. Used at startup to
    /// seed a demo catalogue and by restock operations.
    pub async fn set_inventory(&self, sku: &str, available: i64) -> Result<()> {
        let pool = self.pool.clone();
        let sku = sku.to_string();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO inventory (sku, available) VALUES (?1, ?2)
                 ON CONFLICT(sku) DO UPDATE SET available = excluded.available",
                params![sku, available],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    /// Return the subset of `skus` that have no row in `inventory` at all —
    /// distinct from being out of stock, which still has a row.
    pub async fn missing_skus(&self, skus: Vec<String>) -> Result<Vec<String>> {
        let pool = self.pool.clone();
        let missing = task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut missing = Vec::new();
            for sku in skus {
                let exists: bool = conn
                    .query_row("SELECT 1 FROM inventory WHERE sku = ?1", params![sku], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    missing.push(sku);
                }
            }
            Ok::<Vec<String>, Error>(missing)
        })
        .await??;
        Ok(missing)
    }

    /// Reserve `items` (sku, quantity pairs) for `cart_id` atomically: either
    /// every line succeeds or none do, and on failure every decrement made
    /// earlier in the same call is rolled back (§4.5 "reserved items are
    /// released").
    pub async fn reserve_cart(
        &self,
        cart_id: &str,
        items: Vec<(String, i64)>,
        expiry: DateTime<Utc>,
    ) -> Result<()> {
        let pool = self.pool.clone();
        let cart_id = cart_id.to_string();
        let expiry = expiry.to_rfc3339();

        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;

            for (sku, quantity) in &items {
                let available: i64 = tx
                    .query_row(
                        "SELECT available FROM inventory WHERE sku = ?1",
                        params![sku],
                        |row| row.get(0),
                    )
                    .map_err(|_| Error::InsufficientInventory(sku.clone()))?;

                if available < *quantity {
                    return Err(Error::InsufficientInventory(sku.clone()));
                }

                tx.execute(
                    "UPDATE inventory SET available = available - ?1 WHERE sku = ?2",
                    params![quantity, sku],
                )?;
                tx.execute(
                    "INSERT INTO inventory_reservations (cart_id, sku, quantity, expires_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![cart_id, sku, quantity, expiry],
                )?;
            }

            tx.commit()?;
            debug!(cart_id, "reserved inventory for cart");
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    /// Release every reservation held for `cart_id`, returning the quantities
    /// to `inventory.available`. Called on cart validation failure and by
    /// the expiry sweep.
    pub async fn release_cart(&self, cart_id: &str) -> Result<()> {
        let pool = self.pool.clone();
        let cart_id = cart_id.to_string();
        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let mut stmt =
                tx.prepare("SELECT sku, quantity FROM inventory_reservations WHERE cart_id = ?1")?;
            let rows: Vec<(String, i64)> = stmt
                .query_map(params![cart_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            for (sku, quantity) in rows {
                tx.execute(
                    "UPDATE inventory SET available = available + ?1 WHERE sku = ?2",
                    params![quantity, sku],
                )?;
            }
            tx.execute(
                "DELETE FROM inventory_reservations WHERE cart_id = ?1",
                params![cart_id],
            )?;
            tx.commit()?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    /// Release every reservation whose hold has expired, returning the held
    /// quantities to the available pool.
    pub async fn sweep_expired_reservations(&self) -> Result<()> {
        let pool = self.pool.clone();
        let now = Utc::now().to_rfc3339();
        task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let expired: Vec<String> = {
                let mut stmt =
                    tx.prepare("SELECT DISTINCT cart_id FROM inventory_reservations WHERE expires_at <= ?1")?;
                stmt.query_map(params![now], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            for cart_id in &expired {
                let mut stmt = tx
                    .prepare("SELECT sku, quantity FROM inventory_reservations WHERE cart_id = ?1")?;
                let rows: Vec<(String, i64)> = stmt
                    .query_map(params![cart_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                drop(stmt);
                for (sku, quantity) in rows {
                    tx.execute(
                        "UPDATE inventory SET available = available + ?1 WHERE sku = ?2",
                        params![quantity, sku],
                    )?;
                }
            }
            tx.execute("DELETE FROM inventory_reservations WHERE expires_at <= ?1", params![now])?;
            tx.commit()?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
    }

    /// Persist the signed cart mandate alongside its authorization artefact.
    pub async fn record_signed_cart(&self, cart_id: &str, cart_json: &str, merchant_authorization: &str) -> Result<()> {
        let pool = self.pool.clone();
        let cart_id = cart_id.to_string();
        let cart_json = cart_json.to_string();
        let merchant_authorization = merchant_authorization.to_string();
        let now = Utc::now().to_rfc3339();
        task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO signed_carts (cart_id, cart_json, merchant_authorization, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![cart_id, cart_json, merchant_authorization, now],
            )?;
            Ok::<(), Error>(())
        })
        .await??;
        Ok(())
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
    async fn reserve_and_release_round_trips_available_count() {
        let (storage, _dir) = test_storage().await;
        storage.set_inventory("sku-1", 10).await.unwrap();

        storage
            .reserve_cart("cart-1", vec![("sku-1".to_string(), 4)], Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        storage.release_cart("cart-1").await.unwrap();

        // After release, the full 10 is reservable again.
        storage
            .reserve_cart("cart-2", vec![("sku-1".to_string(), 10)], Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn insufficient_inventory_rolls_back_partial_reservation() {
        let (storage, _dir) = test_storage().await;
        storage.set_inventory("sku-1", 5).await.unwrap();
        storage.set_inventory("sku-2", 1).await.unwrap();

        let result = storage
            .reserve_cart(
                "cart-1",
                vec![("sku-1".to_string(), 2), ("sku-2".to_string(), 5)],
                Utc::now() + chrono::Duration::hours(1),
            )
            .await;
        assert!(matches!(result, Err(Error::InsufficientInventory(_))));

        // sku-1's decrement from the failed attempt must have rolled back.
        storage
            .reserve_cart("cart-2", vec![("sku-1".to_string(), 5)], Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
    }
}
