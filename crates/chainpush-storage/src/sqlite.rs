//! SQLite storage backend for ChainPush.
//!
//! Persists blocks, transactions, and subscriptions to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance. Entity bodies
//! are stored as JSON; the columns that are queried or mutated in place
//! (height, orphaned, chain tip, inclusion) live beside them.
//!
//! # Usage
//! ```rust,no_run
//! use chainpush_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./chainpush.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainpush_codec::{Block, Transaction};
use chainpush_core::error::PushError;
use chainpush_core::store::ChainStore;
use chainpush_core::types::{Subscription, SubscriptionKind};

fn storage_err(e: impl std::fmt::Display) -> PushError {
    PushError::Storage(e.to_string())
}

/// SQLite-backed chain store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainpush.db"`) or a full
    /// SQLite URL (`"sqlite:./chainpush.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, PushError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection so every query sees the same database.
    /// All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, PushError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), PushError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash         TEXT    PRIMARY KEY,
                height       INTEGER NOT NULL,
                prev_hash    TEXT    NOT NULL,
                orphaned     INTEGER NOT NULL,
                is_chain_tip INTEGER NOT NULL,
                body         TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transactions (
                txid               TEXT    PRIMARY KEY,
                included_in        TEXT,
                included_at_height INTEGER NOT NULL,
                body               TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                kind   TEXT    NOT NULL,
                target TEXT    NOT NULL,
                UNIQUE (kind, target)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks (height);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_height
             ON transactions (included_at_height);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    // ─── Row decoding ───────────────────────────────────────────────────────────

    fn block_from_row(row: &SqliteRow) -> Result<Block, PushError> {
        let body: String = row.get("body");
        let mut block: Block = serde_json::from_str(&body).map_err(storage_err)?;
        block.orphaned = row.get::<i64, _>("orphaned") != 0;
        block.is_chain_tip = row.get::<i64, _>("is_chain_tip") != 0;
        Ok(block)
    }

    fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, PushError> {
        let body: String = row.get("body");
        serde_json::from_str(&body).map_err(storage_err)
    }

    async fn fetch_block(&self, sql: &str) -> Result<Option<Block>, PushError> {
        let row = sqlx::query(sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(Self::block_from_row).transpose()
    }
}

#[async_trait]
impl ChainStore for SqliteStore {
    // ─── Blocks ─────────────────────────────────────────────────────────────────

    async fn get_block(&self, hash: &str) -> Result<Option<Block>, PushError> {
        let row = sqlx::query("SELECT orphaned, is_chain_tip, body FROM blocks WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(Self::block_from_row).transpose()
    }

    async fn put_block(&self, block: &Block) -> Result<(), PushError> {
        let body = serde_json::to_string(block).map_err(storage_err)?;

        sqlx::query(
            "INSERT OR REPLACE INTO blocks (hash, height, prev_hash, orphaned, is_chain_tip, body)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(block.hash())
        .bind(block.height as i64)
        .bind(block.prev_hash())
        .bind(block.orphaned as i64)
        .bind(block.is_chain_tip as i64)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(hash = %block.hash(), height = block.height, "block stored");
        Ok(())
    }

    async fn set_block_state(
        &self,
        hash: &str,
        orphaned: bool,
        is_chain_tip: bool,
    ) -> Result<(), PushError> {
        let result = sqlx::query("UPDATE blocks SET orphaned = ?, is_chain_tip = ? WHERE hash = ?")
            .bind(orphaned as i64)
            .bind(is_chain_tip as i64)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(PushError::Storage(format!("unknown block {hash}")));
        }
        Ok(())
    }

    async fn chain_tip(&self) -> Result<Option<Block>, PushError> {
        self.fetch_block(
            "SELECT orphaned, is_chain_tip, body FROM blocks WHERE is_chain_tip = 1 LIMIT 1",
        )
        .await
    }

    async fn last_block(&self) -> Result<Option<Block>, PushError> {
        self.fetch_block(
            "SELECT orphaned, is_chain_tip, body FROM blocks ORDER BY height DESC LIMIT 1",
        )
        .await
    }

    async fn blocks_from_height(&self, from: u64) -> Result<Vec<Block>, PushError> {
        let rows = sqlx::query(
            "SELECT orphaned, is_chain_tip, body FROM blocks
             WHERE height >= ? ORDER BY height, hash",
        )
        .bind(from as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::block_from_row).collect()
    }

    // ─── Transactions ───────────────────────────────────────────────────────────

    async fn get_transaction(&self, txid: &str) -> Result<Option<Transaction>, PushError> {
        let row = sqlx::query("SELECT body FROM transactions WHERE txid = ?")
            .bind(txid)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(Self::transaction_from_row).transpose()
    }

    async fn put_transaction(&self, tx: &Transaction) -> Result<(), PushError> {
        let body = serde_json::to_string(tx).map_err(storage_err)?;

        sqlx::query(
            "INSERT OR REPLACE INTO transactions (txid, included_in, included_at_height, body)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&tx.txid)
        .bind(tx.included_in.as_deref())
        .bind(tx.included_at_height as i64)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(txid = %tx.txid, height = tx.included_at_height, "transaction stored");
        Ok(())
    }

    async fn transactions_included_from(&self, from: u64) -> Result<Vec<Transaction>, PushError> {
        let rows = sqlx::query(
            "SELECT body FROM transactions
             WHERE included_in IS NOT NULL AND included_at_height >= ?",
        )
        .bind(from as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::transaction_from_row).collect()
    }

    // ─── Subscriptions ──────────────────────────────────────────────────────────

    async fn subscriptions(&self) -> Result<Vec<Subscription>, PushError> {
        let rows = sqlx::query("SELECT kind, target FROM subscriptions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("kind");
                let kind = match kind.as_str() {
                    "address" => SubscriptionKind::Address,
                    "op_return_prefix" => SubscriptionKind::OpReturnPrefix,
                    other => return Err(storage_err(format!("unknown subscription kind {other}"))),
                };
                Ok(Subscription {
                    kind,
                    target: row.get("target"),
                })
            })
            .collect()
    }

    async fn put_subscription(&self, subscription: &Subscription) -> Result<bool, PushError> {
        let result = sqlx::query("INSERT OR IGNORE INTO subscriptions (kind, target) VALUES (?, ?)")
            .bind(subscription.kind.to_string())
            .bind(&subscription.target)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn unknown_subscription_kind_is_an_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        sqlx::query("INSERT INTO subscriptions (kind, target) VALUES ('xpub', 'abc')")
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(matches!(
            store.subscriptions().await,
            Err(PushError::Storage(_))
        ));
    }
}
