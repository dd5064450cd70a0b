//! Durable storage for the single open position.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::position::{LegState, Position, Step};
use crate::error::StoreError;
use crate::exchange::Exchange;

const POSITION_KEY: &str = "position";

/// Field-per-key layout written by earlier releases.
const LEGACY_KEYS: [&str; 6] = ["buyMarket", "sellMarket", "coin", "amount", "minPrice", "maxPrice"];

/// Persistence for the one position the engine may hold.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Replace the stored position.
    async fn save(&self, position: &Position) -> Result<(), StoreError>;

    /// Stored position, if any.
    async fn load(&self) -> Result<Option<Position>, StoreError>;

    /// Remove the stored position.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// SQLite-backed store. The position is one JSON value under one key, so
/// every save is a single atomic statement.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "FULL").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Write a raw key, bypassing the position encoding.
    pub async fn put_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn get(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Rebuild a position from the legacy layout, if one is present.
    fn read_legacy(conn: &Connection) -> Result<Option<Position>, StoreError> {
        let mut fields = Vec::with_capacity(LEGACY_KEYS.len());
        for key in LEGACY_KEYS {
            match Self::get(conn, key)? {
                Some(value) if !value.trim().is_empty() => fields.push(value),
                _ => return Ok(None),
            }
        }

        let decimal = |raw: &str, name: &str| -> Result<Decimal, StoreError> {
            raw.trim()
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("legacy {name} {raw:?}")))
        };
        let exchange = |raw: &str| -> Result<Exchange, StoreError> {
            raw.trim()
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("legacy market {raw:?}")))
        };

        let amount = decimal(&fields[3], "amount")?;
        let buy_price = decimal(&fields[4], "minPrice")?;
        let sell_price = decimal(&fields[5], "maxPrice")?;
        // Zeroed prices were how the old layout marked "no position".
        if amount.is_zero() || buy_price.is_zero() || sell_price.is_zero() {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        Ok(Some(Position {
            buy_exchange: exchange(&fields[0])?,
            sell_exchange: exchange(&fields[1])?,
            coin: fields[2].trim().to_ascii_uppercase(),
            quote: "USDT".to_string(),
            amount,
            capital: (amount * buy_price).round_dp(8),
            buy_price,
            sell_price,
            step: Step::SellPlaced,
            buy_leg: LegState::Open,
            sell_leg: LegState::Open,
            collateral_posted: true,
            created_at: now,
            updated_at: now,
        }))
    }

    fn delete_legacy(conn: &Connection) -> Result<(), StoreError> {
        for key in LEGACY_KEYS {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        Ok(())
    }
}

#[async_trait]
impl PositionStore for SqliteStore {
    async fn save(&self, position: &Position) -> Result<(), StoreError> {
        let json = serde_json::to_string(position)?;
        self.put_raw(POSITION_KEY, &json).await
    }

    async fn load(&self) -> Result<Option<Position>, StoreError> {
        let conn = self.conn.lock().await;

        if let Some(json) = Self::get(&conn, POSITION_KEY)? {
            return Ok(Some(serde_json::from_str(&json)?));
        }

        let Some(position) = Self::read_legacy(&conn)? else {
            return Ok(None);
        };

        info!(
            coin = %position.coin,
            buy = %position.buy_exchange,
            sell = %position.sell_exchange,
            "Migrating legacy position record"
        );
        let json = serde_json::to_string(&position)?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![POSITION_KEY, json],
        )?;
        Self::delete_legacy(&tx)?;
        tx.commit()?;

        Ok(Some(position))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![POSITION_KEY])?;
        Self::delete_legacy(&conn)?;
        Ok(())
    }
}

/// In-memory store with optional write-failure injection.
#[derive(Default)]
pub struct MemoryStore {
    position: Mutex<Option<Position>>,
    fail_saves: AtomicU32,
    saves_before_failure: AtomicU32,
    fail_clears: AtomicU32,
    saves: AtomicU32,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a position.
    pub fn with_position(position: Position) -> Self {
        Self {
            position: Mutex::new(Some(position)),
            ..Self::default()
        }
    }

    /// Fail the next `count` saves.
    pub fn fail_next_saves(&self, count: u32) {
        self.fail_saves_after(0, count);
    }

    /// Let `skip` saves through, then fail the following `count`.
    pub fn fail_saves_after(&self, skip: u32, count: u32) {
        self.saves_before_failure.store(skip, Ordering::SeqCst);
        self.fail_saves.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` clears.
    pub fn fail_next_clears(&self, count: u32) {
        self.fail_clears.store(count, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn save(&self, position: &Position) -> Result<(), StoreError> {
        let armed = self.fail_saves.load(Ordering::SeqCst) > 0;
        if armed && !Self::take_failure(&self.saves_before_failure) && Self::take_failure(&self.fail_saves) {
            warn!("Injected store save failure");
            return Err(StoreError::Simulated("save".to_string()));
        }
        *self.position.lock().await = Some(position.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Option<Position>, StoreError> {
        Ok(self.position.lock().await.clone())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        if Self::take_failure(&self.fail_clears) {
            warn!("Injected store clear failure");
            return Err(StoreError::Simulated("clear".to_string()));
        }
        *self.position.lock().await = None;
        Ok(())
    }
}
