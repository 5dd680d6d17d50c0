//! SQLite-backed account store. Balance increments and stock claims are each
//! a single `UPDATE ... RETURNING` statement, so concurrent writers are
//! serialized by the database rather than by the client.

use crate::{from_micros, to_micros, AccountStore, StoreError};
use chrono::{DateTime, Utc};
use dino_core::{AccountId, AccountRecord, ProducerUnit, SpeciesId};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

/// Open (creating if missing) the database at `url` and apply migrations.
pub async fn init_db(url: &str) -> Result<SqlitePool, StoreError> {
    let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // Every connection to `:memory:` is its own database.
    let max_conns = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_conns)
        .connect_with(opts)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!(url, "database ready");
    Ok(pool)
}

/// Account store over a SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and migrate.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(init_db(url).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn update_units(
        &self,
        id: &AccountId,
        column: &'static str,
        units: &[ProducerUnit],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(units)?;
        let sql = format!("UPDATE accounts SET {column} = ? WHERE id = ?");
        let res = sqlx::query(&sql)
            .bind(json)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.0.clone()));
        }
        Ok(())
    }
}

fn decode_account(row: &SqliteRow) -> Result<AccountRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let balance: i64 = row.try_get("balance_micros")?;
    let last_ms: i64 = row.try_get("last_active_ms")?;
    let deployed: String = row.try_get("deployed_units")?;
    let owned: String = row.try_get("owned_units")?;
    let last_active_at = DateTime::<Utc>::from_timestamp_millis(last_ms)
        .ok_or_else(|| StoreError::Corrupt(format!("last_active_ms {last_ms} for {id}")))?;
    Ok(AccountRecord {
        id: AccountId(id),
        balance: from_micros(balance),
        last_active_at,
        deployed_units: serde_json::from_str(&deployed)?,
        owned_units: serde_json::from_str(&owned)?,
    })
}

impl AccountStore for SqliteStore {
    async fn create_account(
        &self,
        id: &AccountId,
        starting_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<AccountRecord, StoreError> {
        let res = sqlx::query(
            "INSERT OR IGNORE INTO accounts (id, balance_micros, last_active_ms) VALUES (?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(to_micros(starting_balance)?)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(id.0.clone()));
        }
        info!(account = %id, balance = %starting_balance, "account created");
        self.get_account(id).await
    }

    async fn get_account(&self, id: &AccountId) -> Result<AccountRecord, StoreError> {
        let row = sqlx::query(
            "SELECT id, balance_micros, last_active_ms, deployed_units, owned_units \
             FROM accounts WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.0.clone()))?;
        decode_account(&row)
    }

    async fn get_balance(&self, id: &AccountId) -> Result<Decimal, StoreError> {
        let micros: Option<i64> =
            sqlx::query_scalar("SELECT balance_micros FROM accounts WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        micros
            .map(from_micros)
            .ok_or_else(|| StoreError::NotFound(id.0.clone()))
    }

    async fn add_signed_amount(
        &self,
        id: &AccountId,
        delta: Decimal,
    ) -> Result<Decimal, StoreError> {
        let micros: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET balance_micros = balance_micros + ? WHERE id = ? \
             RETURNING balance_micros",
        )
        .bind(to_micros(delta)?)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let total = micros
            .map(from_micros)
            .ok_or_else(|| StoreError::NotFound(id.0.clone()))?;
        debug!(account = %id, %delta, balance = %total, "balance incremented");
        Ok(total)
    }

    async fn set_last_active_at(&self, id: &AccountId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE accounts SET last_active_ms = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.0.clone()));
        }
        Ok(())
    }

    async fn set_deployed_units(
        &self,
        id: &AccountId,
        units: &[ProducerUnit],
    ) -> Result<(), StoreError> {
        self.update_units(id, "deployed_units", units).await
    }

    async fn set_owned_units(
        &self,
        id: &AccountId,
        units: &[ProducerUnit],
    ) -> Result<(), StoreError> {
        self.update_units(id, "owned_units", units).await
    }

    async fn claim_limited_stock(
        &self,
        species: &SpeciesId,
        initial_stock: u32,
    ) -> Result<Option<u32>, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO market_stock (species_id, remaining) VALUES (?, ?)")
            .bind(species.as_str())
            .bind(i64::from(initial_stock))
            .execute(&self.pool)
            .await?;
        let before: Option<i64> = sqlx::query_scalar(
            "UPDATE market_stock SET remaining = remaining - 1 \
             WHERE species_id = ? AND remaining > 0 RETURNING remaining + 1",
        )
        .bind(species.as_str())
        .fetch_optional(&self.pool)
        .await?;
        before
            .map(|n| {
                u32::try_from(n).map_err(|_| StoreError::Corrupt(format!("stock {n} for {species}")))
            })
            .transpose()
    }
}
