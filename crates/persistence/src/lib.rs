#![deny(warnings)]

//! Persistence layer: the balance authority contract and its stores.
//!
//! The authority owns every account's balance. Callers never write a balance
//! they computed themselves; they send signed deltas through
//! [`AccountStore::add_signed_amount`], which is atomic per account, and adopt
//! the total it returns.

use chrono::{DateTime, Utc};
use dino_core::{AccountId, AccountRecord, ProducerUnit, SpeciesId};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{init_db, SqliteStore};

/// Errors raised by account stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("account already exists: {0}")]
    AlreadyExists(String),
    /// Transient failure: network, timeout, injected fault.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("amount out of storable range: {0}")]
    OutOfRange(Decimal),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Backing store for account records and the authoritative balance.
pub trait AccountStore: Send + Sync + 'static {
    /// Insert a new account with no units.
    fn create_account(
        &self,
        id: &AccountId,
        starting_balance: Decimal,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<AccountRecord, StoreError>> + Send;

    fn get_account(
        &self,
        id: &AccountId,
    ) -> impl Future<Output = Result<AccountRecord, StoreError>> + Send;

    /// Plain authoritative read of the balance.
    fn get_balance(&self, id: &AccountId)
        -> impl Future<Output = Result<Decimal, StoreError>> + Send;

    /// Atomically add `delta` (may be negative) and return the new total.
    fn add_signed_amount(
        &self,
        id: &AccountId,
        delta: Decimal,
    ) -> impl Future<Output = Result<Decimal, StoreError>> + Send;

    fn set_last_active_at(
        &self,
        id: &AccountId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set_deployed_units(
        &self,
        id: &AccountId,
        units: &[ProducerUnit],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set_owned_units(
        &self,
        id: &AccountId,
        units: &[ProducerUnit],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically take one unit of a limited species.
    ///
    /// Stock is seeded with `initial_stock` on first use. Returns the number
    /// of units remaining *before* this claim, or `None` when sold out.
    fn claim_limited_stock(
        &self,
        species: &SpeciesId,
        initial_stock: u32,
    ) -> impl Future<Output = Result<Option<u32>, StoreError>> + Send;
}

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/main.db"
}

/// Create the parent directory of a file-backed SQLite URL.
pub fn ensure_sqlite_dir(url: &str) -> std::io::Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"));
    if let Some(parent) = path.and_then(|p| std::path::Path::new(p).parent()) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

const MICROS_PER_COIN: i64 = 1_000_000;

/// Convert a balance or delta to integer micro-coins, rounding half away from zero.
pub fn to_micros(amount: Decimal) -> Result<i64, StoreError> {
    amount
        .checked_mul(Decimal::from(MICROS_PER_COIN))
        .and_then(|v| v.round().to_i64())
        .ok_or(StoreError::OutOfRange(amount))
}

/// Convert stored micro-coins back into a decimal amount.
pub fn from_micros(micros: i64) -> Decimal {
    Decimal::new(micros, 6).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn url_is_sqlite() {
        assert!(default_sqlite_url().starts_with("sqlite://"));
    }

    #[test]
    fn micros_keep_six_places() {
        assert_eq!(to_micros(Decimal::new(1, 1)).unwrap(), 100_000);
        assert_eq!(to_micros(Decimal::new(-30, 0)).unwrap(), -30_000_000);
        assert_eq!(from_micros(220_000_000), Decimal::from(220));
        assert!(to_micros(Decimal::MAX).is_err());
    }

    proptest! {
        #[test]
        fn micros_identity_on_six_places(m in -1_000_000_000_000i64..1_000_000_000_000) {
            prop_assert_eq!(to_micros(from_micros(m)).unwrap(), m);
        }
    }
}
