//! In-process account store. Every mutation happens under one lock, so
//! increments from concurrent sessions never interleave.

use crate::{AccountStore, StoreError};
use chrono::{DateTime, Utc};
use dino_core::{AccountId, AccountRecord, ProducerUnit, SpeciesId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<AccountId, AccountRecord>,
    stock: HashMap<SpeciesId, u32>,
    fail_adds: u32,
    fail_owned_writes: u32,
    add_latency: Option<Duration>,
    add_calls: u64,
}

/// Mutex-guarded store with fault and latency injection for tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }

    /// Make the next `n` calls to `add_signed_amount` fail without applying.
    pub fn fail_next_adds(&self, n: u32) {
        if let Ok(mut st) = self.state.lock() {
            st.fail_adds = n;
        }
    }

    /// Make the next `n` writes of the owned-unit list fail.
    pub fn fail_next_owned_writes(&self, n: u32) {
        if let Ok(mut st) = self.state.lock() {
            st.fail_owned_writes = n;
        }
    }

    /// Delay every `add_signed_amount` call before it is applied.
    pub fn set_add_latency(&self, latency: Option<Duration>) {
        if let Ok(mut st) = self.state.lock() {
            st.add_latency = latency;
        }
    }

    /// Number of `add_signed_amount` calls received, failed ones included.
    pub fn add_calls(&self) -> u64 {
        self.state.lock().map(|st| st.add_calls).unwrap_or(0)
    }

    fn with_account<T>(
        &self,
        id: &AccountId,
        f: impl FnOnce(&mut AccountRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut st = self.lock()?;
        let rec = st
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.0.clone()))?;
        Ok(f(rec))
    }
}

impl AccountStore for MemoryStore {
    async fn create_account(
        &self,
        id: &AccountId,
        starting_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<AccountRecord, StoreError> {
        let mut st = self.lock()?;
        if st.accounts.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.0.clone()));
        }
        let rec = AccountRecord {
            id: id.clone(),
            balance: starting_balance,
            last_active_at: now,
            deployed_units: vec![],
            owned_units: vec![],
        };
        st.accounts.insert(id.clone(), rec.clone());
        Ok(rec)
    }

    async fn get_account(&self, id: &AccountId) -> Result<AccountRecord, StoreError> {
        self.with_account(id, |rec| rec.clone())
    }

    async fn get_balance(&self, id: &AccountId) -> Result<Decimal, StoreError> {
        self.with_account(id, |rec| rec.balance)
    }

    async fn add_signed_amount(
        &self,
        id: &AccountId,
        delta: Decimal,
    ) -> Result<Decimal, StoreError> {
        let latency = {
            let mut st = self.lock()?;
            st.add_calls += 1;
            st.add_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut st = self.lock()?;
        if st.fail_adds > 0 {
            st.fail_adds -= 1;
            return Err(StoreError::Unavailable("injected add failure".into()));
        }
        let rec = st
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.0.clone()))?;
        rec.balance += delta;
        debug!(account = %id, %delta, balance = %rec.balance, "balance incremented");
        Ok(rec.balance)
    }

    async fn set_last_active_at(&self, id: &AccountId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_account(id, |rec| rec.last_active_at = at)
    }

    async fn set_deployed_units(
        &self,
        id: &AccountId,
        units: &[ProducerUnit],
    ) -> Result<(), StoreError> {
        self.with_account(id, |rec| rec.deployed_units = units.to_vec())
    }

    async fn set_owned_units(
        &self,
        id: &AccountId,
        units: &[ProducerUnit],
    ) -> Result<(), StoreError> {
        {
            let mut st = self.lock()?;
            if st.fail_owned_writes > 0 {
                st.fail_owned_writes -= 1;
                return Err(StoreError::Unavailable("injected owned-units failure".into()));
            }
        }
        self.with_account(id, |rec| rec.owned_units = units.to_vec())
    }

    async fn claim_limited_stock(
        &self,
        species: &SpeciesId,
        initial_stock: u32,
    ) -> Result<Option<u32>, StoreError> {
        let mut st = self.lock()?;
        let remaining = st.stock.entry(species.clone()).or_insert(initial_stock);
        if *remaining == 0 {
            return Ok(None);
        }
        let before = *remaining;
        *remaining -= 1;
        Ok(Some(before))
    }
}
