use crate::clock::Clock;
use crate::SessionError;
use dino_core::{
    validate_units, AccountId, AccountRecord, Catalog, GameConfig, OfflineReport, ProducerUnit,
    SpeciesId,
};
use dino_econ::{
    accrued_amount, can_afford, compute_income_rate, plan_offline_credit, serial_for_claim,
};
use persistence::AccountStore;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 12;

/// Result of one checkpoint attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Income flushed; carries the authority's new total.
    Credited(Decimal),
    /// Nothing deployed, nothing to flush.
    Idle,
    /// A previous checkpoint has not resolved yet.
    InFlight,
    /// The session closed before the result could be applied.
    Discarded,
    /// The increment failed; carries the re-read balance when that succeeded.
    FellBack(Option<Decimal>),
}

struct SessionState {
    displayed_balance: Decimal,
    income_rate: Decimal,
    deployed: Vec<ProducerUnit>,
    owned: Vec<ProducerUnit>,
    offline_report: Option<OfflineReport>,
}

struct SessionInner<S> {
    account_id: AccountId,
    store: Arc<S>,
    catalog: Arc<Catalog>,
    config: GameConfig,
    clock: Arc<dyn Clock>,
    active: AtomicBool,
    checkpoint_in_flight: AtomicBool,
    state: Mutex<SessionState>,
    rng: Mutex<ChaCha8Rng>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Context of one logged-in player. Cheap to clone; all clones share state.
pub struct Session<S> {
    inner: Arc<SessionInner<S>>,
}

impl<S> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Session<S> {
    /// Deactivate and signal the loops without waiting for them. Each loop
    /// exits after its current step and releases its handle on the session.
    pub(crate) fn detach(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(account = %self.inner.account_id, "session detached");
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keep only owned, distinct deployed units, up to `capacity`.
fn sanitize_deployed(
    deployed: Vec<ProducerUnit>,
    owned: &[ProducerUnit],
    capacity: usize,
) -> Vec<ProducerUnit> {
    let owned_ids: BTreeSet<&str> = owned.iter().map(|u| u.instance_id.as_str()).collect();
    let mut seen = BTreeSet::new();
    deployed
        .into_iter()
        .filter(|u| owned_ids.contains(u.instance_id.as_str()))
        .filter(|u| seen.insert(u.instance_id.clone()))
        .take(capacity)
        .collect()
}

impl<S: AccountStore> Session<S> {
    pub(crate) fn open(
        store: Arc<S>,
        catalog: Arc<Catalog>,
        config: GameConfig,
        clock: Arc<dyn Clock>,
        record: AccountRecord,
    ) -> Self {
        let AccountRecord {
            id,
            balance,
            deployed_units,
            owned_units,
            ..
        } = record;
        let deployed = match validate_units(&deployed_units, &owned_units, config.max_deployed) {
            Ok(()) => deployed_units,
            Err(e) => {
                warn!(account = %id, error = %e, "repairing deployed units");
                sanitize_deployed(deployed_units, &owned_units, config.max_deployed)
            }
        };
        let income_rate = compute_income_rate(&deployed, &catalog);
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                account_id: id,
                store,
                catalog,
                config,
                clock,
                active: AtomicBool::new(true),
                checkpoint_in_flight: AtomicBool::new(false),
                state: Mutex::new(SessionState {
                    displayed_balance: balance,
                    income_rate,
                    deployed,
                    owned: owned_units,
                    offline_report: None,
                }),
                rng: Mutex::new(rng),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn account_id(&self) -> &AccountId {
        &self.inner.account_id
    }

    pub fn config(&self) -> &GameConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Balance shown to the player: last authoritative value plus local ticks.
    pub fn displayed_balance(&self) -> Decimal {
        self.state().displayed_balance
    }

    pub fn income_rate(&self) -> Decimal {
        self.state().income_rate
    }

    pub fn deployed_units(&self) -> Vec<ProducerUnit> {
        self.state().deployed.clone()
    }

    pub fn owned_units(&self) -> Vec<ProducerUnit> {
        self.state().owned.clone()
    }

    /// Offline earnings credited at login, until acknowledged.
    pub fn offline_report(&self) -> Option<OfflineReport> {
        self.state().offline_report.clone()
    }

    /// Consume the offline report once the player has seen it.
    pub fn acknowledge_offline_report(&self) -> Option<OfflineReport> {
        self.state().offline_report.take()
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    /// Adopt an authoritative total, unless the session has closed meanwhile.
    fn apply_balance(&self, total: Decimal) -> bool {
        if !self.is_active() {
            debug!(account = %self.inner.account_id, %total, "discarding late balance");
            return false;
        }
        self.state().displayed_balance = total;
        true
    }

    /// Plain authoritative read, used after a failed increment.
    pub async fn refresh_balance(&self) -> Option<Decimal> {
        match self.inner.store.get_balance(&self.inner.account_id).await {
            Ok(balance) => self.apply_balance(balance).then_some(balance),
            Err(e) => {
                warn!(account = %self.inner.account_id, error = %e, "balance re-read failed");
                None
            }
        }
    }

    /// Optimistic display increment for one ticker period.
    pub fn tick_display(&self) -> Decimal {
        let mut st = self.state();
        if self.is_active() && st.income_rate > Decimal::ZERO {
            let inc = accrued_amount(st.income_rate, self.inner.config.tick_secs);
            st.displayed_balance += inc;
        }
        st.displayed_balance
    }

    /// Credit income earned since `last_active_at`, once per login.
    pub async fn reconcile_offline(
        &self,
        last_active_at: chrono::DateTime<chrono::Utc>,
    ) -> Option<OfflineReport> {
        let now = self.inner.clock.now();
        let deployed = self.deployed_units();
        let report = plan_offline_credit(
            last_active_at,
            now,
            &deployed,
            &self.inner.catalog,
            &self.inner.config.offline,
        )?;
        match self
            .inner
            .store
            .add_signed_amount(&self.inner.account_id, report.credited_amount)
            .await
        {
            Ok(total) => {
                if !self.apply_balance(total) {
                    return None;
                }
                info!(
                    account = %self.inner.account_id,
                    seconds = report.elapsed_seconds,
                    rate = %report.income_rate,
                    credited = %report.credited_amount,
                    balance = %total,
                    "offline earnings credited"
                );
                self.state().offline_report = Some(report.clone());
                Some(report)
            }
            Err(e) => {
                warn!(account = %self.inner.account_id, error = %e, "offline credit failed");
                self.refresh_balance().await;
                None
            }
        }
    }

    /// Flush one checkpoint interval of income to the authority.
    pub async fn checkpoint(&self) -> CheckpointOutcome {
        if !self.is_active() {
            return CheckpointOutcome::Discarded;
        }
        if self
            .inner
            .checkpoint_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(account = %self.inner.account_id, "checkpoint already in flight");
            return CheckpointOutcome::InFlight;
        }
        let _guard = InFlightGuard(&self.inner.checkpoint_in_flight);

        let rate = self.income_rate();
        if rate <= Decimal::ZERO {
            return CheckpointOutcome::Idle;
        }
        let amount = accrued_amount(rate, self.inner.config.checkpoint_secs);
        match self
            .inner
            .store
            .add_signed_amount(&self.inner.account_id, amount)
            .await
        {
            Ok(total) => {
                if self.apply_balance(total) {
                    debug!(account = %self.inner.account_id, %amount, balance = %total, "checkpoint");
                    CheckpointOutcome::Credited(total)
                } else {
                    CheckpointOutcome::Discarded
                }
            }
            Err(e) => {
                warn!(account = %self.inner.account_id, error = %e, "checkpoint failed");
                CheckpointOutcome::FellBack(self.refresh_balance().await)
            }
        }
    }

    /// Record the current time as the account's last activity.
    pub async fn heartbeat(&self) -> Result<(), SessionError> {
        self.ensure_active()?;
        let now = self.inner.clock.now();
        self.inner
            .store
            .set_last_active_at(&self.inner.account_id, now)
            .await?;
        debug!(account = %self.inner.account_id, %now, "heartbeat");
        Ok(())
    }

    async fn persist_deployed(&self, deployed: &[ProducerUnit]) {
        if let Err(e) = self
            .inner
            .store
            .set_deployed_units(&self.inner.account_id, deployed)
            .await
        {
            warn!(account = %self.inner.account_id, error = %e, "saving deployed units failed");
        }
    }

    /// Move an owned unit into a deployment slot. Returns the new income rate.
    pub async fn deploy(&self, instance_id: &str) -> Result<Decimal, SessionError> {
        self.ensure_active()?;
        let capacity = self.inner.config.max_deployed;
        let (deployed, rate) = {
            let mut guard = self.state();
            let st = &mut *guard;
            let unit = st
                .owned
                .iter()
                .find(|u| u.instance_id == instance_id)
                .cloned()
                .ok_or_else(|| SessionError::UnitNotFound(instance_id.to_string()))?;
            if st.deployed.iter().any(|u| u.instance_id == instance_id) {
                return Err(SessionError::AlreadyDeployed(instance_id.to_string()));
            }
            if st.deployed.len() >= capacity {
                return Err(SessionError::CapacityReached(capacity));
            }
            st.deployed.push(unit);
            st.income_rate = compute_income_rate(&st.deployed, &self.inner.catalog);
            (st.deployed.clone(), st.income_rate)
        };
        self.persist_deployed(&deployed).await;
        info!(account = %self.inner.account_id, unit = instance_id, %rate, "unit deployed");
        Ok(rate)
    }

    /// Return a deployed unit to the idle inventory. Returns the new income rate.
    pub async fn undeploy(&self, instance_id: &str) -> Result<Decimal, SessionError> {
        self.ensure_active()?;
        let (deployed, rate) = {
            let mut guard = self.state();
            let st = &mut *guard;
            let before = st.deployed.len();
            st.deployed.retain(|u| u.instance_id != instance_id);
            if st.deployed.len() == before {
                return Err(SessionError::NotDeployed(instance_id.to_string()));
            }
            st.income_rate = compute_income_rate(&st.deployed, &self.inner.catalog);
            (st.deployed.clone(), st.income_rate)
        };
        self.persist_deployed(&deployed).await;
        info!(account = %self.inner.account_id, unit = instance_id, %rate, "unit undeployed");
        Ok(rate)
    }

    fn next_instance_id(&self) -> String {
        let mut rng = self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let st = self.state();
        loop {
            let id: String = (0..ID_LEN)
                .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
                .collect();
            if !st.owned.iter().any(|u| u.instance_id == id) {
                return id;
            }
        }
    }

    /// Buy one unit from the shop.
    ///
    /// The price is debited first. If the limited stock is sold out or the
    /// grant fails, the price is refunded. A serial claimed for a grant that
    /// then fails is not returned to stock.
    pub async fn buy(&self, species: &SpeciesId) -> Result<ProducerUnit, SessionError> {
        self.ensure_active()?;
        let entry = self
            .inner
            .catalog
            .get(species)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSpecies(species.clone()))?;
        let price = entry.price_decimal();
        let store = &self.inner.store;
        let account = &self.inner.account_id;

        let balance = store.get_balance(account).await?;
        self.apply_balance(balance);
        if !can_afford(balance, price) {
            return Err(SessionError::InsufficientFunds { balance, price });
        }

        let total = match store.add_signed_amount(account, -price).await {
            Ok(total) => total,
            Err(e) => {
                self.refresh_balance().await;
                return Err(e.into());
            }
        };
        self.apply_balance(total);

        let serial = if entry.is_limited {
            let initial = entry.initial_stock.unwrap_or(0);
            let claimed = match store.claim_limited_stock(species, initial).await {
                Ok(Some(before)) => serial_for_claim(initial, before).map_err(SessionError::from),
                Ok(None) => Err(SessionError::SoldOut(species.clone())),
                Err(e) => Err(e.into()),
            };
            match claimed {
                Ok(serial) => serial,
                Err(e) => {
                    self.refund(price).await;
                    return Err(e);
                }
            }
        } else {
            0
        };

        let unit = ProducerUnit {
            instance_id: self.next_instance_id(),
            species_id: species.clone(),
            serial,
        };
        let owned = {
            let mut st = self.state();
            st.owned.push(unit.clone());
            st.owned.clone()
        };
        if let Err(e) = store.set_owned_units(account, &owned).await {
            warn!(account = %account, error = %e, %price, "granting unit failed, refunding");
            self.state()
                .owned
                .retain(|u| u.instance_id != unit.instance_id);
            self.refund(price).await;
            return Err(e.into());
        }
        info!(
            account = %account,
            species = %species,
            serial,
            unit = %unit.instance_id,
            balance = %total,
            "unit purchased"
        );
        Ok(unit)
    }

    async fn refund(&self, price: Decimal) {
        let account = &self.inner.account_id;
        match self.inner.store.add_signed_amount(account, price).await {
            Ok(total) => {
                self.apply_balance(total);
            }
            Err(e) => {
                error!(account = %account, error = %e, %price, "refund failed");
                self.refresh_balance().await;
            }
        }
    }

    /// Settle a marketplace sale: the unit leaves the account and `proceeds`
    /// are credited.
    pub async fn sell(
        &self,
        instance_id: &str,
        proceeds: Decimal,
    ) -> Result<ProducerUnit, SessionError> {
        self.ensure_active()?;
        if proceeds < Decimal::ZERO {
            return Err(SessionError::InvalidAmount(proceeds));
        }
        let store = &self.inner.store;
        let account = &self.inner.account_id;
        let (idx, unit, owned, deployed, was_deployed) = {
            let mut guard = self.state();
            let st = &mut *guard;
            let idx = st
                .owned
                .iter()
                .position(|u| u.instance_id == instance_id)
                .ok_or_else(|| SessionError::UnitNotFound(instance_id.to_string()))?;
            let unit = st.owned.remove(idx);
            let before = st.deployed.len();
            st.deployed.retain(|u| u.instance_id != instance_id);
            let was_deployed = st.deployed.len() != before;
            st.income_rate = compute_income_rate(&st.deployed, &self.inner.catalog);
            (idx, unit, st.owned.clone(), st.deployed.clone(), was_deployed)
        };

        if let Err(e) = store.set_owned_units(account, &owned).await {
            let mut guard = self.state();
            let st = &mut *guard;
            st.owned.insert(idx.min(st.owned.len()), unit.clone());
            if was_deployed {
                st.deployed.push(unit);
                st.income_rate = compute_income_rate(&st.deployed, &self.inner.catalog);
            }
            return Err(e.into());
        }
        if was_deployed {
            self.persist_deployed(&deployed).await;
        }
        if proceeds > Decimal::ZERO {
            match store.add_signed_amount(account, proceeds).await {
                Ok(total) => {
                    self.apply_balance(total);
                }
                Err(e) => {
                    error!(account = %account, error = %e, %proceeds, "sale proceeds not credited");
                    self.refresh_balance().await;
                    return Err(e.into());
                }
            }
        }
        info!(account = %account, unit = instance_id, %proceeds, "unit sold");
        Ok(unit)
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub(crate) fn push_task(&self, handle: JoinHandle<()>) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// End the session: stop the loops, let in-flight calls finish with their
    /// results discarded, and record the session end as last activity.
    pub async fn close(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        let handles =
            std::mem::take(&mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(account = %self.inner.account_id, error = %e, "session task failed");
            }
        }
        let now = self.inner.clock.now();
        if let Err(e) = self
            .inner
            .store
            .set_last_active_at(&self.inner.account_id, now)
            .await
        {
            warn!(account = %self.inner.account_id, error = %e, "recording session end failed");
        }
        info!(account = %self.inner.account_id, "session closed");
    }
}
