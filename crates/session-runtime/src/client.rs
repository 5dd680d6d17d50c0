use crate::clock::{Clock, SystemClock};
use crate::scheduler::start_loops;
use crate::session::Session;
use crate::SessionError;
use dino_core::{validate_config, AccountId, AccountRecord, Catalog, GameConfig};
use persistence::AccountStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for a player client. Holds at most one open session, so the
/// loops of two accounts never run side by side.
pub struct GameClient<S> {
    store: Arc<S>,
    catalog: Arc<Catalog>,
    config: GameConfig,
    clock: Arc<dyn Clock>,
    active: Option<Session<S>>,
}

impl<S: AccountStore> GameClient<S> {
    pub fn new(store: Arc<S>, config: GameConfig) -> Result<Self, SessionError> {
        validate_config(&config)?;
        let catalog = Arc::new(config.catalog()?);
        Ok(Self {
            store,
            catalog,
            config,
            clock: Arc::new(SystemClock),
            active: None,
        })
    }

    /// Replace the wall clock, e.g. with a [`crate::ManualClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn session(&self) -> Option<&Session<S>> {
        self.active.as_ref()
    }

    /// Create an account with the configured starting balance.
    pub async fn register(&self, id: &AccountId) -> Result<AccountRecord, SessionError> {
        let rec = self
            .store
            .create_account(id, self.config.starting_balance, self.clock.now())
            .await?;
        info!(account = %id, balance = %rec.balance, "account registered");
        Ok(rec)
    }

    /// Open a session for `id`, closing any session already open.
    ///
    /// Offline earnings are credited before the session start is recorded
    /// and before any loop runs.
    pub async fn login(&mut self, id: &AccountId) -> Result<Session<S>, SessionError> {
        self.logout().await;
        let record = self.store.get_account(id).await?;
        let last_active_at = record.last_active_at;
        let session = Session::open(
            self.store.clone(),
            self.catalog.clone(),
            self.config.clone(),
            self.clock.clone(),
            record,
        );
        session.reconcile_offline(last_active_at).await;
        if let Err(e) = session.heartbeat().await {
            warn!(account = %id, error = %e, "recording session start failed");
        }
        start_loops(&session);
        info!(
            account = %id,
            balance = %session.displayed_balance(),
            rate = %session.income_rate(),
            "session opened"
        );
        self.active = Some(session.clone());
        Ok(session)
    }

    /// Close the open session, if any.
    pub async fn logout(&mut self) {
        if let Some(session) = self.active.take() {
            session.close().await;
        }
    }

    /// The open session, or an error when logged out.
    pub fn require_session(&self) -> Result<&Session<S>, SessionError> {
        self.active.as_ref().ok_or(SessionError::NotLoggedIn)
    }
}

impl<S> Drop for GameClient<S> {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            session.detach();
        }
    }
}
