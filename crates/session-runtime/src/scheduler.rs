//! Fixed-interval loops bound to a session's lifetime.

use crate::session::Session;
use persistence::AccountStore;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Spawn the ticker, checkpoint and heartbeat loops for `session`.
pub(crate) fn start_loops<S: AccountStore>(session: &Session<S>) {
    let cfg = session.config();
    let tick = Duration::from_secs(cfg.tick_secs);
    let checkpoint = Duration::from_secs(cfg.checkpoint_secs);
    let heartbeat = Duration::from_secs(cfg.heartbeat_secs);

    let handles = [
        spawn_loop(session.clone(), "ticker", tick, |s| async move {
            s.tick_display();
        }),
        spawn_loop(session.clone(), "checkpoint", checkpoint, |s| async move {
            s.checkpoint().await;
        }),
        spawn_loop(session.clone(), "heartbeat", heartbeat, |s| async move {
            if let Err(e) = s.heartbeat().await {
                warn!(account = %s.account_id(), error = %e, "heartbeat failed");
            }
        }),
    ];
    for handle in handles {
        session.push_task(handle);
    }
}

/// Run `step` every `period` until the session's shutdown signal fires.
/// The first step runs one full period after start.
fn spawn_loop<S, F, Fut>(
    session: Session<S>,
    name: &'static str,
    period: Duration,
    mut step: F,
) -> JoinHandle<()>
where
    S: AccountStore,
    F: FnMut(Session<S>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut shutdown = session.shutdown_receiver();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => step(session.clone()).await,
            }
        }
        debug!(account = %session.account_id(), task = name, "loop stopped");
    })
}
