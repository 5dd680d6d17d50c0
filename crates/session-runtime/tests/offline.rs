mod common;

use chrono::Duration;
use common::{config, seed, t0};
use dino_core::{AccountId, OfflinePolicy, OfflineReport};
use persistence::{AccountStore, MemoryStore, SqliteStore};
use rust_decimal::Decimal;
use session_runtime::{GameClient, ManualClock};
use std::sync::Arc;

fn client_at<S: AccountStore>(
    store: Arc<S>,
    now: chrono::DateTime<chrono::Utc>,
) -> GameClient<S> {
    GameClient::new(store, config())
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(now)))
}

#[tokio::test(start_paused = true)]
async fn forty_seconds_at_three_per_second() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &["u1"]).await;

    let mut client = client_at(store.clone(), t0() + Duration::seconds(40));
    let session = client.login(&id).await.unwrap();

    assert_eq!(
        session.offline_report(),
        Some(OfflineReport {
            elapsed_seconds: 40,
            income_rate: Decimal::from(3),
            credited_amount: Decimal::from(120),
        })
    );
    assert_eq!(session.displayed_balance(), Decimal::from(220));
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(220));

    assert!(session.acknowledge_offline_report().is_some());
    assert!(session.offline_report().is_none());
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn short_absence_credits_nothing() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &["u1"]).await;

    let mut client = client_at(store.clone(), t0() + Duration::seconds(10));
    let session = client.login(&id).await.unwrap();

    assert!(session.offline_report().is_none());
    assert_eq!(store.add_calls(), 0);
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(100));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn idle_account_gets_no_report_after_an_hour() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &[]).await;

    let mut client = client_at(store.clone(), t0() + Duration::hours(1));
    let session = client.login(&id).await.unwrap();

    assert!(session.offline_report().is_none());
    assert_eq!(store.add_calls(), 0);
    assert_eq!(session.displayed_balance(), Decimal::from(100));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn configured_cap_limits_long_absences() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 0, t0(), &["u1"]).await;

    let mut cfg = config();
    cfg.offline = OfflinePolicy {
        min_elapsed_secs: 30,
        max_elapsed_secs: Some(86_400),
    };
    let mut client = GameClient::new(store.clone(), cfg)
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(t0() + Duration::weeks(2))));
    let session = client.login(&id).await.unwrap();

    let report = session.offline_report().unwrap();
    assert_eq!(report.elapsed_seconds, 86_400);
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(3 * 86_400));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn failed_offline_credit_is_silent() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &["u1"]).await;
    store.fail_next_adds(1);

    let mut client = client_at(store.clone(), t0() + Duration::seconds(40));
    let session = client.login(&id).await.unwrap();

    assert!(session.offline_report().is_none());
    assert_eq!(session.displayed_balance(), Decimal::from(100));
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(100));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn login_records_session_start() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &["u1"]).await;

    let now = t0() + Duration::minutes(5);
    let mut client = client_at(store.clone(), now);
    client.login(&id).await.unwrap();
    assert_eq!(store.get_account(&id).await.unwrap().last_active_at, now);

    // a quick reconnect must not credit the same absence twice
    client.login(&id).await.unwrap();
    assert_eq!(store.add_calls(), 1);
    client.logout().await;
}

// sqlx runs SQLite on its own worker thread; a paused clock would auto-advance
// into its timeouts while waiting on it.
#[tokio::test]
async fn sqlite_authority_credits_offline_earnings() {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &["u1"]).await;

    let mut client = client_at(store.clone(), t0() + Duration::seconds(40));
    let session = client.login(&id).await.unwrap();

    assert_eq!(session.offline_report().unwrap().credited_amount, Decimal::from(120));
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(220));
    client.logout().await;
}
