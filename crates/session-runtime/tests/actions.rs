mod common;

use common::{config, seed, t0, unit, TESTO};
use dino_core::{AccountId, GameConfig, SpeciesId};
use persistence::{AccountStore, MemoryStore, StoreError};
use rust_decimal::Decimal;
use session_runtime::{GameClient, ManualClock, SessionError};
use std::sync::Arc;

async fn logged_in(
    store: &Arc<MemoryStore>,
    cfg: GameConfig,
    id: &AccountId,
) -> GameClient<MemoryStore> {
    let mut client = GameClient::new(store.clone(), cfg)
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(t0())));
    client.login(id).await.unwrap();
    client
}

fn raptor() -> SpeciesId {
    SpeciesId::new("VELOCIRAPTOR")
}

#[tokio::test(start_paused = true)]
async fn register_grants_starting_balance() {
    let store = Arc::new(MemoryStore::new());
    let client = GameClient::new(store.clone(), config()).unwrap();
    let rec = client.register(&AccountId::new("NEW")).await.unwrap();
    assert_eq!(rec.balance, Decimal::from(100));
    assert!(rec.owned_units.is_empty());
    assert!(matches!(
        client.register(&AccountId::new("NEW")).await,
        Err(SessionError::Store(StoreError::AlreadyExists(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn buying_debits_through_the_authority() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();

    let first = session.buy(&raptor()).await.unwrap();
    assert_eq!(first.serial, 0);
    session.buy(&raptor()).await.unwrap();
    assert_eq!(session.displayed_balance(), Decimal::ZERO);

    let err = session.buy(&raptor()).await.unwrap_err();
    assert!(matches!(err, SessionError::InsufficientFunds { .. }));

    let rec = store.get_account(&id).await.unwrap();
    assert_eq!(rec.balance, Decimal::ZERO);
    assert_eq!(rec.owned_units.len(), 2);
    assert_ne!(rec.owned_units[0].instance_id, rec.owned_units[1].instance_id);
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_species_cannot_be_bought() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();

    let err = session.buy(&SpeciesId::new("BRACHIOSAURUS")).await.unwrap_err();
    assert!(matches!(err, SessionError::UnknownSpecies(_)));
    assert_eq!(store.add_calls(), 0);
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn limited_stock_hands_out_serials_then_sells_out() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100_000_000, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();
    let spino = SpeciesId::new("SPINOSAURUS");

    let mut serials = Vec::new();
    for _ in 0..3 {
        serials.push(session.buy(&spino).await.unwrap().serial);
    }
    assert_eq!(serials, vec![1, 2, 3]);
    assert!(matches!(
        session.buy(&spino).await,
        Err(SessionError::SoldOut(_))
    ));
    assert_eq!(
        store.get_balance(&id).await.unwrap(),
        Decimal::from(100_000_000 - 3 * 10_000_000)
    );
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn failed_grant_refunds_the_price() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();

    store.fail_next_owned_writes(1);
    let err = session.buy(&raptor()).await.unwrap_err();
    assert!(matches!(err, SessionError::Store(StoreError::Unavailable(_))));
    assert!(session.owned_units().is_empty());
    assert_eq!(session.displayed_balance(), Decimal::from(100));
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(100));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn failed_debit_grants_nothing() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();

    store.fail_next_adds(1);
    assert!(session.buy(&raptor()).await.is_err());
    assert!(session.owned_units().is_empty());
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(100));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn failed_debit_keeps_limited_serials_in_order() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100_000_000, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();
    let spino = SpeciesId::new("SPINOSAURUS");

    store.fail_next_adds(1);
    assert!(session.buy(&spino).await.is_err());

    let mut serials = Vec::new();
    while let Ok(unit) = session.buy(&spino).await {
        serials.push(unit.serial);
    }
    assert_eq!(serials, vec![1, 2, 3]);
    assert_eq!(
        store.get_balance(&id).await.unwrap(),
        Decimal::from(100_000_000 - 3 * 10_000_000)
    );
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn sold_out_purchase_is_refunded() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 40_000_000, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();
    let spino = SpeciesId::new("SPINOSAURUS");

    for _ in 0..3 {
        session.buy(&spino).await.unwrap();
    }
    assert!(matches!(
        session.buy(&spino).await,
        Err(SessionError::SoldOut(_))
    ));
    assert_eq!(session.displayed_balance(), Decimal::from(10_000_000));
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(10_000_000));
    assert_eq!(session.owned_units().len(), 3);
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn deployment_slots_are_capped() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 1_000, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();

    let mut bought = Vec::new();
    for _ in 0..6 {
        bought.push(session.buy(&raptor()).await.unwrap());
    }
    for u in &bought[..5] {
        session.deploy(&u.instance_id).await.unwrap();
    }
    assert_eq!(session.income_rate(), Decimal::new(5, 1));
    assert!(matches!(
        session.deploy(&bought[5].instance_id).await,
        Err(SessionError::CapacityReached(5))
    ));
    assert!(matches!(
        session.deploy(&bought[0].instance_id).await,
        Err(SessionError::AlreadyDeployed(_))
    ));

    let rate = session.undeploy(&bought[0].instance_id).await.unwrap();
    assert_eq!(rate, Decimal::new(4, 1));
    assert!(matches!(
        session.undeploy(&bought[0].instance_id).await,
        Err(SessionError::NotDeployed(_))
    ));
    session.deploy(&bought[5].instance_id).await.unwrap();

    let rec = store.get_account(&id).await.unwrap();
    assert_eq!(rec.deployed_units.len(), 5);
    assert_eq!(rec.owned_units.len(), 6);
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn deploying_an_unowned_unit_fails() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();

    assert!(matches!(
        session.deploy("NOPE").await,
        Err(SessionError::UnitNotFound(_))
    ));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn selling_removes_the_unit_and_credits_proceeds() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &["u1", "u2"]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();
    assert_eq!(session.income_rate(), Decimal::from(6));

    let sold = session.sell("u1", Decimal::from(25)).await.unwrap();
    assert_eq!(sold, unit("u1", TESTO));
    assert_eq!(session.income_rate(), Decimal::from(3));
    assert_eq!(session.displayed_balance(), Decimal::from(125));

    let rec = store.get_account(&id).await.unwrap();
    assert_eq!(rec.owned_units, vec![unit("u2", TESTO)]);
    assert_eq!(rec.deployed_units, vec![unit("u2", TESTO)]);
    assert_eq!(rec.balance, Decimal::from(125));

    assert!(matches!(
        session.sell("u2", Decimal::from(-1)).await,
        Err(SessionError::InvalidAmount(_))
    ));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn failed_sale_keeps_the_unit() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &["u1"]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();

    store.fail_next_owned_writes(1);
    assert!(session.sell("u1", Decimal::from(25)).await.is_err());
    assert_eq!(session.owned_units(), vec![unit("u1", TESTO)]);
    assert_eq!(session.deployed_units(), vec![unit("u1", TESTO)]);
    assert_eq!(session.income_rate(), Decimal::from(3));
    assert_eq!(store.get_balance(&id).await.unwrap(), Decimal::from(100));
    client.logout().await;
}

#[tokio::test(start_paused = true)]
async fn actions_require_an_open_session() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::new("P1");
    seed(&*store, &id, 100, t0(), &[]).await;
    let mut client = logged_in(&store, config(), &id).await;
    let session = client.require_session().unwrap().clone();
    client.logout().await;

    assert!(matches!(client.require_session(), Err(SessionError::NotLoggedIn)));
    assert!(matches!(
        session.buy(&raptor()).await,
        Err(SessionError::Closed)
    ));
}
