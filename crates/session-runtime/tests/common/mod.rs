#![allow(dead_code)]

use chrono::{DateTime, Utc};
use dino_core::{
    default_catalog, AccountId, CatalogEntry, GameConfig, ProducerUnit, Rarity, SpeciesId,
};
use persistence::AccountStore;
use rust_decimal::Decimal;

pub const TESTO: &str = "TESTOSAURUS";

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Built-in catalog plus a 3/s species priced at 10.
pub fn config() -> GameConfig {
    let mut entries: Vec<CatalogEntry> = default_catalog().iter().cloned().collect();
    entries.push(CatalogEntry {
        id: SpeciesId::new(TESTO),
        name: "Testosaurus".into(),
        rarity: Rarity::Common,
        income_per_second: Decimal::from(3),
        price: 10,
        is_limited: false,
        initial_stock: None,
    });
    GameConfig {
        catalog: Some(entries),
        rng_seed: Some(42),
        ..GameConfig::default()
    }
}

pub fn unit(id: &str, species: &str) -> ProducerUnit {
    ProducerUnit {
        instance_id: id.to_string(),
        species_id: SpeciesId::new(species),
        serial: 0,
    }
}

/// Create `id` with `balance`, owning and deploying one TESTOSAURUS per entry in `deployed`.
pub async fn seed<S: AccountStore>(
    store: &S,
    id: &AccountId,
    balance: i64,
    last_active_at: DateTime<Utc>,
    deployed: &[&str],
) {
    store
        .create_account(id, Decimal::from(balance), last_active_at)
        .await
        .unwrap();
    let units: Vec<_> = deployed.iter().map(|i| unit(i, TESTO)).collect();
    store.set_owned_units(id, &units).await.unwrap();
    store.set_deployed_units(id, &units).await.unwrap();
}
