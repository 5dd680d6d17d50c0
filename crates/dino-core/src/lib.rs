#![deny(warnings)]

//! Core domain models and invariants for Dino Idle.
//!
//! This crate defines the serializable types shared by the income engine,
//! the balance authority and the session runtime, together with the game
//! configuration and validation helpers guarding basic invariants.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Maximum number of units an account may have deployed at once.
pub const MAX_DEPLOYED: usize = 5;

/// Balance granted to a freshly created account.
pub const STARTING_BALANCE: i64 = 100;

/// Identifier of a dinosaur species, e.g. "TREX" or "VELOCIRAPTOR".
///
/// Kept as an open string so records referencing species missing from the
/// catalog still load; such units simply produce nothing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpeciesId(pub String);

impl SpeciesId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a player account in the backing store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collectible rarity tier.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

/// Static catalog entry describing a purchasable species.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    /// Species identifier.
    pub id: SpeciesId,
    /// Display name.
    pub name: String,
    /// Rarity tier.
    pub rarity: Rarity,
    /// Passive income produced per second while deployed (>= 0).
    pub income_per_second: Decimal,
    /// Shop price in whole coins.
    pub price: u64,
    /// Whether the species is sold as a numbered limited edition.
    #[serde(default)]
    pub is_limited: bool,
    /// Number of serials minted for a limited species.
    #[serde(default)]
    pub initial_stock: Option<u32>,
}

impl CatalogEntry {
    /// Price as a decimal amount, for balance arithmetic.
    pub fn price_decimal(&self) -> Decimal {
        Decimal::from(self.price)
    }
}

/// Read-only species catalog keyed by species id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    entries: BTreeMap<SpeciesId, CatalogEntry>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids and invalid entries.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Result<Self, ValidationError> {
        let mut map = BTreeMap::new();
        for e in entries {
            validate_catalog_entry(&e)?;
            if map.contains_key(&e.id) {
                return Err(ValidationError::DuplicateSpecies(e.id.0.clone()));
            }
            map.insert(e.id.clone(), e);
        }
        Ok(Self { entries: map })
    }

    pub fn get(&self, id: &SpeciesId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Limited species with their minted stock.
    pub fn limited(&self) -> impl Iterator<Item = (&SpeciesId, u32)> {
        self.entries
            .values()
            .filter(|e| e.is_limited)
            .map(|e| (&e.id, e.initial_stock.unwrap_or(0)))
    }
}

fn entry(
    id: &str,
    name: &str,
    rarity: Rarity,
    income_per_second: Decimal,
    price: u64,
    initial_stock: Option<u32>,
) -> CatalogEntry {
    CatalogEntry {
        id: SpeciesId::new(id),
        name: name.to_string(),
        rarity,
        income_per_second,
        price,
        is_limited: initial_stock.is_some(),
        initial_stock,
    }
}

/// The built-in shop catalog.
pub fn default_catalog() -> Catalog {
    let entries = vec![
        entry("VELOCIRAPTOR", "Velociraptor", Rarity::Common, Decimal::new(1, 1), 50, None),
        entry("TRICERATOPS", "Triceratops", Rarity::Common, Decimal::new(5, 1), 200, None),
        entry("STEGOSAURUS", "Stegosaurus", Rarity::Rare, Decimal::ONE, 1_000, None),
        entry("PTERODACTYL", "Pterodactyl", Rarity::Rare, Decimal::new(2, 0), 50_000, None),
        entry("TREX", "T-Rex", Rarity::Epic, Decimal::new(5, 0), 1_000_000, None),
        entry(
            "SPINOSAURUS",
            "Spinosaurus",
            Rarity::Legendary,
            Decimal::new(10, 0),
            10_000_000,
            Some(3),
        ),
    ];
    let entries = entries.into_iter().map(|e| (e.id.clone(), e)).collect();
    Catalog { entries }
}

/// One owned dinosaur. Deployed units produce income.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerUnit {
    /// Unique per unit, stable across deploy/undeploy.
    pub instance_id: String,
    pub species_id: SpeciesId,
    /// 0 for unlimited editions, otherwise the limited-edition number.
    pub serial: u32,
}

impl ProducerUnit {
    pub fn is_serialized(&self) -> bool {
        self.serial > 0
    }
}

/// Account row as read from the balance authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    /// Authoritative balance at read time.
    pub balance: Decimal,
    /// Last heartbeat or session boundary.
    pub last_active_at: DateTime<Utc>,
    /// Units currently producing income; always a subset of `owned_units`.
    pub deployed_units: Vec<ProducerUnit>,
    /// Every unit the account owns, deployed or idle.
    pub owned_units: Vec<ProducerUnit>,
}

/// Offline earnings credited on session resume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineReport {
    pub elapsed_seconds: u64,
    pub income_rate: Decimal,
    pub credited_amount: Decimal,
}

/// Rules for crediting income earned while no session was open.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflinePolicy {
    /// Absences shorter than this produce no credit.
    pub min_elapsed_secs: u64,
    /// Upper bound on credited seconds; `None` credits the full absence.
    pub max_elapsed_secs: Option<u64>,
}

impl Default for OfflinePolicy {
    fn default() -> Self {
        Self {
            min_elapsed_secs: 30,
            max_elapsed_secs: None,
        }
    }
}

/// Game and scheduler configuration. Every field has a default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Balance granted to new accounts.
    pub starting_balance: Decimal,
    /// Deployment slots per account.
    pub max_deployed: usize,
    /// Visual ticker period in seconds.
    pub tick_secs: u64,
    /// Checkpoint period in seconds.
    pub checkpoint_secs: u64,
    /// Heartbeat period in seconds.
    pub heartbeat_secs: u64,
    pub offline: OfflinePolicy,
    /// Seed for instance-id generation; entropy when absent.
    pub rng_seed: Option<u64>,
    /// Replaces the built-in catalog when present.
    pub catalog: Option<Vec<CatalogEntry>>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            starting_balance: Decimal::from(STARTING_BALANCE),
            max_deployed: MAX_DEPLOYED,
            tick_secs: 1,
            checkpoint_secs: 10,
            heartbeat_secs: 30,
            offline: OfflinePolicy::default(),
            rng_seed: None,
            catalog: None,
        }
    }
}

impl GameConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: GameConfig = serde_yaml::from_str(text)?;
        validate_config(&cfg)?;
        Ok(cfg)
    }

    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading game config");
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Catalog in effect: the override if configured, else the built-in one.
    pub fn catalog(&self) -> Result<Catalog, ValidationError> {
        match &self.catalog {
            Some(entries) => Catalog::from_entries(entries.clone()),
            None => Ok(default_catalog()),
        }
    }
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Monetary values and rates must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    /// A limited species needs a positive initial stock.
    #[error("limited species {0} has no initial stock")]
    MissingStock(String),
    /// Species ids must be unique in the catalog.
    #[error("duplicate species id: {0}")]
    DuplicateSpecies(String),
    /// Species ids and names must be non-empty.
    #[error("empty identifier")]
    EmptyId,
    /// More units deployed than slots available.
    #[error("{deployed} units deployed, capacity is {capacity}")]
    CapacityExceeded { deployed: usize, capacity: usize },
    /// A deployed unit is not in the owned set.
    #[error("deployed unit {0} is not owned")]
    NotOwned(String),
    /// Instance ids must be unique per account.
    #[error("duplicate unit instance: {0}")]
    DuplicateUnit(String),
    /// Deployment slots must be between one and [`MAX_DEPLOYED`].
    #[error("max_deployed {0} must be between 1 and {max}", max = MAX_DEPLOYED)]
    InvalidCapacity(usize),
    /// Interval lengths must be at least one second.
    #[error("interval {0} must be > 0")]
    ZeroInterval(&'static str),
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

/// Validate a single catalog entry.
pub fn validate_catalog_entry(e: &CatalogEntry) -> Result<(), ValidationError> {
    if e.id.0.trim().is_empty() || e.name.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if e.income_per_second < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney);
    }
    if e.is_limited && e.initial_stock.unwrap_or(0) == 0 {
        return Err(ValidationError::MissingStock(e.id.0.clone()));
    }
    Ok(())
}

/// Validate the scheduler and economy settings, including any catalog override.
pub fn validate_config(cfg: &GameConfig) -> Result<(), ValidationError> {
    if cfg.starting_balance < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney);
    }
    if cfg.max_deployed == 0 || cfg.max_deployed > MAX_DEPLOYED {
        return Err(ValidationError::InvalidCapacity(cfg.max_deployed));
    }
    if cfg.tick_secs == 0 {
        return Err(ValidationError::ZeroInterval("tick_secs"));
    }
    if cfg.checkpoint_secs == 0 {
        return Err(ValidationError::ZeroInterval("checkpoint_secs"));
    }
    if cfg.heartbeat_secs == 0 {
        return Err(ValidationError::ZeroInterval("heartbeat_secs"));
    }
    cfg.catalog()?;
    Ok(())
}

/// Validate unit bookkeeping: unique instances, deployed subset of owned, capacity.
pub fn validate_units(
    deployed: &[ProducerUnit],
    owned: &[ProducerUnit],
    capacity: usize,
) -> Result<(), ValidationError> {
    if deployed.len() > capacity {
        return Err(ValidationError::CapacityExceeded {
            deployed: deployed.len(),
            capacity,
        });
    }
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for u in owned {
        if !seen.insert(u.instance_id.as_str()) {
            return Err(ValidationError::DuplicateUnit(u.instance_id.clone()));
        }
    }
    let mut deployed_seen: BTreeSet<&str> = BTreeSet::new();
    for u in deployed {
        if !seen.contains(u.instance_id.as_str()) {
            return Err(ValidationError::NotOwned(u.instance_id.clone()));
        }
        if !deployed_seen.insert(u.instance_id.as_str()) {
            return Err(ValidationError::DuplicateUnit(u.instance_id.clone()));
        }
    }
    Ok(())
}
