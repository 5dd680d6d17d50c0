#![deny(warnings)]

//! Session runtime: one explicit context per logged-in player.
//!
//! A [`GameClient`] owns at most one [`Session`]. Logging in loads the account,
//! credits offline earnings once, records the session start and spawns three
//! timer loops:
//! - ticker: optimistic per-second increment of the displayed balance
//! - checkpoint: flushes accrued income to the balance authority
//! - heartbeat: advances the account's last-active timestamp
//!
//! Logging out stops the loops and discards any late results.

mod client;
mod clock;
mod scheduler;
mod session;

pub use client::GameClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use session::{CheckpointOutcome, Session};

use dino_core::{SpeciesId, ValidationError};
use dino_econ::EconError;
use persistence::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("no session is open")]
    NotLoggedIn,
    #[error("unknown species: {0}")]
    UnknownSpecies(SpeciesId),
    #[error("insufficient funds: balance {balance}, price {price}")]
    InsufficientFunds { balance: Decimal, price: Decimal },
    #[error("{0} is sold out")]
    SoldOut(SpeciesId),
    #[error("all {0} deployment slots are in use")]
    CapacityReached(usize),
    #[error("unit not owned: {0}")]
    UnitNotFound(String),
    #[error("unit already deployed: {0}")]
    AlreadyDeployed(String),
    #[error("unit not deployed: {0}")]
    NotDeployed(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Econ(#[from] EconError),
    #[error(transparent)]
    Config(#[from] ValidationError),
}
