#![deny(warnings)]

//! Income accrual and offline-earnings arithmetic for Dino Idle.
//!
//! Everything here is pure: no I/O, no clocks. The session runtime feeds in
//! timestamps and deployed units and applies the results through the balance
//! authority.
//! - Instantaneous income rate of a deployed set
//! - Accrued amount over an interval
//! - Offline credit planning under an [`OfflinePolicy`]
//! - Limited-edition serial numbering

use chrono::{DateTime, Utc};
use dino_core::{Catalog, OfflinePolicy, OfflineReport, ProducerUnit};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// No units left to mint.
    #[error("sold out")]
    SoldOut,
    /// Remaining stock exceeds what was minted.
    #[error("remaining stock {remaining} exceeds initial stock {initial}")]
    InvalidStock { initial: u32, remaining: u32 },
}

/// Sum of catalog income rates over the deployed units.
///
/// Units whose species is missing from the catalog contribute zero.
///
/// Example:
/// let rate = compute_income_rate(&[], &default_catalog());
/// assert_eq!(rate, Decimal::ZERO);
pub fn compute_income_rate(deployed: &[ProducerUnit], catalog: &Catalog) -> Decimal {
    deployed
        .iter()
        .filter_map(|u| catalog.get(&u.species_id))
        .map(|e| e.income_per_second)
        .sum()
}

/// Income accrued at `rate` over `seconds`.
pub fn accrued_amount(rate: Decimal, seconds: u64) -> Decimal {
    rate * Decimal::from(seconds)
}

/// Whole seconds between two instants, floored. Clock skew putting
/// `last_active_at` after `now` yields zero.
pub fn elapsed_whole_seconds(last_active_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (now - last_active_at).num_milliseconds();
    if ms <= 0 {
        return 0;
    }
    (ms / 1000) as u64
}

/// Decide the offline credit owed for an absence, without applying it.
///
/// Returns `None` when the absence is under the policy minimum or when the
/// deployed set produces nothing.
pub fn plan_offline_credit(
    last_active_at: DateTime<Utc>,
    now: DateTime<Utc>,
    deployed: &[ProducerUnit],
    catalog: &Catalog,
    policy: &OfflinePolicy,
) -> Option<OfflineReport> {
    let elapsed = elapsed_whole_seconds(last_active_at, now);
    if elapsed < policy.min_elapsed_secs {
        debug!(elapsed, min = policy.min_elapsed_secs, "absence below threshold");
        return None;
    }
    let credited_secs = match policy.max_elapsed_secs {
        Some(cap) => elapsed.min(cap),
        None => elapsed,
    };
    let rate = compute_income_rate(deployed, catalog);
    let credit = accrued_amount(rate, credited_secs);
    if credit <= Decimal::ZERO {
        return None;
    }
    Some(OfflineReport {
        elapsed_seconds: credited_secs,
        income_rate: rate,
        credited_amount: credit,
    })
}

/// Serial granted when claiming from a limited stock with `remaining` units left.
///
/// The first unit sold is `#1`, the last is `#initial`.
pub fn serial_for_claim(initial: u32, remaining: u32) -> Result<u32, EconError> {
    if remaining == 0 {
        return Err(EconError::SoldOut);
    }
    if remaining > initial {
        return Err(EconError::InvalidStock { initial, remaining });
    }
    Ok(initial - remaining + 1)
}

/// Caller-side purchase precondition: the cached balance covers the price.
pub fn can_afford(balance: Decimal, price: Decimal) -> bool {
    balance >= price
}
