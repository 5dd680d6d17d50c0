#![deny(warnings)]

//! Headless client: opens a session against a SQLite save, lets the income
//! loops run for a while and reports the authoritative balance on logout.

use anyhow::Result;
use dino_core::{AccountId, GameConfig, SpeciesId};
use persistence::{default_sqlite_url, ensure_sqlite_dir, AccountStore, SqliteStore, StoreError};
use session_runtime::{GameClient, SessionError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Args {
    db: String,
    account: String,
    config: Option<String>,
    run_secs: u64,
    buy: Vec<String>,
    deploy_all: bool,
    version: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        db: default_sqlite_url().to_string(),
        account: "PLAYER1".to_string(),
        config: None,
        run_secs: 15,
        buy: Vec::new(),
        deploy_all: false,
        version: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--db" => {
                if let Some(db) = it.next() {
                    args.db = db;
                }
            }
            "--account" => {
                if let Some(account) = it.next() {
                    args.account = account;
                }
            }
            "--config" => args.config = it.next(),
            "--run-secs" => {
                if let Some(secs) = it.next().and_then(|s| s.parse().ok()) {
                    args.run_secs = secs;
                }
            }
            "--buy" => args.buy.extend(it.next()),
            "--deploy-all" => args.deploy_all = true,
            "--version" => args.version = true,
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    args
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args();
    if args.version {
        println!(
            "dino-idle {} ({}, {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }
    info!(db = %args.db, account = %args.account, run_secs = args.run_secs, "starting CLI");

    let cfg = match &args.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };
    ensure_sqlite_dir(&args.db)?;
    let store = Arc::new(SqliteStore::connect(&args.db).await?);
    let mut client = GameClient::new(store.clone(), cfg)?;

    let id = AccountId::new(args.account.clone());
    match store.get_account(&id).await {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => {
            client.register(&id).await?;
        }
        Err(e) => return Err(e.into()),
    }

    let session = client.login(&id).await?;
    if let Some(report) = session.acknowledge_offline_report() {
        println!(
            "Offline | {}s at ${}/s | earned ${}",
            report.elapsed_seconds, report.income_rate, report.credited_amount
        );
    }

    for species in &args.buy {
        match session.buy(&SpeciesId::new(species.as_str())).await {
            Ok(unit) if unit.is_serialized() => {
                println!("Bought {} #{} ({})", species, unit.serial, unit.instance_id)
            }
            Ok(unit) => println!("Bought {} ({})", species, unit.instance_id),
            Err(e) => warn!(%species, error = %e, "purchase failed"),
        }
    }

    if args.deploy_all {
        for unit in session.owned_units() {
            match session.deploy(&unit.instance_id).await {
                Ok(_) | Err(SessionError::AlreadyDeployed(_)) => {}
                Err(SessionError::CapacityReached(_)) => break,
                Err(e) => warn!(unit = %unit.instance_id, error = %e, "deploy failed"),
            }
        }
    }

    println!(
        "Session | balance: ${} | income: ${}/s | deployed: {}/{} | owned: {}",
        session.displayed_balance().round_dp(2),
        session.income_rate(),
        session.deployed_units().len(),
        session.config().max_deployed,
        session.owned_units().len()
    );

    tokio::time::sleep(Duration::from_secs(args.run_secs)).await;
    let shown = session.displayed_balance();
    client.logout().await;
    let balance = store.get_balance(&id).await?;
    println!(
        "Logged out | displayed: ${} | authoritative: ${}",
        shown.round_dp(2),
        balance.round_dp(2)
    );
    Ok(())
}
