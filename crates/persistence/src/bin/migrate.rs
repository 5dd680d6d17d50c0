#![deny(warnings)]

use persistence::{default_sqlite_url, ensure_sqlite_dir};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| default_sqlite_url().to_string());
    ensure_sqlite_dir(&url)?;
    let pool = persistence::init_db(&url).await?;
    pool.close().await;
    println!("DB migrated at {}", url);
    Ok(())
}
