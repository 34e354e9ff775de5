//! Fetch every chart of a Dune dashboard through the proxy pool.
//!
//! ```text
//! DUNE_COOKIES='cf_clearance=...' cargo run --example dashboard -- https://dune.com/cryptokoryo/crypto-buy-signal
//! ```

use dune_dashboard_fetch::{
    DashboardClient, DashboardConfig, FetcherConfig, ProxyPool, ProxyPoolConfig, ReqwestTransport,
    ResilientFetcher,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://dune.com/cryptokoryo/crypto-buy-signal".to_string());

    let pool_config = ProxyPoolConfig::builder()
        .verify_timeout(Duration::from_secs(2))
        .verify_concurrency(20)
        .build();
    let pool = ProxyPool::with_http(pool_config)?;
    let _maintenance = pool.start_background_maintenance(None);

    println!("Waiting for the proxy pool...");
    if tokio::time::timeout(Duration::from_secs(120), pool.wait_ready())
        .await
        .is_err()
    {
        println!("Proxy pool not ready yet, continuing with direct connections");
    }
    let stats = pool.stats();
    println!("Proxy pool: {}/{} working", stats.working, stats.candidates);

    let mut fetcher_config = FetcherConfig::builder();
    if let Ok(cookies) = std::env::var("DUNE_COOKIES") {
        fetcher_config = fetcher_config.cookies(cookies);
    }
    let fetcher = Arc::new(ResilientFetcher::new(
        pool,
        Arc::new(ReqwestTransport::new()?),
        fetcher_config.build(),
    ));
    let client = DashboardClient::new(fetcher, DashboardConfig::default());

    let output = match client.dashboard_data(&url).await {
        Ok(data) => serde_json::to_value(data)?,
        Err(e) => json!({ "error": e.to_string() }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
