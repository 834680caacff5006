//! diptrader - headless autonomous equities trading engine.
//!
//! Discovers candidates across the U.S. equities universe, evaluates them
//! under the current market regime, submits risk-bounded bracket orders,
//! and supervises every position until it is protected or flat. Built for
//! small accounts: PDT compliance and capital preservation are correctness
//! properties, not features.
//!
//! # Usage
//! ```sh
//! APCA_API_KEY_ID=... APCA_API_SECRET_KEY=... cargo run
//! ```
//!
//! # Environment Variables
//! - `APCA_API_KEY_ID` / `APCA_API_SECRET_KEY` - broker credentials (required)
//! - `PAPER_TRADING` - paper vs. live endpoints (default: true)
//! - `RISK_PROFILE` - conservative | standard | aggressive
//! - `SCAN_INTERVAL_MINUTES`, `RATE_LIMIT_PER_MINUTE`, `CIRCUIT_BREAKER_PCT`,
//!   and the other knobs documented in `config`

use anyhow::Result;
use diptrader::application::system::Application;
use diptrader::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("diptrader {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: paper={}, profile={:?}, scan={}m, extended_hours={}",
        config.broker.paper_trading,
        config.risk_profile,
        config.scan_interval_minutes,
        config.enable_extended_hours
    );

    let app = Application::build(config).await?;
    let shutdown = app.shutdown_handle();
    let handle = tokio::spawn(app.run());

    info!("Engine running. Press Ctrl+C to shut down.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    let _ = shutdown.send(true);

    handle.await??;
    Ok(())
}
