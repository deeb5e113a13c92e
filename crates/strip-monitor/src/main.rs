//! # StripDAQ Monitor
//!
//! Strip-chart style channel monitor. Connects every configured channel
//! through StripDAQ and periodically logs the latest values.
//!
//! ## Usage
//!
//! ```bash
//! # Run with stripmon.toml from the working directory or /etc/stripmon
//! stripmon
//!
//! # More verbose core logging
//! RUST_LOG=stripmon=debug,stripdaq_core=debug stripmon
//!
//! # Report every second
//! STRIPMON_REPORT_MS=1000 stripmon
//! ```

mod config;
mod metrics;
mod model;
mod runner;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stripmon=info,stripdaq_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        channels = config.channels.len(),
        slots = config.daq.max_slots,
        "Starting StripDAQ monitor"
    );

    // Initialize metrics
    metrics::init_metrics();

    runner::run(config).await
}
