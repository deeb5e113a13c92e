//! Metrics collection and export for the monitor.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use stripdaq_core::DaqStats;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SLOTS_IN_USE: &str = "stripmon_slots_in_use";
    pub const SLOTS_CAPACITY: &str = "stripmon_slots_capacity";
    pub const CHANNELS: &str = "stripmon_channels";
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "stripmon_connect_attempts_total";
    pub const CONNECT_REJECTED_TOTAL: &str = "stripmon_connect_rejected_total";
    pub const RELEASES_TOTAL: &str = "stripmon_releases_total";
    pub const TICKS_TOTAL: &str = "stripmon_ticks_total";
    pub const TICK_SECONDS: &str = "stripmon_tick_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_gauge!(names::SLOTS_IN_USE, "Number of channel slots in use");
    metrics::describe_gauge!(names::SLOTS_CAPACITY, "Number of channel slots");
    metrics::describe_gauge!(names::CHANNELS, "Number of channels by connection state");
    metrics::describe_counter!(
        names::CONNECT_ATTEMPTS_TOTAL,
        "Total number of connect requests"
    );
    metrics::describe_counter!(
        names::CONNECT_REJECTED_TOTAL,
        "Total number of connect requests rejected synchronously"
    );
    metrics::describe_counter!(
        names::RELEASES_TOTAL,
        "Total number of curves dropped as unrecoverable"
    );
    metrics::describe_counter!(names::TICKS_TOTAL, "Total number of pump ticks");
    metrics::describe_histogram!(names::TICK_SECONDS, "Pump tick duration in seconds");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a connect request.
pub fn record_connect_attempt() {
    counter!(names::CONNECT_ATTEMPTS_TOTAL).increment(1);
}

/// Record a rejected connect request.
pub fn record_connect_rejected(reason: &str) {
    counter!(names::CONNECT_REJECTED_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record a curve released by the core.
pub fn record_release() {
    counter!(names::RELEASES_TOTAL).increment(1);
}

/// Publish slot statistics.
pub fn set_stats(stats: &DaqStats) {
    gauge!(names::SLOTS_IN_USE).set(stats.slots_in_use as f64);
    gauge!(names::SLOTS_CAPACITY).set(stats.capacity as f64);
    for (state, count) in [
        ("connecting", stats.connecting),
        ("metadata_pending", stats.metadata_pending),
        ("waiting", stats.waiting),
        ("live", stats.live),
        ("closing", stats.closing),
    ] {
        gauge!(names::CHANNELS, "state" => state).set(count as f64);
    }
}

/// Metrics guard that records one tick and its duration on drop.
pub struct TickTimer {
    started: Instant,
}

impl TickTimer {
    /// Start timing a tick.
    #[must_use]
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        counter!(names::TICKS_TOTAL).increment(1);
        histogram!(names::TICK_SECONDS).record(self.started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_timer() {
        // Just test that it doesn't panic without a recorder installed
        let _timer = TickTimer::start();
        set_stats(&DaqStats::default());
    }
}
