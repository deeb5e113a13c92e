//! Monitor configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (STRIPMON_*) for report settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use stripdaq_client::SimConfig;
use stripdaq_core::DaqConfig;

/// Monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings.
    #[serde(default)]
    pub daq: DaqConfig,

    /// Periodic value report.
    #[serde(default)]
    pub report: ReportConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Channels to monitor, in connect order.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    /// Simulated client.
    #[serde(default)]
    pub sim: SimConfig,
}

/// A channel to monitor.
///
/// Any attribute given here is pinned and survives metadata negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name.
    pub name: String,
    /// Engineering units.
    #[serde(default)]
    pub units: Option<String>,
    /// Display precision.
    #[serde(default)]
    pub precision: Option<i16>,
    /// Lower bound of the display range.
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound of the display range.
    #[serde(default)]
    pub max: Option<f64>,
    /// Description.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Report interval in milliseconds.
    #[serde(default = "default_report_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_report_interval() -> u64 {
    std::env::var("STRIPMON_REPORT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5_000)
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    std::env::var("STRIPMON_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9191)
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_report_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl ReportConfig {
    /// Get the report interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "stripmon.toml",
            "/etc/stripmon/stripmon.toml",
            "~/.config/stripmon/stripmon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daq.max_slots, 10);
        assert!(config.metrics.enabled);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [daq]
            max_slots = 4
            tick_interval_ms = 50

            [report]
            interval_ms = 1000

            [[channels]]
            name = "SR:CURRENT"
            units = "mA"
            max = 500.0

            [[channels]]
            name = "SR:LIFETIME"

            [[sim.channels]]
            name = "SR:CURRENT"
            value = 250.0
            units = "A"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.daq.max_slots, 4);
        assert_eq!(config.daq.pend_timeout_ms, 100);
        assert_eq!(config.report.interval(), Duration::from_secs(1));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].units.as_deref(), Some("mA"));
        assert_eq!(config.channels[1].max, None);
        assert_eq!(config.sim.channels[0].info.value, 250.0);
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::from_file("/nonexistent/stripmon.toml").is_err());
    }
}
