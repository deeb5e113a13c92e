//! Delivery records for StripDAQ.
//!
//! These are the typed payloads the client hands back: connection states,
//! control metadata and status samples.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state reported for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// The name was never resolved.
    NeverConnected,
    /// The channel was connected before and its server is now unreachable.
    PreviouslyConnected,
    /// The channel is connected.
    Connected,
    /// The channel handle is closed or invalid.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NeverConnected => "never connected",
            Self::PreviouslyConnected => "previously connected",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A lower/upper limit pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Lower limit.
    pub lower: f64,
    /// Upper limit.
    pub upper: f64,
}

impl Limits {
    /// Create a new limit pair.
    #[must_use]
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// A pair is usable only when `upper > lower`.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.upper > self.lower
    }
}

/// Control/display metadata for a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInfo {
    /// Value at the time of the request.
    #[serde(default)]
    pub value: f64,
    /// Engineering units.
    #[serde(default)]
    pub units: String,
    /// Display precision (digits after the decimal point).
    #[serde(default)]
    pub precision: i16,
    /// Suggested display limits.
    #[serde(default)]
    pub display: Limits,
    /// Control limits.
    #[serde(default)]
    pub control: Limits,
}

/// Alarm severity carried with a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No alarm.
    #[default]
    None,
    /// Minor alarm.
    Minor,
    /// Major alarm.
    Major,
    /// The value is not valid.
    Invalid,
}

/// A value delivered by a recurring subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSample {
    /// Sampled value.
    pub value: f64,
    /// Alarm severity.
    #[serde(default)]
    pub severity: Severity,
}

impl StatusSample {
    /// Create a sample with no alarm.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self {
            value,
            severity: Severity::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_usable() {
        assert!(Limits::new(0.0, 1.0).is_usable());
        assert!(!Limits::new(0.0, 0.0).is_usable());
        assert!(!Limits::new(5.0, 2.0).is_usable());
    }

    #[test]
    fn test_control_info_from_toml() {
        let info: ControlInfo = toml::from_str(
            r#"
            value = 3.5
            units = "mA"
            precision = 2

            [display]
            lower = 0.0
            upper = 10.0
        "#,
        )
        .unwrap();

        assert_eq!(info.units, "mA");
        assert_eq!(info.display, Limits::new(0.0, 10.0));
        assert_eq!(info.control, Limits::default());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::PreviouslyConnected.to_string(), "previously connected");
    }
}
