//! Display range negotiation.
//!
//! Turns control metadata into the units, precision and display range
//! reported to the host. The range cascade is:
//!
//! 1. display limits, if `upper > lower`
//! 2. control limits, if `upper > lower`
//! 3. `[-100, 100]` when the sampled value is exactly zero
//! 4. a ±10% band around the sampled value otherwise

use crate::host::{AttrValue, CurveId, Host};
use stripdaq_client::ControlInfo;
use tracing::debug;

/// Half-width of the range used when no limits are usable and the value is zero.
const ZERO_VALUE_HALF_RANGE: f64 = 100.0;

/// Divisor giving the half-width of the band around a non-zero value.
const VALUE_BAND_DIVISOR: f64 = 10.0;

/// Negotiated display metadata for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMetadata {
    /// Engineering units.
    pub units: String,
    /// Display precision.
    pub precision: i16,
    /// Lower bound of the display range.
    pub min: f64,
    /// Upper bound of the display range.
    pub max: f64,
}

impl RangeMetadata {
    /// Negotiate display metadata from control metadata.
    #[must_use]
    pub fn negotiate(info: &ControlInfo) -> Self {
        let (min, max) = display_range(info);
        Self {
            units: info.units.clone(),
            precision: info.precision,
            min,
            max,
        }
    }

    /// Report the metadata to the host, skipping every attribute the host
    /// has pinned.
    ///
    /// Returns the number of attributes written.
    pub fn apply<H: Host>(self, curve: CurveId, host: &mut H) -> usize {
        let values = [
            AttrValue::Units(self.units),
            AttrValue::Precision(self.precision),
            AttrValue::Min(self.min),
            AttrValue::Max(self.max),
        ];

        let mut written = 0;
        for value in values {
            if host.is_pinned(curve, value.attr()) {
                debug!(curve = %curve, attr = ?value.attr(), "Keeping pinned attribute");
                continue;
            }
            host.set_attr(curve, value);
            written += 1;
        }
        written
    }
}

/// Compute the display range for control metadata.
#[must_use]
pub fn display_range(info: &ControlInfo) -> (f64, f64) {
    if info.display.is_usable() {
        return (info.display.lower, info.display.upper);
    }
    if info.control.is_usable() {
        return (info.control.lower, info.control.upper);
    }

    let value = info.value;
    if value == 0.0 {
        return (-ZERO_VALUE_HALF_RANGE, ZERO_VALUE_HALF_RANGE);
    }
    let half_band = value.abs() / VALUE_BAND_DIVISOR;
    (value - half_band, value + half_band)
}
