//! Host boundary for StripDAQ.
//!
//! The host owns the logical channels (curves) and the event loop. The core
//! only keeps a non-owning [`CurveId`] per slot and reports back through the
//! [`Host`] trait.

use crate::cache::Sampler;
use std::fmt;
use stripdaq_client::SourceId;

/// Identifier of a logical channel owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurveId(pub u64);

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "curve#{}", self.0)
    }
}

/// Curve attributes the core may set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurveAttr {
    /// Engineering units.
    Units,
    /// Display precision.
    Precision,
    /// Lower bound of the display range.
    Min,
    /// Upper bound of the display range.
    Max,
    /// Free-form description.
    Comment,
}

/// A value for a [`CurveAttr`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Engineering units.
    Units(String),
    /// Display precision.
    Precision(i16),
    /// Lower bound of the display range.
    Min(f64),
    /// Upper bound of the display range.
    Max(f64),
    /// Free-form description.
    Comment(String),
}

impl AttrValue {
    /// Get the attribute this value is for.
    #[must_use]
    pub fn attr(&self) -> CurveAttr {
        match self {
            Self::Units(_) => CurveAttr::Units,
            Self::Precision(_) => CurveAttr::Precision,
            Self::Min(_) => CurveAttr::Min,
            Self::Max(_) => CurveAttr::Max,
            Self::Comment(_) => CurveAttr::Comment,
        }
    }
}

/// The host application, as seen from the core.
///
/// Every method is invoked from inside a core call (`request_connect`,
/// `request_disconnect`, `on_tick`, `on_source_ready`, `terminate`), never
/// spontaneously.
pub trait Host {
    /// Whether the user pinned an explicit value for `attr`.
    ///
    /// Pinned attributes are never overwritten by negotiated metadata.
    fn is_pinned(&self, curve: CurveId, attr: CurveAttr) -> bool;

    /// Set a curve attribute.
    fn set_attr(&mut self, curve: CurveId, value: AttrValue);

    /// Install the pull accessor for the curve's latest value.
    fn install_sampler(&mut self, curve: CurveId, sampler: Sampler);

    /// The curve lost its data source and is waiting for it to return.
    fn mark_waiting(&mut self, curve: CurveId);

    /// The curve is receiving live data.
    fn mark_connected(&mut self, curve: CurveId);

    /// The curve can not be served and should be removed from the model.
    fn release(&mut self, curve: CurveId);

    /// Start watching a readiness source.
    fn watch_source(&mut self, source: SourceId);

    /// Stop watching a readiness source.
    fn unwatch_source(&mut self, source: SourceId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_value_kind() {
        assert_eq!(AttrValue::Units("mA".into()).attr(), CurveAttr::Units);
        assert_eq!(AttrValue::Max(1.0).attr(), CurveAttr::Max);
        assert_eq!(AttrValue::Comment(String::new()).attr(), CurveAttr::Comment);
    }

    #[test]
    fn test_curve_id_display() {
        assert_eq!(CurveId(4).to_string(), "curve#4");
    }
}
