//! Curve model for the monitor.
//!
//! Holds the displayed attributes of every configured curve and receives
//! connection progress from the core.

use crate::config::ChannelConfig;
use crate::metrics;
use std::collections::{BTreeSet, HashMap, HashSet};
use stripdaq_client::SourceId;
use stripdaq_core::{AttrValue, CurveAttr, CurveId, Host, Sampler};
use tracing::{debug, info, warn};

/// Display status of a curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveStatus {
    /// No data yet.
    Pending,
    /// Subscribed but without current data.
    Waiting,
    /// Receiving data.
    Connected,
}

/// One displayed curve.
#[derive(Debug, Clone)]
pub struct Curve {
    /// Channel name.
    pub name: String,
    /// Engineering units.
    pub units: String,
    /// Display precision.
    pub precision: i16,
    /// Lower bound of the display range.
    pub min: f64,
    /// Upper bound of the display range.
    pub max: f64,
    /// Description.
    pub comment: String,
    /// Display status.
    pub status: CurveStatus,
    pinned: HashSet<CurveAttr>,
    sampler: Option<Sampler>,
}

impl Curve {
    fn new(config: &ChannelConfig) -> Self {
        let mut pinned = HashSet::new();
        let mut pin = |attr, set: bool| {
            if set {
                pinned.insert(attr);
            }
        };
        pin(CurveAttr::Units, config.units.is_some());
        pin(CurveAttr::Precision, config.precision.is_some());
        pin(CurveAttr::Min, config.min.is_some());
        pin(CurveAttr::Max, config.max.is_some());
        pin(CurveAttr::Comment, config.comment.is_some());

        Self {
            name: config.name.clone(),
            units: config.units.clone().unwrap_or_default(),
            precision: config.precision.unwrap_or(4),
            min: config.min.unwrap_or(0.0),
            max: config.max.unwrap_or(1.0),
            comment: config.comment.clone().unwrap_or_default(),
            status: CurveStatus::Pending,
            pinned,
            sampler: None,
        }
    }

    /// Get the latest value, if the curve has a sampler.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.sampler.as_ref().map(Sampler::sample)
    }
}

/// The set of curves shown by the monitor.
#[derive(Debug, Default)]
pub struct CurveModel {
    curves: HashMap<CurveId, Curve>,
    next_id: u64,
    released: usize,
    sources: BTreeSet<SourceId>,
}

impl CurveModel {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a curve for `config` and return its id.
    pub fn add_curve(&mut self, config: &ChannelConfig) -> CurveId {
        let id = CurveId(self.next_id);
        self.next_id += 1;
        self.curves.insert(id, Curve::new(config));
        id
    }

    /// Remove a curve.
    pub fn remove_curve(&mut self, curve: CurveId) -> Option<Curve> {
        self.curves.remove(&curve)
    }

    /// Get a curve.
    #[must_use]
    pub fn curve(&self, curve: CurveId) -> Option<&Curve> {
        self.curves.get(&curve)
    }

    /// Get the number of curves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.curves.len()
    }

    /// Get the number of curves the core released as unrecoverable.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released
    }

    /// Get the readiness sources currently watched.
    #[must_use]
    pub fn sources(&self) -> &BTreeSet<SourceId> {
        &self.sources
    }

    /// Log the current value of every curve.
    pub fn report(&self) {
        let mut ids: Vec<&CurveId> = self.curves.keys().collect();
        ids.sort();
        for id in ids {
            let curve = &self.curves[id];
            match (curve.status, curve.value()) {
                (CurveStatus::Connected, Some(value)) => info!(
                    curve = %curve.name,
                    units = %curve.units,
                    min = curve.min,
                    max = curve.max,
                    "{:.*}",
                    curve.precision.max(0) as usize,
                    value
                ),
                (status, _) => info!(curve = %curve.name, ?status, "No data"),
            }
        }
    }
}

impl Host for CurveModel {
    fn is_pinned(&self, curve: CurveId, attr: CurveAttr) -> bool {
        self.curves
            .get(&curve)
            .is_some_and(|c| c.pinned.contains(&attr))
    }

    fn set_attr(&mut self, curve: CurveId, value: AttrValue) {
        let Some(c) = self.curves.get_mut(&curve) else {
            return;
        };
        debug!(curve = %c.name, ?value, "Attribute negotiated");
        match value {
            AttrValue::Units(units) => c.units = units,
            AttrValue::Precision(precision) => c.precision = precision,
            AttrValue::Min(min) => c.min = min,
            AttrValue::Max(max) => c.max = max,
            AttrValue::Comment(comment) => c.comment = comment,
        }
    }

    fn install_sampler(&mut self, curve: CurveId, sampler: Sampler) {
        if let Some(c) = self.curves.get_mut(&curve) {
            c.sampler = Some(sampler);
        }
    }

    fn mark_waiting(&mut self, curve: CurveId) {
        if let Some(c) = self.curves.get_mut(&curve) {
            info!(curve = %c.name, "Waiting for data");
            c.status = CurveStatus::Waiting;
        }
    }

    fn mark_connected(&mut self, curve: CurveId) {
        if let Some(c) = self.curves.get_mut(&curve) {
            info!(curve = %c.name, "Connected");
            c.status = CurveStatus::Connected;
        }
    }

    fn release(&mut self, curve: CurveId) {
        if let Some(c) = self.curves.remove(&curve) {
            warn!(curve = %c.name, "Channel dropped");
            self.released += 1;
            metrics::record_release();
        }
    }

    fn watch_source(&mut self, source: SourceId) {
        debug!(%source, "Watching source");
        self.sources.insert(source);
    }

    fn unwatch_source(&mut self, source: SourceId) {
        debug!(%source, "Unwatching source");
        self.sources.remove(&source);
    }
}
