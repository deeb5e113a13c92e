//! Test support: a host that records every call.

use crate::cache::Sampler;
use crate::host::{AttrValue, CurveAttr, CurveId, Host};
use std::collections::{BTreeSet, HashMap, HashSet};
use stripdaq_client::{ControlInfo, Limits, SourceId};

/// Metadata with unusable display limits and control limits `(2, 8)`.
pub(crate) fn control_info(value: f64) -> ControlInfo {
    ControlInfo {
        value,
        units: "V".into(),
        precision: 3,
        display: Limits::new(0.0, 0.0),
        control: Limits::new(2.0, 8.0),
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingHost {
    pub attrs: HashMap<CurveId, Vec<AttrValue>>,
    pub pinned: HashSet<(CurveId, CurveAttr)>,
    pub samplers: HashMap<CurveId, Sampler>,
    pub waiting: Vec<CurveId>,
    pub connected: Vec<CurveId>,
    pub released: Vec<CurveId>,
    pub sources: BTreeSet<SourceId>,
    pub unwatched: Vec<SourceId>,
}

impl RecordingHost {
    pub fn pin(&mut self, curve: CurveId, attr: CurveAttr) {
        self.pinned.insert((curve, attr));
    }

    /// Last value written for `attr`.
    pub fn attr(&self, curve: CurveId, attr: CurveAttr) -> Option<&AttrValue> {
        self.attrs
            .get(&curve)?
            .iter()
            .rev()
            .find(|v| v.attr() == attr)
    }
}

impl Host for RecordingHost {
    fn is_pinned(&self, curve: CurveId, attr: CurveAttr) -> bool {
        self.pinned.contains(&(curve, attr))
    }

    fn set_attr(&mut self, curve: CurveId, value: AttrValue) {
        self.attrs.entry(curve).or_default().push(value);
    }

    fn install_sampler(&mut self, curve: CurveId, sampler: Sampler) {
        self.samplers.insert(curve, sampler);
    }

    fn mark_waiting(&mut self, curve: CurveId) {
        self.waiting.push(curve);
    }

    fn mark_connected(&mut self, curve: CurveId) {
        self.connected.push(curve);
    }

    fn release(&mut self, curve: CurveId) {
        self.released.push(curve);
    }

    fn watch_source(&mut self, source: SourceId) {
        self.sources.insert(source);
    }

    fn unwatch_source(&mut self, source: SourceId) {
        self.sources.remove(&source);
        self.unwatched.push(source);
    }
}
