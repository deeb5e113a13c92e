//! The StripDAQ context.
//!
//! [`StripDaq`] owns the client, the host handle and the slot registry. It is
//! created once at startup and consumed by [`StripDaq::terminate`] at
//! shutdown, which brackets the process-wide client lifetime.

use crate::descriptor::{fetch_description, DescriptorConfig};
use crate::host::{AttrValue, CurveAttr, CurveId, Host};
use crate::machine::{transition, Outcome, SlotEvent};
use crate::registry::{
    validate_channel_name, RegistryError, SlotId, SlotRegistry, SlotState, DEFAULT_MAX_NAME_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use stripdaq_client::{ClientError, ClientEvent, PubSubClient, SourceId};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// StripDAQ errors.
#[derive(Debug, Error)]
pub enum DaqError {
    /// Invalid channel name.
    #[error("Invalid channel name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The curve already owns a slot.
    #[error("{0} is already connected")]
    AlreadyConnected(CurveId),

    /// No free slot.
    #[error("Cannot monitor additional channel: {0}")]
    Registry(#[from] RegistryError),

    /// A client request failed.
    #[error("{op} failed for {channel}: {source}")]
    Client {
        /// Channel the request was for.
        channel: String,
        /// Request that failed.
        op: &'static str,
        /// Client status.
        #[source]
        source: ClientError,
    },

    /// The client could not be initialized.
    #[error("Client initialization failed: {0}")]
    Initialize(#[source] ClientError),
}

impl DaqError {
    /// Check whether this is the capacity-exceeded rejection.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Registry(RegistryError::Full { .. }))
    }
}

/// StripDAQ configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Number of channel slots.
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,

    /// Period of the pump tick in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Bound of each pump call in milliseconds.
    #[serde(default = "default_pend_timeout")]
    pub pend_timeout_ms: u64,

    /// Whether to look up channel descriptions on connect.
    #[serde(default = "default_true")]
    pub fetch_descriptions: bool,

    /// Suffix of the description companion channel.
    #[serde(default = "default_description_suffix")]
    pub description_suffix: String,

    /// Bound of each description lookup step in milliseconds.
    #[serde(default = "default_description_timeout")]
    pub description_timeout_ms: u64,

    /// Maximum channel name length.
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    /// Maximum description length.
    #[serde(default = "default_max_comment_len")]
    pub max_comment_len: usize,
}

fn default_max_slots() -> usize {
    10
}

fn default_tick_interval() -> u64 {
    100
}

fn default_pend_timeout() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_description_suffix() -> String {
    ".DESC".to_string()
}

fn default_description_timeout() -> u64 {
    1_000
}

fn default_max_name_len() -> usize {
    DEFAULT_MAX_NAME_LENGTH
}

fn default_max_comment_len() -> usize {
    255
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            max_slots: default_max_slots(),
            tick_interval_ms: default_tick_interval(),
            pend_timeout_ms: default_pend_timeout(),
            fetch_descriptions: true,
            description_suffix: default_description_suffix(),
            description_timeout_ms: default_description_timeout(),
            max_name_len: default_max_name_len(),
            max_comment_len: default_max_comment_len(),
        }
    }
}

impl DaqConfig {
    /// Get the pump tick period, at least one millisecond.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Get the bound of each pump call.
    #[must_use]
    pub fn pend_timeout(&self) -> Duration {
        Duration::from_millis(self.pend_timeout_ms)
    }

    /// Get the description lookup settings.
    #[must_use]
    pub fn descriptor(&self) -> DescriptorConfig {
        DescriptorConfig {
            suffix: self.description_suffix.clone(),
            timeout: Duration::from_millis(self.description_timeout_ms),
            max_name_len: self.max_name_len,
            max_len: self.max_comment_len,
        }
    }
}

/// Slot statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaqStats {
    /// Number of slots.
    pub capacity: usize,
    /// Number of owned slots.
    pub slots_in_use: usize,
    /// Slots waiting for connection status.
    pub connecting: usize,
    /// Slots waiting for metadata.
    pub metadata_pending: usize,
    /// Subscribed slots without current data.
    pub waiting: usize,
    /// Slots receiving data.
    pub live: usize,
    /// Slots kept after a failed disconnect.
    pub closing: usize,
}

/// The subscription-lifecycle manager.
pub struct StripDaq<C: PubSubClient, H: Host> {
    pub(crate) client: C,
    pub(crate) host: H,
    pub(crate) registry: SlotRegistry,
    pub(crate) config: DaqConfig,
    /// Readiness sources currently watched by the host.
    pub(crate) sources: BTreeSet<SourceId>,
}

impl<C: PubSubClient, H: Host> StripDaq<C, H> {
    /// Initialize the client and create the context.
    ///
    /// # Errors
    ///
    /// Returns an error if the client fails to initialize.
    pub fn initialize(mut client: C, host: H, config: DaqConfig) -> Result<Self, DaqError> {
        client.initialize().map_err(|e| {
            error!(client = client.name(), status = %e, "Client initialization failed");
            DaqError::Initialize(e)
        })?;
        info!(
            client = client.name(),
            slots = config.max_slots,
            "StripDAQ initialized"
        );

        Ok(Self {
            client,
            host,
            registry: SlotRegistry::with_capacity(config.max_slots),
            config,
            sources: BTreeSet::new(),
        })
    }

    /// Disconnect every channel, unwatch every source and shut the client
    /// down.
    ///
    /// Returns the client and host.
    pub fn terminate(mut self) -> (C, H) {
        let curves: Vec<CurveId> = self.registry.iter().map(|(_, s)| s.curve()).collect();
        for curve in curves {
            if let Err(e) = self.request_disconnect(curve) {
                warn!(curve = %curve, "Disconnect during shutdown failed: {}", e);
            }
        }
        for source in std::mem::take(&mut self.sources) {
            self.host.unwatch_source(source);
        }
        self.client.shutdown();
        info!("StripDAQ terminated");

        let Self { client, host, .. } = self;
        (client, host)
    }

    /// Request a connection for `curve` to the channel `name`.
    ///
    /// Returns as soon as the request is sent; progress is reported to the
    /// host as deliveries arrive. Deliveries released by the flush are
    /// dispatched before returning, so the host may already see the curve
    /// released (unknown name) when this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the curve is already
    /// connected, every slot is in use, or the client rejects the request.
    pub fn request_connect(&mut self, curve: CurveId, name: &str) -> Result<SlotId, DaqError> {
        validate_channel_name(name, self.config.max_name_len).map_err(|reason| {
            DaqError::InvalidName {
                name: name.to_string(),
                reason,
            }
        })?;
        if self.registry.find_by_curve(curve).is_some() {
            return Err(DaqError::AlreadyConnected(curve));
        }

        if self.registry.is_full() {
            let e = RegistryError::Full {
                capacity: self.registry.capacity(),
            };
            warn!(channel = %name, "{}", e);
            return Err(e.into());
        }
        let id = self.registry.allocate(curve, name)?;

        match self.client.connect(name, id.to_tag()) {
            Ok(handle) => {
                if let Some(slot) = self.registry.get_mut(id) {
                    slot.channel = Some(handle);
                }
            }
            Err(source) => {
                error!(channel = %name, status = %source, "Unable to connect");
                self.registry.free(id);
                return Err(DaqError::Client {
                    channel: name.to_string(),
                    op: "connect",
                    source,
                });
            }
        }

        if self.config.fetch_descriptions && !self.host.is_pinned(curve, CurveAttr::Comment) {
            let description = fetch_description(&mut self.client, name, &self.config.descriptor());
            self.host.set_attr(curve, AttrValue::Comment(description));
        }

        if let Err(source) = self.client.flush() {
            error!(channel = %name, status = %source, "Flush after connect failed");
            self.discard_slot(id);
            return Err(DaqError::Client {
                channel: name.to_string(),
                op: "flush",
                source,
            });
        }

        debug!(channel = %name, slot = id.index(), "Connect requested");
        self.dispatch_pending();
        Ok(id)
    }

    /// Cancel the subscription and release the channel of `curve`.
    ///
    /// Idempotent: a curve without a slot disconnects trivially. Both steps
    /// are always attempted; the slot is freed once its channel handle is
    /// gone.
    ///
    /// # Errors
    ///
    /// Returns the first client failure.
    pub fn request_disconnect(&mut self, curve: CurveId) -> Result<(), DaqError> {
        let Some(id) = self.registry.find_by_curve(curve) else {
            debug!(curve = %curve, "Disconnect without a slot");
            return Ok(());
        };
        let Some(slot) = self.registry.get_mut(id) else {
            return Ok(());
        };
        let channel = slot.name.clone();
        slot.state = SlotState::Closing;
        let mut failure: Option<(&'static str, ClientError)> = None;

        if let Some(subscription) = slot.subscription {
            match self.client.cancel(subscription) {
                Ok(()) => slot.subscription = None,
                Err(e) => {
                    error!(channel = %channel, status = %e, "Cancel subscription failed");
                    failure = failure.or(Some(("cancel", e)));
                }
            }
        }
        if let Err(e) = self.client.flush() {
            error!(channel = %channel, status = %e, "Flush after cancel failed");
            failure = failure.or(Some(("flush", e)));
        }

        if let Some(handle) = slot.channel {
            match self.client.release(handle) {
                Ok(()) => slot.channel = None,
                Err(e) => {
                    error!(channel = %channel, status = %e, "Release channel failed");
                    failure = failure.or(Some(("release", e)));
                }
            }
        }
        if let Err(e) = self.client.flush() {
            error!(channel = %channel, status = %e, "Flush after release failed");
            failure = failure.or(Some(("flush", e)));
        }

        if slot.channel.is_none() {
            self.registry.free(id);
        }
        self.dispatch_pending();

        match failure {
            None => {
                debug!(channel = %channel, "Disconnected");
                Ok(())
            }
            Some((op, source)) => Err(DaqError::Client {
                channel,
                op,
                source,
            }),
        }
    }

    /// Get the slot state of `curve`, if it owns a slot.
    #[must_use]
    pub fn slot_state(&self, curve: CurveId) -> Option<SlotState> {
        let id = self.registry.find_by_curve(curve)?;
        self.registry.get(id).map(|s| s.state())
    }

    /// Get the cached value of `curve`, if it owns a slot.
    #[must_use]
    pub fn cached_value(&self, curve: CurveId) -> Option<f64> {
        let id = self.registry.find_by_curve(curve)?;
        self.registry.get(id).map(|s| s.value())
    }

    /// Get slot statistics.
    #[must_use]
    pub fn stats(&self) -> DaqStats {
        let mut stats = DaqStats {
            capacity: self.registry.capacity(),
            ..DaqStats::default()
        };
        for (_, slot) in self.registry.iter() {
            stats.slots_in_use += 1;
            match slot.state() {
                SlotState::Connecting => stats.connecting += 1,
                SlotState::MetadataPending => stats.metadata_pending += 1,
                SlotState::Waiting => stats.waiting += 1,
                SlotState::Live => stats.live += 1,
                SlotState::Closing => stats.closing += 1,
            }
        }
        stats
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &DaqConfig {
        &self.config
    }

    /// Get the slot registry.
    #[must_use]
    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    /// Get the client.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get the client mutably.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Get the host.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Get the host mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Dispatch every delivery the client has released.
    ///
    /// Transitions may queue new requests, so each round is followed by a
    /// flush and another round until the client has nothing more to deliver.
    pub(crate) fn dispatch_pending(&mut self) {
        loop {
            let mut dispatched = 0usize;
            while let Some(event) = self.client.poll_event() {
                self.dispatch(event);
                dispatched += 1;
            }
            if dispatched == 0 {
                break;
            }
            if let Err(e) = self.client.flush() {
                warn!(status = %e, "Flush after dispatch failed");
                break;
            }
        }
    }

    fn dispatch(&mut self, event: ClientEvent) {
        if let ClientEvent::Readiness { source, active } = event {
            self.on_readiness_changed(source, active);
            return;
        }
        let Some((tag, event)) = SlotEvent::from_client(event) else {
            return;
        };

        let id = SlotId::from_tag(tag);
        let Some(slot) = self.registry.get_mut(id) else {
            debug!(tag = %tag, "Delivery for a freed slot dropped");
            return;
        };
        if transition(slot, tag, event, &mut self.client, &mut self.host) == Outcome::Release {
            self.release_slot(id);
        }
    }

    /// Tear down an unrecoverable slot and tell the host to drop its curve.
    fn release_slot(&mut self, id: SlotId) {
        if let Some(curve) = self.discard_slot(id) {
            self.host.release(curve);
        }
    }

    /// Free a slot and release its client resources, best effort.
    fn discard_slot(&mut self, id: SlotId) -> Option<CurveId> {
        let slot = self.registry.free(id)?;
        if let Some(subscription) = slot.subscription {
            if let Err(e) = self.client.cancel(subscription) {
                warn!(channel = %slot.name, status = %e, "Cancel subscription failed");
            }
        }
        if let Some(handle) = slot.channel {
            if let Err(e) = self.client.release(handle) {
                warn!(channel = %slot.name, status = %e, "Release channel failed");
            }
        }
        info!(channel = %slot.name, curve = %slot.curve, "Channel released");
        Some(slot.curve)
    }
}
