//! Event-loop bridge.
//!
//! The host's reactor drives the client through three entry points: readiness
//! registration requests coming from the client, readiness of a watched
//! source, and a periodic tick. The latter two pump the client for a bounded
//! time and dispatch whatever it delivered; no delivery is ever processed
//! anywhere else.

use crate::daq::StripDaq;
use crate::host::Host;
use std::time::Duration;
use stripdaq_client::{PubSubClient, SourceId};
use tracing::{debug, trace, warn};

impl<C: PubSubClient, H: Host> StripDaq<C, H> {
    /// Forward a readiness (un)registration request to the host reactor.
    pub fn on_readiness_changed(&mut self, source: SourceId, active: bool) {
        if active {
            if self.sources.insert(source) {
                debug!(source = %source, "Watching readiness source");
                self.host.watch_source(source);
            }
        } else if self.sources.remove(&source) {
            debug!(source = %source, "Unwatching readiness source");
            self.host.unwatch_source(source);
        }
    }

    /// Pump the client after a watched source became ready.
    pub fn on_source_ready(&mut self, source: SourceId) {
        trace!(source = %source, "Source ready");
        self.pump();
    }

    /// Pump the client on the periodic timer.
    ///
    /// Returns the delay after which the host should call this again.
    pub fn on_tick(&mut self) -> Duration {
        self.pump();
        self.config.tick_interval()
    }

    /// Get the readiness sources currently watched.
    pub fn watched_sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.iter().copied()
    }

    fn pump(&mut self) {
        if let Err(e) = self.client.pend_event(self.config.pend_timeout()) {
            warn!(client = self.client.name(), status = %e, "Pump failed");
        }
        self.dispatch_pending();
    }
}
