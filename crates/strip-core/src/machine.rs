//! Per-slot connection state machine.
//!
//! Every client delivery addressed to a slot becomes one [`SlotEvent`] and
//! goes through [`transition`], the only place where a slot's connection
//! state changes.
//!
//! ```text
//! Connecting ──connected──▶ MetadataPending ──metadata──▶ Waiting ◀──▶ Live
//!     │                           │                          (sample ok / error,
//!     └── never connected ──▶ released ◀── fetch or subscribe    connection lost)
//!                                          failure
//! ```
//!
//! A slot being disconnected is `Closing` and ignores every delivery.

use crate::host::Host;
use crate::range::RangeMetadata;
use crate::registry::{Slot, SlotState};
use stripdaq_client::{
    ClientError, ClientEvent, ConnectionState, ControlInfo, PubSubClient, Severity, StatusSample,
    UserTag,
};
use tracing::{debug, error, info, trace, warn};

/// A delivery addressed to one slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotEvent {
    /// Connection status changed.
    Connection(ConnectionState),
    /// One-shot metadata request completed.
    Metadata(Result<ControlInfo, ClientError>),
    /// Recurring subscription delivery.
    Sample(Result<StatusSample, ClientError>),
}

impl SlotEvent {
    /// Split a client event into its tag and slot event.
    ///
    /// Returns `None` for events that are not addressed to a slot.
    #[must_use]
    pub fn from_client(event: ClientEvent) -> Option<(UserTag, Self)> {
        match event {
            ClientEvent::Readiness { .. } => None,
            ClientEvent::Connection { tag, state } => Some((tag, Self::Connection(state))),
            ClientEvent::Control { tag, result } => Some((tag, Self::Metadata(result))),
            ClientEvent::Sample { tag, result } => Some((tag, Self::Sample(result))),
        }
    }
}

/// What should happen to the slot after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Outcome {
    /// Keep the slot.
    Retain,
    /// The channel is unrecoverable: free the slot and release the curve.
    Release,
}

/// Apply one event to a slot.
///
/// Requests issued here (metadata fetch, subscribe) are only queued on the
/// client; the caller flushes them.
pub fn transition<C, H>(
    slot: &mut Slot,
    tag: UserTag,
    event: SlotEvent,
    client: &mut C,
    host: &mut H,
) -> Outcome
where
    C: PubSubClient,
    H: Host,
{
    if slot.state == SlotState::Closing {
        debug!(channel = %slot.name, ?event, "Delivery for a closing slot ignored");
        return Outcome::Retain;
    }

    match event {
        SlotEvent::Connection(ConnectionState::NeverConnected) => {
            warn!(channel = %slot.name, "Channel not found");
            Outcome::Release
        }

        SlotEvent::Connection(ConnectionState::PreviouslyConnected) => {
            warn!(channel = %slot.name, "Server unavailable");
            if slot.state == SlotState::Live {
                slot.state = SlotState::Waiting;
                host.mark_waiting(slot.curve);
            }
            Outcome::Retain
        }

        SlotEvent::Connection(ConnectionState::Connected) => {
            if slot.subscription.is_some() {
                debug!(channel = %slot.name, "Reconnected");
                return Outcome::Retain;
            }
            if slot.state == SlotState::MetadataPending {
                debug!(channel = %slot.name, "Metadata already requested");
                return Outcome::Retain;
            }
            let Some(channel) = slot.channel else {
                warn!(channel = %slot.name, "Connected without a channel handle");
                return Outcome::Retain;
            };

            match client.get_control(channel, tag) {
                Ok(()) => {
                    debug!(channel = %slot.name, "Connected, requesting metadata");
                    slot.state = SlotState::MetadataPending;
                    Outcome::Retain
                }
                Err(e) => {
                    error!(channel = %slot.name, status = %e, "Metadata request failed");
                    Outcome::Release
                }
            }
        }

        SlotEvent::Connection(ConnectionState::Closed) => {
            warn!(channel = %slot.name, "Invalid channel handle");
            Outcome::Retain
        }

        SlotEvent::Metadata(result) => {
            if slot.state != SlotState::MetadataPending {
                debug!(channel = %slot.name, state = ?slot.state, "Unexpected metadata dropped");
                return Outcome::Retain;
            }
            let info = match result {
                Ok(info) => info,
                Err(e) => {
                    error!(channel = %slot.name, status = %e, "Metadata fetch failed");
                    return Outcome::Release;
                }
            };

            RangeMetadata::negotiate(&info).apply(slot.curve, host);

            let Some(channel) = slot.channel else {
                error!(channel = %slot.name, "Metadata delivered without a channel handle");
                return Outcome::Release;
            };
            match client.subscribe(channel, tag) {
                Ok(subscription) => {
                    debug!(channel = %slot.name, "Subscribed");
                    slot.subscription = Some(subscription);
                    slot.state = SlotState::Waiting;
                    Outcome::Retain
                }
                Err(e) => {
                    error!(channel = %slot.name, status = %e, "Subscribe failed");
                    Outcome::Release
                }
            }
        }

        SlotEvent::Sample(result) => {
            if slot.subscription.is_none() {
                debug!(channel = %slot.name, "Sample without subscription dropped");
                return Outcome::Retain;
            }
            match result {
                Ok(sample) => {
                    slot.value.store(sample.value);
                    if sample.severity != Severity::None {
                        debug!(
                            channel = %slot.name,
                            value = sample.value,
                            severity = ?sample.severity,
                            "Sample in alarm"
                        );
                    }
                    if slot.state == SlotState::Live {
                        trace!(
                            channel = %slot.name,
                            value = sample.value,
                            severity = ?sample.severity,
                            "Sample"
                        );
                    } else {
                        slot.state = SlotState::Live;
                        host.install_sampler(slot.curve, slot.value.clone());
                        host.mark_connected(slot.curve);
                        info!(channel = %slot.name, value = sample.value, "Channel live");
                    }
                }
                Err(e) => {
                    if slot.state == SlotState::Live {
                        warn!(channel = %slot.name, status = %e, "Subscription delivery failed");
                        slot.state = SlotState::Waiting;
                        host.mark_waiting(slot.curve);
                    } else {
                        debug!(channel = %slot.name, status = %e, "Still waiting");
                    }
                }
            }
            Outcome::Retain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AttrValue, CurveAttr, CurveId};
    use crate::registry::{SlotId, SlotRegistry};
    use crate::testing::{control_info, RecordingHost};
    use stripdaq_client::{SimClient, SimOp};

    struct Fixture {
        registry: SlotRegistry,
        id: SlotId,
        client: SimClient,
        host: RecordingHost,
    }

    const CURVE: CurveId = CurveId(7);

    impl Fixture {
        fn new() -> Self {
            let mut client = SimClient::new().with_channel("PV:A", control_info(5.0));
            client.initialize().unwrap();
            let mut registry = SlotRegistry::with_capacity(2);
            let id = registry.allocate(CURVE, "PV:A").unwrap();
            let channel = client.connect("PV:A", id.to_tag()).unwrap();
            registry.get_mut(id).unwrap().channel = Some(channel);
            Self {
                registry,
                id,
                client,
                host: RecordingHost::default(),
            }
        }

        fn apply(&mut self, event: SlotEvent) -> Outcome {
            let slot = self.registry.get_mut(self.id).unwrap();
            transition(slot, self.id.to_tag(), event, &mut self.client, &mut self.host)
        }

        fn state(&self) -> SlotState {
            self.registry.get(self.id).unwrap().state()
        }

        fn to_live(&mut self) {
            let _ = self.apply(SlotEvent::Connection(ConnectionState::Connected));
            let _ = self.apply(SlotEvent::Metadata(Ok(control_info(5.0))));
            let _ = self.apply(SlotEvent::Sample(Ok(StatusSample::new(5.0))));
            assert_eq!(self.state(), SlotState::Live);
        }
    }

    #[test]
    fn test_never_connected_releases() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.apply(SlotEvent::Connection(ConnectionState::NeverConnected)),
            Outcome::Release
        );
    }

    #[test]
    fn test_closing_slot_ignores_deliveries() {
        let mut fx = Fixture::new();
        fx.to_live();
        fx.registry.get_mut(fx.id).unwrap().subscription = None;
        fx.registry.get_mut(fx.id).unwrap().state = SlotState::Closing;

        for event in [
            SlotEvent::Connection(ConnectionState::NeverConnected),
            SlotEvent::Connection(ConnectionState::PreviouslyConnected),
            SlotEvent::Connection(ConnectionState::Connected),
            SlotEvent::Metadata(Ok(control_info(5.0))),
            SlotEvent::Sample(Ok(StatusSample::new(6.0))),
        ] {
            assert_eq!(fx.apply(event), Outcome::Retain);
        }
        assert_eq!(fx.state(), SlotState::Closing);
        assert_eq!(fx.host.connected, vec![CURVE]);
        assert!(fx.host.waiting.is_empty());
        assert_eq!(fx.registry.get(fx.id).unwrap().value(), 5.0);
    }

    #[test]
    fn test_connected_requests_metadata_once() {
        let mut fx = Fixture::new();
        assert_eq!(fx.state(), SlotState::Connecting);

        let outcome = fx.apply(SlotEvent::Connection(ConnectionState::Connected));
        assert_eq!(outcome, Outcome::Retain);
        assert_eq!(fx.state(), SlotState::MetadataPending);

        // A duplicate notification must not fail or issue a second request.
        fx.client.fail_next(SimOp::GetControl);
        let outcome = fx.apply(SlotEvent::Connection(ConnectionState::Connected));
        assert_eq!(outcome, Outcome::Retain);
        assert_eq!(fx.state(), SlotState::MetadataPending);
    }

    #[test]
    fn test_metadata_request_failure_releases() {
        let mut fx = Fixture::new();
        fx.client.fail_next(SimOp::GetControl);
        assert_eq!(
            fx.apply(SlotEvent::Connection(ConnectionState::Connected)),
            Outcome::Release
        );
    }

    #[test]
    fn test_metadata_failure_releases_without_sampler() {
        let mut fx = Fixture::new();
        let _ = fx.apply(SlotEvent::Connection(ConnectionState::Connected));

        let outcome = fx.apply(SlotEvent::Metadata(Err(ClientError::Rejected("no access".into()))));
        assert_eq!(outcome, Outcome::Release);
        assert!(fx.host.samplers.is_empty());
        assert!(fx.host.attrs.is_empty());
    }

    #[test]
    fn test_metadata_subscribes_and_reports_range() {
        let mut fx = Fixture::new();
        let _ = fx.apply(SlotEvent::Connection(ConnectionState::Connected));
        let _ = fx.apply(SlotEvent::Metadata(Ok(control_info(5.0))));

        assert_eq!(fx.state(), SlotState::Waiting);
        assert!(fx.registry.get(fx.id).unwrap().is_subscribed());
        assert_eq!(fx.host.attr(CURVE, CurveAttr::Min), Some(&AttrValue::Min(2.0)));
        assert_eq!(fx.host.attr(CURVE, CurveAttr::Max), Some(&AttrValue::Max(8.0)));
    }

    #[test]
    fn test_subscribe_failure_releases() {
        let mut fx = Fixture::new();
        let _ = fx.apply(SlotEvent::Connection(ConnectionState::Connected));
        fx.client.fail_next(SimOp::Subscribe);
        assert_eq!(
            fx.apply(SlotEvent::Metadata(Ok(control_info(5.0)))),
            Outcome::Release
        );
    }

    #[test]
    fn test_metadata_out_of_order_dropped() {
        let mut fx = Fixture::new();
        let outcome = fx.apply(SlotEvent::Metadata(Ok(control_info(5.0))));
        assert_eq!(outcome, Outcome::Retain);
        assert_eq!(fx.state(), SlotState::Connecting);
        assert!(fx.host.attrs.is_empty());
    }

    #[test]
    fn test_sample_before_subscription_dropped() {
        let mut fx = Fixture::new();
        let _ = fx.apply(SlotEvent::Sample(Ok(StatusSample::new(1.0))));
        assert_eq!(fx.state(), SlotState::Connecting);
        assert!(fx.host.connected.is_empty());
    }

    #[test]
    fn test_first_sample_goes_live() {
        let mut fx = Fixture::new();
        fx.to_live();

        assert_eq!(fx.host.connected, vec![CURVE]);
        assert_eq!(fx.host.samplers[&CURVE].sample(), 5.0);

        let _ = fx.apply(SlotEvent::Sample(Ok(StatusSample::new(6.5))));
        assert_eq!(fx.host.samplers[&CURVE].sample(), 6.5);
        assert_eq!(fx.host.connected.len(), 1);
    }

    #[test]
    fn test_alarm_sample_is_still_data() {
        let mut fx = Fixture::new();
        fx.to_live();

        let alarm = StatusSample {
            value: 42.0,
            severity: Severity::Major,
        };
        assert_eq!(fx.apply(SlotEvent::Sample(Ok(alarm))), Outcome::Retain);
        assert_eq!(fx.state(), SlotState::Live);
        assert_eq!(fx.host.samplers[&CURVE].sample(), 42.0);
        assert!(fx.host.waiting.is_empty());
    }

    #[test]
    fn test_error_sample_marks_waiting_once() {
        let mut fx = Fixture::new();
        fx.to_live();

        let outcome = fx.apply(SlotEvent::Sample(Err(ClientError::Disconnected)));
        assert_eq!(outcome, Outcome::Retain);
        assert_eq!(fx.state(), SlotState::Waiting);

        let _ = fx.apply(SlotEvent::Sample(Err(ClientError::Disconnected)));
        assert_eq!(fx.host.waiting, vec![CURVE]);

        let _ = fx.apply(SlotEvent::Sample(Ok(StatusSample::new(7.0))));
        assert_eq!(fx.state(), SlotState::Live);
        assert_eq!(fx.host.connected.len(), 2);
    }

    #[test]
    fn test_connection_loss_keeps_subscription() {
        let mut fx = Fixture::new();
        fx.to_live();

        let outcome = fx.apply(SlotEvent::Connection(ConnectionState::PreviouslyConnected));
        assert_eq!(outcome, Outcome::Retain);
        assert_eq!(fx.state(), SlotState::Waiting);
        assert_eq!(fx.host.waiting, vec![CURVE]);

        // Reconnection alone does not issue new requests.
        fx.client.fail_next(SimOp::GetControl);
        let _ = fx.apply(SlotEvent::Connection(ConnectionState::Connected));
        assert_eq!(fx.state(), SlotState::Waiting);
        assert!(fx.registry.get(fx.id).unwrap().is_subscribed());
    }

    #[test]
    fn test_closed_is_ignored() {
        let mut fx = Fixture::new();
        fx.to_live();
        assert_eq!(
            fx.apply(SlotEvent::Connection(ConnectionState::Closed)),
            Outcome::Retain
        );
        assert_eq!(fx.state(), SlotState::Live);
    }
}
