//! Client abstraction traits for StripDAQ.
//!
//! These traits define the boundary to the external pub/sub client library,
//! allowing the core to stay agnostic of the protocol actually spoken on the
//! wire.

use crate::records::{ConnectionState, ControlInfo, StatusSample};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Opaque handle to a channel created by [`PubSubClient::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub u64);

/// Opaque handle to a recurring subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// A readiness source (usually a file descriptor) the client wants watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub i32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// Opaque per-request user value.
///
/// The client stores it verbatim and hands it back with every delivery that
/// belongs to the request, so the caller can route the delivery without any
/// address-based lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserTag(pub u64);

impl fmt::Display for UserTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Client errors.
///
/// These double as the status carried by failed deliveries; the `Display`
/// output is the status text that ends up in logs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The client has not been initialized (or was shut down).
    #[error("Client not initialized")]
    NotInitialized,

    /// The channel name could not be resolved.
    #[error("Channel not found: {0}")]
    NotFound(String),

    /// A bounded wait expired.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The server hosting the channel is unreachable.
    #[error("Server disconnected")]
    Disconnected,

    /// A handle does not refer to a live channel or subscription.
    #[error("Invalid handle")]
    InvalidHandle,

    /// The request was rejected by the client library.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// A delivery produced by the client.
///
/// Deliveries only surface through [`PubSubClient::poll_event`], and callers
/// only poll right after [`PubSubClient::flush`] or
/// [`PubSubClient::pend_event`]; that is the whole callback contract.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The client wants a readiness source watched (`active`) or unwatched.
    Readiness {
        /// Source to (un)watch.
        source: SourceId,
        /// Whether the source should be watched.
        active: bool,
    },
    /// Connection status of a channel changed.
    Connection {
        /// Tag given to `connect`.
        tag: UserTag,
        /// New connection state.
        state: ConnectionState,
    },
    /// Result of a one-shot control metadata request.
    Control {
        /// Tag given to `get_control`.
        tag: UserTag,
        /// Metadata, or the failure status.
        result: Result<ControlInfo, ClientError>,
    },
    /// A recurring subscription delivery.
    Sample {
        /// Tag given to `subscribe`.
        tag: UserTag,
        /// Sample, or the failure status.
        result: Result<StatusSample, ClientError>,
    },
}

impl ClientEvent {
    /// Get the user tag the event is addressed to, if any.
    #[must_use]
    pub fn tag(&self) -> Option<UserTag> {
        match self {
            Self::Readiness { .. } => None,
            Self::Connection { tag, .. } | Self::Control { tag, .. } | Self::Sample { tag, .. } => {
                Some(*tag)
            }
        }
    }
}

/// An external pub/sub client.
///
/// All request methods are non-blocking: they queue outgoing work that is
/// sent by [`flush`](Self::flush). The only blocking calls are
/// [`pend_event`](Self::pend_event) and the synchronous side channel
/// ([`resolve`](Self::resolve), [`read_string`](Self::read_string)), and all
/// of them are bounded by the timeout the caller passes in.
///
/// One client instance exists per process; its lifetime is bracketed by
/// [`initialize`](Self::initialize) and [`shutdown`](Self::shutdown).
pub trait PubSubClient {
    /// Get the client name (e.g., "sim").
    fn name(&self) -> &'static str;

    /// Initialize the client.
    fn initialize(&mut self) -> Result<(), ClientError>;

    /// Shut the client down, dropping every channel and subscription.
    fn shutdown(&mut self);

    /// Request a named channel. Status arrives as [`ClientEvent::Connection`].
    fn connect(&mut self, name: &str, tag: UserTag) -> Result<ChannelHandle, ClientError>;

    /// Request control/display metadata once. Arrives as [`ClientEvent::Control`].
    fn get_control(&mut self, channel: ChannelHandle, tag: UserTag) -> Result<(), ClientError>;

    /// Start a recurring subscription. Deliveries arrive as [`ClientEvent::Sample`].
    fn subscribe(
        &mut self,
        channel: ChannelHandle,
        tag: UserTag,
    ) -> Result<SubscriptionHandle, ClientError>;

    /// Cancel a subscription.
    fn cancel(&mut self, subscription: SubscriptionHandle) -> Result<(), ClientError>;

    /// Release a channel handle.
    fn release(&mut self, channel: ChannelHandle) -> Result<(), ClientError>;

    /// Send every queued outgoing request.
    fn flush(&mut self) -> Result<(), ClientError>;

    /// Process incoming traffic for at most `timeout`.
    fn pend_event(&mut self, timeout: Duration) -> Result<(), ClientError>;

    /// Take the next pending delivery.
    fn poll_event(&mut self) -> Option<ClientEvent>;

    /// Resolve a channel name synchronously, waiting at most `timeout`.
    fn resolve(&mut self, name: &str, timeout: Duration) -> Result<ChannelHandle, ClientError>;

    /// Read a channel's value as a string synchronously, waiting at most `timeout`.
    fn read_string(&mut self, channel: ChannelHandle, timeout: Duration)
        -> Result<String, ClientError>;
}
