//! # stripdaq-client
//!
//! Boundary to the external pub/sub client used by StripDAQ.
//!
//! This crate defines what the core needs from a client library and nothing
//! more:
//!
//! - **PubSubClient** - Connect, one-shot get, recurring subscribe, flush, pump
//! - **ClientEvent** - Deliveries (connection status, metadata, samples, readiness)
//! - **Records** - Typed payloads carried by deliveries
//! - **SimClient** - In-memory client for tests and demos (feature `sim`)
//!
//! ## Callback contract
//!
//! Deliveries are queued by the client and only taken with `poll_event`
//! right after `flush` or `pend_event`:
//!
//! ```rust,ignore
//! use stripdaq_client::PubSubClient;
//!
//! client.pend_event(Duration::from_millis(100))?;
//! while let Some(event) = client.poll_event() {
//!     // Dispatch event
//! }
//! ```

pub mod records;
pub mod traits;

#[cfg(feature = "sim")]
pub mod sim;

pub use records::{ConnectionState, ControlInfo, Limits, Severity, StatusSample};
pub use traits::{
    ChannelHandle, ClientError, ClientEvent, PubSubClient, SourceId, SubscriptionHandle, UserTag,
};

#[cfg(feature = "sim")]
pub use sim::{SimClient, SimConfig, SimOp, DEFAULT_DESCRIPTION_SUFFIX};
