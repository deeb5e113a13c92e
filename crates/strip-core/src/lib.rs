//! # stripdaq-core
//!
//! Subscription-lifecycle manager bridging a fixed set of live data channels
//! to an external pub/sub client, driven by the host's event loop.
//!
//! This crate provides:
//!
//! - **Registry** - Fixed-capacity, generation-tagged channel slots
//! - **Machine** - Per-slot connect / metadata / subscribe state machine
//! - **Range** - Display range negotiation from control metadata
//! - **Cache** - Latest value per slot, pulled by the host
//! - **Descriptor** - Best-effort description lookup
//! - **Bridge** - Readiness registration and tick-driven pumping
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ connect/disconnect ┌─────────────┐  requests  ┌─────────────┐
//! │    Host     │───────────────────▶│  StripDaq   │───────────▶│   Client    │
//! │ (curves,    │◀───────────────────│  (registry, │◀───────────│ (pub/sub)   │
//! │  reactor)   │  attrs / status    │   machine)  │ deliveries └─────────────┘
//! └─────────────┘                    └─────────────┘
//!        │ tick / source ready              ▲
//!        └──────────────────────────────────┘
//! ```
//!
//! Deliveries are only dispatched inside `request_connect`,
//! `request_disconnect`, `on_tick` and `on_source_ready`, all of which run on
//! the host's single thread of control, so no locking is involved.

pub mod bridge;
pub mod cache;
pub mod daq;
pub mod descriptor;
pub mod host;
pub mod machine;
pub mod range;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::Sampler;
pub use daq::{DaqConfig, DaqError, DaqStats, StripDaq};
pub use descriptor::{fetch_description, DescriptorConfig};
pub use host::{AttrValue, CurveAttr, CurveId, Host};
pub use machine::{Outcome, SlotEvent};
pub use range::{display_range, RangeMetadata};
pub use registry::{RegistryError, Slot, SlotId, SlotRegistry, SlotState};
