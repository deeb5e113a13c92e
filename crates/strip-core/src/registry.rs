//! Slot registry for StripDAQ.
//!
//! A fixed-capacity arena of channel slots. Slots are addressed by index plus
//! generation, and that pair is what the client gets back as its user tag, so
//! a delivery aimed at a freed slot can never reach the slot's next owner.

use crate::cache::Sampler;
use crate::host::CurveId;
use stripdaq_client::{ChannelHandle, SubscriptionHandle, UserTag};
use thiserror::Error;
use tracing::debug;

/// Default maximum channel name length.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 63;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str, max_len: usize) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > max_len {
        return Err("Channel name too long");
    }
    if !name.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Every slot is owned.
    #[error("All {capacity} channel slots are in use")]
    Full {
        /// Registry capacity.
        capacity: usize,
    },
}

/// Stable identity of an allocated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Get the slot index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Get the allocation generation.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Encode as a client user tag.
    #[must_use]
    pub fn to_tag(self) -> UserTag {
        UserTag((u64::from(self.index) << 32) | u64::from(self.generation))
    }

    /// Decode from a client user tag.
    #[must_use]
    pub fn from_tag(tag: UserTag) -> Self {
        Self {
            index: (tag.0 >> 32) as u32,
            generation: tag.0 as u32,
        }
    }
}

/// Connection progress of an owned slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Connect requested, no status yet.
    Connecting,
    /// Connected, control metadata requested.
    MetadataPending,
    /// Subscribed, but no good sample since subscribing or since the data
    /// source was lost.
    Waiting,
    /// Subscribed and receiving samples.
    Live,
    /// Disconnect requested; deliveries are ignored until the slot is freed.
    Closing,
}

/// A channel slot.
#[derive(Debug)]
pub struct Slot {
    pub(crate) curve: CurveId,
    pub(crate) name: String,
    pub(crate) channel: Option<ChannelHandle>,
    pub(crate) subscription: Option<SubscriptionHandle>,
    pub(crate) state: SlotState,
    pub(crate) value: Sampler,
}

impl Slot {
    fn new(curve: CurveId, name: &str) -> Self {
        Self {
            curve,
            name: name.to_string(),
            channel: None,
            subscription: None,
            state: SlotState::Connecting,
            value: Sampler::new(),
        }
    }

    /// Get the owning curve.
    #[must_use]
    pub fn curve(&self) -> CurveId {
        self.curve
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the connection state.
    #[must_use]
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Check whether a subscription is active.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Get the cached value.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value.sample()
    }
}

#[derive(Debug, Default)]
struct Entry {
    generation: u32,
    slot: Option<Slot>,
}

/// Fixed-capacity table of channel slots.
#[derive(Debug)]
pub struct SlotRegistry {
    entries: Vec<Entry>,
}

impl SlotRegistry {
    /// Create a registry with `capacity` slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, Entry::default);
        Self { entries }
    }

    /// Get the registry capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Get the number of owned slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.slot.is_some()).count()
    }

    /// Check if no slot is owned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if every slot is owned.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.iter().all(|e| e.slot.is_some())
    }

    /// Allocate the first free slot for `curve`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] if every slot is owned.
    pub fn allocate(&mut self, curve: CurveId, name: &str) -> Result<SlotId, RegistryError> {
        let capacity = self.capacity();
        let (index, entry) = self
            .entries
            .iter_mut()
            .enumerate()
            .find(|(_, e)| e.slot.is_none())
            .ok_or(RegistryError::Full { capacity })?;

        entry.slot = Some(Slot::new(curve, name));
        let id = SlotId {
            index: index as u32,
            generation: entry.generation,
        };
        debug!(channel = %name, slot = index, generation = id.generation, "Slot allocated");
        Ok(id)
    }

    /// Free a slot, returning its contents.
    ///
    /// Returns `None` if `id` does not refer to an owned slot.
    pub fn free(&mut self, id: SlotId) -> Option<Slot> {
        let entry = self.entries.get_mut(id.index())?;
        if entry.generation != id.generation {
            return None;
        }
        let slot = entry.slot.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        debug!(channel = %slot.name, slot = id.index(), "Slot freed");
        Some(slot)
    }

    /// Get a slot.
    #[must_use]
    pub fn get(&self, id: SlotId) -> Option<&Slot> {
        self.entries
            .get(id.index())
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.slot.as_ref())
    }

    /// Get a slot mutably.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.entries
            .get_mut(id.index())
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.slot.as_mut())
    }

    /// Find the slot owned by `curve`.
    #[must_use]
    pub fn find_by_curve(&self, curve: CurveId) -> Option<SlotId> {
        self.iter().find(|(_, s)| s.curve == curve).map(|(id, _)| id)
    }

    /// Iterate over owned slots.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.entries.iter().enumerate().filter_map(|(index, e)| {
            e.slot.as_ref().map(|slot| {
                (
                    SlotId {
                        index: index as u32,
                        generation: e.generation,
                    },
                    slot,
                )
            })
        })
    }
}
