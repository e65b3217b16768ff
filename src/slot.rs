//! A reusable display collection, the reference requester implementation.
//!
//! Each slot shows at most one resource at a time. Binding a slot to a key
//! issues a fresh ticket; requesters carrying an older ticket are no longer
//! current and their deliveries are dropped. This is the reuse race the
//! coordinator's guard check exists for: a slot scrolled off screen and
//! rebound to another post while the first post's image is still loading.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::requester::Requester;
use crate::types::ResourceKey;

/// Position of a slot in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

impl From<usize> for SlotId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

struct SlotState {
    key: ResourceKey,
    ticket: u64,
    content: Option<Bytes>,
    deliveries: usize,
}

#[derive(Default)]
struct Slots {
    states: Mutex<HashMap<SlotId, SlotState>>,
    next_ticket: AtomicU64,
}

/// Shared table of display slots.
///
/// Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct SlotTable {
    slots: Arc<Slots>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `slot` at `key`, clearing whatever it showed before.
    ///
    /// The returned requester is current until the slot is bound again or
    /// released.
    pub fn bind(&self, slot: SlotId, key: impl Into<ResourceKey>) -> SlotRequester {
        let key = key.into();
        let ticket = self.slots.next_ticket.fetch_add(1, Ordering::Relaxed);

        self.slots.states.lock().insert(
            slot,
            SlotState {
                key: key.clone(),
                ticket,
                content: None,
                deliveries: 0,
            },
        );

        SlotRequester {
            slots: Arc::clone(&self.slots),
            slot,
            key,
            ticket,
        }
    }

    /// The key `slot` is currently bound to.
    pub fn key(&self, slot: SlotId) -> Option<ResourceKey> {
        self.slots
            .states
            .lock()
            .get(&slot)
            .map(|state| state.key.clone())
    }

    /// What `slot` currently shows.
    pub fn content(&self, slot: SlotId) -> Option<Bytes> {
        self.slots
            .states
            .lock()
            .get(&slot)
            .and_then(|state| state.content.clone())
    }

    /// How many payloads `slot` has received since it was last bound.
    pub fn deliveries(&self, slot: SlotId) -> usize {
        self.slots
            .states
            .lock()
            .get(&slot)
            .map_or(0, |state| state.deliveries)
    }

    /// Unbind `slot`. Requesters issued for it stop being current.
    pub fn release(&self, slot: SlotId) {
        self.slots.states.lock().remove(&slot);
    }

    /// Number of bound slots.
    pub fn len(&self) -> usize {
        self.slots.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotTable")
            .field("bound", &self.len())
            .finish()
    }
}

/// One request issued by a slot. See [`SlotTable::bind`].
pub struct SlotRequester {
    slots: Arc<Slots>,
    slot: SlotId,
    key: ResourceKey,
    ticket: u64,
}

impl SlotRequester {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }
}

impl Requester for SlotRequester {
    fn still_current(&self) -> bool {
        self.slots
            .states
            .lock()
            .get(&self.slot)
            .is_some_and(|state| state.ticket == self.ticket)
    }

    fn deliver(&self, _key: &ResourceKey, payload: Bytes) {
        // Re-checked under the lock: the slot may have been rebound since the guard ran
        if let Some(state) = self.slots.states.lock().get_mut(&self.slot) {
            if state.ticket == self.ticket {
                state.content = Some(payload);
                state.deliveries += 1;
            }
        }
    }
}

impl fmt::Debug for SlotRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRequester")
            .field("slot", &self.slot)
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .finish()
    }
}
