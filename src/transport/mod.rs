//! # Transport Boundary
//!
//! The contract between the graph and whatever carries metadata and signal
//! values over the network. The graph only ever sees decoded events; framing,
//! discovery and OSC encoding live behind this trait.
//!
//! ## Implementations
//!
//! | Transport | Module | Description |
//! |-----------|--------|-------------|
//! | `MemoryTransport` | `memory` | In-process loopback for testing/embedding |

pub mod memory;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{
    ObjectId, ObjectKind, ObjectTypes, PropertyDiff, PropertyKey, SlotLocation, Timetag, Value,
};
use crate::Result;

pub use memory::MemoryTransport;

// ============================================================================
// Inbound events
// ============================================================================

/// What happened to a record, as reported by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Announce,
    Update,
    Remove,
    Expire,
}

/// Property changes for one slot of a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDiff {
    pub location: SlotLocation,
    pub diff: PropertyDiff,
}

/// A property diff addressed to one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDelta {
    pub kind: ObjectKind,
    pub id: ObjectId,
    pub diff: PropertyDiff,
    pub slots: Vec<SlotDiff>,
}

impl RecordDelta {
    pub fn new(kind: ObjectKind, id: ObjectId) -> Self {
        Self { kind, id, diff: PropertyDiff::new(), slots: Vec::new() }
    }

    /// Builder: set a record property.
    pub fn with(mut self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> Self {
        self.diff = self.diff.set(key, value);
        self
    }

    /// Builder: remove a record property.
    pub fn without(mut self, key: impl Into<PropertyKey>) -> Self {
        self.diff = self.diff.remove(key);
        self
    }

    /// Builder: set a property on one map slot.
    pub fn with_slot(mut self, location: SlotLocation, key: impl Into<PropertyKey>, value: impl Into<Value>) -> Self {
        match self.slots.iter_mut().find(|s| s.location == location) {
            Some(slot) => slot.diff = std::mem::take(&mut slot.diff).set(key, value),
            None => self.slots.push(SlotDiff { location, diff: PropertyDiff::new().set(key, value) }),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.diff.is_empty() && self.slots.iter().all(|s| s.diff.is_empty())
    }

    /// Total number of property changes, slots included.
    pub fn len(&self) -> usize {
        self.diff.len() + self.slots.iter().map(|s| s.diff.len()).sum::<usize>()
    }
}

/// A live value for one signal instance. `value: None` releases the
/// instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueUpdate {
    pub signal: ObjectId,
    /// Defaults to instance 0 when absent.
    pub instance: Option<u64>,
    pub value: Option<Value>,
    pub time: Timetag,
}

/// One decoded message from the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkEvent {
    Record { event: EventType, delta: RecordDelta },
    Value(ValueUpdate),
    /// Device liveness ping.
    Sync { device: ObjectId },
}

impl NetworkEvent {
    pub fn announce(delta: RecordDelta) -> Self {
        NetworkEvent::Record { event: EventType::Announce, delta }
    }

    pub fn update(delta: RecordDelta) -> Self {
        NetworkEvent::Record { event: EventType::Update, delta }
    }

    pub fn remove(kind: ObjectKind, id: ObjectId) -> Self {
        NetworkEvent::Record { event: EventType::Remove, delta: RecordDelta::new(kind, id) }
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Where an outbound diff goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// The shared discovery bus.
    Bus,
    /// The device that owns the record.
    Device(ObjectId),
}

/// A subscription request sent to a device. `lease_secs == 0` cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub device: ObjectId,
    pub types: ObjectTypes,
    pub lease_secs: u32,
}

// ============================================================================
// Transport trait
// ============================================================================

/// The network contract.
///
/// Handles are shared: other threads may feed events into a transport while
/// the owning graph polls it.
pub trait Transport: Send + Sync + 'static {
    /// Wait up to `timeout` for the next event. `Duration::ZERO` never blocks.
    fn recv(&self, timeout: Duration) -> Result<Option<NetworkEvent>>;

    /// Non-blocking receive.
    fn try_recv(&self) -> Result<Option<NetworkEvent>> {
        self.recv(Duration::ZERO)
    }

    fn send(&self, dest: Destination, delta: &RecordDelta) -> Result<()>;

    fn request_subscription(&self, request: SubscriptionRequest) -> Result<()>;

    /// Current network time.
    fn now(&self) -> Timetag;
}
