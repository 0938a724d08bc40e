//! Object records: devices, signals, maps and links as stored by the graph.
//!
//! Records reference each other only by [`ObjectId`]. Resolving a reference
//! always goes through the owning graph.

use std::borrow::Cow;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{Direction, Property, PropertyKey, PropertyTable, Timetag, Value};
use crate::instance::InstanceManager;
use crate::{Error, Result};

/// Opaque 64-bit object identifier, unique across the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::from(id.0 as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Device,
    Signal,
    Map,
    Link,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [ObjectKind::Device, ObjectKind::Signal, ObjectKind::Map, ObjectKind::Link];

    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Device => "device",
            ObjectKind::Signal => "signal",
            ObjectKind::Map => "map",
            ObjectKind::Link => "link",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-record synchronization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    New,
    Modified,
    Removed,
    Expired,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Removed | Status::Expired)
    }
}

/// Lifecycle transition reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    Added,
    Modified,
    Removed,
    Expired,
}

impl From<Lifecycle> for Status {
    fn from(l: Lifecycle) -> Self {
        match l {
            Lifecycle::Added => Status::New,
            Lifecycle::Modified => Status::Modified,
            Lifecycle::Removed => Status::Removed,
            Lifecycle::Expired => Status::Expired,
        }
    }
}

// ============================================================================
// ObjectTypes
// ============================================================================

/// Bit set of object categories, used for listener filters and
/// subscription scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ObjectTypes(u8);

impl ObjectTypes {
    pub const NONE: ObjectTypes = ObjectTypes(0);
    pub const DEVICE: ObjectTypes = ObjectTypes(0x01);
    pub const SIGNAL_IN: ObjectTypes = ObjectTypes(0x02);
    pub const SIGNAL_OUT: ObjectTypes = ObjectTypes(0x04);
    pub const SIGNAL: ObjectTypes = ObjectTypes(0x06);
    pub const MAP_IN: ObjectTypes = ObjectTypes(0x08);
    pub const MAP_OUT: ObjectTypes = ObjectTypes(0x10);
    pub const MAP: ObjectTypes = ObjectTypes(0x18);
    pub const LINK: ObjectTypes = ObjectTypes(0x20);
    pub const ALL: ObjectTypes = ObjectTypes(0x3f);

    const NAMES: [(&'static str, ObjectTypes); 9] = [
        ("all", ObjectTypes::ALL),
        ("device", ObjectTypes::DEVICE),
        ("signal", ObjectTypes::SIGNAL),
        ("signal_in", ObjectTypes::SIGNAL_IN),
        ("signal_out", ObjectTypes::SIGNAL_OUT),
        ("map", ObjectTypes::MAP),
        ("map_in", ObjectTypes::MAP_IN),
        ("map_out", ObjectTypes::MAP_OUT),
        ("link", ObjectTypes::LINK),
    ];

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits_truncate(bits: u8) -> Self {
        ObjectTypes(bits & Self::ALL.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ObjectTypes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ObjectTypes) -> bool {
        self.0 & other.0 != 0
    }

    /// Every category an object of `kind` can fall into.
    pub fn of_kind(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Device => Self::DEVICE,
            ObjectKind::Signal => Self::SIGNAL,
            ObjectKind::Map => Self::MAP,
            ObjectKind::Link => Self::LINK,
        }
    }
}

impl BitOr for ObjectTypes {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        ObjectTypes(self.0 | rhs.0)
    }
}

impl BitOrAssign for ObjectTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ObjectTypes {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        ObjectTypes(self.0 & rhs.0)
    }
}

impl TryFrom<Vec<String>> for ObjectTypes {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        names.iter().try_fold(ObjectTypes::NONE, |acc, name| {
            ObjectTypes::NAMES
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| acc | *t)
                .ok_or_else(|| Error::Parse { input: name.clone(), target: "object type".into() })
        })
    }
}

impl From<ObjectTypes> for Vec<String> {
    fn from(t: ObjectTypes) -> Self {
        // Single-bit names only, so the list round-trips exactly.
        ObjectTypes::NAMES
            .iter()
            .filter(|(_, bit)| bit.0.count_ones() == 1 && t.contains(*bit))
            .map(|(n, _)| n.to_string())
            .collect()
    }
}

// ============================================================================
// Map slots
// ============================================================================

/// One end of a map: the signal it attaches to and its slot properties
/// (bounds, direction, min/max, length, type, send-as-instance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub signal: ObjectId,
    pub properties: PropertyTable,
}

impl Slot {
    pub fn new(signal: ObjectId) -> Self {
        Self { signal, properties: PropertyTable::new() }
    }
}

/// Address of a slot within a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotLocation {
    Source(usize),
    Destination,
}

// ============================================================================
// Record
// ============================================================================

/// Kind-specific part of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    Device {
        synced: Timetag,
    },
    Signal {
        device: ObjectId,
        instances: InstanceManager,
    },
    Map {
        sources: SmallVec<[Slot; 4]>,
        destination: Slot,
        /// Created locally and not yet confirmed by the network.
        local: bool,
    },
    Link {
        devices: [ObjectId; 2],
    },
}

/// A graph-owned object record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: ObjectId,
    pub status: Status,
    pub properties: PropertyTable,
    pub data: RecordData,
    /// When the record entered a terminal status.
    pub terminal_at: Option<Timetag>,
    /// Poll cycle in which listeners last saw this record's current status.
    pub observed_cycle: Option<u64>,
}

impl Record {
    pub fn new(id: ObjectId, data: RecordData) -> Self {
        Self {
            id,
            status: Status::New,
            properties: PropertyTable::new(),
            data,
            terminal_at: None,
            observed_cycle: None,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self.data {
            RecordData::Device { .. } => ObjectKind::Device,
            RecordData::Signal { .. } => ObjectKind::Signal,
            RecordData::Map { .. } => ObjectKind::Map,
            RecordData::Link { .. } => ObjectKind::Link,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn name(&self) -> Option<&str> {
        self.properties.value(&Property::Name.into()).and_then(Value::as_str)
    }

    /// Property lookup including the synthesized `@id`.
    pub fn property(&self, key: &PropertyKey) -> Option<Cow<'_, Value>> {
        if key == &PropertyKey::WellKnown(Property::Id) {
            return Some(Cow::Owned(self.id.into()));
        }
        self.properties.value(key).map(Cow::Borrowed)
    }

    /// Signal direction, if this is a signal that declares one.
    pub fn direction(&self) -> Option<Direction> {
        if self.kind() != ObjectKind::Signal {
            return None;
        }
        self.properties
            .value(&Property::Direction.into())
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// The categories this record falls into, for listener filtering.
    pub fn types(&self) -> ObjectTypes {
        match self.direction() {
            Some(Direction::Input) => ObjectTypes::SIGNAL_IN,
            Some(Direction::Output) => ObjectTypes::SIGNAL_OUT,
            None => ObjectTypes::of_kind(self.kind()),
        }
    }

    pub fn device(&self) -> Option<ObjectId> {
        match &self.data {
            RecordData::Signal { device, .. } => Some(*device),
            _ => None,
        }
    }

    pub fn instances(&self) -> Option<&InstanceManager> {
        match &self.data {
            RecordData::Signal { instances, .. } => Some(instances),
            _ => None,
        }
    }

    pub fn instances_mut(&mut self) -> Option<&mut InstanceManager> {
        match &mut self.data {
            RecordData::Signal { instances, .. } => Some(instances),
            _ => None,
        }
    }

    /// For maps: source signals in slot order.
    pub fn map_sources(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let slots: &[Slot] = match &self.data {
            RecordData::Map { sources, .. } => sources.as_slice(),
            _ => &[],
        };
        slots.iter().map(|s| s.signal)
    }

    pub fn map_destination(&self) -> Option<ObjectId> {
        match &self.data {
            RecordData::Map { destination, .. } => Some(destination.signal),
            _ => None,
        }
    }

    /// For maps: every attached signal, sources then destination.
    pub fn map_signals(&self) -> Vec<ObjectId> {
        self.map_sources().chain(self.map_destination()).collect()
    }

    pub fn link_devices(&self) -> Option<[ObjectId; 2]> {
        match &self.data {
            RecordData::Link { devices } => Some(*devices),
            _ => None,
        }
    }

    pub fn slot(&self, loc: SlotLocation) -> Option<&Slot> {
        match (&self.data, loc) {
            (RecordData::Map { sources, .. }, SlotLocation::Source(i)) => sources.get(i),
            (RecordData::Map { destination, .. }, SlotLocation::Destination) => Some(destination),
            _ => None,
        }
    }

    pub fn slot_mut(&mut self, loc: SlotLocation) -> Option<&mut Slot> {
        match (&mut self.data, loc) {
            (RecordData::Map { sources, .. }, SlotLocation::Source(i)) => sources.get_mut(i),
            (RecordData::Map { destination, .. }, SlotLocation::Destination) => Some(destination),
            _ => None,
        }
    }

    /// All slots of a map with their locations.
    pub fn slots(&self) -> Vec<(SlotLocation, &Slot)> {
        match &self.data {
            RecordData::Map { sources, destination, .. } => sources
                .iter()
                .enumerate()
                .map(|(i, s)| (SlotLocation::Source(i), s))
                .chain(std::iter::once((SlotLocation::Destination, destination)))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.data, RecordData::Map { local: true, .. })
    }

    /// Whether this record holds edits not yet pushed.
    pub fn has_staged(&self) -> bool {
        self.properties.has_staged() || self.slots().iter().any(|(_, s)| s.properties.has_staged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_types_set_ops() {
        let t = ObjectTypes::DEVICE | ObjectTypes::SIGNAL_IN;
        assert!(t.contains(ObjectTypes::DEVICE));
        assert!(t.intersects(ObjectTypes::SIGNAL));
        assert!(!t.contains(ObjectTypes::SIGNAL));
        assert!(!t.intersects(ObjectTypes::MAP));
    }

    #[test]
    fn test_object_types_serde() {
        let t: ObjectTypes = serde_json::from_str(r#"["device","map"]"#).unwrap();
        assert_eq!(t, ObjectTypes::DEVICE | ObjectTypes::MAP);
        let back: ObjectTypes = serde_json::from_str(&serde_json::to_string(&t).unwrap()).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<ObjectTypes>(r#"["gizmo"]"#).is_err());
    }

    #[test]
    fn test_synthesized_id_property() {
        let r = Record::new(ObjectId(42), RecordData::Device { synced: Timetag::ZERO });
        let id = r.property(&Property::Id.into()).unwrap();
        assert_eq!(id.as_i64(), Some(42));
        assert!(r.property(&Property::Name.into()).is_none());
    }

    #[test]
    fn test_signal_types_follow_direction() {
        let mut r = Record::new(
            ObjectId(7),
            RecordData::Signal { device: ObjectId(1), instances: InstanceManager::default() },
        );
        assert_eq!(r.types(), ObjectTypes::SIGNAL);
        r.properties.apply(Property::Direction, Value::from("input")).unwrap();
        assert_eq!(r.types(), ObjectTypes::SIGNAL_IN);
    }
}
