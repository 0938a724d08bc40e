//! # Object Model
//!
//! Plain data shared by every layer: values, timetags, property keys and
//! tables, and the device/signal/map/link records the graph owns.
//!
//! Design rule: no transport types and no graph handles here. This module
//! is pure data: no I/O, no callbacks.

pub mod object;
pub mod pattern;
pub mod property;
pub mod property_table;
pub mod time;
pub mod value;

pub use object::{
    Lifecycle, ObjectId, ObjectKind, ObjectTypes, Record, RecordData, Slot, SlotLocation, Status,
};
pub use pattern::wildcard_match;
pub use property::{
    BoundaryAction, Direction, KindConstraint, ProcessLocation, Property, PropertyInfo,
    PropertyKey, Protocol, StealMode,
};
pub use property_table::{PropertyChange, PropertyDiff, PropertyTable};
pub use time::Timetag;
pub use value::{Payload, TimedValue, Value, ValueType};
