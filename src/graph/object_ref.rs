//! Borrowed view of one record, resolving cross references through the graph.

use std::borrow::Cow;

use super::Graph;
use crate::instance::{Instance, InstanceManager};
use crate::model::{
    Direction, ObjectId, ObjectKind, PropertyKey, PropertyTable, Record, Slot, SlotLocation,
    Status, Value,
};
use crate::query::Query;
use crate::transport::{MemoryTransport, Transport};
use crate::{Error, Result};

/// A record plus the graph that owns it.
pub struct ObjectRef<'g, T: Transport = MemoryTransport> {
    graph: &'g Graph<T>,
    record: &'g Record,
}

impl<T: Transport> Clone for ObjectRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Transport> Copy for ObjectRef<'_, T> {}

impl<T: Transport> std::fmt::Debug for ObjectRef<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.record.id)
            .field("kind", &self.record.kind())
            .field("status", &self.record.status)
            .finish()
    }
}

impl<'g, T: Transport> ObjectRef<'g, T> {
    pub(crate) fn new(graph: &'g Graph<T>, record: &'g Record) -> Self {
        Self { graph, record }
    }

    pub fn graph(&self) -> &'g Graph<T> {
        self.graph
    }

    pub fn record(&self) -> &'g Record {
        self.record
    }

    pub fn id(&self) -> ObjectId {
        self.record.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.record.kind()
    }

    pub fn status(&self) -> Status {
        self.record.status
    }

    pub fn properties(&self) -> &'g PropertyTable {
        &self.record.properties
    }

    pub fn name(&self) -> Option<&'g str> {
        self.record.name()
    }

    /// Property value; `@id` is synthesized.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Result<Cow<'g, Value>> {
        let key = key.into();
        self.record.property(&key).ok_or_else(|| Error::NotFound(format!("property {key} on {}", self.id())))
    }

    // ------------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------------

    /// The owning device of a signal.
    pub fn device(&self) -> Option<ObjectRef<'g, T>> {
        self.record.device().and_then(|d| self.graph.object(d))
    }

    pub fn direction(&self) -> Option<Direction> {
        self.record.direction()
    }

    /// `device/signal` for signals, the bare name otherwise.
    pub fn full_name(&self) -> Option<String> {
        let name = self.name()?;
        match self.device().and_then(|d| d.name()) {
            Some(dev) => Some(format!("{dev}/{name}")),
            None => Some(name.to_owned()),
        }
    }

    pub fn instances(&self) -> Option<&'g InstanceManager> {
        self.record.instances()
    }

    pub fn instance(&self, id: u64) -> Option<&'g Instance> {
        self.instances().and_then(|m| m.get(id))
    }

    // ------------------------------------------------------------------------
    // Maps and links
    // ------------------------------------------------------------------------

    pub fn slot(&self, loc: SlotLocation) -> Option<&'g Slot> {
        self.record.slot(loc)
    }

    pub fn sources(&self) -> Vec<ObjectRef<'g, T>> {
        self.record.map_sources().filter_map(|s| self.graph.object(s)).collect()
    }

    pub fn destination(&self) -> Option<ObjectRef<'g, T>> {
        self.record.map_destination().and_then(|s| self.graph.object(s))
    }

    pub fn linked_devices(&self) -> Vec<ObjectRef<'g, T>> {
        self.record
            .link_devices()
            .map(|ds| ds.iter().filter_map(|d| self.graph.object(*d)).collect())
            .unwrap_or_default()
    }

    pub fn is_local(&self) -> bool {
        self.record.is_local()
    }

    // ------------------------------------------------------------------------
    // Relation queries
    // ------------------------------------------------------------------------

    /// Signals of this device, optionally by direction.
    pub fn signals(&self, direction: Option<Direction>) -> Query {
        Query::SignalsOf { device: self.id(), direction }
    }

    /// Maps touching this signal (or any signal of this device).
    /// `Input` selects incoming maps, `Output` outgoing ones.
    pub fn maps(&self, direction: Option<Direction>) -> Query {
        match self.kind() {
            ObjectKind::Device => Query::MapsOfDevice { device: self.id(), direction },
            _ => Query::MapsOf { signal: self.id(), direction },
        }
    }

    pub fn links(&self) -> Query {
        Query::LinksOf { device: self.id() }
    }

    /// Signals attached to this map, sources then destination.
    pub fn map_signals(&self) -> Query {
        Query::SignalsOfMap { map: self.id() }
    }
}
