//! # Object Graph
//!
//! The client-side cache of everything the network has told us about:
//! devices, signals, maps and links, kept consistent by applying inbound
//! events inside [`Graph::poll`].
//!
//! ```text
//! transport ──recv──▶ apply_event / value update ──▶ records + notifications
//!                                   │
//!              poll: housekeeping ──┴──▶ dispatch ──▶ evict ──▶ deferred
//! ```
//!
//! ## Record lifecycle
//!
//! New ──▶ Modified ──▶ Removed | Expired ──▶ (evicted)
//!
//! A terminal record stays visible until listeners have seen it in one poll
//! cycle and the grace period has elapsed. Queries skip terminal records.

mod listener;
mod object_ref;
mod subscription;

use std::cell::RefCell;
use std::time::Duration;

use hashbrown::HashMap;
use smallvec::SmallVec;

pub use listener::ListenerId;
pub use object_ref::ObjectRef;
pub use subscription::{Lease, Subscription, SubscriptionTarget};

use listener::{Deferred, Listeners, Notification};
use subscription::Subscriptions;

use crate::config::GraphConfig;
use crate::instance::{InstanceEvent, InstanceEvents, InstanceManager, ReleaseOrigin};
use crate::model::*;
use crate::query::Query;
use crate::transport::{
    Destination, EventType, MemoryTransport, NetworkEvent, RecordDelta, SlotDiff, Transport,
    ValueUpdate,
};
use crate::{Error, Result};

// ============================================================================
// Graph
// ============================================================================

/// The synchronized object store.
///
/// One logical thread owns a `Graph`; all network-driven mutation and all
/// listener dispatch happen inside [`poll`](Graph::poll).
pub struct Graph<T: Transport = MemoryTransport> {
    transport: T,
    config: GraphConfig,
    records: HashMap<ObjectId, Record>,
    /// Insertion order per kind, indexed by `kind_slot`.
    order: [Vec<ObjectId>; 4],
    listeners: Listeners<T>,
    notifications: Vec<Notification>,
    deferred: RefCell<Vec<Deferred<T>>>,
    subscriptions: Subscriptions,
    cycle: u64,
    local_counter: u32,
}

fn kind_slot(kind: ObjectKind) -> usize {
    match kind {
        ObjectKind::Device => 0,
        ObjectKind::Signal => 1,
        ObjectKind::Map => 2,
        ObjectKind::Link => 3,
    }
}

/// In-memory graph for testing and embedding.
impl Graph<MemoryTransport> {
    pub fn open_memory() -> Self {
        Self::new(MemoryTransport::new())
    }
}

impl<T: Transport> Graph<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, GraphConfig::default())
    }

    pub fn with_config(transport: T, config: GraphConfig) -> Self {
        let autosubscribe = config.autosubscribe;
        let mut graph = Self {
            transport,
            config,
            records: HashMap::new(),
            order: Default::default(),
            listeners: Listeners::default(),
            notifications: Vec::new(),
            deferred: RefCell::new(Vec::new()),
            subscriptions: Subscriptions::default(),
            cycle: 0,
            local_counter: 0,
        };
        if !autosubscribe.is_empty() {
            // Nothing is known yet, so this only registers the pattern.
            if let Err(e) = graph.subscribe("*", autosubscribe, Lease::Renewing) {
                tracing::debug!(error = %e, "autosubscribe pattern not registered");
            }
        }
        graph
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Current network time, from the transport.
    pub fn now(&self) -> Timetag {
        self.transport.now()
    }

    /// Number of completed `poll` cycles.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Any record still held by the graph, including terminal ones awaiting
    /// eviction.
    pub fn object(&self, id: ObjectId) -> Option<ObjectRef<'_, T>> {
        self.records.get(&id).map(|r| ObjectRef::new(self, r))
    }

    pub fn record(&self, id: ObjectId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.records.contains_key(&id)
    }

    /// Records of `kind` in insertion order, any status.
    pub fn records_of(&self, kind: ObjectKind) -> impl Iterator<Item = &Record> + '_ {
        self.order[kind_slot(kind)].iter().filter_map(|id| self.records.get(id))
    }

    fn live_of(&self, kind: ObjectKind) -> impl Iterator<Item = &Record> + '_ {
        self.records_of(kind).filter(|r| r.is_live())
    }

    pub fn device_by_name(&self, name: &str) -> Option<ObjectRef<'_, T>> {
        self.live_of(ObjectKind::Device)
            .find(|r| r.name() == Some(name))
            .map(|r| ObjectRef::new(self, r))
    }

    /// Resolve `device/signal` (a leading `/` is ignored).
    pub fn signal_by_path(&self, path: &str) -> Option<ObjectRef<'_, T>> {
        let (dev_name, sig_name) = path.trim_start_matches('/').split_once('/')?;
        let device = self.device_by_name(dev_name)?.id();
        self.live_of(ObjectKind::Signal)
            .find(|r| r.device() == Some(device) && r.name() == Some(sig_name))
            .map(|r| ObjectRef::new(self, r))
    }

    /// The live map with exactly these sources (in order) and destination.
    pub fn map_by_signals(&self, sources: &[ObjectId], destination: ObjectId) -> Option<ObjectRef<'_, T>> {
        self.live_of(ObjectKind::Map)
            .find(|r| r.map_destination() == Some(destination) && r.map_sources().eq(sources.iter().copied()))
            .map(|r| ObjectRef::new(self, r))
    }

    /// Start a query over every live record of `kind`.
    pub fn query(&self, kind: ObjectKind) -> Query {
        Query::all(kind)
    }

    /// A live record of the expected kind.
    fn live(&self, id: ObjectId, kind: ObjectKind) -> Result<&Record> {
        let record = self.records.get(&id).ok_or_else(|| Error::NotFound(format!("{kind} {id}")))?;
        check_live(record, kind)?;
        Ok(record)
    }

    fn live_mut(&mut self, id: ObjectId, kind: ObjectKind) -> Result<&mut Record> {
        let record = self.records.get_mut(&id).ok_or_else(|| Error::NotFound(format!("{kind} {id}")))?;
        check_live(record, kind)?;
        Ok(record)
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a lifecycle listener for records matching `types`.
    ///
    /// Callbacks receive a shared view of the graph. To change listeners or
    /// records from inside a callback, use [`defer`](Graph::defer).
    pub fn add_listener<F>(&mut self, types: ObjectTypes, f: F) -> ListenerId
    where
        F: FnMut(ObjectRef<'_, T>, Lifecycle) + Send + 'static,
    {
        self.listeners.add_record(types, Box::new(f))
    }

    /// Register a listener for instance events on one signal, or on all
    /// signals when `signal` is `None`.
    pub fn add_instance_listener<F>(&mut self, signal: Option<ObjectId>, f: F) -> ListenerId
    where
        F: FnMut(ObjectRef<'_, T>, InstanceEvent) + Send + 'static,
    {
        self.listeners.add_instance(signal, Box::new(f))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Queue `f` to run with mutable access once the current dispatch pass
    /// (or, outside dispatch, the next `poll`) finishes.
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce(&mut Graph<T>) + Send + 'static,
    {
        self.deferred.borrow_mut().push(Box::new(f));
    }

    fn notify(&mut self, id: ObjectId, lifecycle: Lifecycle) {
        self.notifications.push(Notification::Record { id, lifecycle });
    }

    fn notify_instances(&mut self, signal: ObjectId, events: InstanceEvents) {
        self.notifications
            .extend(events.into_iter().map(|event| Notification::Instance { signal, event }));
    }

    // ========================================================================
    // Poll
    // ========================================================================

    /// Advance the graph.
    ///
    /// Blocks up to `timeout` for the first event, drains everything queued,
    /// runs housekeeping (device expiry, subscription renewal), dispatches
    /// listeners in arrival order, evicts records whose grace period is over
    /// and finally runs deferred actions. Returns the number of events
    /// processed. `Duration::ZERO` never blocks.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        self.cycle += 1;
        let mut processed = 0;

        let mut next = self.transport.recv(timeout);
        loop {
            match next {
                Ok(Some(event)) => {
                    self.handle(event);
                    processed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "transport receive failed");
                    break;
                }
            }
            next = self.transport.try_recv();
        }

        let now = self.transport.now();
        self.housekeeping(now);
        self.dispatch();
        self.evict(now);

        let actions = std::mem::take(self.deferred.get_mut());
        for action in actions {
            action(self);
        }
        if processed > 0 {
            tracing::trace!(processed, cycle = self.cycle, "poll");
        }
        processed
    }

    fn handle(&mut self, event: NetworkEvent) {
        let result = match event {
            NetworkEvent::Record { event, delta } => self.apply_event(event, delta).map(|_| ()),
            NetworkEvent::Value(update) => self.apply_value(update),
            NetworkEvent::Sync { device } => {
                self.touch_device(device);
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "dropping network event");
        }
    }

    fn housekeeping(&mut self, now: Timetag) {
        let timeout = self.config.device_timeout_secs as f64;
        if timeout > 0.0 {
            let stale: Vec<ObjectId> = self
                .live_of(ObjectKind::Device)
                .filter(|r| match r.data {
                    RecordData::Device { synced } => now.diff_secs(synced) > timeout,
                    _ => false,
                })
                .map(|r| r.id)
                .collect();
            for id in stale {
                tracing::debug!(%id, "device timed out");
                self.remove_record(id, Lifecycle::Expired);
            }
        }
        self.renew_subscriptions(now);
    }

    fn dispatch(&mut self) {
        let notes = std::mem::take(&mut self.notifications);
        if notes.is_empty() {
            return;
        }
        let mut listeners = std::mem::take(&mut self.listeners);
        for note in &notes {
            listeners.dispatch(self, *note);
        }
        self.listeners = listeners;

        let cycle = self.cycle;
        for note in &notes {
            if let Notification::Record { id, .. } = note {
                if let Some(r) = self.records.get_mut(id) {
                    r.observed_cycle = Some(cycle);
                }
            }
        }
    }

    fn evict(&mut self, now: Timetag) {
        let grace = self.config.grace_period().as_secs_f64();
        let cycle = self.cycle;
        let doomed: Vec<(ObjectId, ObjectKind)> = self
            .records
            .values()
            .filter(|r| {
                !r.is_live()
                    && r.observed_cycle.is_some_and(|c| c < cycle)
                    && r.terminal_at.is_some_and(|t| now.has_elapsed_since(t, grace))
            })
            .map(|r| (r.id, r.kind()))
            .collect();
        for (id, kind) in doomed {
            self.records.remove(&id);
            self.order[kind_slot(kind)].retain(|x| *x != id);
            tracing::trace!(%id, %kind, "evicted");
        }
    }

    // ========================================================================
    // Applying network events
    // ========================================================================

    /// Apply one record event.
    ///
    /// Announce/Update upsert: an unknown id creates a record (`Added`), a
    /// known one merges the diff into committed state (`Modified` only if
    /// something changed). Remove/Expire mark the record terminal. Returns
    /// `None` when nothing changed.
    pub fn apply_event(&mut self, event: EventType, delta: RecordDelta) -> Result<Option<Lifecycle>> {
        match event {
            EventType::Announce | EventType::Update => self.upsert(delta),
            EventType::Remove => Ok(self.remove_record(delta.id, Lifecycle::Removed)),
            EventType::Expire => Ok(self.remove_record(delta.id, Lifecycle::Expired)),
        }
    }

    /// Mark a record Removed (cascading to dependents) and schedule its
    /// eviction. Returns `None` if it was unknown or already terminal.
    pub fn apply_removal(&mut self, id: ObjectId) -> Option<Lifecycle> {
        self.remove_record(id, Lifecycle::Removed)
    }

    fn upsert(&mut self, delta: RecordDelta) -> Result<Option<Lifecycle>> {
        let now = self.transport.now();
        let existing = self.records.get(&delta.id).map(|r| (r.kind(), r.is_live()));
        match existing {
            Some((kind, true)) if kind != delta.kind => Err(Error::MalformedEvent(format!(
                "{} {} announced as {}",
                kind, delta.id, delta.kind
            ))),
            Some((_, true)) => self.merge(delta, now),
            // A terminal record is replaced, whatever kind it was.
            Some((_, false)) | None => self.create(delta, now),
        }
    }

    fn create(&mut self, delta: RecordDelta, now: Timetag) -> Result<Option<Lifecycle>> {
        let data = match delta.kind {
            ObjectKind::Device => RecordData::Device { synced: now },
            ObjectKind::Signal => {
                let device = required_id(&delta.diff, Property::Device)?;
                self.check_device_ref(delta.id, device)?;
                self.ensure_device(device)?;
                RecordData::Signal { device, instances: self.default_pool() }
            }
            ObjectKind::Map => {
                let sources = required_ids(&delta.diff, Property::Sources)?;
                let destination = required_id(&delta.diff, Property::Destination)?;
                self.check_map_endpoints(&sources, destination)
                    .map_err(|e| Error::MalformedEvent(format!("map {}: {e}", delta.id)))?;
                RecordData::Map {
                    sources: sources.into_iter().map(Slot::new).collect(),
                    destination: Slot::new(destination),
                    local: false,
                }
            }
            ObjectKind::Link => {
                let ids = required_ids(&delta.diff, Property::Devices)?;
                let &[a, b] = ids.as_slice() else {
                    return Err(Error::MalformedEvent(format!("link {} needs two devices", delta.id)));
                };
                // Both ends are checked before either placeholder is created.
                self.check_device_ref(delta.id, a)?;
                self.check_device_ref(delta.id, b)?;
                self.ensure_device(a)?;
                self.ensure_device(b)?;
                RecordData::Link { devices: [a, b] }
            }
        };

        if let Some(old) = self.records.remove(&delta.id) {
            self.order[kind_slot(old.kind())].retain(|x| *x != delta.id);
            tracing::debug!(id = %delta.id, was = %old.kind(), now = %delta.kind, "terminal record replaced");
        }

        let mut record = Record::new(delta.id, data);
        record.properties.apply_diff(&delta.diff);
        apply_slot_diffs(&mut record, &delta.slots);
        sync_instance_pool(&mut record, &self.config);
        self.insert(record);
        if let Some(device) = self.records.get(&delta.id).and_then(Record::device) {
            self.touch_device(device);
        }
        if delta.kind == ObjectKind::Device {
            self.autosubscribe(delta.id);
        }
        Ok(Some(Lifecycle::Added))
    }

    fn insert(&mut self, record: Record) {
        let (id, kind) = (record.id, record.kind());
        self.records.insert(id, record);
        self.order[kind_slot(kind)].push(id);
        self.notify(id, Lifecycle::Added);
        tracing::debug!(%id, %kind, "record added");
    }

    /// Fail unless `id` can name a device for `owner`: a live device, or an
    /// id that is unknown or terminal.
    fn check_device_ref(&self, owner: ObjectId, id: ObjectId) -> Result<()> {
        if id == owner {
            return Err(Error::MalformedEvent(format!("{owner} refers to itself")));
        }
        match self.records.get(&id) {
            Some(r) if r.is_live() && r.kind() != ObjectKind::Device => {
                Err(Error::MalformedEvent(format!("{id} is a {}, not a device", r.kind())))
            }
            _ => Ok(()),
        }
    }

    /// Make sure a device record exists, creating a placeholder if needed.
    fn ensure_device(&mut self, id: ObjectId) -> Result<()> {
        match self.records.get(&id) {
            Some(r) if r.is_live() && r.kind() != ObjectKind::Device => {
                Err(Error::MalformedEvent(format!("{id} is a {}, not a device", r.kind())))
            }
            Some(r) if r.is_live() => Ok(()),
            _ => self.upsert(RecordDelta::new(ObjectKind::Device, id)).map(|_| ()),
        }
    }

    fn merge(&mut self, delta: RecordDelta, now: Timetag) -> Result<Option<Lifecycle>> {
        let id = delta.id;
        let record = self.records.get_mut(&id).ok_or_else(|| Error::NotFound(format!("{id}")))?;
        check_relations_unchanged(record, &delta.diff)?;

        let mut changed = record.properties.apply_diff(&delta.diff);
        changed |= apply_slot_diffs(record, &delta.slots);
        match &mut record.data {
            RecordData::Device { synced } => *synced = now,
            RecordData::Map { local, .. } => *local = false,
            _ => {}
        }
        sync_instance_pool(record, &self.config);
        let owner = record.device();

        if let Some(device) = owner {
            self.touch_device(device);
        }
        if !changed {
            tracing::trace!(%id, "duplicate delivery ignored");
            return Ok(None);
        }
        if let Some(record) = self.records.get_mut(&id) {
            record.status = Status::Modified;
        }
        self.notify(id, Lifecycle::Modified);
        tracing::debug!(%id, kind = %delta.kind, "record modified");
        if delta.kind == ObjectKind::Device {
            self.autosubscribe(id);
        }
        Ok(Some(Lifecycle::Modified))
    }

    /// Mark terminal and cascade. Returns `None` if unknown or already
    /// terminal.
    fn remove_record(&mut self, id: ObjectId, how: Lifecycle) -> Option<Lifecycle> {
        let now = self.transport.now();
        let record = self.records.get_mut(&id)?;
        if !record.is_live() {
            return None;
        }
        record.status = how.into();
        record.terminal_at = Some(now);
        record.observed_cycle = None;
        let kind = record.kind();
        self.notify(id, how);
        tracing::debug!(%id, %kind, ?how, "record removed");

        for dependent in self.dependents(id, kind) {
            self.remove_record(dependent, how);
        }
        if kind == ObjectKind::Device {
            self.subscriptions.drop_device(id);
        }
        Some(how)
    }

    /// Live records that cannot outlive `id`.
    fn dependents(&self, id: ObjectId, kind: ObjectKind) -> Vec<ObjectId> {
        match kind {
            ObjectKind::Device => self
                .live_of(ObjectKind::Signal)
                .filter(|r| r.device() == Some(id))
                .chain(self.live_of(ObjectKind::Link).filter(|r| {
                    r.link_devices().is_some_and(|ds| ds.contains(&id))
                }))
                .map(|r| r.id)
                .collect(),
            ObjectKind::Signal => self
                .live_of(ObjectKind::Map)
                .filter(|r| r.map_signals().contains(&id))
                .map(|r| r.id)
                .collect(),
            ObjectKind::Link => {
                let Some([a, b]) = self.records.get(&id).and_then(Record::link_devices) else {
                    return Vec::new();
                };
                self.live_of(ObjectKind::Map)
                    .filter(|r| {
                        let devices = self.map_devices(r);
                        devices.contains(&a) && devices.contains(&b)
                    })
                    .map(|r| r.id)
                    .collect()
            }
            ObjectKind::Map => Vec::new(),
        }
    }

    /// Devices owning the signals of a map.
    fn map_devices(&self, map: &Record) -> SmallVec<[ObjectId; 4]> {
        let mut devices: SmallVec<[ObjectId; 4]> = map
            .map_signals()
            .into_iter()
            .filter_map(|s| self.records.get(&s).and_then(Record::device))
            .collect();
        devices.sort_unstable();
        devices.dedup();
        devices
    }

    /// Refresh a device's liveness timestamp.
    fn touch_device(&mut self, id: ObjectId) {
        let now = self.transport.now();
        match self.records.get_mut(&id) {
            Some(Record { data: RecordData::Device { synced }, status, .. }) if !status.is_terminal() => {
                *synced = now;
            }
            _ => tracing::trace!(%id, "sync for unknown device"),
        }
    }

    /// Pool for a new signal before its own `@num_inst` / `@steal` apply.
    fn default_pool(&self) -> InstanceManager {
        let mut pool = InstanceManager::new(self.config.max_instances, self.config.default_steal);
        pool.resize(self.config.default_instances);
        pool
    }

    fn check_map_endpoints(&self, sources: &[ObjectId], destination: ObjectId) -> Result<()> {
        if sources.is_empty() {
            return Err(Error::InvalidArgument("a map needs at least one source".into()));
        }
        if sources.len() > self.config.max_map_sources {
            return Err(Error::CapacityExceeded {
                requested: sources.len(),
                capacity: self.config.max_map_sources,
            });
        }
        for id in sources.iter().chain(std::iter::once(&destination)) {
            self.live(*id, ObjectKind::Signal)?;
        }
        Ok(())
    }

    // ========================================================================
    // Signal values and instances
    // ========================================================================

    fn apply_value(&mut self, update: ValueUpdate) -> Result<()> {
        let signal = update.signal;
        let instance = update.instance.unwrap_or(0);
        let record = self.live_mut(signal, ObjectKind::Signal)?;
        let events = match update.value {
            Some(value) => {
                let value = conform_value(record, value)?;
                instances_of(record)?.update(instance, value, update.time)
            }
            None => match instances_of(record)?.release(instance, ReleaseOrigin::Network) {
                Ok(events) => events,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            },
        };
        let owner = record.device();
        if let Some(device) = owner {
            self.touch_device(device);
        }
        self.notify_instances(signal, events);
        Ok(())
    }

    fn signal_instances(&mut self, signal: ObjectId) -> Result<&mut InstanceManager> {
        instances_of(self.live_mut(signal, ObjectKind::Signal)?)
    }

    /// Reserve `n` instances on a signal using the lowest unused ids.
    pub fn reserve_instances(&mut self, signal: ObjectId, n: usize) -> Result<Vec<u64>> {
        self.signal_instances(signal)?.reserve(n)
    }

    pub fn reserve_instance_ids(&mut self, signal: ObjectId, ids: &[u64]) -> Result<Vec<u64>> {
        self.signal_instances(signal)?.reserve_ids(ids)
    }

    /// Local value update for one instance. The value is coerced to the
    /// signal's `@type` and checked against its `@length`.
    pub fn update_instance(&mut self, signal: ObjectId, instance: u64, value: impl Into<Value>) -> Result<()> {
        let now = self.transport.now();
        let record = self.live_mut(signal, ObjectKind::Signal)?;
        let value = conform_value(record, value.into())?;
        let events = instances_of(record)?.update(instance, value, now);
        self.notify_instances(signal, events);
        Ok(())
    }

    pub fn release_instance(&mut self, signal: ObjectId, instance: u64) -> Result<()> {
        let events = self.signal_instances(signal)?.release(instance, ReleaseOrigin::Local)?;
        self.notify_instances(signal, events);
        Ok(())
    }

    pub fn remove_instance(&mut self, signal: ObjectId, instance: u64) -> Result<()> {
        let events = self.signal_instances(signal)?.remove(instance)?;
        self.notify_instances(signal, events);
        Ok(())
    }

    pub fn set_instance_tag(&mut self, signal: ObjectId, instance: u64, tag: Option<u64>) -> Result<()> {
        self.signal_instances(signal)?.set_tag(instance, tag)
    }

    // ========================================================================
    // Local edits
    // ========================================================================

    /// Mutable access to a live record's properties for staged edits.
    pub fn properties_mut(&mut self, id: ObjectId) -> Result<&mut PropertyTable> {
        let kind = self.records.get(&id).map(Record::kind).ok_or_else(|| Error::NotFound(format!("{id}")))?;
        Ok(&mut self.live_mut(id, kind)?.properties)
    }

    pub fn slot_properties_mut(&mut self, map: ObjectId, loc: SlotLocation) -> Result<&mut PropertyTable> {
        let record = self.live_mut(map, ObjectKind::Map)?;
        record
            .slot_mut(loc)
            .map(|s| &mut s.properties)
            .ok_or_else(|| Error::NotFound(format!("slot {loc:?} of map {map}")))
    }

    /// Create a local map between known signals. Its properties are staged
    /// until [`push`](Graph::push). If an identical live map exists, its id
    /// is returned instead.
    pub fn new_map(&mut self, sources: &[ObjectId], destination: ObjectId) -> Result<ObjectId> {
        self.check_map_endpoints(sources, destination)?;
        if let Some(existing) = self.map_by_signals(sources, destination) {
            return Ok(existing.id());
        }

        let id = self.next_local_id();
        let mut record = Record::new(
            id,
            RecordData::Map {
                sources: sources.iter().copied().map(Slot::new).collect(),
                destination: Slot::new(destination),
                local: true,
            },
        );
        let source_ids: Vec<i64> = sources.iter().map(|s| s.0 as i64).collect();
        record.properties.set(Property::Sources, source_ids)?;
        record.properties.set(Property::Destination, destination)?;
        self.insert(record);
        Ok(id)
    }

    fn next_local_id(&mut self) -> ObjectId {
        let seed = (self.transport.now().frac as u64) << 32;
        loop {
            self.local_counter = self.local_counter.wrapping_add(1);
            let id = ObjectId(seed | self.local_counter as u64);
            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }

    /// Send a record's staged edits (record and slot properties) to its
    /// owner. On success the edits become committed; on failure they stay
    /// staged. Returns the number of changes sent.
    pub fn push(&mut self, id: ObjectId) -> Result<usize> {
        let dest = self.push_destination(id)?;
        let record = self.records.get_mut(&id).ok_or_else(|| Error::NotFound(format!("{id}")))?;
        if !record.is_live() {
            return Err(Error::StaleReference(id));
        }

        let mut delta = RecordDelta::new(record.kind(), id);
        delta.diff = record.properties.staged_diff();
        for (location, slot) in record.slots() {
            let diff = slot.properties.staged_diff();
            if !diff.is_empty() {
                delta.slots.push(SlotDiff { location, diff });
            }
        }
        if delta.is_empty() {
            return Ok(0);
        }

        self.transport.send(dest, &delta)?;
        record.properties.push_with(|_| Ok(()))?;
        if let RecordData::Map { sources, destination, .. } = &mut record.data {
            for slot in sources.iter_mut().chain(std::iter::once(destination)) {
                slot.properties.push_with(|_| Ok(()))?;
            }
        }
        tracing::debug!(%id, changes = delta.len(), ?dest, "pushed staged edits");
        Ok(delta.len())
    }

    fn push_destination(&self, id: ObjectId) -> Result<Destination> {
        let record = self.records.get(&id).ok_or_else(|| Error::NotFound(format!("{id}")))?;
        Ok(match &record.data {
            RecordData::Device { .. } => Destination::Device(id),
            RecordData::Signal { device, .. } => Destination::Device(*device),
            RecordData::Map { destination, .. } => self
                .records
                .get(&destination.signal)
                .and_then(Record::device)
                .map_or(Destination::Bus, Destination::Device),
            RecordData::Link { .. } => Destination::Bus,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn check_live(record: &Record, kind: ObjectKind) -> Result<()> {
    if record.kind() != kind {
        return Err(Error::TypeMismatch { expected: kind.to_string(), got: record.kind().to_string() });
    }
    if !record.is_live() {
        return Err(Error::StaleReference(record.id));
    }
    Ok(())
}

fn instances_of(record: &mut Record) -> Result<&mut InstanceManager> {
    let id = record.id;
    record.instances_mut().ok_or_else(|| Error::NotFound(format!("instances of {id}")))
}

fn required_ids(diff: &PropertyDiff, prop: Property) -> Result<Vec<ObjectId>> {
    diff.get(&prop.into())
        .and_then(Value::as_i64s)
        .map(|ids| ids.into_iter().map(|i| ObjectId(i as u64)).collect())
        .ok_or_else(|| Error::MalformedEvent(format!("missing {prop}")))
}

fn required_id(diff: &PropertyDiff, prop: Property) -> Result<ObjectId> {
    required_ids(diff, prop)?
        .first()
        .copied()
        .ok_or_else(|| Error::MalformedEvent(format!("empty {prop}")))
}

const RELATIONS: [Property; 4] = [Property::Device, Property::Sources, Property::Destination, Property::Devices];

/// Ids a relationship property is pinned to: the record's wiring for its
/// own kind, else whatever the table already holds.
fn pinned_ids(record: &Record, prop: Property) -> Option<Vec<ObjectId>> {
    match (prop, &record.data) {
        (Property::Device, RecordData::Signal { device, .. }) => Some(vec![*device]),
        (Property::Sources, RecordData::Map { sources, .. }) => Some(sources.iter().map(|s| s.signal).collect()),
        (Property::Destination, RecordData::Map { destination, .. }) => Some(vec![destination.signal]),
        (Property::Devices, RecordData::Link { devices }) => Some(devices.to_vec()),
        _ => record
            .properties
            .value(&prop.into())
            .and_then(Value::as_i64s)
            .map(|ids| ids.into_iter().map(|i| ObjectId(i as u64)).collect()),
    }
}

/// Relationship properties are fixed at creation: they can be restated but
/// never removed or changed.
fn check_relations_unchanged(record: &Record, diff: &PropertyDiff) -> Result<()> {
    for change in diff.iter() {
        let PropertyKey::WellKnown(prop) = change.key() else {
            continue;
        };
        if !RELATIONS.contains(prop) {
            continue;
        }
        let Some(pinned) = pinned_ids(record, *prop) else {
            continue;
        };
        let restated = match change {
            PropertyChange::Set(_, v) => v
                .as_i64s()
                .is_some_and(|ids| ids.into_iter().map(|i| ObjectId(i as u64)).eq(pinned.iter().copied())),
            PropertyChange::Remove(_) => false,
        };
        if !restated {
            return Err(Error::MalformedEvent(format!("{} cannot change {prop}", record.id)));
        }
    }
    Ok(())
}

/// Apply slot diffs to a map record. Returns whether anything changed.
fn apply_slot_diffs(record: &mut Record, slots: &[SlotDiff]) -> bool {
    let mut changed = false;
    for slot_diff in slots {
        match record.slot_mut(slot_diff.location) {
            Some(slot) => changed |= slot.properties.apply_diff(&slot_diff.diff),
            None => tracing::warn!(id = %record.id, location = ?slot_diff.location, "diff for unknown slot"),
        }
    }
    changed
}

/// Size the instance pool and steal mode from `@num_inst` / `@steal`.
fn sync_instance_pool(record: &mut Record, config: &GraphConfig) {
    let size = record
        .properties
        .value(&Property::NumInst.into())
        .and_then(Value::as_i32)
        .map(|n| n.max(0) as usize);
    let steal = record
        .properties
        .value(&Property::Steal.into())
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<StealMode>().ok());
    let Some(pool) = record.instances_mut() else {
        return;
    };
    if let Some(size) = size {
        pool.resize(size.min(config.max_instances));
    }
    if let Some(mode) = steal {
        pool.set_steal_mode(mode);
    }
}

/// Coerce a value to the signal's declared type and check its length.
fn conform_value(record: &Record, value: Value) -> Result<Value> {
    let declared = record
        .properties
        .value(&Property::Type.into())
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<ValueType>().ok());
    let value = match declared {
        Some(kind) => value.coerce(kind)?,
        None => value,
    };
    let length = record.properties.value(&Property::Length.into()).and_then(Value::as_i32);
    if let Some(n) = length {
        if value.len() != n as usize {
            return Err(Error::TypeMismatch {
                expected: format!("length {n}"),
                got: format!("length {}", value.len()),
            });
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device(id: u64, name: &str) -> RecordDelta {
        RecordDelta::new(ObjectKind::Device, ObjectId(id)).with(Property::Name, name)
    }

    fn signal(id: u64, dev: u64, name: &str) -> RecordDelta {
        RecordDelta::new(ObjectKind::Signal, ObjectId(id))
            .with(Property::Name, name)
            .with(Property::Device, ObjectId(dev))
    }

    #[test]
    fn test_duplicate_announce_is_idempotent() {
        let mut g = Graph::open_memory();
        assert_eq!(g.apply_event(EventType::Announce, device(1, "synth")).unwrap(), Some(Lifecycle::Added));
        assert_eq!(g.apply_event(EventType::Announce, device(1, "synth")).unwrap(), None);
        assert_eq!(g.notifications.len(), 1);
        assert_eq!(g.record(ObjectId(1)).unwrap().status, Status::New);
    }

    #[test]
    fn test_update_marks_modified() {
        let mut g = Graph::open_memory();
        g.apply_event(EventType::Announce, device(1, "synth")).unwrap();
        let delta = RecordDelta::new(ObjectKind::Device, ObjectId(1)).with("color", "red");
        assert_eq!(g.apply_event(EventType::Update, delta).unwrap(), Some(Lifecycle::Modified));
        assert_eq!(g.record(ObjectId(1)).unwrap().status, Status::Modified);
    }

    #[test]
    fn test_kind_mismatch_is_malformed() {
        let mut g = Graph::open_memory();
        g.apply_event(EventType::Announce, device(1, "synth")).unwrap();
        let err = g.apply_event(EventType::Announce, signal(1, 2, "x")).unwrap_err();
        assert!(matches!(err, Error::MalformedEvent(_)));
    }

    #[test]
    fn test_signal_creates_placeholder_device() {
        let mut g = Graph::open_memory();
        g.apply_event(EventType::Announce, signal(10, 1, "freq")).unwrap();
        let dev = g.object(ObjectId(1)).unwrap();
        assert_eq!(dev.kind(), ObjectKind::Device);
        assert_eq!(g.object(ObjectId(10)).unwrap().device().unwrap().id(), ObjectId(1));
    }

    #[test]
    fn test_signal_without_device_is_malformed() {
        let mut g = Graph::open_memory();
        let delta = RecordDelta::new(ObjectKind::Signal, ObjectId(10)).with(Property::Name, "freq");
        assert!(matches!(g.apply_event(EventType::Announce, delta), Err(Error::MalformedEvent(_))));
        assert!(g.record(ObjectId(10)).is_none());
    }

    #[test]
    fn test_removal_cascades_device_to_maps() {
        let mut g = Graph::open_memory();
        g.apply_event(EventType::Announce, signal(10, 1, "out")).unwrap();
        g.apply_event(EventType::Announce, signal(20, 2, "in")).unwrap();
        let map = RecordDelta::new(ObjectKind::Map, ObjectId(99))
            .with(Property::Sources, vec![10i64])
            .with(Property::Destination, ObjectId(20));
        g.apply_event(EventType::Announce, map).unwrap();

        assert_eq!(g.apply_removal(ObjectId(1)), Some(Lifecycle::Removed));
        assert_eq!(g.record(ObjectId(10)).unwrap().status, Status::Removed);
        assert_eq!(g.record(ObjectId(99)).unwrap().status, Status::Removed);
        assert_eq!(g.record(ObjectId(20)).unwrap().status, Status::New);
        assert_eq!(g.apply_removal(ObjectId(1)), None);
    }

    #[test]
    fn test_relations_cannot_change() {
        let mut g = Graph::open_memory();
        g.apply_event(EventType::Announce, signal(10, 1, "out")).unwrap();
        let moved = RecordDelta::new(ObjectKind::Signal, ObjectId(10)).with(Property::Device, ObjectId(2));
        assert!(g.apply_event(EventType::Update, moved).is_err());
    }

    #[test]
    fn test_conform_value_coerces_to_declared_type() {
        let mut g = Graph::open_memory();
        let delta = signal(10, 1, "freq").with(Property::Type, "f").with(Property::Length, 1);
        g.apply_event(EventType::Announce, delta).unwrap();
        g.update_instance(ObjectId(10), 0, 3).unwrap();
        let inst = g.object(ObjectId(10)).unwrap().instance(0).unwrap();
        assert_eq!(inst.last.as_ref().unwrap().value, Value::from(3.0f32));
        assert!(g.update_instance(ObjectId(10), 0, vec![1.0f32, 2.0]).is_err());
    }
}
