//! Per-signal instance pool.
//!
//! Slots move through Reserved -> Active -> Free and back to Active; `remove`
//! drops a slot entirely. The manager never calls out: every operation
//! returns the [`InstanceEvent`]s it produced and the graph dispatches them.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::model::{StealMode, TimedValue, Timetag, Value};
use crate::{Error, Result};

/// Hard upper bound on instances per signal.
pub const MAX_INSTANCES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Allocated, never activated since allocation.
    Reserved,
    Active,
    /// Released; last value retained.
    Free,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: u64,
    pub state: InstanceState,
    pub last: Option<TimedValue>,
    /// Opaque user tag.
    pub tag: Option<u64>,
    /// When the current activation began.
    pub activated: Option<Timetag>,
}

impl Instance {
    fn reserved(id: u64) -> Self {
        Self { id, state: InstanceState::Reserved, last: None, tag: None, activated: None }
    }

    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceEventKind {
    /// First update for an instance id.
    New,
    Update,
    /// Released by the remote end.
    UpstreamRelease,
    /// Released locally, including by voice stealing.
    DownstreamRelease,
    /// An update was dropped because no slot could be claimed.
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub kind: InstanceEventKind,
    pub instance: u64,
}

impl InstanceEvent {
    fn new(kind: InstanceEventKind, instance: u64) -> Self {
        Self { kind, instance }
    }
}

pub type InstanceEvents = SmallVec<[InstanceEvent; 2]>;

/// Who asked for a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOrigin {
    Local,
    Network,
}

/// Instance slots for one signal, kept sorted by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceManager {
    slots: Vec<Instance>,
    steal: StealMode,
    capacity: usize,
}

impl Default for InstanceManager {
    fn default() -> Self {
        Self::new(MAX_INSTANCES, StealMode::None)
    }
}

impl InstanceManager {
    pub fn new(capacity: usize, steal: StealMode) -> Self {
        Self { slots: Vec::new(), steal, capacity: capacity.min(MAX_INSTANCES) }
    }

    /// A manager with `size` reserved slots.
    pub fn with_pool(capacity: usize, steal: StealMode, size: usize) -> Result<Self> {
        let mut mgr = Self::new(capacity, steal);
        mgr.reserve(size)?;
        Ok(mgr)
    }

    pub fn steal_mode(&self) -> StealMode {
        self.steal
    }

    pub fn set_steal_mode(&mut self, mode: StealMode) {
        self.steal = mode;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.slots.iter()
    }

    pub fn get(&self, id: u64) -> Option<&Instance> {
        self.index(id).ok().map(|i| &self.slots[i])
    }

    fn index(&self, id: u64) -> std::result::Result<usize, usize> {
        self.slots.binary_search_by_key(&id, |s| s.id)
    }

    fn insert_sorted(&mut self, slot: Instance) {
        let at = self.index(slot.id).unwrap_or_else(|i| i);
        self.slots.insert(at, slot);
    }

    fn check_capacity(&self, requested: usize) -> Result<()> {
        if self.slots.len() + requested > self.capacity {
            return Err(Error::CapacityExceeded { requested, capacity: self.capacity });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reservation
    // ------------------------------------------------------------------------

    /// Reserve `n` slots using the lowest unused ids. All or nothing.
    pub fn reserve(&mut self, n: usize) -> Result<Vec<u64>> {
        self.check_capacity(n)?;
        let mut ids = Vec::with_capacity(n);
        let mut candidate = 0u64;
        while ids.len() < n {
            if self.index(candidate).is_err() {
                ids.push(candidate);
            }
            candidate += 1;
        }
        for id in &ids {
            self.insert_sorted(Instance::reserved(*id));
        }
        tracing::trace!(count = n, "reserved instances");
        Ok(ids)
    }

    /// Reserve specific ids. Ids that already exist are skipped; returns the
    /// ids actually created.
    pub fn reserve_ids(&mut self, ids: &[u64]) -> Result<Vec<u64>> {
        let mut fresh: Vec<u64> = ids.iter().copied().filter(|id| self.index(*id).is_err()).collect();
        fresh.sort_unstable();
        fresh.dedup();
        self.check_capacity(fresh.len())?;
        for id in &fresh {
            self.insert_sorted(Instance::reserved(*id));
        }
        Ok(fresh)
    }

    /// Grow or shrink the pool toward `size` slots. Shrinking only drops
    /// inactive slots, highest id first; growth is capped at capacity.
    pub fn resize(&mut self, size: usize) {
        let size = size.min(self.capacity);
        if size > self.slots.len() {
            // Cannot overflow: `size` is already capped at capacity.
            if let Err(e) = self.reserve(size - self.slots.len()) {
                tracing::debug!(error = %e, "instance pool not grown");
            }
            return;
        }
        while self.slots.len() > size {
            match self.slots.iter().rposition(|s| !s.is_active()) {
                Some(i) => {
                    self.slots.remove(i);
                }
                None => break,
            }
        }
    }

    // ------------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------------

    /// Apply a value update for instance `id`, activating or claiming a slot
    /// as needed.
    pub fn update(&mut self, id: u64, value: Value, time: Timetag) -> InstanceEvents {
        let mut events = InstanceEvents::new();
        let sample = Some(TimedValue::new(value, time));

        if let Ok(i) = self.index(id) {
            let slot = &mut self.slots[i];
            if slot.is_active() {
                events.push(InstanceEvent::new(InstanceEventKind::Update, id));
            } else {
                slot.state = InstanceState::Active;
                slot.activated = Some(time);
                events.push(InstanceEvent::new(InstanceEventKind::New, id));
            }
            slot.last = sample;
            return events;
        }

        let claim = self
            .slots
            .iter()
            .position(|s| s.state == InstanceState::Reserved)
            .or_else(|| self.slots.iter().position(|s| s.state == InstanceState::Free));

        let victim = match claim {
            Some(i) => i,
            None => match self.steal_victim() {
                Some(i) => {
                    let old = self.slots[i].id;
                    tracing::debug!(instance = old, new = id, mode = %self.steal, "stealing instance");
                    events.push(InstanceEvent::new(InstanceEventKind::DownstreamRelease, old));
                    i
                }
                None => {
                    tracing::debug!(instance = id, "instance overflow, update dropped");
                    events.push(InstanceEvent::new(InstanceEventKind::Overflow, id));
                    return events;
                }
            },
        };

        let mut slot = self.slots.remove(victim);
        slot.id = id;
        slot.state = InstanceState::Active;
        slot.activated = Some(time);
        slot.tag = None;
        slot.last = sample;
        self.insert_sorted(slot);
        events.push(InstanceEvent::new(InstanceEventKind::New, id));
        events
    }

    fn steal_victim(&self) -> Option<usize> {
        let active = self.slots.iter().enumerate().filter(|(_, s)| s.is_active());
        match self.steal {
            StealMode::None => None,
            StealMode::Oldest => active.min_by_key(|(_, s)| (s.activated, s.id)).map(|(i, _)| i),
            StealMode::Newest => active.min_by_key(|(_, s)| (Reverse(s.activated), s.id)).map(|(i, _)| i),
        }
    }

    // ------------------------------------------------------------------------
    // Release / removal
    // ------------------------------------------------------------------------

    /// Active -> Free. Releasing an inactive instance is a no-op.
    pub fn release(&mut self, id: u64, origin: ReleaseOrigin) -> Result<InstanceEvents> {
        let i = self.index(id).map_err(|_| Error::NotFound(format!("instance {id}")))?;
        let mut events = InstanceEvents::new();
        let slot = &mut self.slots[i];
        if slot.is_active() {
            slot.state = InstanceState::Free;
            let kind = match origin {
                ReleaseOrigin::Local => InstanceEventKind::DownstreamRelease,
                ReleaseOrigin::Network => InstanceEventKind::UpstreamRelease,
            };
            events.push(InstanceEvent::new(kind, id));
        }
        Ok(events)
    }

    /// Drop a slot in any state. An active instance is released first.
    pub fn remove(&mut self, id: u64) -> Result<InstanceEvents> {
        let i = self.index(id).map_err(|_| Error::NotFound(format!("instance {id}")))?;
        let slot = self.slots.remove(i);
        let mut events = InstanceEvents::new();
        if slot.is_active() {
            events.push(InstanceEvent::new(InstanceEventKind::DownstreamRelease, id));
        }
        Ok(events)
    }

    pub fn set_tag(&mut self, id: u64, tag: Option<u64>) -> Result<()> {
        let i = self.index(id).map_err(|_| Error::NotFound(format!("instance {id}")))?;
        self.slots[i].tag = tag;
        Ok(())
    }
}
