//! Listener registry and notification dispatch.

use serde::{Deserialize, Serialize};

use super::{Graph, ObjectRef};
use crate::instance::InstanceEvent;
use crate::model::{Lifecycle, ObjectId, ObjectTypes};
use crate::transport::Transport;

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

pub(crate) type RecordCallback<T> = Box<dyn FnMut(ObjectRef<'_, T>, Lifecycle) + Send>;
pub(crate) type InstanceCallback<T> = Box<dyn FnMut(ObjectRef<'_, T>, InstanceEvent) + Send>;

/// Work queued from inside a callback, run after the dispatch pass.
pub(crate) type Deferred<T> = Box<dyn FnOnce(&mut Graph<T>) + Send>;

/// Something listeners need to hear about, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notification {
    Record { id: ObjectId, lifecycle: Lifecycle },
    Instance { signal: ObjectId, event: InstanceEvent },
}

enum Callback<T: Transport> {
    Record { types: ObjectTypes, f: RecordCallback<T> },
    Instance { signal: Option<ObjectId>, f: InstanceCallback<T> },
}

struct Listener<T: Transport> {
    id: ListenerId,
    callback: Callback<T>,
}

/// One ordered list of listeners; invoked in registration order.
pub(crate) struct Listeners<T: Transport> {
    next_id: u64,
    entries: Vec<Listener<T>>,
}

impl<T: Transport> Default for Listeners<T> {
    fn default() -> Self {
        Self { next_id: 1, entries: Vec::new() }
    }
}

impl<T: Transport> Listeners<T> {
    fn push(&mut self, callback: Callback<T>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Listener { id, callback });
        id
    }

    pub(crate) fn add_record(&mut self, types: ObjectTypes, f: RecordCallback<T>) -> ListenerId {
        self.push(Callback::Record { types, f })
    }

    pub(crate) fn add_instance(&mut self, signal: Option<ObjectId>, f: InstanceCallback<T>) -> ListenerId {
        self.push(Callback::Instance { signal, f })
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| l.id != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deliver one notification to every interested listener.
    pub(crate) fn dispatch(&mut self, graph: &Graph<T>, note: Notification) {
        match note {
            Notification::Record { id, lifecycle } => {
                let Some(obj) = graph.object(id) else {
                    tracing::trace!(%id, "skipping notification for evicted record");
                    return;
                };
                let types = obj.record().types();
                for l in &mut self.entries {
                    if let Callback::Record { types: want, f } = &mut l.callback {
                        if want.intersects(types) {
                            f(obj, lifecycle);
                        }
                    }
                }
            }
            Notification::Instance { signal, event } => {
                let Some(obj) = graph.object(signal) else {
                    return;
                };
                for l in &mut self.entries {
                    if let Callback::Instance { signal: want, f } = &mut l.callback {
                        if want.is_none_or(|s| s == signal) {
                            f(obj, event);
                        }
                    }
                }
            }
        }
    }
}
