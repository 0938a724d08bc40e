//! In-memory loopback transport.
//!
//! Events are injected by the test (or by another thread) and drained by the
//! graph's `poll`. Everything the graph sends is recorded for inspection.
//!
//! ## Limitations
//!
//! - **No routing**: sends go nowhere; they are only logged.
//! - **Manual clock is global**: once `set_time` is called, `now()` stops
//!   following the wall clock for every clone of the handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Destination, NetworkEvent, RecordDelta, SubscriptionRequest, Transport};
use crate::model::Timetag;
use crate::{Error, Result};

// ============================================================================
// MemoryTransport
// ============================================================================

/// Cloneable handle to a shared in-memory event queue.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    queue: Mutex<VecDeque<NetworkEvent>>,
    ready: Condvar,
    sent: Mutex<Vec<(Destination, RecordDelta)>>,
    subscriptions: Mutex<Vec<SubscriptionRequest>>,
    /// Manual clock; `None` follows the wall clock.
    clock: Mutex<Option<Timetag>>,
    /// Number of upcoming outbound calls that should fail.
    failures: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound event and wake a waiting `recv`.
    pub fn inject(&self, event: NetworkEvent) {
        self.inner.queue.lock().push_back(event);
        self.inner.ready.notify_one();
    }

    pub fn inject_all(&self, events: impl IntoIterator<Item = NetworkEvent>) {
        let mut queue = self.inner.queue.lock();
        queue.extend(events);
        drop(queue);
        self.inner.ready.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<(Destination, RecordDelta)> {
        self.inner.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<(Destination, RecordDelta)> {
        std::mem::take(&mut *self.inner.sent.lock())
    }

    pub fn subscription_requests(&self) -> Vec<SubscriptionRequest> {
        self.inner.subscriptions.lock().clone()
    }

    pub fn take_subscription_requests(&self) -> Vec<SubscriptionRequest> {
        std::mem::take(&mut *self.inner.subscriptions.lock())
    }

    /// Switch to a manual clock set to `time`.
    pub fn set_time(&self, time: Timetag) {
        *self.inner.clock.lock() = Some(time);
    }

    /// Advance the manual clock, starting it at the current wall time if it
    /// was not set.
    pub fn advance(&self, secs: f64) {
        let mut clock = self.inner.clock.lock();
        let base = clock.unwrap_or_else(Timetag::now);
        *clock = Some(base.add_secs(secs));
    }

    /// Make the next `n` sends or subscription requests fail.
    pub fn fail_next(&self, n: usize) {
        self.inner.failures.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Result<()> {
        let failed = self
            .inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Transport("injected failure".into()));
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn recv(&self, timeout: Duration) -> Result<Option<NetworkEvent>> {
        let mut queue = self.inner.queue.lock();
        if queue.is_empty() && !timeout.is_zero() {
            let deadline = Instant::now() + timeout;
            while queue.is_empty() {
                if self.inner.ready.wait_until(&mut queue, deadline).timed_out() {
                    break;
                }
            }
        }
        Ok(queue.pop_front())
    }

    fn send(&self, dest: Destination, delta: &RecordDelta) -> Result<()> {
        self.take_failure()?;
        tracing::trace!(?dest, id = %delta.id, changes = delta.len(), "memory transport send");
        self.inner.sent.lock().push((dest, delta.clone()));
        Ok(())
    }

    fn request_subscription(&self, request: SubscriptionRequest) -> Result<()> {
        self.take_failure()?;
        self.inner.subscriptions.lock().push(request);
        Ok(())
    }

    fn now(&self) -> Timetag {
        self.inner.clock.lock().unwrap_or_else(Timetag::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectId, ObjectKind};
    use std::thread;

    #[test]
    fn test_recv_zero_timeout_does_not_block() {
        let t = MemoryTransport::new();
        assert!(t.recv(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_recv_wakes_on_inject_from_other_thread() {
        let t = MemoryTransport::new();
        let feeder = t.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            feeder.inject(NetworkEvent::Sync { device: ObjectId(1) });
        });
        let ev = t.recv(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(ev, Some(NetworkEvent::Sync { device: ObjectId(1) }));
    }

    #[test]
    fn test_fail_next() {
        let t = MemoryTransport::new();
        t.fail_next(1);
        let delta = RecordDelta::new(ObjectKind::Map, ObjectId(9));
        assert!(t.send(Destination::Bus, &delta).is_err());
        assert!(t.send(Destination::Bus, &delta).is_ok());
        assert_eq!(t.sent().len(), 1);
    }

    #[test]
    fn test_manual_clock() {
        let t = MemoryTransport::new();
        t.set_time(Timetag::new(100, 0));
        t.advance(1.5);
        assert_eq!(t.now().sec, 101);
    }
}
