//! Device subscriptions: leases, renewal, retry and pattern autosubscribe.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::Graph;
use crate::model::{ObjectId, ObjectKind, ObjectTypes, Timetag, wildcard_match};
use crate::transport::{SubscriptionRequest, Transport};
use crate::Result;

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionTarget {
    Device(ObjectId),
    /// Every device whose name matches a `*` glob, now and as they appear.
    Pattern(String),
}

impl From<ObjectId> for SubscriptionTarget {
    fn from(id: ObjectId) -> Self {
        SubscriptionTarget::Device(id)
    }
}

impl From<&str> for SubscriptionTarget {
    fn from(pattern: &str) -> Self {
        SubscriptionTarget::Pattern(pattern.to_owned())
    }
}

/// Subscription lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lease {
    /// Renewed automatically until unsubscribed.
    Renewing,
    Seconds(u32),
    Cancel,
}

impl Lease {
    /// Wire-style lease: `-1` renews, `0` cancels.
    pub fn from_secs(secs: i32) -> Self {
        match secs {
            0 => Lease::Cancel,
            s if s < 0 => Lease::Renewing,
            s => Lease::Seconds(s as u32),
        }
    }
}

/// Subscription state for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub device: ObjectId,
    pub types: ObjectTypes,
    pub lease: Lease,
    /// When the current lease runs out; `None` until a request succeeds.
    pub expires: Option<Timetag>,
    /// The last request failed and will be retried.
    pub pending: bool,
    /// Pattern that created this subscription, if any.
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct PatternSubscription {
    pattern: String,
    types: ObjectTypes,
    lease: Lease,
}

#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    by_device: HashMap<ObjectId, Subscription>,
    patterns: Vec<PatternSubscription>,
}

impl Subscriptions {
    pub(crate) fn drop_device(&mut self, device: ObjectId) {
        self.by_device.remove(&device);
    }
}

impl<T: Transport> Graph<T> {
    /// Subscribe to a device (or every device matching a pattern).
    ///
    /// Idempotent: subscribing again replaces the previous lease. A request
    /// the transport rejects is kept and retried on the next `poll`.
    pub fn subscribe(&mut self, target: impl Into<SubscriptionTarget>, types: ObjectTypes, lease: Lease) -> Result<()> {
        let target = target.into();
        if lease == Lease::Cancel {
            return self.unsubscribe(target);
        }
        match target {
            SubscriptionTarget::Device(device) => {
                self.subscribe_device(device, types, lease, None);
            }
            SubscriptionTarget::Pattern(pattern) => {
                self.subscriptions.patterns.retain(|p| p.pattern != pattern);
                self.subscriptions.patterns.push(PatternSubscription { pattern: pattern.clone(), types, lease });
                let matching: Vec<ObjectId> = self
                    .records_of(ObjectKind::Device)
                    .filter(|r| r.is_live() && r.name().is_some_and(|n| wildcard_match(&pattern, n)))
                    .map(|r| r.id)
                    .collect();
                for device in matching {
                    self.subscribe_device(device, types, lease, Some(pattern.clone()));
                }
            }
        }
        Ok(())
    }

    /// Stop future delivery. Unsubscribing twice is harmless.
    pub fn unsubscribe(&mut self, target: impl Into<SubscriptionTarget>) -> Result<()> {
        let devices: Vec<ObjectId> = match target.into() {
            SubscriptionTarget::Device(device) => vec![device],
            SubscriptionTarget::Pattern(pattern) => {
                self.subscriptions.patterns.retain(|p| p.pattern != pattern);
                self.subscriptions
                    .by_device
                    .values()
                    .filter(|s| s.pattern.as_deref() == Some(pattern.as_str()))
                    .map(|s| s.device)
                    .collect()
            }
        };
        for device in devices {
            let Some(sub) = self.subscriptions.by_device.remove(&device) else {
                continue;
            };
            let request = SubscriptionRequest { device, types: sub.types, lease_secs: 0 };
            if let Err(e) = self.transport.request_subscription(request) {
                tracing::warn!(%device, error = %e, "unsubscribe request failed");
            }
            tracing::debug!(%device, "unsubscribed");
        }
        Ok(())
    }

    pub fn subscription(&self, device: ObjectId) -> Option<&Subscription> {
        self.subscriptions.by_device.get(&device)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.by_device.values()
    }

    fn lease_secs(&self, lease: Lease) -> u32 {
        match lease {
            Lease::Renewing => self.config.autorenew_interval_secs,
            Lease::Seconds(s) => s,
            Lease::Cancel => 0,
        }
    }

    fn subscribe_device(&mut self, device: ObjectId, types: ObjectTypes, lease: Lease, pattern: Option<String>) {
        let mut sub = Subscription { device, types, lease, expires: None, pending: true, pattern };
        let now = self.transport.now();
        self.send_request(&mut sub, now);
        self.subscriptions.by_device.insert(device, sub);
    }

    fn send_request(&self, sub: &mut Subscription, now: Timetag) {
        let lease_secs = self.lease_secs(sub.lease);
        let request = SubscriptionRequest { device: sub.device, types: sub.types, lease_secs };
        match self.transport.request_subscription(request) {
            Ok(()) => {
                sub.pending = false;
                sub.expires = Some(now.add_secs(lease_secs as f64));
                tracing::debug!(device = %sub.device, lease_secs, "subscription requested");
            }
            Err(e) => {
                sub.pending = true;
                tracing::trace!(device = %sub.device, error = %e, "subscription request failed, will retry");
            }
        }
    }

    /// Subscribe a newly seen (or renamed) device if a pattern or the
    /// autosubscribe flags cover it.
    pub(crate) fn autosubscribe(&mut self, device: ObjectId) {
        if self.subscriptions.by_device.contains_key(&device) {
            return;
        }
        let name = self.records.get(&device).and_then(|r| r.name()).map(str::to_owned);
        let matched = self.subscriptions.patterns.iter().find(|p| match &name {
            Some(n) => wildcard_match(&p.pattern, n),
            None => p.pattern == "*",
        });
        if let Some(p) = matched.cloned() {
            self.subscribe_device(device, p.types, p.lease, Some(p.pattern));
        }
    }

    /// Retry failed requests, renew leases close to expiry and drop
    /// temporary leases that ran out.
    pub(crate) fn renew_subscriptions(&mut self, now: Timetag) {
        let margin = self.config.renew_margin_secs as f64;
        let mut subs = std::mem::take(&mut self.subscriptions.by_device);
        subs.retain(|_, sub| {
            if sub.pending {
                self.send_request(sub, now);
                return true;
            }
            let Some(expires) = sub.expires else {
                return true;
            };
            match sub.lease {
                Lease::Renewing if now.has_elapsed_since(expires.add_secs(-margin), 0.0) => {
                    self.send_request(sub, now);
                    true
                }
                Lease::Seconds(_) if now >= expires => {
                    tracing::debug!(device = %sub.device, "subscription lease expired");
                    false
                }
                _ => true,
            }
        });
        self.subscriptions.by_device = subs;
    }
}
