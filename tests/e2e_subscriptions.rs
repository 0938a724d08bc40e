//! End-to-end tests for subscriptions: leases, renewal, retry and
//! name-pattern autosubscribe.

use std::time::Duration;

use pretty_assertions::assert_eq;

use mapper_rs::{
    Graph, GraphConfig, Lease, MemoryTransport, NetworkEvent, ObjectId, ObjectKind, ObjectTypes, Property,
    RecordDelta, SubscriptionRequest, Timetag,
};

fn setup(config: GraphConfig) -> (Graph, MemoryTransport) {
    let transport = MemoryTransport::new();
    transport.set_time(Timetag::new(2_000, 0));
    // Leases outlive the default device timeout; keep devices alive.
    let config = GraphConfig { device_timeout_secs: 0, ..config };
    (Graph::with_config(transport.clone(), config), transport)
}

fn announce_device(transport: &MemoryTransport, id: u64, name: &str) {
    transport.inject(NetworkEvent::announce(
        RecordDelta::new(ObjectKind::Device, ObjectId(id)).with(Property::Name, name),
    ));
}

fn request(device: u64, types: ObjectTypes, lease_secs: u32) -> SubscriptionRequest {
    SubscriptionRequest { device: ObjectId(device), types, lease_secs }
}

#[test]
fn test_renewing_lease_is_renewed_before_expiry() {
    let (mut graph, transport) = setup(GraphConfig::default());
    announce_device(&transport, 1, "synth");
    graph.poll(Duration::ZERO);

    graph.subscribe(ObjectId(1), ObjectTypes::ALL, Lease::Renewing).unwrap();
    assert_eq!(transport.take_subscription_requests(), vec![request(1, ObjectTypes::ALL, 60)]);

    transport.advance(49.0);
    graph.poll(Duration::ZERO);
    assert!(transport.take_subscription_requests().is_empty());

    transport.advance(2.0);
    graph.poll(Duration::ZERO);
    assert_eq!(transport.take_subscription_requests(), vec![request(1, ObjectTypes::ALL, 60)]);
    let sub = graph.subscription(ObjectId(1)).unwrap();
    assert_eq!(sub.expires, Some(Timetag::new(2_111, 0)));
}

#[test]
fn test_temporary_lease_lapses() {
    let (mut graph, transport) = setup(GraphConfig::default());
    announce_device(&transport, 1, "synth");
    graph.poll(Duration::ZERO);

    graph.subscribe(ObjectId(1), ObjectTypes::SIGNAL, Lease::from_secs(30)).unwrap();
    assert_eq!(graph.subscription(ObjectId(1)).unwrap().lease, Lease::Seconds(30));

    transport.advance(29.0);
    graph.poll(Duration::ZERO);
    assert!(graph.subscription(ObjectId(1)).is_some());

    transport.advance(1.0);
    graph.poll(Duration::ZERO);
    assert!(graph.subscription(ObjectId(1)).is_none());
    assert_eq!(transport.subscription_requests().len(), 1);
}

#[test]
fn test_failed_request_is_retried_on_poll() {
    let (mut graph, transport) = setup(GraphConfig::default());
    announce_device(&transport, 1, "synth");
    graph.poll(Duration::ZERO);

    transport.fail_next(2);
    graph.subscribe(ObjectId(1), ObjectTypes::DEVICE, Lease::Renewing).unwrap();
    assert!(graph.subscription(ObjectId(1)).unwrap().pending);

    graph.poll(Duration::ZERO);
    assert!(graph.subscription(ObjectId(1)).unwrap().pending);
    graph.poll(Duration::ZERO);
    let sub = graph.subscription(ObjectId(1)).unwrap();
    assert!(!sub.pending);
    assert!(sub.expires.is_some());
    assert_eq!(transport.subscription_requests().len(), 1);
}

#[test]
fn test_pattern_subscribes_matching_devices_as_they_appear() {
    let (mut graph, transport) = setup(GraphConfig::default());
    announce_device(&transport, 1, "synth.1");
    graph.poll(Duration::ZERO);

    graph.subscribe("synth*", ObjectTypes::SIGNAL, Lease::Renewing).unwrap();
    announce_device(&transport, 2, "mixer.1");
    announce_device(&transport, 3, "synth.2");
    graph.poll(Duration::ZERO);

    let mut subscribed: Vec<ObjectId> = graph.subscriptions().map(|s| s.device).collect();
    subscribed.sort();
    assert_eq!(subscribed, vec![ObjectId(1), ObjectId(3)]);
    assert_eq!(graph.subscription(ObjectId(3)).unwrap().pattern.as_deref(), Some("synth*"));

    transport.take_subscription_requests();
    graph.unsubscribe("synth*").unwrap();
    assert_eq!(graph.subscriptions().count(), 0);
    let mut cancels = transport.take_subscription_requests();
    cancels.sort_by_key(|r| r.device);
    assert_eq!(cancels, vec![request(1, ObjectTypes::SIGNAL, 0), request(3, ObjectTypes::SIGNAL, 0)]);

    announce_device(&transport, 4, "synth.3");
    graph.poll(Duration::ZERO);
    assert!(graph.subscription(ObjectId(4)).is_none());
}

#[test]
fn test_autosubscribe_covers_every_device() {
    let config = GraphConfig::default().with_autosubscribe(ObjectTypes::SIGNAL | ObjectTypes::MAP);
    let (mut graph, transport) = setup(config);

    announce_device(&transport, 1, "synth");
    // A signal for an unknown device creates an unnamed placeholder.
    transport.inject(NetworkEvent::announce(
        RecordDelta::new(ObjectKind::Signal, ObjectId(10))
            .with(Property::Name, "freq")
            .with(Property::Device, ObjectId(2)),
    ));
    graph.poll(Duration::ZERO);

    let types = graph.subscription(ObjectId(1)).unwrap().types;
    assert_eq!(types, ObjectTypes::SIGNAL | ObjectTypes::MAP);
    assert!(graph.subscription(ObjectId(2)).is_some());
}

#[test]
fn test_cancel_and_device_removal_drop_subscription() {
    let (mut graph, transport) = setup(GraphConfig::default());
    announce_device(&transport, 1, "synth");
    announce_device(&transport, 2, "mixer");
    graph.poll(Duration::ZERO);

    graph.subscribe(ObjectId(1), ObjectTypes::ALL, Lease::Renewing).unwrap();
    graph.subscribe(ObjectId(2), ObjectTypes::ALL, Lease::Renewing).unwrap();

    graph.subscribe(ObjectId(1), ObjectTypes::ALL, Lease::Cancel).unwrap();
    assert!(graph.subscription(ObjectId(1)).is_none());
    assert_eq!(transport.subscription_requests().last(), Some(&request(1, ObjectTypes::ALL, 0)));
    graph.unsubscribe(ObjectId(1)).unwrap();

    transport.inject(NetworkEvent::remove(ObjectKind::Device, ObjectId(2)));
    graph.poll(Duration::ZERO);
    assert!(graph.subscription(ObjectId(2)).is_none());
}
