//! End-to-end tests for signal instances: activation, stealing, release
//! and instance listeners.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use mapper_rs::{
    Error, Graph, GraphConfig, InstanceEvent, InstanceEventKind, InstanceState, MemoryTransport,
    NetworkEvent, ObjectId, ObjectKind, Property, RecordDelta, Timetag, Value, ValueUpdate,
};

use InstanceEventKind::*;

type Log = Arc<Mutex<Vec<(ObjectId, InstanceEventKind, u64)>>>;

const SIG: ObjectId = ObjectId(10);

fn setup(config: GraphConfig, signal: RecordDelta) -> (Graph, MemoryTransport, Log) {
    let transport = MemoryTransport::new();
    transport.set_time(Timetag::new(500, 0));
    let mut graph = Graph::with_config(transport.clone(), config);
    transport.inject(NetworkEvent::announce(signal));
    graph.poll(Duration::ZERO);

    let log: Log = Arc::default();
    let sink = log.clone();
    graph.add_instance_listener(None, move |sig, event: InstanceEvent| {
        sink.lock().push((sig.id(), event.kind, event.instance));
    });
    (graph, transport, log)
}

fn float_signal() -> RecordDelta {
    RecordDelta::new(ObjectKind::Signal, SIG)
        .with(Property::Name, "voice")
        .with(Property::Device, ObjectId(1))
        .with(Property::Direction, "input")
        .with(Property::Type, "f")
        .with(Property::Length, 1)
}

fn value(instance: u64, v: f32, sec: u32) -> NetworkEvent {
    NetworkEvent::Value(ValueUpdate {
        signal: SIG,
        instance: Some(instance),
        value: Some(Value::from(v)),
        time: Timetag::new(sec, 0),
    })
}

fn release(instance: u64) -> NetworkEvent {
    NetworkEvent::Value(ValueUpdate { signal: SIG, instance: Some(instance), value: None, time: Timetag::new(600, 0) })
}

// ============================================================================
// Network-driven instances
// ============================================================================

#[test]
fn test_steal_oldest_releases_first_activated() {
    let signal = float_signal().with(Property::NumInst, 2).with(Property::Steal, "oldest");
    let (mut graph, transport, log) = setup(GraphConfig::default(), signal);

    transport.inject_all([value(100, 0.1, 501), value(101, 0.2, 502), value(102, 0.3, 503)]);
    graph.poll(Duration::ZERO);

    assert_eq!(
        *log.lock(),
        vec![(SIG, New, 100), (SIG, New, 101), (SIG, DownstreamRelease, 100), (SIG, New, 102)]
    );
    let sig = graph.object(SIG).unwrap();
    let pool = sig.instances().unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.active_count(), 2);
    assert!(sig.instance(100).is_none());
    assert_eq!(sig.instance(102).unwrap().last.as_ref().unwrap().value, Value::from(0.3f32));
}

#[test]
fn test_steal_newest_releases_latest_activated() {
    let signal = float_signal().with(Property::NumInst, 2).with(Property::Steal, "newest");
    let (mut graph, transport, log) = setup(GraphConfig::default(), signal);

    transport.inject_all([value(100, 0.1, 501), value(101, 0.2, 502), value(102, 0.3, 503)]);
    graph.poll(Duration::ZERO);

    assert_eq!(log.lock()[2..], [(SIG, DownstreamRelease, 101), (SIG, New, 102)]);
    assert!(graph.object(SIG).unwrap().instance(100).is_some());
}

#[test]
fn test_overflow_without_stealing() {
    let (mut graph, transport, log) = setup(GraphConfig::default(), float_signal());

    transport.inject_all([value(5, 1.0, 501), value(6, 2.0, 502), value(5, 3.0, 503)]);
    graph.poll(Duration::ZERO);

    assert_eq!(*log.lock(), vec![(SIG, New, 5), (SIG, Overflow, 6), (SIG, Update, 5)]);
}

#[test]
fn test_network_release_keeps_last_value() {
    let (mut graph, transport, log) = setup(GraphConfig::default(), float_signal());
    transport.inject_all([value(7, 0.5, 501), release(7), release(7), release(42)]);
    graph.poll(Duration::ZERO);

    assert_eq!(*log.lock(), vec![(SIG, New, 7), (SIG, UpstreamRelease, 7)]);
    let inst = graph.object(SIG).unwrap().instance(7).unwrap();
    assert_eq!(inst.state, InstanceState::Free);
    assert_eq!(inst.last.as_ref().unwrap().value, Value::from(0.5f32));

    // A freed slot is reused by the next unknown instance.
    transport.inject(value(8, 0.9, 502));
    graph.poll(Duration::ZERO);
    assert_eq!(log.lock().last(), Some(&(SIG, New, 8)));
    assert!(graph.object(SIG).unwrap().instance(7).is_none());
}

#[test]
fn test_values_are_coerced_or_dropped() {
    let (mut graph, transport, log) = setup(GraphConfig::default(), float_signal());
    transport.inject_all([
        NetworkEvent::Value(ValueUpdate {
            signal: SIG,
            instance: None,
            value: Some(Value::from(3)),
            time: Timetag::new(501, 0),
        }),
        NetworkEvent::Value(ValueUpdate {
            signal: SIG,
            instance: None,
            value: Some(Value::from(vec![1.0f32, 2.0])),
            time: Timetag::new(502, 0),
        }),
        NetworkEvent::Value(ValueUpdate {
            signal: ObjectId(404),
            instance: None,
            value: Some(Value::from(1.0f32)),
            time: Timetag::new(503, 0),
        }),
    ]);
    graph.poll(Duration::ZERO);

    assert_eq!(*log.lock(), vec![(SIG, New, 0)]);
    let inst = graph.object(SIG).unwrap().instance(0).unwrap();
    assert_eq!(inst.last.as_ref().unwrap().value, Value::from(3.0f32));
}

#[test]
fn test_num_inst_update_resizes_pool() {
    let (mut graph, transport, _) = setup(GraphConfig::default(), float_signal());
    assert_eq!(graph.object(SIG).unwrap().instances().unwrap().len(), 1);

    transport.inject(NetworkEvent::update(RecordDelta::new(ObjectKind::Signal, SIG).with(Property::NumInst, 4)));
    graph.poll(Duration::ZERO);
    assert_eq!(graph.object(SIG).unwrap().instances().unwrap().len(), 4);
}

// ============================================================================
// Local instance API
// ============================================================================

#[test]
fn test_local_reserve_update_release() {
    let config = GraphConfig { max_instances: 4, ..GraphConfig::default() };
    let (mut graph, transport, log) = setup(config, float_signal());

    assert_eq!(graph.reserve_instances(SIG, 2).unwrap(), vec![1, 2]);
    assert!(matches!(
        graph.reserve_instances(SIG, 2),
        Err(Error::CapacityExceeded { requested: 2, capacity: 4 })
    ));
    assert_eq!(graph.reserve_instance_ids(SIG, &[2, 3]).unwrap(), vec![3]);

    graph.update_instance(SIG, 1, 0.25f32).unwrap();
    transport.advance(0.5);
    graph.update_instance(SIG, 1, 0.5f32).unwrap();
    graph.set_instance_tag(SIG, 1, Some(77)).unwrap();
    graph.release_instance(SIG, 1).unwrap();
    graph.remove_instance(SIG, 3).unwrap();
    assert!(graph.release_instance(SIG, 9).unwrap_err().is_not_found());

    graph.poll(Duration::ZERO);
    assert_eq!(*log.lock(), vec![(SIG, New, 1), (SIG, Update, 1), (SIG, DownstreamRelease, 1)]);

    let sig = graph.object(SIG).unwrap();
    let inst = sig.instance(1).unwrap();
    assert_eq!(inst.tag, Some(77));
    assert_eq!(inst.state, InstanceState::Free);
    assert_eq!(sig.instances().unwrap().iter().map(|i| i.id).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn test_instance_listener_filters_by_signal() {
    let (mut graph, transport, _) = setup(GraphConfig::default(), float_signal());
    let other = ObjectId(20);
    transport.inject(NetworkEvent::announce(
        RecordDelta::new(ObjectKind::Signal, other)
            .with(Property::Name, "other")
            .with(Property::Device, ObjectId(1)),
    ));
    graph.poll(Duration::ZERO);

    let seen: Log = Arc::default();
    let sink = seen.clone();
    graph.add_instance_listener(Some(other), move |sig, event| {
        sink.lock().push((sig.id(), event.kind, event.instance));
    });

    graph.update_instance(SIG, 0, 1.0f32).unwrap();
    graph.update_instance(other, 0, 1.0f32).unwrap();
    graph.poll(Duration::ZERO);

    assert_eq!(*seen.lock(), vec![(other, New, 0)]);
}

#[test]
fn test_instance_ops_on_removed_signal_are_stale() {
    let (mut graph, transport, _) = setup(GraphConfig::default(), float_signal());
    transport.inject(NetworkEvent::remove(ObjectKind::Signal, SIG));
    graph.poll(Duration::ZERO);

    let err = graph.update_instance(SIG, 0, 1.0f32).unwrap_err();
    assert!(matches!(err, Error::StaleReference(id) if id == SIG));
    assert!(graph.reserve_instances(ObjectId(1), 1).is_err());
}
