//! Property tests for the algebraic laws the value, query and instance
//! layers promise.

use proptest::prelude::*;

use mapper_rs::instance::ReleaseOrigin;
use mapper_rs::model::wildcard_match;
use mapper_rs::{
    EventType, Graph, InstanceManager, ObjectId, ObjectKind, Op, Property, PropertyTable, RecordDelta,
    StealMode, Timetag, Value, ValueType,
};

/// A graph of signals spread over three devices.
fn graph_of(signals: &[(u8, bool)]) -> Graph {
    let mut graph = Graph::open_memory();
    for (i, (dev, output)) in signals.iter().enumerate() {
        let delta = RecordDelta::new(ObjectKind::Signal, ObjectId(100 + i as u64))
            .with(Property::Name, format!("sig{i}").as_str())
            .with(Property::Device, ObjectId(1 + u64::from(dev % 3)))
            .with(Property::Direction, if *output { "output" } else { "input" });
        graph.apply_event(EventType::Announce, delta).unwrap();
    }
    graph
}

fn steal_mode() -> impl Strategy<Value = StealMode> {
    prop_oneof![Just(StealMode::None), Just(StealMode::Oldest), Just(StealMode::Newest)]
}

proptest! {
    #[test]
    fn int32_survives_float64_round_trip(v in any::<i32>()) {
        let x = Value::from(v);
        let back = x.coerce(ValueType::Float64).unwrap().coerce(ValueType::Int32).unwrap();
        prop_assert_eq!(back, x);
    }

    #[test]
    fn coercion_is_idempotent(v in -1.0e6f64..1.0e6, target in prop_oneof![
        Just(ValueType::Int32),
        Just(ValueType::Int64),
        Just(ValueType::Float32),
        Just(ValueType::Float64),
        Just(ValueType::String),
    ]) {
        let once = Value::from(v).coerce(target).unwrap();
        prop_assert_eq!(once.kind(), target);
        prop_assert_eq!(once.coerce(target).unwrap(), once.clone());
        let through_float = once.coerce(ValueType::Float64).unwrap().coerce(target).unwrap();
        prop_assert_eq!(through_float, once);
    }

    #[test]
    fn star_matches_everything(text in "[a-z./]{0,12}") {
        prop_assert!(wildcard_match("*", &text));
        prop_assert!(wildcard_match(&text, &text));
        let prefixed = format!("{text}*");
        let suffixed = format!("{text}.suffix");
        prop_assert!(wildcard_match(&prefixed, &suffixed));
    }

    #[test]
    fn union_and_intersection_sizes_balance(signals in prop::collection::vec((any::<u8>(), any::<bool>()), 0..24)) {
        let graph = graph_of(&signals);
        let outputs = graph.query(ObjectKind::Signal).filter(Property::Direction, Op::Equal, "output");
        let first_device = mapper_rs::Query::SignalsOf { device: ObjectId(1), direction: None };

        let union = outputs.clone().union(first_device.clone()).unwrap().size(&graph);
        let both = outputs.clone().intersect(first_device.clone()).unwrap().size(&graph);
        prop_assert_eq!(union + both, outputs.size(&graph) + first_device.size(&graph));
    }

    #[test]
    fn difference_with_self_is_empty(signals in prop::collection::vec((any::<u8>(), any::<bool>()), 0..24)) {
        let graph = graph_of(&signals);
        let all = graph.query(ObjectKind::Signal);
        prop_assert_eq!(all.clone().difference(all.clone()).unwrap().size(&graph), 0);
        prop_assert_eq!(all.size(&graph), signals.len());
    }

    #[test]
    fn pushed_properties_read_back(entries in prop::collection::vec(("x_[a-z]{1,6}", any::<i32>()), 1..10)) {
        let mut table = PropertyTable::new();
        for (key, value) in &entries {
            table.set(key.as_str(), *value).unwrap();
        }
        table.push_with(|_| Ok(())).unwrap();
        prop_assert!(!table.has_staged());
        for (key, _) in &entries {
            let last = entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| *v);
            prop_assert_eq!(table.get(key.as_str()).unwrap().as_i32(), last);
        }
    }

    #[test]
    fn instance_pool_never_exceeds_capacity(
        capacity in 1usize..8,
        steal in steal_mode(),
        ops in prop::collection::vec((any::<bool>(), 0u64..16), 0..64),
    ) {
        let mut pool = InstanceManager::with_pool(capacity, steal, capacity).unwrap();
        for (sec, (update, id)) in ops.into_iter().enumerate() {
            if update {
                pool.update(id, Value::from(1.0f32), Timetag::new(sec as u32, 0));
            } else {
                let _ = pool.release(id, ReleaseOrigin::Network);
            }
            prop_assert!(pool.len() <= capacity);
            prop_assert!(pool.active_count() <= pool.len());
        }
    }
}
