//! Export tests: JSON snapshot and tree rendering of a populated graph.

use std::time::Duration;

use pretty_assertions::assert_eq;

use mapper_rs::export::{export_json, snapshot_json, write_tree};
use mapper_rs::{Graph, NetworkEvent, ObjectId, ObjectKind, Property, RecordDelta, SlotLocation};

fn populated() -> Graph {
    let mut graph = Graph::open_memory();
    let signal = |id: u64, dev: u64, name: &str, dir: &str| {
        NetworkEvent::announce(
            RecordDelta::new(ObjectKind::Signal, ObjectId(id))
                .with(Property::Name, name)
                .with(Property::Device, ObjectId(dev))
                .with(Property::Direction, dir)
                .with(Property::Type, "f")
                .with(Property::Length, 2),
        )
    };
    graph.transport().inject_all([
        NetworkEvent::announce(RecordDelta::new(ObjectKind::Device, ObjectId(1)).with(Property::Name, "synth")),
        NetworkEvent::announce(RecordDelta::new(ObjectKind::Device, ObjectId(2)).with(Property::Name, "mixer")),
        signal(10, 1, "freq", "output"),
        signal(20, 2, "gain", "input"),
        NetworkEvent::announce(
            RecordDelta::new(ObjectKind::Map, ObjectId(90))
                .with(Property::Sources, vec![10i64])
                .with(Property::Destination, ObjectId(20))
                .with(Property::Expr, "y=x")
                .with_slot(SlotLocation::Source(0), Property::Min, 0.0f32),
        ),
        NetworkEvent::announce(
            RecordDelta::new(ObjectKind::Link, ObjectId(50)).with(Property::Devices, vec![1i64, 2]),
        ),
        NetworkEvent::announce(RecordDelta::new(ObjectKind::Device, ObjectId(3)).with(Property::Name, "gone")),
        NetworkEvent::remove(ObjectKind::Device, ObjectId(3)),
    ]);
    graph.poll(Duration::ZERO);
    graph
}

#[test]
fn test_snapshot_lists_live_records_by_kind() {
    let graph = populated();
    let json = snapshot_json(&graph).unwrap();

    let ids = |label: &str| -> Vec<u64> {
        json[label].as_array().unwrap().iter().map(|r| r["id"].as_u64().unwrap()).collect()
    };
    assert_eq!(ids("devices"), vec![1, 2]);
    assert_eq!(ids("signals"), vec![10, 20]);
    assert_eq!(ids("maps"), vec![90]);
    assert_eq!(ids("links"), vec![50]);

    let map = &json["maps"][0];
    assert_eq!(map["sources"][0]["signal"], 10);
    assert_eq!(map["destination"]["signal"], 20);
    assert_eq!(map["local"], false);
    assert!(map["sources"][0]["properties"].get("@min").is_some());
    assert_eq!(json["signals"][0]["device"], 1);
    assert_eq!(json["links"][0]["devices"], serde_json::json!([1, 2]));
}

#[test]
fn test_export_json_writes_parseable_document() {
    let graph = populated();
    let mut buf = Vec::new();
    export_json(&graph, &mut buf).unwrap();

    let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
    assert_eq!(parsed, snapshot_json(&graph).unwrap());
    assert!(buf.ends_with(b"\n"));
}

#[test]
fn test_tree_shows_devices_signals_maps_and_links() {
    let graph = populated();
    let mut buf = Vec::new();
    write_tree(&graph, &mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.contains("synth (0x1)"));
    assert!(text.contains("└─ output freq [f x2]"));
    assert!(text.contains("[synth/freq] -> mixer/gain"));
    assert!(text.contains("synth <-> mixer"));
    assert!(!text.contains("gone"));
}

#[test]
fn test_empty_graph_exports_empty_arrays() {
    let graph = Graph::open_memory();
    let json = snapshot_json(&graph).unwrap();
    for label in ["devices", "signals", "maps", "links"] {
        assert_eq!(json[label], serde_json::json!([]));
    }
    let mut buf = Vec::new();
    write_tree(&graph, &mut buf).unwrap();
    assert!(buf.is_empty());
}
