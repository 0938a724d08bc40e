//! Snapshot export: serialize the graph as JSON or as a readable tree.
//!
//! ```text
//! Graph → export_json() → {"devices": [...], "signals": [...], "maps": [...], "links": [...]}
//! Graph → write_tree()  → synth (0x1)
//!                           ├─ output freq [float32 x1]
//!                           └─ ...
//! ```
//!
//! Only live records are exported. Staged edits are shown as the table
//! currently reads them.

use std::io::Write;

use serde_json::{json, Map as JsonMap, Value as Json};

use crate::graph::Graph;
use crate::model::*;
use crate::transport::Transport;
use crate::Result;

/// Write the graph as pretty-printed JSON.
pub fn export_json<T: Transport>(graph: &Graph<T>, writer: &mut dyn Write) -> Result<()> {
    let snapshot = snapshot_json(graph)?;
    serde_json::to_writer_pretty(&mut *writer, &snapshot)?;
    writeln!(writer)?;
    Ok(())
}

/// The graph as a JSON value.
pub fn snapshot_json<T: Transport>(graph: &Graph<T>) -> Result<Json> {
    let mut out = JsonMap::new();
    for (kind, label) in [
        (ObjectKind::Device, "devices"),
        (ObjectKind::Signal, "signals"),
        (ObjectKind::Map, "maps"),
        (ObjectKind::Link, "links"),
    ] {
        let records = graph
            .records_of(kind)
            .filter(|r| r.is_live())
            .map(record_json)
            .collect::<Result<Vec<_>>>()?;
        out.insert(label.to_string(), Json::Array(records));
    }
    Ok(Json::Object(out))
}

fn table_json(table: &PropertyTable) -> Result<Json> {
    let mut map = JsonMap::new();
    for (key, value) in table.iter() {
        map.insert(key.to_string(), serde_json::to_value(value)?);
    }
    Ok(Json::Object(map))
}

fn slot_json(slot: &Slot) -> Result<Json> {
    Ok(json!({
        "signal": slot.signal.0,
        "properties": table_json(&slot.properties)?,
    }))
}

fn record_json(record: &Record) -> Result<Json> {
    let mut obj = json!({
        "id": record.id.0,
        "status": record.status,
        "properties": table_json(&record.properties)?,
    });
    let Some(fields) = obj.as_object_mut() else {
        return Ok(obj);
    };
    match &record.data {
        RecordData::Device { synced } => {
            fields.insert("synced".into(), json!(synced.as_secs_f64()));
        }
        RecordData::Signal { device, instances } => {
            fields.insert("device".into(), json!(device.0));
            fields.insert("instances".into(), serde_json::to_value(instances.iter().collect::<Vec<_>>())?);
        }
        RecordData::Map { sources, destination, local } => {
            let sources = sources.iter().map(slot_json).collect::<Result<Vec<_>>>()?;
            fields.insert("sources".into(), Json::Array(sources));
            fields.insert("destination".into(), slot_json(destination)?);
            fields.insert("local".into(), json!(local));
        }
        RecordData::Link { devices } => {
            fields.insert("devices".into(), json!([devices[0].0, devices[1].0]));
        }
    }
    Ok(obj)
}

/// Write a human-readable tree: devices with their signals, then maps and
/// links.
pub fn write_tree<T: Transport>(graph: &Graph<T>, writer: &mut dyn Write) -> Result<()> {
    let unnamed = "<unnamed>";
    let live = |kind| graph.records_of(kind).filter(|r: &&Record| r.is_live());

    for dev in live(ObjectKind::Device) {
        writeln!(writer, "{} ({})", dev.name().unwrap_or(unnamed), dev.id)?;
        let signals: Vec<&Record> = live(ObjectKind::Signal).filter(|s| s.device() == Some(dev.id)).collect();
        for (i, sig) in signals.iter().enumerate() {
            let branch = if i + 1 == signals.len() { "└─" } else { "├─" };
            let dir = sig.direction().map_or("?", Direction::as_str);
            let ty = sig.properties.value(&Property::Type.into()).and_then(Value::as_str).unwrap_or("?");
            let len = sig.properties.value(&Property::Length.into()).and_then(Value::as_i32).unwrap_or(1);
            writeln!(writer, "  {branch} {dir} {} [{ty} x{len}]", sig.name().unwrap_or(unnamed))?;
        }
    }

    let full_name = |id: ObjectId| {
        graph.object(id).and_then(|o| o.full_name()).unwrap_or_else(|| id.to_string())
    };
    let maps: Vec<&Record> = live(ObjectKind::Map).collect();
    if !maps.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "maps:")?;
    }
    for map in maps {
        let sources: Vec<String> = map.map_sources().map(&full_name).collect();
        let dest = map.map_destination().map(&full_name).unwrap_or_default();
        let local = if map.is_local() { " (local)" } else { "" };
        writeln!(writer, "  [{}] -> {dest}{local}", sources.join(", "))?;
    }

    let links: Vec<&Record> = live(ObjectKind::Link).collect();
    if !links.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "links:")?;
    }
    for link in links {
        if let Some([a, b]) = link.link_devices() {
            writeln!(writer, "  {} <-> {}", full_name(a), full_name(b))?;
        }
    }
    Ok(())
}
