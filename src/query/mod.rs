//! # Query Algebra
//!
//! Queries are owned expression trees. They hold identities and filter
//! parameters but never borrow the graph, so they can be built, cloned and
//! combined freely, then evaluated against a graph at iteration time.
//!
//! ```text
//! Query::all(Signal)
//!     .filter("@direction", Op::Equal, "output")   // point filter
//!     .union(device.signals(None))?                 // set algebra, same kind only
//!     .iter(&graph)                                 // snapshot taken on first next()
//! ```
//!
//! A snapshot holds only live records. Re-iterating takes a fresh snapshot.

mod cursor;

use std::cmp::Ordering;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

pub use cursor::{Cursor, QueryIter};

use crate::graph::Graph;
use crate::model::{Direction, ObjectId, ObjectKind, PropertyKey, Record, Value};
use crate::transport::Transport;
use crate::{Error, Result};

/// Filter comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Equal,
    NotEqual,
    Exists,
    DoesNotExist,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

/// A lazily evaluated set of records of one kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Every live record of a kind.
    All(ObjectKind),
    /// A fixed list of ids.
    Ids { kind: ObjectKind, ids: Vec<ObjectId> },
    Filter { input: Box<Query>, key: PropertyKey, op: Op, value: Value },
    Union(Box<Query>, Box<Query>),
    Intersect(Box<Query>, Box<Query>),
    Difference(Box<Query>, Box<Query>),
    /// Signals of a device.
    SignalsOf { device: ObjectId, direction: Option<Direction> },
    /// Maps touching a signal: `Input` = the signal is the destination,
    /// `Output` = it is a source.
    MapsOf { signal: ObjectId, direction: Option<Direction> },
    /// Maps touching any signal of a device.
    MapsOfDevice { device: ObjectId, direction: Option<Direction> },
    LinksOf { device: ObjectId },
    /// Signals of a map, sources then destination.
    SignalsOfMap { map: ObjectId },
}

impl Query {
    pub fn all(kind: ObjectKind) -> Self {
        Query::All(kind)
    }

    /// A detached copy of an explicit id list.
    pub fn ids(kind: ObjectKind, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        Query::Ids { kind, ids: ids.into_iter().collect() }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Query::All(kind) | Query::Ids { kind, .. } => *kind,
            Query::Filter { input, .. } => input.kind(),
            Query::Union(a, _) | Query::Intersect(a, _) | Query::Difference(a, _) => a.kind(),
            Query::SignalsOf { .. } | Query::SignalsOfMap { .. } => ObjectKind::Signal,
            Query::MapsOf { .. } | Query::MapsOfDevice { .. } => ObjectKind::Map,
            Query::LinksOf { .. } => ObjectKind::Link,
        }
    }

    // ------------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------------

    /// Keep records whose property `key` satisfies `op` against `value`.
    /// The value is coerced to the property's kind; a failed coercion
    /// excludes the record. A missing property only matches `DoesNotExist`.
    pub fn filter(self, key: impl Into<PropertyKey>, op: Op, value: impl Into<Value>) -> Self {
        Query::Filter { input: Box::new(self), key: key.into(), op, value: value.into() }
    }

    pub fn exists(self, key: impl Into<PropertyKey>) -> Self {
        self.filter(key, Op::Exists, Value::NULL)
    }

    pub fn missing(self, key: impl Into<PropertyKey>) -> Self {
        self.filter(key, Op::DoesNotExist, Value::NULL)
    }

    fn same_kind(&self, other: &Query) -> Result<()> {
        if self.kind() != other.kind() {
            return Err(Error::TypeMismatch {
                expected: format!("{} query", self.kind()),
                got: format!("{} query", other.kind()),
            });
        }
        Ok(())
    }

    /// Left results, then right results not already present.
    pub fn union(self, other: Query) -> Result<Self> {
        self.same_kind(&other)?;
        Ok(Query::Union(Box::new(self), Box::new(other)))
    }

    /// Left results also in right, in left order.
    pub fn intersect(self, other: Query) -> Result<Self> {
        self.same_kind(&other)?;
        Ok(Query::Intersect(Box::new(self), Box::new(other)))
    }

    /// Left results not in right, in left order.
    pub fn difference(self, other: Query) -> Result<Self> {
        self.same_kind(&other)?;
        Ok(Query::Difference(Box::new(self), Box::new(other)))
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Lazy iterator; the snapshot is taken on the first `next()`.
    pub fn iter<'g, T: Transport>(&self, graph: &'g Graph<T>) -> QueryIter<'g, T> {
        QueryIter::new(self.clone(), graph)
    }

    /// Owned cursor that does not borrow the graph between steps.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.clone())
    }

    /// Number of matching records right now.
    pub fn size<T: Transport>(&self, graph: &Graph<T>) -> usize {
        self.evaluate(graph).len()
    }

    /// Matching ids right now.
    pub fn ids_in<T: Transport>(&self, graph: &Graph<T>) -> Vec<ObjectId> {
        self.evaluate(graph)
    }

    /// Take a snapshot: matching live ids, de-duplicated, in order.
    pub(crate) fn evaluate<T: Transport>(&self, graph: &Graph<T>) -> Vec<ObjectId> {
        let live = |kind: ObjectKind| graph.records_of(kind).filter(|r| r.is_live());
        match self {
            Query::All(kind) => live(*kind).map(|r| r.id).collect(),
            Query::Ids { kind, ids } => {
                let mut seen = HashSet::new();
                ids.iter()
                    .copied()
                    .filter(|id| {
                        graph.record(*id).is_some_and(|r| r.is_live() && r.kind() == *kind) && seen.insert(*id)
                    })
                    .collect()
            }
            Query::Filter { input, key, op, value } => input
                .evaluate(graph)
                .into_iter()
                .filter(|id| graph.record(*id).is_some_and(|r| matches_filter(r, key, *op, value)))
                .collect(),
            Query::Union(a, b) => {
                let mut out = a.evaluate(graph);
                let mut seen: HashSet<ObjectId> = out.iter().copied().collect();
                out.extend(b.evaluate(graph).into_iter().filter(|id| seen.insert(*id)));
                out
            }
            Query::Intersect(a, b) => {
                let right: HashSet<ObjectId> = b.evaluate(graph).into_iter().collect();
                a.evaluate(graph).into_iter().filter(|id| right.contains(id)).collect()
            }
            Query::Difference(a, b) => {
                let right: HashSet<ObjectId> = b.evaluate(graph).into_iter().collect();
                a.evaluate(graph).into_iter().filter(|id| !right.contains(id)).collect()
            }
            Query::SignalsOf { device, direction } => live(ObjectKind::Signal)
                .filter(|r| r.device() == Some(*device))
                .filter(|r| direction.is_none() || r.direction() == *direction)
                .map(|r| r.id)
                .collect(),
            Query::MapsOf { signal, direction } => live(ObjectKind::Map)
                .filter(|r| map_touches(r, |s| s == *signal, *direction))
                .map(|r| r.id)
                .collect(),
            Query::MapsOfDevice { device, direction } => {
                let owned = |s: ObjectId| graph.record(s).and_then(Record::device) == Some(*device);
                live(ObjectKind::Map)
                    .filter(|r| map_touches(r, owned, *direction))
                    .map(|r| r.id)
                    .collect()
            }
            Query::LinksOf { device } => live(ObjectKind::Link)
                .filter(|r| r.link_devices().is_some_and(|ds| ds.contains(device)))
                .map(|r| r.id)
                .collect(),
            Query::SignalsOfMap { map } => {
                let signals = graph.record(*map).map(Record::map_signals).unwrap_or_default();
                Query::ids(ObjectKind::Signal, signals).evaluate(graph)
            }
        }
    }
}

/// Does `map` attach to a signal selected by `pick` on the given side?
fn map_touches(map: &Record, pick: impl Fn(ObjectId) -> bool, direction: Option<Direction>) -> bool {
    let incoming = map.map_destination().is_some_and(&pick);
    let outgoing = map.map_sources().any(&pick);
    match direction {
        None => incoming || outgoing,
        Some(Direction::Input) => incoming,
        Some(Direction::Output) => outgoing,
    }
}

fn matches_filter(record: &Record, key: &PropertyKey, op: Op, value: &Value) -> bool {
    let Some(prop) = record.property(key) else {
        return op == Op::DoesNotExist;
    };
    match op {
        Op::Exists => return true,
        Op::DoesNotExist => return false,
        _ => {}
    }
    let Ok(target) = value.coerce(prop.kind()) else {
        return false;
    };
    let ord = prop.compare(&target);
    match op {
        Op::Equal => prop.matches(value) || prop.matches(&target),
        Op::NotEqual => !(prop.matches(value) || prop.matches(&target)),
        Op::Greater => ord == Some(Ordering::Greater),
        Op::GreaterOrEqual => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        Op::Less => ord == Some(Ordering::Less),
        Op::LessOrEqual => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        Op::Exists | Op::DoesNotExist => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectId, Property, Record, RecordData, Timetag};

    fn device_with(props: &[(&str, Value)]) -> Record {
        let mut r = Record::new(ObjectId(1), RecordData::Device { synced: Timetag::ZERO });
        for (k, v) in props {
            r.properties.apply(*k, v.clone()).unwrap();
        }
        r
    }

    #[test]
    fn test_missing_property_only_matches_does_not_exist() {
        let r = device_with(&[]);
        let key = PropertyKey::from("width");
        assert!(matches_filter(&r, &key, Op::DoesNotExist, &Value::NULL));
        for op in [Op::Equal, Op::NotEqual, Op::Exists, Op::Greater, Op::Less] {
            assert!(!matches_filter(&r, &key, op, &Value::from(1)));
        }
    }

    #[test]
    fn test_numeric_filter_coerces_value() {
        let r = device_with(&[("width", Value::from(256))]);
        let key = PropertyKey::from("width");
        assert!(matches_filter(&r, &key, Op::Equal, &Value::from(256.0f64)));
        assert!(matches_filter(&r, &key, Op::Greater, &Value::from("100")));
        assert!(matches_filter(&r, &key, Op::LessOrEqual, &Value::from(256)));
        assert!(!matches_filter(&r, &key, Op::Less, &Value::from(3)));
    }

    #[test]
    fn test_coercion_failure_excludes() {
        let r = device_with(&[("width", Value::from(256))]);
        let key = PropertyKey::from("width");
        assert!(!matches_filter(&r, &key, Op::NotEqual, &Value::from("wide")));
    }

    #[test]
    fn test_wildcard_equal() {
        let r = device_with(&[("@name", Value::from("synth.1"))]);
        let key = PropertyKey::from(Property::Name);
        assert!(matches_filter(&r, &key, Op::Equal, &Value::from("synth*")));
        assert!(matches_filter(&r, &key, Op::NotEqual, &Value::from("drum*")));
    }

    #[test]
    fn test_id_filter_uses_synthesized_property() {
        let r = device_with(&[]);
        assert!(matches_filter(&r, &Property::Id.into(), Op::Equal, &Value::from(1i64)));
    }

    #[test]
    fn test_set_ops_require_same_kind() {
        let err = Query::all(ObjectKind::Device).union(Query::all(ObjectKind::Signal)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(Query::all(ObjectKind::Signal).intersect(Query::SignalsOfMap { map: ObjectId(3) }).is_ok());
    }
}
