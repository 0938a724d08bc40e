//! Iteration over query snapshots.

use super::Query;
use crate::graph::{Graph, ObjectRef};
use crate::model::ObjectId;
use crate::transport::{MemoryTransport, Transport};

// ============================================================================
// QueryIter
// ============================================================================

/// Single-pass iterator over a query, borrowing the graph.
///
/// The snapshot is taken on the first call to `next` (or `size`), so an
/// iterator created before a poll sees the post-poll state.
pub struct QueryIter<'g, T: Transport = MemoryTransport> {
    query: Query,
    graph: &'g Graph<T>,
    snapshot: Option<Vec<ObjectId>>,
    pos: usize,
}

impl<'g, T: Transport> QueryIter<'g, T> {
    pub(super) fn new(query: Query, graph: &'g Graph<T>) -> Self {
        Self { query, graph, snapshot: None, pos: 0 }
    }

    fn snapshot(&mut self) -> &[ObjectId] {
        let graph = self.graph;
        let query = &self.query;
        self.snapshot.get_or_insert_with(|| query.evaluate(graph))
    }

    /// Records remaining.
    pub fn size(&mut self) -> usize {
        let pos = self.pos;
        self.snapshot().len() - pos
    }
}

impl<'g, T: Transport> Iterator for QueryIter<'g, T> {
    type Item = ObjectRef<'g, T>;

    fn next(&mut self) -> Option<Self::Item> {
        let graph = self.graph;
        loop {
            let pos = self.pos;
            let id = *self.snapshot().get(pos)?;
            self.pos += 1;
            if let Some(obj) = graph.object(id) {
                return Some(obj);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.snapshot {
            Some(s) => (0, Some(s.len() - self.pos)),
            None => (0, None),
        }
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Restartable cursor that owns its snapshot and borrows the graph only
/// per step, so the graph can be polled between steps. Ids evicted in the
/// meantime are skipped.
#[derive(Debug, Clone)]
pub struct Cursor {
    query: Query,
    snapshot: Option<Vec<ObjectId>>,
    pos: usize,
}

impl Cursor {
    pub(super) fn new(query: Query) -> Self {
        Self { query, snapshot: None, pos: 0 }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    fn ensure<T: Transport>(&mut self, graph: &Graph<T>) {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.query.evaluate(graph));
            self.pos = 0;
        }
    }

    /// Next id still held by the graph.
    pub fn next<T: Transport>(&mut self, graph: &Graph<T>) -> Option<ObjectId> {
        self.ensure(graph);
        let snapshot = self.snapshot.as_deref()?;
        while let Some(id) = snapshot.get(self.pos).copied() {
            self.pos += 1;
            if graph.contains(id) {
                return Some(id);
            }
        }
        None
    }

    /// Remaining ids in the snapshot.
    pub fn size<T: Transport>(&mut self, graph: &Graph<T>) -> usize {
        self.ensure(graph);
        self.snapshot.as_ref().map_or(0, |s| s.len() - self.pos)
    }

    /// Drop the snapshot; the next step takes a fresh one.
    pub fn restart(&mut self) {
        self.snapshot = None;
        self.pos = 0;
    }
}
