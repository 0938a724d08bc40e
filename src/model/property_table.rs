//! Ordered property table with staged (local, unsent) and committed
//! (confirmed by the network) state.

use serde::{Deserialize, Serialize};

use super::{PropertyKey, Value};
use crate::{Error, Result};

// ============================================================================
// Diffs
// ============================================================================

/// One change to a property table, as sent or received over the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyChange {
    Set(PropertyKey, Value),
    Remove(PropertyKey),
}

impl PropertyChange {
    pub fn key(&self) -> &PropertyKey {
        match self {
            PropertyChange::Set(k, _) | PropertyChange::Remove(k) => k,
        }
    }
}

/// An ordered list of property changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub changes: Vec<PropertyChange>,
}

impl PropertyDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: append a set.
    pub fn set(mut self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> Self {
        self.changes.push(PropertyChange::Set(key.into(), value.into()));
        self
    }

    /// Builder: append a removal.
    pub fn remove(mut self, key: impl Into<PropertyKey>) -> Self {
        self.changes.push(PropertyChange::Remove(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyChange> {
        self.changes.iter()
    }

    /// Last value set for `key` in this diff, if any.
    pub fn get(&self, key: &PropertyKey) -> Option<&Value> {
        self.changes.iter().rev().find_map(|c| match c {
            PropertyChange::Set(k, v) if k == key => Some(v),
            _ => None,
        })
    }
}

// ============================================================================
// PropertyTable
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Entry {
    key: PropertyKey,
    committed: Option<Value>,
    staged: Option<Value>,
    /// Locally removed; the committed value stays until the removal is pushed.
    #[serde(default)]
    removed: bool,
}

impl Entry {
    fn committed(key: PropertyKey, value: Value) -> Self {
        Self { key, committed: Some(value), staged: None, removed: false }
    }

    fn staged(key: PropertyKey, value: Value) -> Self {
        Self { key, committed: None, staged: Some(value), removed: false }
    }

    fn visible(&self) -> Option<&Value> {
        if self.removed {
            return None;
        }
        self.staged.as_ref().or(self.committed.as_ref())
    }

    fn is_staged(&self) -> bool {
        self.removed || self.staged.is_some()
    }
}

/// Ordered map from [`PropertyKey`] to [`Value`].
///
/// Local writes (`set`, `remove`) are staged until [`push_with`] succeeds.
/// Network writes (`apply`, `apply_removal`) land directly in committed state.
/// Reads see the staged value when one exists.
///
/// [`push_with`]: PropertyTable::push_with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyTable {
    entries: Vec<Entry>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &PropertyKey) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn get(&self, key: impl Into<PropertyKey>) -> Result<&Value> {
        let key = key.into();
        self.value(&key).ok_or_else(|| Error::NotFound(format!("property {key}")))
    }

    pub fn value(&self, key: &PropertyKey) -> Option<&Value> {
        self.position(key).and_then(|i| self.entries[i].visible())
    }

    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.value(key).is_some()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&PropertyKey, &Value)> {
        self.entries.iter().filter_map(|e| e.visible().map(|v| (&e.key, v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------------
    // Local (staged) writes
    // ------------------------------------------------------------------------

    /// Stage `value` under `key`. Fails with `TypeMismatch` for a wrong-kind
    /// well-known property; the table is unchanged on error.
    pub fn set(&mut self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        key.validate(&value)?;
        match self.position(&key) {
            Some(i) => {
                let e = &mut self.entries[i];
                e.staged = Some(value);
                e.removed = false;
            }
            None => self.entries.push(Entry::staged(key, value)),
        }
        Ok(())
    }

    /// Remove `key` locally. The removal is staged for the next push if the
    /// network knows about the key; the committed value is kept until then.
    pub fn remove(&mut self, key: impl Into<PropertyKey>) -> Result<Value> {
        let key = key.into();
        let found = self.position(&key).and_then(|i| self.entries[i].visible().cloned().map(|v| (i, v)));
        let Some((i, old)) = found else {
            return Err(Error::NotFound(format!("property {key}")));
        };
        let e = &mut self.entries[i];
        if e.committed.is_some() {
            e.staged = None;
            e.removed = true;
        } else {
            self.entries.remove(i);
        }
        Ok(old)
    }

    pub fn is_staged(&self, key: &PropertyKey) -> bool {
        self.position(key).is_some_and(|i| self.entries[i].is_staged())
    }

    pub fn has_staged(&self) -> bool {
        self.entries.iter().any(Entry::is_staged)
    }

    /// The pending local edits, sets first in table order then removals.
    pub fn staged_diff(&self) -> PropertyDiff {
        let mut diff = PropertyDiff::new();
        for e in &self.entries {
            if let Some(v) = &e.staged {
                diff.changes.push(PropertyChange::Set(e.key.clone(), v.clone()));
            }
        }
        for e in self.entries.iter().filter(|e| e.removed) {
            diff.changes.push(PropertyChange::Remove(e.key.clone()));
        }
        diff
    }

    /// Hand the staged diff to `send`; on success the staged values become
    /// committed. On failure everything stays staged. Returns the number of
    /// changes sent.
    pub fn push_with<F>(&mut self, send: F) -> Result<usize>
    where
        F: FnOnce(&PropertyDiff) -> Result<()>,
    {
        let diff = self.staged_diff();
        if diff.is_empty() {
            return Ok(0);
        }
        send(&diff)?;
        for e in &mut self.entries {
            if let Some(v) = e.staged.take() {
                e.committed = Some(v);
            }
            if std::mem::take(&mut e.removed) {
                e.committed = None;
            }
        }
        self.entries.retain(|e| e.committed.is_some());
        Ok(diff.len())
    }

    /// Drop all staged edits, reverting to committed state.
    pub fn discard_staged(&mut self) {
        for e in &mut self.entries {
            e.staged = None;
            e.removed = false;
        }
        self.entries.retain(|e| e.committed.is_some());
    }

    // ------------------------------------------------------------------------
    // Network (committed) writes
    // ------------------------------------------------------------------------

    /// Write a committed value. Returns whether the committed state changed.
    pub fn apply(&mut self, key: impl Into<PropertyKey>, value: Value) -> Result<bool> {
        let key = key.into();
        key.validate(&value)?;
        match self.position(&key) {
            Some(i) => {
                let e = &mut self.entries[i];
                // A fresh network value supersedes a pending local removal.
                e.removed = false;
                if e.committed.as_ref() == Some(&value) {
                    return Ok(false);
                }
                e.committed = Some(value);
                Ok(true)
            }
            None => {
                self.entries.push(Entry::committed(key, value));
                Ok(true)
            }
        }
    }

    /// Remove a committed value. Returns whether anything was removed.
    pub fn apply_removal(&mut self, key: &PropertyKey) -> bool {
        let Some(i) = self.position(key) else {
            return false;
        };
        let e = &mut self.entries[i];
        let had = e.committed.take().is_some();
        e.removed = false;
        if e.staged.is_none() {
            self.entries.remove(i);
        }
        had
    }

    /// Apply a network diff. Invalid entries are skipped with a warning.
    /// Returns whether anything changed.
    pub fn apply_diff(&mut self, diff: &PropertyDiff) -> bool {
        let mut changed = false;
        for change in diff.iter() {
            match change {
                PropertyChange::Set(k, v) => match self.apply(k.clone(), v.clone()) {
                    Ok(c) => changed |= c,
                    Err(e) => tracing::warn!(key = %k, error = %e, "dropping invalid property update"),
                },
                PropertyChange::Remove(k) => changed |= self.apply_removal(k),
            }
        }
        changed
    }
}
