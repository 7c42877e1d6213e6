//! Name-keyed structural diffing.
//!
//! The same two helpers drive table-level, index-level and column-level
//! comparison: [`diff`] for "what to add, what to remove" and [`intersect`]
//! for "what survives on both sides".

use std::collections::BTreeMap;

/// The result of comparing a desired map against a current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<V> {
    /// Entries present in `desired` but not in `current`.
    pub to_add: BTreeMap<String, V>,
    /// Entries present in `current` but not in `desired`.
    pub to_remove: BTreeMap<String, V>,
}

impl<V> Diff<V> {
    /// Returns `true` if both sides have the same key set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compares two maps by key only.
///
/// Values are taken from whichever side holds the key; values of keys
/// present on both sides are never inspected.
#[must_use]
pub fn diff<V: Clone>(desired: &BTreeMap<String, V>, current: &BTreeMap<String, V>) -> Diff<V> {
    Diff {
        to_add: only_in(desired, current),
        to_remove: only_in(current, desired),
    }
}

fn only_in<V: Clone>(a: &BTreeMap<String, V>, b: &BTreeMap<String, V>) -> BTreeMap<String, V> {
    a.iter()
        .filter(|(key, _)| !b.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Returns the keys present in both maps, sorted.
#[must_use]
pub fn intersect<A, B>(a: &BTreeMap<String, A>, b: &BTreeMap<String, B>) -> Vec<String> {
    if a.len() <= b.len() {
        a.keys().filter(|k| b.contains_key(*k)).cloned().collect()
    } else {
        b.keys().filter(|k| a.contains_key(*k)).cloned().collect()
    }
}
