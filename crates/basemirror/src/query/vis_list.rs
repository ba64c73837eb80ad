//! The ordered record list behind a live query.
//!
//! Updates are incremental: a membership change inserts or removes ids, a
//! value change moves only the ids whose values changed. A full re-sort is
//! only needed when the comparator itself changes.

use std::cmp::Ordering;
use std::collections::HashSet;

use basemirror_util::{insert_sorted_by, insertion_sort_by, is_sorted_by, sorted_position_by};

/// Past this share of the list (1/n) a batch of moved ids is cheaper to
/// settle with one insertion sort.
const RESORT_DIVISOR: usize = 4;

#[derive(Debug, Clone, Default)]
pub(crate) struct VisList {
    order: Vec<String>,
    members: HashSet<String>,
}

impl VisList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ids(&self) -> &[String] {
        &self.order
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        if let Some(at) = self.order.iter().position(|other| other == id) {
            self.order.remove(at);
        }
        true
    }

    /// Insert `id` at its sorted position. Returns `false` if already present.
    pub(crate) fn insert_sorted<F>(&mut self, id: &str, mut compare: F) -> bool
    where
        F: FnMut(&str, &str) -> Ordering,
    {
        if !self.members.insert(id.to_string()) {
            return false;
        }
        insert_sorted_by(&mut self.order, id.to_string(), |a, b| compare(a, b));
        true
    }

    /// Move every id in `ids` to where it now sorts. Returns whether the
    /// order changed.
    ///
    /// All moved ids leave the list before any is re-inserted, so each
    /// binary search runs over ids that are still in order.
    pub(crate) fn reposition<F>(&mut self, ids: &[String], mut compare: F) -> bool
    where
        F: FnMut(&str, &str) -> Ordering,
    {
        let moving: HashSet<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| self.members.contains(*id))
            .collect();
        if moving.is_empty() {
            return false;
        }
        if moving.len() * RESORT_DIVISOR > self.order.len() {
            return self.resort(compare);
        }

        let before: Vec<(usize, String)> = self
            .order
            .iter()
            .enumerate()
            .filter(|(_, id)| moving.contains(id.as_str()))
            .map(|(at, id)| (at, id.clone()))
            .collect();
        self.order.retain(|id| !moving.contains(id.as_str()));
        for (_, id) in &before {
            let to = sorted_position_by(&self.order, id, |a, b| compare(a, b));
            self.order.insert(to, id.clone());
        }
        // The untouched ids keep their relative order, so the list is
        // unchanged exactly when every moved id is back at its old index.
        before
            .iter()
            .any(|(at, id)| self.order.get(*at) != Some(id))
    }

    /// Re-establish order after the comparator changed. Returns whether
    /// anything moved.
    pub(crate) fn resort<F>(&mut self, mut compare: F) -> bool
    where
        F: FnMut(&str, &str) -> Ordering,
    {
        let before = self.order.clone();
        insertion_sort_by(&mut self.order, |a, b| compare(a, b));
        before != self.order
    }

    /// Bring membership in line with `ids` without rebuilding the list.
    ///
    /// Dropped ids are removed and new ids inserted at their sorted
    /// positions. If the kept ids are no longer in order under `compare`
    /// (their tie-break order moved) they are re-sorted first. Returns
    /// `(added, removed, reordered)`.
    pub(crate) fn sync<F>(&mut self, ids: &[String], mut compare: F) -> (Vec<String>, Vec<String>, bool)
    where
        F: FnMut(&str, &str) -> Ordering,
    {
        let next: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let removed: Vec<String> = self
            .order
            .iter()
            .filter(|id| !next.contains(id.as_str()))
            .cloned()
            .collect();
        for id in &removed {
            self.remove(id);
        }
        let reordered = !is_sorted_by(&self.order, |a, b| compare(a, b)) && self.resort(&mut compare);
        let mut added = Vec::new();
        for id in ids {
            if self.insert_sorted(id, &mut compare) {
                added.push(id.clone());
            }
        }
        (added, removed, reordered)
    }

    /// Replace the contents with `ids`, sorted. Returns `(added, removed)`
    /// relative to the previous contents.
    pub(crate) fn replace<F>(&mut self, ids: Vec<String>, mut compare: F) -> (Vec<String>, Vec<String>)
    where
        F: FnMut(&str, &str) -> Ordering,
    {
        let next: HashSet<String> = ids.iter().cloned().collect();
        let added: Vec<String> = ids
            .iter()
            .filter(|id| !self.members.contains(*id))
            .cloned()
            .collect();
        let removed: Vec<String> = self
            .order
            .iter()
            .filter(|id| !next.contains(*id))
            .cloned()
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(next.len());
        let mut seen = HashSet::with_capacity(next.len());
        for id in ids {
            if seen.insert(id.clone()) {
                order.push(id);
            }
        }
        order.sort_by(|a, b| compare(a, b));
        self.order = order;
        self.members = next;
        (added, removed)
    }
}
