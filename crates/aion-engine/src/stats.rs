//! Frequency counters for selectivity-driven pattern reordering.

use aion_common::term::{Atom, TriplePattern};
use std::collections::HashMap;

/// Per-predicate and per-object frequency counters, maintained in O(1) on
/// every insert and delete.
///
/// Counters are in-memory only: a reopened store starts cold and the
/// estimator falls back to bound-position heuristics until writes warm it
/// up. Estimates only order BGP patterns, so cold counters cost
/// performance, never correctness.
#[derive(Debug, Default)]
pub struct FrequencyStats {
    predicates: HashMap<Atom, u64>,
    objects: HashMap<Atom, u64>,
    total: u64,
}

impl FrequencyStats {
    /// Creates empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one inserted triple.
    #[inline]
    pub fn record_insert(&mut self, predicate: Atom, object: Atom) {
        *self.predicates.entry(predicate).or_insert(0) += 1;
        *self.objects.entry(object).or_insert(0) += 1;
        self.total += 1;
    }

    /// Records one removed triple.
    #[inline]
    pub fn record_delete(&mut self, predicate: Atom, object: Atom) {
        if let Some(count) = self.predicates.get_mut(&predicate) {
            *count = count.saturating_sub(1);
        }
        if let Some(count) = self.objects.get_mut(&object) {
            *count = count.saturating_sub(1);
        }
        self.total = self.total.saturating_sub(1);
    }

    /// Total recorded triples.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Frequency of a predicate atom.
    pub fn predicate_count(&self, predicate: Atom) -> u64 {
        self.predicates.get(&predicate).copied().unwrap_or(0)
    }

    /// Frequency of an object atom.
    pub fn object_count(&self, object: Atom) -> u64 {
        self.objects.get(&object).copied().unwrap_or(0)
    }

    /// Deterministic cardinality estimate for a pattern.
    ///
    /// The base is the tightest applicable frequency counter; a bound
    /// subject divides it, since subjects are near-unique in typical RDF
    /// data. Cold counters degrade to the total count, which still orders
    /// more-bound patterns ahead of less-bound ones.
    pub fn estimate(&self, pattern: &TriplePattern) -> u64 {
        let s = pattern.subject.atom();
        let p = pattern.predicate.atom();
        let o = pattern.object.atom();

        if s.is_some() && p.is_some() && o.is_some() {
            return 1;
        }

        let base = match (p, o) {
            (Some(p), Some(o)) => self.predicate_count(p).min(self.object_count(o)),
            (Some(p), None) => self.predicate_count(p),
            (None, Some(o)) => self.object_count(o),
            (None, None) => self.total,
        }
        .max(1);

        if s.is_some() {
            (base / 256).max(1)
        } else {
            base
        }
    }
}
