//! Bitemporal write semantics: current/historical inserts, overlap
//! truncation, and tombstone deletes.
//!
//! Valid time lives in the key; transaction time is recorded on every
//! insert (corrections included) and never mutated, so "what did we know
//! on date X" stays answerable. History is non-destructive: a superseded
//! version is rewritten with a truncated interval and a stamped
//! `modified_at`, never erased.

use crate::store::{PrimOp, Store};
use aion_common::key::{EntryMeta, IndexOrder, KeyComponents, TemporalFilter, TIME_OPEN_END};
use aion_common::term::{Atom, PatternTerm, TriplePattern};
use aion_common::time::{now_millis, now_secs};
use aion_common::{AionError, CancelToken, Result};

/// One stored version of a fact, as found in the canonical index.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    /// Full key components including the valid interval and tx time.
    pub components: KeyComponents,
    /// Entry metadata (tombstone, version counter, stamps).
    pub meta: EntryMeta,
}

impl Store {
    /// Records a fact valid from now with an open end: interval
    /// `[now, ∞)`, transaction time now. Returns false if this exact
    /// version already existed.
    pub fn add_current(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        graph: Option<&str>,
    ) -> Result<bool> {
        let now = now_millis();
        self.add_historical_at(subject, predicate, object, now, TIME_OPEN_END, graph, now)
    }

    /// Records a fact with an explicit validity interval `[valid_from,
    /// valid_to)`; transaction time is the insertion instant.
    ///
    /// A zero-width or inverted interval is rejected as invalid input.
    pub fn add_historical(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        valid_from: u64,
        valid_to: u64,
        graph: Option<&str>,
    ) -> Result<bool> {
        self.add_historical_at(
            subject,
            predicate,
            object,
            valid_from,
            valid_to,
            graph,
            now_millis(),
        )
    }

    /// Alias for [`add_historical`](Store::add_historical), matching the
    /// consumer-facing surface.
    pub fn insert_temporal(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        valid_from: u64,
        valid_to: u64,
        graph: Option<&str>,
    ) -> Result<bool> {
        self.add_historical(subject, predicate, object, valid_from, valid_to, graph)
    }

    fn add_historical_at(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        valid_from: u64,
        valid_to: u64,
        graph: Option<&str>,
        tx_time: u64,
    ) -> Result<bool> {
        if !self.options().temporal {
            return Err(AionError::InvalidPattern(
                "temporal insert on a non-temporal store".to_string(),
            ));
        }
        if valid_from >= valid_to {
            return Err(AionError::InvalidInterval {
                valid_from,
                valid_to,
            });
        }

        let _guard = self.lock_writer()?;
        let c = KeyComponents {
            graph: self.write_graph(graph)?,
            subject: self.intern_term(subject)?,
            predicate: self.intern_term(predicate)?,
            object: self.intern_term(object)?,
            valid_from,
            valid_to,
            tx_time,
        };

        let mut undo = Vec::new();
        let result = self
            .truncate_overlaps(&c, &mut undo)
            .and_then(|_| self.raw_insert(&c, &EntryMeta::new(now_secs()), &mut undo));

        match result {
            Ok(inserted) => {
                self.commit()?;
                Ok(inserted)
            }
            Err(err) => {
                self.rollback(undo);
                Err(err)
            }
        }
    }

    /// Truncates prior versions of the same fact whose interval still
    /// covers the new `valid_from`, keeping the current view
    /// single-valued while preserving history.
    ///
    /// A prior starting strictly earlier is rewritten with
    /// `valid_to = new valid_from`, its `modified_at` stamped and version
    /// bumped; the rewrite keys carry the original transaction time. A
    /// prior starting at exactly the new `valid_from` would truncate to a
    /// zero-width interval, so it is tombstoned as fully superseded.
    fn truncate_overlaps(&self, new: &KeyComponents, undo: &mut Vec<PrimOp>) -> Result<()> {
        let stamp = now_secs();
        for version in self.versions_of(new.graph, new.subject, new.predicate, new.object)? {
            if version.meta.is_tombstone() {
                continue;
            }
            let prior = version.components;
            // Skip the new key itself and non-overlapping versions.
            if prior == *new || !(prior.valid_from <= new.valid_from && new.valid_from < prior.valid_to)
            {
                continue;
            }

            if prior.valid_from == new.valid_from {
                let mut meta = version.meta;
                meta.set_tombstone(true);
                meta.modified_at = stamp;
                meta.version += 1;
                self.raw_set_meta(&prior, &meta, undo)?;
            } else {
                self.raw_remove(&prior, undo)?;
                let mut truncated = prior;
                truncated.valid_to = new.valid_from;
                let mut meta = version.meta;
                meta.modified_at = stamp;
                meta.version += 1;
                self.raw_insert(&truncated, &meta, undo)?;
            }
        }
        Ok(())
    }

    /// Tombstones every version of the fact that is valid now. Returns
    /// the number of versions tombstoned. Tombstoned entries are skipped
    /// by every query kind; the rows themselves stay on disk for audit.
    pub fn delete_current(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        graph: Option<&str>,
    ) -> Result<usize> {
        if !self.options().temporal {
            return Err(AionError::InvalidPattern(
                "temporal delete on a non-temporal store".to_string(),
            ));
        }

        let _guard = self.lock_writer()?;
        let (graph, s, p, o) = match self.resolve_quad_atoms(subject, predicate, object, graph)? {
            Some(resolved) => resolved,
            None => return Ok(0),
        };

        let now = TemporalFilter::AsOf(now_millis());
        let stamp = now_secs();
        let mut undo = Vec::new();
        let mut tombstoned = 0usize;

        let result = (|| -> Result<()> {
            for version in self.versions_of(graph, s, p, o)? {
                if version.meta.is_tombstone() {
                    continue;
                }
                let c = version.components;
                if !now.matches(c.valid_from, c.valid_to) {
                    continue;
                }
                let mut meta = version.meta;
                meta.set_tombstone(true);
                meta.modified_at = stamp;
                meta.version += 1;
                if self.raw_set_meta(&c, &meta, &mut undo)? {
                    tombstoned += 1;
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                if tombstoned > 0 {
                    self.commit()?;
                }
                Ok(tombstoned)
            }
            Err(err) => {
                self.rollback(undo);
                Err(err)
            }
        }
    }

    /// Applies a tombstone (or any metadata rewrite) to every current
    /// version of a ground fact, as a batch primitive for the patch
    /// executor. Returns the number of versions affected.
    pub(crate) fn tombstone_current(
        &self,
        graph: Atom,
        subject: Atom,
        predicate: Atom,
        object: Atom,
        as_of: u64,
        undo: &mut Vec<PrimOp>,
    ) -> Result<usize> {
        let filter = TemporalFilter::AsOf(as_of);
        let stamp = now_secs();
        let mut affected = 0usize;
        for version in self.versions_of(graph, subject, predicate, object)? {
            if version.meta.is_tombstone() {
                continue;
            }
            let c = version.components;
            if !filter.matches(c.valid_from, c.valid_to) {
                continue;
            }
            let mut meta = version.meta;
            meta.set_tombstone(true);
            meta.modified_at = stamp;
            meta.version += 1;
            if self.raw_set_meta(&c, &meta, undo)? {
                affected += 1;
            }
        }
        Ok(affected)
    }

    /// Inserts a current version of a ground fact (with truncation) as a
    /// batch primitive for the patch executor.
    pub(crate) fn insert_current_atoms(
        &self,
        graph: Atom,
        subject: Atom,
        predicate: Atom,
        object: Atom,
        now: u64,
        undo: &mut Vec<PrimOp>,
    ) -> Result<bool> {
        let c = KeyComponents {
            graph,
            subject,
            predicate,
            object,
            valid_from: now,
            valid_to: TIME_OPEN_END,
            tx_time: now,
        };
        self.truncate_overlaps(&c, undo)?;
        self.raw_insert(&c, &EntryMeta::new(now_secs()), undo)
    }

    /// Enumerates every stored version of a ground fact in ascending
    /// `(valid_from, valid_to, transaction_time)` order, tombstones
    /// included.
    pub(crate) fn versions_of(
        &self,
        graph: Atom,
        subject: Atom,
        predicate: Atom,
        object: Atom,
    ) -> Result<Vec<Version>> {
        let mut pattern = TriplePattern::new(
            PatternTerm::Bound(subject),
            PatternTerm::Bound(predicate),
            PatternTerm::Bound(object),
        );
        if self.with_graph() {
            pattern.graph = Some(graph);
        }

        let (min, max) = crate::select::key_range(&pattern, IndexOrder::Spot, self.with_graph(), None);
        let tree = self.spot_tree();
        let mut scan = tree.scan(min.as_slice(), max.as_slice(), CancelToken::new());
        let mut versions = Vec::new();
        while scan.advance()? {
            let entry = scan.current();
            let c = aion_common::key::decode_key(IndexOrder::Spot, self.with_graph(), entry.key);
            versions.push(Version {
                components: c,
                meta: entry.meta,
            });
        }
        Ok(versions)
    }
}
