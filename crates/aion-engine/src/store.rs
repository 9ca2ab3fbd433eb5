//! The store facade: multi-index coordination, the quad layer, and the
//! pattern-matching scan that feeds every query operator.

use crate::select::{choose_order, key_range};
use crate::stats::FrequencyStats;
use aion_atoms::AtomStore;
use aion_buffer::{PageCache, PageCacheStats};
use aion_common::cancel::CancelToken;
use aion_common::config::StoreOptions;
use aion_common::key::{
    decode_key, encode_key, EntryLayout, EntryMeta, IndexOrder, KeyComponents, TemporalFilter,
};
use aion_common::page::PAGE_SIZE;
use aion_common::term::{
    is_variable, Atom, PatternTerm, Quad, TriplePattern, ATOM_MAX, DEFAULT_GRAPH,
};
use aion_common::time::now_millis;
use aion_common::{AionError, Result};
use aion_storage::{BTree, DiskManager, DiskManagerConfig, TreeScan};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File stem of the shared atom store within a store directory.
const ATOMS_STEM: &str = "store.tdb.atoms";

/// An embedded bitemporal RDF quad store.
///
/// One atom store plus one B+tree per maintained index order, coordinated
/// so every index holds the identical logical set. Writes are serialized
/// by a single-writer lock; readers snapshot roots per scan and are never
/// blocked.
pub struct Store {
    options: StoreOptions,
    dir: PathBuf,
    disk: Arc<DiskManager>,
    cache: Arc<PageCache>,
    atoms: RwLock<AtomStore>,
    /// Trees in the order of `orders`; index 0 is the canonical
    /// (SPO/SPOT) tree whose entry count is the triple count.
    trees: Vec<BTree>,
    orders: &'static [IndexOrder],
    /// The single-writer lock serializing all structural mutations.
    writer: Mutex<()>,
    stats: RwLock<FrequencyStats>,
}

/// A primitive mutation with enough context to reverse it. Batches log
/// these and roll back in reverse order when a step fails.
pub(crate) enum PrimOp {
    /// Undo by deleting the key from every index.
    Insert(KeyComponents),
    /// Undo by reinserting the captured entry into every index.
    Remove(KeyComponents, u64, EntryMeta),
    /// Undo by restoring the captured metadata in every index.
    SetMeta(KeyComponents, EntryMeta),
}

impl Store {
    /// Opens or creates a store in `dir`.
    pub fn open(dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let _span = tracing::info_span!("store_open", dir = %dir.display()).entered();
        std::fs::create_dir_all(&dir)?;

        let disk = Arc::new(DiskManager::new(DiskManagerConfig {
            data_dir: dir.clone(),
            fsync_enabled: options.fsync_enabled,
        })?);
        let cache = Arc::new(PageCache::new(options.cache.clone()));
        let atoms = AtomStore::open(dir.join(ATOMS_STEM))?;

        let orders: &'static [IndexOrder] = if options.temporal {
            &IndexOrder::TEMPORAL
        } else {
            &IndexOrder::TRIPLE
        };

        let mut trees = Vec::with_capacity(orders.len());
        for order in orders {
            trees.push(BTree::open(
                disk.clone(),
                cache.clone(),
                order.file_id(),
                order.file_stem(),
                EntryLayout::for_order(*order, options.named_graphs),
            )?);
        }

        tracing::info!(
            indexes = orders.len(),
            temporal = options.temporal,
            named_graphs = options.named_graphs,
            triples = trees[0].entry_count(),
            "store opened"
        );

        Ok(Self {
            options,
            dir,
            disk,
            cache,
            atoms: RwLock::new(atoms),
            trees,
            orders,
            writer: Mutex::new(()),
            stats: RwLock::new(FrequencyStats::new()),
        })
    }

    /// The options this store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[inline]
    pub(crate) fn with_graph(&self) -> bool {
        self.options.named_graphs
    }

    #[inline]
    fn primary(&self) -> &BTree {
        &self.trees[0]
    }

    fn tree_for(&self, order: IndexOrder) -> &BTree {
        let idx = self
            .orders
            .iter()
            .position(|o| *o == order)
            .expect("order not maintained by this store");
        &self.trees[idx]
    }

    /// The canonical temporal tree, for version-history scans.
    pub(crate) fn spot_tree(&self) -> &BTree {
        self.tree_for(IndexOrder::Spot)
    }

    // =========================================================================
    // Atom plumbing
    // =========================================================================

    /// Interns an RDF term, validating its lexical form.
    pub(crate) fn intern_term(&self, text: &str) -> Result<Atom> {
        if text.is_empty() {
            return Err(AionError::InvalidTerm("empty term".to_string()));
        }
        if is_variable(text) {
            return Err(AionError::InvalidTerm(format!(
                "variable {} where a ground term is required",
                text
            )));
        }
        self.atoms.write().intern(text.as_bytes())
    }

    /// Read-only atom lookup for resolving bound query terms.
    pub fn atom_of(&self, text: &str) -> Option<Atom> {
        self.atoms.read().id_of(text.as_bytes())
    }

    /// Resolves an atom back to its term text.
    pub fn resolve_atom(&self, atom: Atom) -> Result<String> {
        let atoms = self.atoms.read();
        let bytes = atoms.lookup(atom)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Resolves an atom to its raw bytes, copied out of the store.
    pub(crate) fn atom_bytes(&self, atom: Atom) -> Result<Vec<u8>> {
        let atoms = self.atoms.read();
        Ok(atoms.lookup(atom)?.to_vec())
    }

    /// Resolves the graph argument for a write operation, interning named
    /// graphs.
    pub(crate) fn write_graph(&self, graph: Option<&str>) -> Result<Atom> {
        match graph {
            None => Ok(DEFAULT_GRAPH),
            Some(g) => {
                if !self.options.named_graphs {
                    return Err(AionError::InvalidPattern(
                        "store opened without named graphs".to_string(),
                    ));
                }
                self.intern_term(g)
            }
        }
    }

    /// Builds a triple pattern from term texts, registering `?variables`.
    ///
    /// A bound term absent from the atom store binds the reserved maximum
    /// sentinel, which no stored key carries, so the pattern matches
    /// nothing.
    pub fn pattern(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
        graph: Option<&str>,
        vars: &mut crate::solution::VarRegistry,
    ) -> TriplePattern {
        let position = |text: Option<&str>, vars: &mut crate::solution::VarRegistry| match text {
            None => PatternTerm::Any,
            Some(t) if is_variable(t) => PatternTerm::Var(vars.var(t)),
            Some(t) => PatternTerm::Bound(self.atom_of(t).unwrap_or(ATOM_MAX)),
        };

        let mut pattern = TriplePattern::new(
            position(subject, vars),
            position(predicate, vars),
            position(object, vars),
        );
        if let Some(g) = graph {
            pattern.graph = Some(self.atom_of(g).unwrap_or(ATOM_MAX));
        }
        pattern
    }

    // =========================================================================
    // Single-writer lock
    // =========================================================================

    /// Acquires the single-writer lock, failing with `Busy` after the
    /// configured timeout.
    pub(crate) fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .try_lock_for(self.options.writer_lock_timeout())
            .ok_or(AionError::Busy)
    }

    // =========================================================================
    // Primitive mutations with undo logging
    // =========================================================================

    /// Encodes `c` for every maintained index.
    fn keys_for(&self, c: &KeyComponents) -> impl Iterator<Item = (usize, aion_common::KeyBuf)> + '_ {
        let c = *c;
        let with_graph = self.with_graph();
        self.orders
            .iter()
            .enumerate()
            .map(move |(i, order)| (i, encode_key(*order, with_graph, &c)))
    }

    /// Inserts an entry into every index. Idempotent on exact key;
    /// returns whether the entry was new.
    pub(crate) fn raw_insert(
        &self,
        c: &KeyComponents,
        meta: &EntryMeta,
        undo: &mut Vec<PrimOp>,
    ) -> Result<bool> {
        undo.push(PrimOp::Insert(*c));

        let mut inserted = false;
        for (i, key) in self.keys_for(c) {
            let was_new = self.trees[i].insert(key.as_slice(), 0, meta)?;
            if i == 0 {
                inserted = was_new;
            }
        }

        if inserted {
            self.stats.write().record_insert(c.predicate, c.object);
        } else {
            undo.pop();
        }
        Ok(inserted)
    }

    /// Removes an entry from every index. Returns whether it existed.
    pub(crate) fn raw_remove(&self, c: &KeyComponents, undo: &mut Vec<PrimOp>) -> Result<bool> {
        let primary_key = encode_key(self.orders[0], self.with_graph(), c);
        let existing = self.primary().lookup(primary_key.as_slice())?;
        let (value, meta) = match existing {
            Some(found) => found,
            None => return Ok(false),
        };

        undo.push(PrimOp::Remove(*c, value, meta));
        for (i, key) in self.keys_for(c) {
            self.trees[i].delete(key.as_slice())?;
        }
        self.stats.write().record_delete(c.predicate, c.object);
        Ok(true)
    }

    /// Rewrites an entry's metadata in every index. Returns whether the
    /// entry existed.
    pub(crate) fn raw_set_meta(
        &self,
        c: &KeyComponents,
        new_meta: &EntryMeta,
        undo: &mut Vec<PrimOp>,
    ) -> Result<bool> {
        let primary_key = encode_key(self.orders[0], self.with_graph(), c);
        let old = match self.primary().lookup(primary_key.as_slice())? {
            Some((_, meta)) => meta,
            None => return Ok(false),
        };

        undo.push(PrimOp::SetMeta(*c, old));
        for (i, key) in self.keys_for(c) {
            self.trees[i].set_meta(key.as_slice(), new_meta)?;
        }
        Ok(true)
    }

    /// Reverses a batch's logged operations, newest first. Rollback is
    /// best-effort: a failing undo step is logged and skipped so the rest
    /// of the batch still unwinds.
    pub(crate) fn rollback(&self, undo: Vec<PrimOp>) {
        for op in undo.into_iter().rev() {
            let outcome = match op {
                PrimOp::Insert(c) => {
                    let mut removed = false;
                    let result: Result<()> = self.keys_for(&c).try_for_each(|(i, key)| {
                        let was_present = self.trees[i].delete(key.as_slice())?;
                        if i == 0 {
                            removed = was_present;
                        }
                        Ok(())
                    });
                    if removed {
                        self.stats.write().record_delete(c.predicate, c.object);
                    }
                    result
                }
                PrimOp::Remove(c, value, meta) => {
                    let result = self.keys_for(&c).try_for_each(|(i, key)| {
                        self.trees[i].insert(key.as_slice(), value, &meta)?;
                        Ok(())
                    });
                    self.stats.write().record_insert(c.predicate, c.object);
                    result
                }
                PrimOp::SetMeta(c, old) => self.keys_for(&c).try_for_each(|(i, key)| {
                    self.trees[i].set_meta(key.as_slice(), &old)?;
                    Ok(())
                }),
            };
            if let Err(err) = outcome {
                tracing::error!(error = %err, "undo step failed during rollback");
            }
        }
    }

    /// Commits everything written so far: atoms durably first (keys
    /// reference them), then data pages through the mmap fence, then each
    /// tree's metadata block last.
    pub(crate) fn commit(&self) -> Result<()> {
        self.atoms.write().flush()?;
        self.cache.flush_all(|page_id, data| {
            let page: &[u8; PAGE_SIZE] = data.try_into().expect("frames are page-sized");
            self.disk.write_page(page_id, page)
        })?;
        self.disk.fence_all()?;
        for tree in &self.trees {
            tree.write_meta()?;
        }
        Ok(())
    }

    // =========================================================================
    // Plain triple writes
    // =========================================================================

    /// Inserts a triple. On a temporal store this records a current
    /// version (`[now, ∞)`). Returns false if the triple already existed.
    pub fn insert_triple(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        graph: Option<&str>,
    ) -> Result<bool> {
        if self.options.temporal {
            return self.add_current(subject, predicate, object, graph);
        }

        let _guard = self.lock_writer()?;
        let c = KeyComponents {
            graph: self.write_graph(graph)?,
            subject: self.intern_term(subject)?,
            predicate: self.intern_term(predicate)?,
            object: self.intern_term(object)?,
            ..Default::default()
        };

        let mut undo = Vec::new();
        match self.raw_insert(&c, &EntryMeta::default(), &mut undo) {
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

    /// Deletes a triple. On a temporal store this tombstones every
    /// current version. Returns whether anything was affected.
    pub fn delete_triple(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        graph: Option<&str>,
    ) -> Result<bool> {
        if self.options.temporal {
            return Ok(self.delete_current(subject, predicate, object, graph)? > 0);
        }

        let _guard = self.lock_writer()?;
        let (graph, s, p, o) = match self.resolve_quad_atoms(subject, predicate, object, graph)? {
            Some(resolved) => resolved,
            None => return Ok(false),
        };
        let c = KeyComponents {
            graph,
            subject: s,
            predicate: p,
            object: o,
            ..Default::default()
        };

        let mut undo = Vec::new();
        match self.raw_remove(&c, &mut undo) {
            Ok(removed) => {
                if removed {
                    self.commit()?;
                }
                Ok(removed)
            }
            Err(err) => {
                self.rollback(undo);
                Err(err)
            }
        }
    }

    /// Resolves term texts without interning; None when any term is
    /// unknown (nothing to affect).
    pub(crate) fn resolve_quad_atoms(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
        graph: Option<&str>,
    ) -> Result<Option<(Atom, Atom, Atom, Atom)>> {
        let graph = match graph {
            None => DEFAULT_GRAPH,
            Some(g) => {
                if !self.options.named_graphs {
                    return Err(AionError::InvalidPattern(
                        "store opened without named graphs".to_string(),
                    ));
                }
                match self.atom_of(g) {
                    Some(atom) => atom,
                    None => return Ok(None),
                }
            }
        };
        let (s, p, o) = match (
            self.atom_of(subject),
            self.atom_of(predicate),
            self.atom_of(object),
        ) {
            (Some(s), Some(p), Some(o)) => (s, p, o),
            _ => return Ok(None),
        };
        Ok(Some((graph, s, p, o)))
    }

    // =========================================================================
    // Pattern matching
    // =========================================================================

    /// Streams the quads matching a pattern.
    ///
    /// On a temporal store, an absent predicate defaults to `Current`, so
    /// the plain-triple view always reflects the present; `Current` is
    /// resolved against the clock once, here.
    pub fn match_pattern(
        &self,
        pattern: &TriplePattern,
        filter: Option<TemporalFilter>,
        cancel: CancelToken,
    ) -> Result<QuadIter<'_>> {
        if pattern.graph.is_some() && !self.options.named_graphs {
            return Err(AionError::InvalidPattern(
                "graph filter on a store without named graphs".to_string(),
            ));
        }

        let filter = if self.options.temporal {
            Some(filter.unwrap_or(TemporalFilter::Current).resolve(now_millis()))
        } else {
            None
        };

        let order = choose_order(pattern, self.options.temporal, filter.as_ref());
        let (min, max) = key_range(pattern, order, self.with_graph(), filter.as_ref());
        let tree = self.tree_for(order);
        let scan = tree.scan(min.as_slice(), max.as_slice(), cancel);

        Ok(QuadIter {
            scan,
            order,
            with_graph: self.with_graph(),
            pattern: *pattern,
            filter,
            current: KeyComponents::default(),
            current_meta: EntryMeta::default(),
        })
    }

    /// Cardinality estimate for a pattern, for join ordering.
    pub fn estimate(&self, pattern: &TriplePattern) -> u64 {
        self.stats.read().estimate(pattern)
    }

    /// Evaluates a basic graph pattern, streaming solutions.
    ///
    /// `width` is the query's variable count (from its `VarRegistry`).
    /// This is the consumer-facing query surface; richer operator trees
    /// (OPTIONAL, UNION, FILTER, modifiers, aggregates) compose over the
    /// same iterators in [`crate::operators`].
    pub fn query<'a>(
        &'a self,
        patterns: &[TriplePattern],
        filter: Option<TemporalFilter>,
        width: u16,
        cancel: CancelToken,
    ) -> Result<crate::operators::BoxedSolutionIter<'a>> {
        crate::operators::bgp::execute_bgp(
            self,
            patterns,
            filter,
            crate::solution::Solution::new(width),
            cancel,
        )
    }

    // =========================================================================
    // Statistics & lifecycle
    // =========================================================================

    /// Returns counts and sizes describing the store.
    pub fn statistics(&self) -> StoreStatistics {
        let atoms = self.atoms.read();
        StoreStatistics {
            triples: self.primary().entry_count(),
            atoms: atoms.len() as u64,
            bytes: (self.disk.bytes_mapped() + atoms.bytes_used()) as u64,
            cache: self.cache.stats(),
        }
    }

    /// Checkpoints all state: dirty pages, metadata, and atoms.
    pub fn flush(&self) -> Result<()> {
        let _guard = self.lock_writer()?;
        self.commit()
    }

    /// Flushes and closes the store. Dropping without `close` flushes
    /// best-effort.
    pub fn close(self) -> Result<()> {
        let _guard = self.lock_writer()?;
        self.commit()?;
        tracing::info!(dir = %self.dir.display(), "store closed");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(_guard) = self.writer.try_lock() {
            let _ = self.commit();
        }
    }
}

/// Counts and sizes describing a store.
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    /// Logical triple/quad count (canonical index entries).
    pub triples: u64,
    /// Interned atom count.
    pub atoms: u64,
    /// Bytes on disk across page files and atom chunks.
    pub bytes: u64,
    /// Page cache occupancy.
    pub cache: PageCacheStats,
}

/// Streaming iterator over the quads matching one pattern.
///
/// Wraps the chosen index's range scan, decodes each key back to
/// canonical components, skips tombstones, applies the temporal
/// predicate, and post-filters positions the key range alone cannot pin
/// down (graph unions, repeated variables are the operator layer's job).
/// Results arrive in the chosen index's ascending key order.
pub struct QuadIter<'a> {
    scan: TreeScan<'a>,
    order: IndexOrder,
    with_graph: bool,
    pattern: TriplePattern,
    filter: Option<TemporalFilter>,
    current: KeyComponents,
    current_meta: EntryMeta,
}

impl<'a> QuadIter<'a> {
    /// Advances to the next matching quad.
    pub fn advance(&mut self) -> Result<bool> {
        loop {
            if !self.scan.advance()? {
                return Ok(false);
            }
            let entry = self.scan.current();
            let c = decode_key(self.order, self.with_graph, entry.key);

            if self.order.is_temporal() && entry.meta.is_tombstone() {
                continue;
            }
            if let Some(filter) = &self.filter {
                if !filter.matches(c.valid_from, c.valid_to) {
                    continue;
                }
            }

            let quad = Quad {
                subject: c.subject,
                predicate: c.predicate,
                object: c.object,
                graph: if self.with_graph { c.graph } else { DEFAULT_GRAPH },
            };
            if !self.pattern.matches(&quad) {
                continue;
            }

            self.current = c;
            self.current_meta = entry.meta;
            return Ok(true);
        }
    }

    /// The quad the iterator is positioned on.
    pub fn current(&self) -> Quad {
        Quad {
            subject: self.current.subject,
            predicate: self.current.predicate,
            object: self.current.object,
            graph: if self.with_graph {
                self.current.graph
            } else {
                DEFAULT_GRAPH
            },
        }
    }

    /// Full key components (including times) of the current entry.
    pub fn components(&self) -> &KeyComponents {
        &self.current
    }

    /// Per-entry metadata of the current entry.
    pub fn meta(&self) -> &EntryMeta {
        &self.current_meta
    }
}
