//! Basic graph patterns: selectivity reordering and join strategy.

use super::scan::PatternScanIter;
use super::{BoxedSolutionIter, SingletonIter, SolutionIter};
use crate::solution::Solution;
use crate::store::Store;
use aion_common::cancel::CancelToken;
use aion_common::key::TemporalFilter;
use aion_common::term::TriplePattern;
use aion_common::Result;
use std::collections::{HashMap, HashSet, VecDeque};

/// Above this estimated cardinality on both sides, a join switches from
/// indexed nested-loop to hash join.
const HASH_JOIN_THRESHOLD: u64 = 1_024;

/// Builds the operator tree for a basic graph pattern.
///
/// Patterns are reshuffled by ascending estimated cardinality, then
/// joined left-deep. Each join is an indexed nested-loop when the right
/// pattern is selective (the left row's bindings substitute into the
/// pattern, giving a narrow index scan per row); when both sides are
/// large, the smaller side is materialized into a hash multimap keyed by
/// the shared variables and the other side streams.
pub fn execute_bgp<'a>(
    store: &'a Store,
    patterns: &[TriplePattern],
    filter: Option<TemporalFilter>,
    base: Solution,
    cancel: CancelToken,
) -> Result<BoxedSolutionIter<'a>> {
    if patterns.is_empty() {
        return Ok(Box::new(SingletonIter::new(base)));
    }

    let width = base.width();
    let mut ordered: Vec<TriplePattern> = patterns.to_vec();
    ordered.sort_by_key(|p| store.estimate(p));

    let mut left_estimate = store.estimate(&ordered[0]);
    let mut bound_vars: HashSet<_> = ordered[0].variables().collect();

    let mut iter: BoxedSolutionIter<'a> = Box::new(PatternScanIter::new(
        store,
        &ordered[0],
        base,
        filter,
        cancel.clone(),
    )?);

    for pattern in &ordered[1..] {
        let right_estimate = store.estimate(pattern);
        let shared: Vec<_> = pattern
            .variables()
            .filter(|v| bound_vars.contains(v))
            .collect();

        let use_hash = left_estimate > HASH_JOIN_THRESHOLD
            && right_estimate > HASH_JOIN_THRESHOLD
            && !shared.is_empty();

        iter = if use_hash {
            let build_left = left_estimate <= right_estimate;
            Box::new(HashJoin::new(
                store,
                iter,
                *pattern,
                shared,
                build_left,
                width,
                filter,
                cancel.clone(),
            )?)
        } else {
            Box::new(NestedLoopJoin::new(
                store,
                iter,
                *pattern,
                filter,
                cancel.clone(),
            ))
        };

        bound_vars.extend(pattern.variables());
        left_estimate = left_estimate.saturating_mul(right_estimate.max(1));
    }

    Ok(iter)
}

/// Indexed nested-loop join: for each left solution, substitute its
/// bindings into the right pattern and issue a fresh index scan.
pub struct NestedLoopJoin<'a> {
    store: &'a Store,
    left: BoxedSolutionIter<'a>,
    pattern: TriplePattern,
    filter: Option<TemporalFilter>,
    cancel: CancelToken,
    right: Option<PatternScanIter<'a>>,
    current: Solution,
}

impl<'a> NestedLoopJoin<'a> {
    /// Creates the join; `pattern` is scanned once per left row.
    pub fn new(
        store: &'a Store,
        left: BoxedSolutionIter<'a>,
        pattern: TriplePattern,
        filter: Option<TemporalFilter>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            left,
            pattern,
            filter,
            cancel,
            right: None,
            current: Solution::new(0),
        }
    }
}

impl SolutionIter for NestedLoopJoin<'_> {
    fn advance(&mut self) -> Result<bool> {
        loop {
            if let Some(right) = &mut self.right {
                if right.advance()? {
                    self.current = right.current().clone();
                    return Ok(true);
                }
                self.right = None;
            }

            if !self.left.advance()? {
                return Ok(false);
            }
            self.right = Some(PatternScanIter::new(
                self.store,
                &self.pattern,
                self.left.current().clone(),
                self.filter,
                self.cancel.clone(),
            )?);
        }
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}

/// Hash join: the smaller side is materialized into an open-addressing
/// hash multimap keyed by the shared variables' atoms; the larger side
/// streams and probes.
pub struct HashJoin<'a> {
    build: HashMap<Vec<aion_common::term::Atom>, Vec<Solution>>,
    probe: BoxedSolutionIter<'a>,
    join_vars: Vec<aion_common::term::VarId>,
    pending: VecDeque<Solution>,
    current: Solution,
}

impl<'a> HashJoin<'a> {
    /// Creates the join, materializing the build side immediately.
    ///
    /// `build_left` selects which input is built: the accumulated left
    /// iterator, or a fresh scan of `pattern`. `width` is the query's
    /// variable count; a scan of the bare pattern starts from an empty
    /// solution of that width.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a Store,
        left: BoxedSolutionIter<'a>,
        pattern: TriplePattern,
        join_vars: Vec<aion_common::term::VarId>,
        build_left: bool,
        width: u16,
        filter: Option<TemporalFilter>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let scan: BoxedSolutionIter<'a> = Box::new(PatternScanIter::new(
            store,
            &pattern,
            Solution::new(width),
            filter,
            cancel,
        )?);
        let (mut build_iter, probe) = if build_left { (left, scan) } else { (scan, left) };

        let mut build: HashMap<Vec<aion_common::term::Atom>, Vec<Solution>> = HashMap::new();
        while build_iter.advance()? {
            let row = build_iter.current().clone();
            build.entry(row.key_tuple(&join_vars)).or_default().push(row);
        }

        Ok(Self {
            build,
            probe,
            join_vars,
            pending: VecDeque::new(),
            current: Solution::new(width),
        })
    }
}

impl SolutionIter for HashJoin<'_> {
    fn advance(&mut self) -> Result<bool> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                self.current = row;
                return Ok(true);
            }

            if !self.probe.advance()? {
                return Ok(false);
            }
            let probe_row = self.probe.current();
            let key = probe_row.key_tuple(&self.join_vars);
            if let Some(matches) = self.build.get(&key) {
                for build_row in matches {
                    if let Some(merged) = probe_row.merged(build_row) {
                        self.pending.push_back(merged);
                    }
                }
            }
        }
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}
