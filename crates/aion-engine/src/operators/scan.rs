//! The pattern-match operator: one triple pattern over the store.

use super::SolutionIter;
use crate::solution::Solution;
use crate::store::{QuadIter, Store};
use aion_common::cancel::CancelToken;
use aion_common::key::TemporalFilter;
use aion_common::term::{PatternTerm, TriplePattern};
use aion_common::Result;

/// Streams the solutions of one triple pattern, extending a base
/// solution (the identity solution for a root pattern, the left row for
/// an indexed nested-loop join).
///
/// Wraps the multi-index store's quad iterator without buffering. Repeated
/// variables within the pattern (`?x <p> ?x`) are enforced here, since the
/// key range alone cannot express them.
pub struct PatternScanIter<'a> {
    quads: QuadIter<'a>,
    pattern: TriplePattern,
    base: Solution,
    current: Solution,
}

impl<'a> PatternScanIter<'a> {
    /// Creates a scan for `pattern` with `base`'s bindings substituted
    /// into it.
    pub fn new(
        store: &'a Store,
        pattern: &TriplePattern,
        base: Solution,
        filter: Option<TemporalFilter>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let bound = super::substitute(pattern, &base);
        let quads = store.match_pattern(&bound, filter, cancel)?;
        let current = base.clone();
        Ok(Self {
            quads,
            pattern: *pattern,
            base,
            current,
        })
    }

    /// Binds the pattern's variables against a quad, rejecting rows that
    /// disagree with existing bindings or repeat a variable with two
    /// different atoms.
    fn bind(&self, quad: &aion_common::term::Quad) -> Option<Solution> {
        let mut solution = self.base.clone();
        for (term, atom) in [
            (self.pattern.subject, quad.subject),
            (self.pattern.predicate, quad.predicate),
            (self.pattern.object, quad.object),
        ] {
            if let PatternTerm::Var(var) = term {
                match solution.get(var) {
                    Some(existing) if existing != atom => return None,
                    Some(_) => {}
                    None => solution.set(var, atom),
                }
            }
        }
        Some(solution)
    }
}

impl SolutionIter for PatternScanIter<'_> {
    fn advance(&mut self) -> Result<bool> {
        loop {
            if !self.quads.advance()? {
                return Ok(false);
            }
            if let Some(solution) = self.bind(&self.quads.current()) {
                self.current = solution;
                return Ok(true);
            }
        }
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}
