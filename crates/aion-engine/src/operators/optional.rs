//! OPTIONAL: left outer join against a pattern group.

use super::bgp::execute_bgp;
use super::{BoxedSolutionIter, SolutionIter};
use crate::solution::Solution;
use crate::store::Store;
use aion_common::cancel::CancelToken;
use aion_common::key::TemporalFilter;
use aion_common::term::TriplePattern;
use aion_common::Result;

/// Left outer join: for each left solution, probe the right pattern
/// group; emit every match, or the left solution alone (right variables
/// unbound) when nothing matches.
pub struct OptionalJoin<'a> {
    store: &'a Store,
    left: BoxedSolutionIter<'a>,
    right_patterns: Vec<TriplePattern>,
    filter: Option<TemporalFilter>,
    cancel: CancelToken,
    /// In-flight right-side iterator for the current left row.
    inner: Option<BoxedSolutionIter<'a>>,
    /// The current left row, kept for the no-match emission.
    left_row: Solution,
    /// Whether the current left row produced at least one match.
    matched: bool,
    current: Solution,
}

impl<'a> OptionalJoin<'a> {
    /// Creates the join.
    pub fn new(
        store: &'a Store,
        left: BoxedSolutionIter<'a>,
        right_patterns: Vec<TriplePattern>,
        filter: Option<TemporalFilter>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            left,
            right_patterns,
            filter,
            cancel,
            inner: None,
            left_row: Solution::new(0),
            matched: false,
            current: Solution::new(0),
        }
    }
}

impl SolutionIter for OptionalJoin<'_> {
    fn advance(&mut self) -> Result<bool> {
        loop {
            if let Some(inner) = &mut self.inner {
                if inner.advance()? {
                    self.matched = true;
                    self.current = inner.current().clone();
                    return Ok(true);
                }
                let had_match = self.matched;
                self.inner = None;
                if !had_match {
                    self.current = self.left_row.clone();
                    return Ok(true);
                }
            }

            if !self.left.advance()? {
                return Ok(false);
            }
            self.left_row = self.left.current().clone();
            self.matched = false;
            self.inner = Some(execute_bgp(
                self.store,
                &self.right_patterns,
                self.filter,
                self.left_row.clone(),
                self.cancel.clone(),
            )?);
        }
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}
