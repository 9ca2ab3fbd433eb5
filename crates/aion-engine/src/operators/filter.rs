//! FILTER: expression gating with effective-boolean-value semantics.

use super::{BoxedSolutionIter, SolutionIter};
use crate::expr::Expr;
use crate::solution::Solution;
use crate::store::Store;
use aion_common::Result;

/// Drops every solution whose filter expression does not evaluate to an
/// effective boolean value of true. False, unbound, and type errors all
/// drop the row; only storage failures abort the query.
pub struct FilterIter<'a> {
    store: &'a Store,
    input: BoxedSolutionIter<'a>,
    expr: Expr,
}

impl<'a> FilterIter<'a> {
    /// Creates the filter.
    pub fn new(store: &'a Store, input: BoxedSolutionIter<'a>, expr: Expr) -> Self {
        Self { store, input, expr }
    }
}

impl SolutionIter for FilterIter<'_> {
    fn advance(&mut self) -> Result<bool> {
        loop {
            if !self.input.advance()? {
                return Ok(false);
            }
            let keep = self
                .expr
                .eval(self.input.current(), self.store)
                .and_then(|v| v.ebv())
                .unwrap_or(false);
            if keep {
                return Ok(true);
            }
        }
    }

    fn current(&self) -> &Solution {
        self.input.current()
    }
}
