//! UNION: concatenation of two solution streams.

use super::{BoxedSolutionIter, SolutionIter};
use crate::solution::Solution;
use aion_common::Result;

/// Concatenates the left stream then the right. Variables appearing on
/// only one side remain unbound on the other side's rows; both sides
/// share the query-wide variable space, so no renaming happens here.
pub struct UnionIter<'a> {
    left: BoxedSolutionIter<'a>,
    right: BoxedSolutionIter<'a>,
    on_right: bool,
}

impl<'a> UnionIter<'a> {
    /// Creates the union.
    pub fn new(left: BoxedSolutionIter<'a>, right: BoxedSolutionIter<'a>) -> Self {
        Self {
            left,
            right,
            on_right: false,
        }
    }
}

impl SolutionIter for UnionIter<'_> {
    fn advance(&mut self) -> Result<bool> {
        if !self.on_right {
            if self.left.advance()? {
                return Ok(true);
            }
            self.on_right = true;
        }
        self.right.advance()
    }

    fn current(&self) -> &Solution {
        if self.on_right {
            self.right.current()
        } else {
            self.left.current()
        }
    }
}
