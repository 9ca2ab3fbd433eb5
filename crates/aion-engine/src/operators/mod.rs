//! Streaming query operators.
//!
//! Every operator is a single-threaded cooperative iterator: `advance()`
//! moves to the next solution, `current()` borrows it. Nothing
//! materializes results unless the semantics require it (ORDER BY, hash
//! join build sides, aggregation, path closures). Errors from storage are
//! terminal; value-level errors drop rows.

pub mod aggregate;
pub mod bgp;
pub mod filter;
pub mod modifiers;
pub mod optional;
pub mod path;
pub mod scan;
pub mod union;

use crate::solution::Solution;
use aion_common::term::{PatternTerm, TriplePattern};
use aion_common::Result;

/// A pull-based solution stream.
pub trait SolutionIter {
    /// Advances to the next solution. Ok(false) is the end of the
    /// stream; errors (including `Cancelled`) are terminal.
    fn advance(&mut self) -> Result<bool>;

    /// The solution the iterator is positioned on. Only valid after
    /// `advance` returned true.
    fn current(&self) -> &Solution;
}

/// A boxed operator, the unit of composition.
pub type BoxedSolutionIter<'a> = Box<dyn SolutionIter + 'a>;

impl<'a> SolutionIter for BoxedSolutionIter<'a> {
    fn advance(&mut self) -> Result<bool> {
        (**self).advance()
    }

    fn current(&self) -> &Solution {
        (**self).current()
    }
}

/// Substitutes a solution's bindings into a pattern, turning bound
/// variables into ground terms.
pub fn substitute(pattern: &TriplePattern, solution: &Solution) -> TriplePattern {
    let position = |term: PatternTerm| match term {
        PatternTerm::Var(v) => match solution.get(v) {
            Some(atom) => PatternTerm::Bound(atom),
            None => PatternTerm::Var(v),
        },
        other => other,
    };
    TriplePattern {
        subject: position(pattern.subject),
        predicate: position(pattern.predicate),
        object: position(pattern.object),
        graph: pattern.graph,
    }
}

/// Emits one fixed solution, then ends. The identity of joins and the
/// seed for an empty WHERE clause.
pub struct SingletonIter {
    solution: Solution,
    emitted: bool,
}

impl SingletonIter {
    /// Creates an iterator yielding exactly `solution`.
    pub fn new(solution: Solution) -> Self {
        Self {
            solution,
            emitted: false,
        }
    }
}

impl SolutionIter for SingletonIter {
    fn advance(&mut self) -> Result<bool> {
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        Ok(true)
    }

    fn current(&self) -> &Solution {
        &self.solution
    }
}

/// Drains an iterator into a vector. Used where materialization is
/// semantically required (hash join builds, WHERE bindings, tests).
pub fn collect_solutions(iter: &mut dyn SolutionIter) -> Result<Vec<Solution>> {
    let mut out = Vec::new();
    while iter.advance()? {
        out.push(iter.current().clone());
    }
    Ok(out)
}
