//! Solution modifiers: DISTINCT, ORDER BY, LIMIT/OFFSET.

use super::{BoxedSolutionIter, SolutionIter};
use crate::solution::Solution;
use crate::store::Store;
use aion_common::term::{Atom, VarId};
use aion_common::Result;
use std::collections::HashSet;

/// Streaming DISTINCT over the full binding tuple.
///
/// The dedup set is bounded by the working-set assumption; rows stream
/// through without reordering.
pub struct DistinctIter<'a> {
    input: BoxedSolutionIter<'a>,
    vars: Vec<VarId>,
    seen: HashSet<Vec<Atom>>,
}

impl<'a> DistinctIter<'a> {
    /// Creates the dedup over the query's full variable set.
    pub fn new(input: BoxedSolutionIter<'a>, width: u16) -> Self {
        Self {
            input,
            vars: (0..width).collect(),
            seen: HashSet::new(),
        }
    }
}

impl SolutionIter for DistinctIter<'_> {
    fn advance(&mut self) -> Result<bool> {
        loop {
            if !self.input.advance()? {
                return Ok(false);
            }
            let key = self.input.current().key_tuple(&self.vars);
            if self.seen.insert(key) {
                return Ok(true);
            }
        }
    }

    fn current(&self) -> &Solution {
        self.input.current()
    }
}

/// Sort direction of one ORDER BY key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// ORDER BY: buffers the input and sorts it stably.
///
/// Secondary keys apply in listed order; each key may be ascending or
/// descending. Terms compare by lexical byte order of their stored form;
/// unbound sorts before everything.
pub struct OrderByIter<'a> {
    store: &'a Store,
    input: Option<BoxedSolutionIter<'a>>,
    keys: Vec<(VarId, SortDirection)>,
    buffer: Vec<Solution>,
    /// Position in the sorted buffer; starts one before the first row.
    position: usize,
    materialized: bool,
}

impl<'a> OrderByIter<'a> {
    /// Creates the sort. Nothing is read until the first `advance`.
    pub fn new(
        store: &'a Store,
        input: BoxedSolutionIter<'a>,
        keys: Vec<(VarId, SortDirection)>,
    ) -> Self {
        Self {
            store,
            input: Some(input),
            keys,
            buffer: Vec::new(),
            position: 0,
            materialized: false,
        }
    }

    fn materialize(&mut self) -> Result<()> {
        let mut input = self.input.take().expect("materialize runs once");
        let mut rows = Vec::new();
        while input.advance()? {
            rows.push(input.current().clone());
        }

        // Pre-resolve sort keys so the comparator never touches the atom
        // store; then a stable sort keeps input order among ties.
        let store = self.store;
        let keys = &self.keys;
        let mut keyed: Vec<(Vec<Option<Vec<u8>>>, Solution)> = rows
            .into_iter()
            .map(|solution| {
                let key: Vec<Option<Vec<u8>>> = keys
                    .iter()
                    .map(|(var, _)| {
                        solution
                            .get(*var)
                            .and_then(|atom| store.atom_bytes(atom).ok())
                    })
                    .collect();
                (key, solution)
            })
            .collect();

        let directions: Vec<SortDirection> = self.keys.iter().map(|(_, d)| *d).collect();
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, direction) in directions.iter().enumerate() {
                let ordering = a[i].cmp(&b[i]);
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });

        self.buffer = keyed.into_iter().map(|(_, solution)| solution).collect();
        self.materialized = true;
        Ok(())
    }
}

impl SolutionIter for OrderByIter<'_> {
    fn advance(&mut self) -> Result<bool> {
        if !self.materialized {
            self.materialize()?;
            self.position = 0;
            return Ok(!self.buffer.is_empty());
        }
        if self.position + 1 < self.buffer.len() {
            self.position += 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn current(&self) -> &Solution {
        &self.buffer[self.position]
    }
}

/// LIMIT/OFFSET: skips `offset` rows, then yields at most `limit`.
pub struct SliceIter<'a> {
    input: BoxedSolutionIter<'a>,
    to_skip: usize,
    remaining: Option<usize>,
}

impl<'a> SliceIter<'a> {
    /// Creates the slice; `limit` None means unbounded.
    pub fn new(input: BoxedSolutionIter<'a>, offset: usize, limit: Option<usize>) -> Self {
        Self {
            input,
            to_skip: offset,
            remaining: limit,
        }
    }
}

impl SolutionIter for SliceIter<'_> {
    fn advance(&mut self) -> Result<bool> {
        while self.to_skip > 0 {
            if !self.input.advance()? {
                self.to_skip = 0;
                return Ok(false);
            }
            self.to_skip -= 1;
        }
        if let Some(remaining) = self.remaining {
            if remaining == 0 {
                return Ok(false);
            }
            self.remaining = Some(remaining - 1);
        }
        self.input.advance()
    }

    fn current(&self) -> &Solution {
        self.input.current()
    }
}
