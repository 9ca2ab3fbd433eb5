//! Aggregates and GROUP BY.

use super::{BoxedSolutionIter, SolutionIter};
use crate::expr::{format_number, numeric_value};
use crate::solution::Solution;
use crate::store::Store;
use aion_common::term::{Atom, VarId};
use aion_common::Result;
use std::collections::HashMap;

/// An aggregate function over a variable.
#[derive(Debug, Clone, Copy)]
pub enum Aggregate {
    /// Row count; with a variable, counts rows where it is bound.
    Count(Option<VarId>),
    /// Numeric sum; non-numeric bindings are skipped.
    Sum(VarId),
    /// Numeric average.
    Avg(VarId),
    /// Minimum term, numeric when both sides are numeric.
    Min(VarId),
    /// Maximum term.
    Max(VarId),
}

/// Running state of one aggregate in one group.
enum Accumulator {
    Count(u64),
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Min(Option<Atom>),
    Max(Option<Atom>),
}

impl Accumulator {
    fn new(aggregate: &Aggregate) -> Self {
        match aggregate {
            Aggregate::Count(_) => Accumulator::Count(0),
            Aggregate::Sum(_) => Accumulator::Sum(0.0),
            Aggregate::Avg(_) => Accumulator::Avg { sum: 0.0, count: 0 },
            Aggregate::Min(_) => Accumulator::Min(None),
            Aggregate::Max(_) => Accumulator::Max(None),
        }
    }

    fn feed(&mut self, aggregate: &Aggregate, solution: &Solution, store: &Store) {
        match (self, aggregate) {
            (Accumulator::Count(count), Aggregate::Count(var)) => match var {
                Some(var) => {
                    if solution.is_bound(*var) {
                        *count += 1;
                    }
                }
                None => *count += 1,
            },
            (Accumulator::Sum(sum), Aggregate::Sum(var)) => {
                if let Some(n) = bound_number(solution, *var, store) {
                    *sum += n;
                }
            }
            (Accumulator::Avg { sum, count }, Aggregate::Avg(var)) => {
                if let Some(n) = bound_number(solution, *var, store) {
                    *sum += n;
                    *count += 1;
                }
            }
            (Accumulator::Min(best), Aggregate::Min(var)) => {
                if let Some(atom) = solution.get(*var) {
                    *best = Some(match *best {
                        Some(current) => pick(store, current, atom, true),
                        None => atom,
                    });
                }
            }
            (Accumulator::Max(best), Aggregate::Max(var)) => {
                if let Some(atom) = solution.get(*var) {
                    *best = Some(match *best {
                        Some(current) => pick(store, current, atom, false),
                        None => atom,
                    });
                }
            }
            _ => unreachable!("accumulator/aggregate pairing is fixed at construction"),
        }
    }

    /// Finishes this accumulator into a bound atom, interning computed
    /// numbers as plain literals. MIN/MAX carry the winning term itself.
    fn finish(&self, store: &Store) -> Result<Option<Atom>> {
        match self {
            Accumulator::Count(count) => {
                Ok(Some(store.intern_number_literal(*count as f64)?))
            }
            Accumulator::Sum(sum) => Ok(Some(store.intern_number_literal(*sum)?)),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    return Ok(None);
                }
                Ok(Some(store.intern_number_literal(sum / *count as f64)?))
            }
            Accumulator::Min(best) | Accumulator::Max(best) => Ok(*best),
        }
    }
}

fn bound_number(solution: &Solution, var: VarId, store: &Store) -> Option<f64> {
    let atom = solution.get(var)?;
    let bytes = store.atom_bytes(atom).ok()?;
    numeric_value(&bytes)
}

/// Picks the smaller (`want_min`) or larger of two terms: numerically
/// when both are numeric, by lexical byte order otherwise.
fn pick(store: &Store, current: Atom, candidate: Atom, want_min: bool) -> Atom {
    let current_bytes = store.atom_bytes(current).unwrap_or_default();
    let candidate_bytes = store.atom_bytes(candidate).unwrap_or_default();

    let ordering = match (
        numeric_value(&current_bytes),
        numeric_value(&candidate_bytes),
    ) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        _ => current_bytes.cmp(&candidate_bytes),
    };

    let candidate_wins = if want_min {
        ordering == std::cmp::Ordering::Greater
    } else {
        ordering == std::cmp::Ordering::Less
    };
    if candidate_wins {
        candidate
    } else {
        current
    }
}

/// GROUP BY with one accumulator set per group.
///
/// Solutions hash by the group-key tuple; aggregation is the one
/// semantically required materialization here. Output rows bind the group
/// keys plus one target variable per aggregate.
pub struct GroupByIter<'a> {
    store: &'a Store,
    input: Option<BoxedSolutionIter<'a>>,
    group_vars: Vec<VarId>,
    /// (function, output variable) pairs.
    aggregates: Vec<(Aggregate, VarId)>,
    width: u16,
    output: Vec<Solution>,
    position: usize,
    materialized: bool,
}

impl<'a> GroupByIter<'a> {
    /// Creates the grouping. With no group variables, everything falls
    /// into a single group (plain aggregation).
    pub fn new(
        store: &'a Store,
        input: BoxedSolutionIter<'a>,
        group_vars: Vec<VarId>,
        aggregates: Vec<(Aggregate, VarId)>,
        width: u16,
    ) -> Self {
        Self {
            store,
            input: Some(input),
            group_vars,
            aggregates,
            width,
            output: Vec::new(),
            position: 0,
            materialized: false,
        }
    }

    fn materialize(&mut self) -> Result<()> {
        let mut input = self.input.take().expect("materialize runs once");

        let mut groups: HashMap<Vec<Atom>, Vec<Accumulator>> = HashMap::new();
        let mut any_rows = false;
        while input.advance()? {
            any_rows = true;
            let row = input.current();
            let key = row.key_tuple(&self.group_vars);
            let accumulators = groups.entry(key).or_insert_with(|| {
                self.aggregates
                    .iter()
                    .map(|(agg, _)| Accumulator::new(agg))
                    .collect()
            });
            for (accumulator, (aggregate, _)) in
                accumulators.iter_mut().zip(self.aggregates.iter())
            {
                accumulator.feed(aggregate, row, self.store);
            }
        }

        // Plain aggregation over an empty input still yields one row
        // (COUNT = 0), matching aggregate semantics without GROUP BY.
        if groups.is_empty() && self.group_vars.is_empty() && !any_rows {
            groups.insert(
                Vec::new(),
                self.aggregates
                    .iter()
                    .map(|(agg, _)| Accumulator::new(agg))
                    .collect(),
            );
        }

        let mut keys: Vec<Vec<Atom>> = groups.keys().cloned().collect();
        keys.sort_unstable();

        for key in keys {
            let accumulators = &groups[&key];
            let mut solution = Solution::new(self.width);
            for (var, atom) in self.group_vars.iter().zip(key.iter()) {
                if *atom != 0 {
                    solution.set(*var, *atom);
                }
            }
            for (accumulator, (_, target)) in accumulators.iter().zip(self.aggregates.iter()) {
                if let Some(atom) = accumulator.finish(self.store)? {
                    solution.set(*target, atom);
                }
            }
            self.output.push(solution);
        }

        self.materialized = true;
        Ok(())
    }
}

impl SolutionIter for GroupByIter<'_> {
    fn advance(&mut self) -> Result<bool> {
        if !self.materialized {
            self.materialize()?;
            self.position = 0;
            return Ok(!self.output.is_empty());
        }
        if self.position + 1 < self.output.len() {
            self.position += 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn current(&self) -> &Solution {
        &self.output[self.position]
    }
}

/// Helper used by [`Accumulator::finish`]: formats and interns a numeric
/// result as a plain literal.
impl Store {
    pub(crate) fn intern_number_literal(&self, n: f64) -> Result<Atom> {
        let text = format!("\"{}\"", format_number(n));
        self.intern_term(&text)
    }
}
