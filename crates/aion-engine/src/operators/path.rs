//! Property-path evaluation.
//!
//! Each reachable `(start, end)` pair is emitted exactly once per query
//! (set semantics); path length rides along for diagnostics. Transitive
//! closures expand a breadth-first frontier with a visited set, so
//! emission order within one start node is by increasing path length.

use crate::solution::Solution;
use crate::store::Store;
use aion_common::cancel::CancelToken;
use aion_common::key::TemporalFilter;
use aion_common::term::{Atom, PatternTerm, TriplePattern, VarId};
use aion_common::{AionError, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// A property-path expression over predicates.
#[derive(Debug, Clone)]
pub enum PathExpr {
    /// An atomic predicate: `(s, o)` where the triple `(s, p, o)` exists.
    Pred(Atom),
    /// `^E`: start and end swapped.
    Inverse(Box<PathExpr>),
    /// `E1 / E2`: sequence through an intermediate node, projected out.
    Seq(Box<PathExpr>, Box<PathExpr>),
    /// `E1 | E2`: set union of pairs.
    Alt(Box<PathExpr>, Box<PathExpr>),
    /// `E?`: E plus reflexive identity pairs.
    ZeroOrOne(Box<PathExpr>),
    /// `E+`: transitive closure, one or more steps.
    OneOrMore(Box<PathExpr>),
    /// `E*`: transitive closure plus reflexive identity pairs.
    ZeroOrMore(Box<PathExpr>),
    /// `!(p1|p2|…)`: any predicate not in the set.
    NegatedSet(Vec<Atom>),
}

/// One reachable pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathMatch {
    /// Path start node.
    pub start: Atom,
    /// Path end node.
    pub end: Atom,
    /// Number of atomic steps (0 for reflexive pairs).
    pub length: u32,
}

/// Visited-node tracking for frontier expansion.
///
/// Small closures stay in a bounded inline array with no heap traffic;
/// when the bound is exceeded the set spills once to a heap table and
/// stays there. No hidden per-step allocation either way.
pub struct VisitedSet {
    inline: [Atom; Self::INLINE],
    len: usize,
    spill: Option<HashSet<Atom>>,
}

impl VisitedSet {
    /// Inline capacity before spilling to the heap.
    pub const INLINE: usize = 64;

    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            inline: [0; Self::INLINE],
            len: 0,
            spill: None,
        }
    }

    /// Inserts a node. Returns true if it was not yet present.
    pub fn insert(&mut self, atom: Atom) -> bool {
        if let Some(spill) = &mut self.spill {
            return spill.insert(atom);
        }
        if self.inline[..self.len].contains(&atom) {
            return false;
        }
        if self.len < Self::INLINE {
            self.inline[self.len] = atom;
            self.len += 1;
            return true;
        }
        // Bound exceeded: spill everything to the heap once.
        let mut spill: HashSet<Atom> = self.inline.iter().copied().collect();
        let newly = spill.insert(atom);
        self.spill = Some(spill);
        newly
    }

    /// Number of visited nodes.
    pub fn len(&self) -> usize {
        match &self.spill {
            Some(spill) => spill.len(),
            None => self.len,
        }
    }

    /// Returns true if nothing was visited.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates a path expression.
///
/// `start`/`end` restrict the endpoints when bound. The result carries
/// each `(start, end)` pair once, at its minimal length, sorted by
/// `(length, start, end)` so closure output arrives shortest-first.
pub fn eval_path(
    store: &Store,
    path: &PathExpr,
    start: Option<Atom>,
    end: Option<Atom>,
    graph: Option<Atom>,
    filter: Option<TemporalFilter>,
    cancel: &CancelToken,
) -> Result<Vec<PathMatch>> {
    let ctx = PathContext {
        store,
        graph,
        filter,
        cancel,
    };
    let mut pairs: HashMap<(Atom, Atom), u32> = HashMap::new();
    ctx.eval(path, start, &mut pairs)?;

    let mut matches: Vec<PathMatch> = pairs
        .into_iter()
        .filter(|((_, e), _)| end.map_or(true, |bound| bound == *e))
        .map(|((s, e), length)| PathMatch {
            start: s,
            end: e,
            length,
        })
        .collect();
    matches.sort_by_key(|m| (m.length, m.start, m.end));
    Ok(matches)
}

struct PathContext<'a> {
    store: &'a Store,
    graph: Option<Atom>,
    filter: Option<TemporalFilter>,
    cancel: &'a CancelToken,
}

impl PathContext<'_> {
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AionError::Cancelled);
        }
        Ok(())
    }

    /// Accumulates `(start, end) → min length` into `out`.
    fn eval(
        &self,
        path: &PathExpr,
        start: Option<Atom>,
        out: &mut HashMap<(Atom, Atom), u32>,
    ) -> Result<()> {
        self.check_cancelled()?;
        match path {
            PathExpr::Pred(p) => {
                for (s, o) in self.edges(start, Some(*p), &[])? {
                    merge(out, s, o, 1);
                }
            }
            PathExpr::NegatedSet(excluded) => {
                for (s, o) in self.edges(start, None, excluded)? {
                    merge(out, s, o, 1);
                }
            }
            PathExpr::Inverse(inner) => {
                // Evaluate forward with no start restriction, then swap.
                let mut forward = HashMap::new();
                self.eval(inner, None, &mut forward)?;
                for ((s, o), length) in forward {
                    if start.map_or(true, |bound| bound == o) {
                        merge(out, o, s, length);
                    }
                }
            }
            PathExpr::Seq(first, second) => {
                let mut left = HashMap::new();
                self.eval(first, start, &mut left)?;

                // The intermediate node is projected out; evaluate the
                // second leg once per distinct intermediate.
                let mut by_mid: HashMap<Atom, Vec<(Atom, u32)>> = HashMap::new();
                for ((s, mid), length) in left {
                    by_mid.entry(mid).or_default().push((s, length));
                }
                for (mid, origins) in by_mid {
                    let mut right = HashMap::new();
                    self.eval(second, Some(mid), &mut right)?;
                    for ((_, o), l2) in right {
                        for &(s, l1) in &origins {
                            merge(out, s, o, l1 + l2);
                        }
                    }
                }
            }
            PathExpr::Alt(left, right) => {
                self.eval(left, start, out)?;
                self.eval(right, start, out)?;
            }
            PathExpr::ZeroOrOne(inner) => {
                self.eval(inner, start, out)?;
                self.reflexive(start, out)?;
            }
            PathExpr::OneOrMore(inner) => {
                self.closure(inner, start, out)?;
            }
            PathExpr::ZeroOrMore(inner) => {
                self.closure(inner, start, out)?;
                self.reflexive(start, out)?;
            }
        }
        Ok(())
    }

    /// Atomic edge enumeration: `(s, o)` pairs for one predicate, or for
    /// every predicate outside a negated set.
    fn edges(
        &self,
        start: Option<Atom>,
        predicate: Option<Atom>,
        excluded: &[Atom],
    ) -> Result<Vec<(Atom, Atom)>> {
        let mut pattern = TriplePattern::new(
            start.map(PatternTerm::Bound).unwrap_or(PatternTerm::Any),
            predicate.map(PatternTerm::Bound).unwrap_or(PatternTerm::Any),
            PatternTerm::Any,
        );
        if let Some(graph) = self.graph {
            pattern.graph = Some(graph);
        }

        let mut quads = self
            .store
            .match_pattern(&pattern, self.filter, self.cancel.clone())?;
        let mut edges = Vec::new();
        while quads.advance()? {
            let quad = quads.current();
            if excluded.contains(&quad.predicate) {
                continue;
            }
            edges.push((quad.subject, quad.object));
        }
        Ok(edges)
    }

    /// Breadth-first transitive closure of `inner` from every applicable
    /// start node. The visited set keys on atoms and prevents cycles;
    /// frontier levels give minimal path lengths.
    fn closure(
        &self,
        inner: &PathExpr,
        start: Option<Atom>,
        out: &mut HashMap<(Atom, Atom), u32>,
    ) -> Result<()> {
        let roots: Vec<Atom> = match start {
            Some(s) => vec![s],
            None => {
                let mut base = HashMap::new();
                self.eval(inner, None, &mut base)?;
                let mut roots: Vec<Atom> = base.keys().map(|(s, _)| *s).collect();
                roots.sort_unstable();
                roots.dedup();
                roots
            }
        };

        for root in roots {
            let mut visited = VisitedSet::new();
            visited.insert(root);
            let mut frontier = VecDeque::new();
            frontier.push_back((root, 0u32));

            while let Some((node, depth)) = frontier.pop_front() {
                self.check_cancelled()?;
                let mut step = HashMap::new();
                self.eval(inner, Some(node), &mut step)?;
                for ((_, next), step_len) in step {
                    merge(out, root, next, depth + step_len);
                    if visited.insert(next) {
                        frontier.push_back((next, depth + step_len));
                    }
                }
            }
        }
        Ok(())
    }

    /// Reflexive identity pairs, restricted to the bound start when there
    /// is one, otherwise over every node appearing as subject or object.
    fn reflexive(&self, start: Option<Atom>, out: &mut HashMap<(Atom, Atom), u32>) -> Result<()> {
        match start {
            Some(s) => {
                merge(out, s, s, 0);
            }
            None => {
                for (s, o) in self.edges(None, None, &[])? {
                    merge(out, s, s, 0);
                    merge(out, o, o, 0);
                }
            }
        }
        Ok(())
    }
}

/// Keeps the minimal length per pair.
fn merge(out: &mut HashMap<(Atom, Atom), u32>, start: Atom, end: Atom, length: u32) {
    out.entry((start, end))
        .and_modify(|best| *best = (*best).min(length))
        .or_insert(length);
}

/// Adapts evaluated path matches to the solution stream, binding the
/// start and end variables.
pub struct PathBindingsIter {
    matches: std::vec::IntoIter<PathMatch>,
    start_var: Option<VarId>,
    end_var: Option<VarId>,
    width: u16,
    current: Solution,
}

impl PathBindingsIter {
    /// Creates the adapter over pre-evaluated matches.
    pub fn new(
        matches: Vec<PathMatch>,
        start_var: Option<VarId>,
        end_var: Option<VarId>,
        width: u16,
    ) -> Self {
        Self {
            matches: matches.into_iter(),
            start_var,
            end_var,
            width,
            current: Solution::new(width),
        }
    }
}

impl super::SolutionIter for PathBindingsIter {
    fn advance(&mut self) -> Result<bool> {
        match self.matches.next() {
            Some(m) => {
                let mut solution = Solution::new(self.width);
                if let Some(var) = self.start_var {
                    solution.set(var, m.start);
                }
                if let Some(var) = self.end_var {
                    solution.set(var, m.end);
                }
                self.current = solution;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn current(&self) -> &Solution {
        &self.current
    }
}
