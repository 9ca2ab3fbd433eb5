//! Query solutions: partial mappings from variable id to atom.

use aion_common::term::{is_variable, Atom, VarId};
use std::collections::HashMap;

/// Variable slots kept inline; queries with more variables spill to a
/// heap buffer allocated once per solution.
pub const INLINE_VARS: usize = 16;

/// A partial mapping from variable id to atom.
///
/// Solutions are fixed-capacity records: the common case (≤ 16 variables)
/// lives entirely inline with no heap traffic on the per-row hot path.
/// Atom 0 is the reserved minimum sentinel and never assigned, so it
/// doubles as the "unbound" marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    inline: [Atom; INLINE_VARS],
    /// Slots for variable ids at and above `INLINE_VARS`.
    spill: Vec<Atom>,
    /// Total variable count of the owning query.
    width: u16,
}

impl Solution {
    /// Creates an all-unbound solution for a query with `width` variables.
    pub fn new(width: u16) -> Self {
        let spill = if width as usize > INLINE_VARS {
            vec![0; width as usize - INLINE_VARS]
        } else {
            Vec::new()
        };
        Self {
            inline: [0; INLINE_VARS],
            spill,
            width,
        }
    }

    /// The variable count of the owning query.
    #[inline]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// The binding of `var`, or None if unbound.
    #[inline]
    pub fn get(&self, var: VarId) -> Option<Atom> {
        let slot = if (var as usize) < INLINE_VARS {
            self.inline[var as usize]
        } else {
            self.spill
                .get(var as usize - INLINE_VARS)
                .copied()
                .unwrap_or(0)
        };
        if slot == 0 {
            None
        } else {
            Some(slot)
        }
    }

    /// Binds `var` to `atom`.
    #[inline]
    pub fn set(&mut self, var: VarId, atom: Atom) {
        debug_assert!(var < self.width);
        debug_assert_ne!(atom, 0);
        if (var as usize) < INLINE_VARS {
            self.inline[var as usize] = atom;
        } else {
            self.spill[var as usize - INLINE_VARS] = atom;
        }
    }

    /// Removes the binding of `var`.
    #[inline]
    pub fn unset(&mut self, var: VarId) {
        if (var as usize) < INLINE_VARS {
            self.inline[var as usize] = 0;
        } else if let Some(slot) = self.spill.get_mut(var as usize - INLINE_VARS) {
            *slot = 0;
        }
    }

    /// Returns true if `var` is bound.
    #[inline]
    pub fn is_bound(&self, var: VarId) -> bool {
        self.get(var).is_some()
    }

    /// Merges `other`'s bindings into a copy of this solution. Returns
    /// None on a conflicting binding.
    pub fn merged(&self, other: &Solution) -> Option<Solution> {
        debug_assert_eq!(self.width, other.width);
        let mut out = self.clone();
        for var in 0..self.width {
            if let Some(theirs) = other.get(var) {
                match out.get(var) {
                    Some(ours) if ours != theirs => return None,
                    Some(_) => {}
                    None => out.set(var, theirs),
                }
            }
        }
        Some(out)
    }

    /// The binding tuple for a list of variables, 0 for unbound slots.
    /// Used as a hash key by joins, DISTINCT, and GROUP BY.
    pub fn key_tuple(&self, vars: &[VarId]) -> Vec<Atom> {
        vars.iter().map(|&v| self.get(v).unwrap_or(0)).collect()
    }
}

/// Assigns dense variable ids per query at plan time, so operators never
/// repeat the `?name` string test in hot loops.
#[derive(Debug, Default)]
pub struct VarRegistry {
    names: Vec<String>,
    by_name: HashMap<String, VarId>,
}

impl VarRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for a variable name (with or without the leading
    /// `?`), assigning the next id on first sight.
    pub fn var(&mut self, name: &str) -> VarId {
        let name = name.strip_prefix('?').unwrap_or(name);
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.names.len() as VarId;
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Looks up an already-registered variable.
    pub fn lookup(&self, name: &str) -> Option<VarId> {
        let name = name.strip_prefix('?').unwrap_or(name);
        self.by_name.get(name).copied()
    }

    /// The name of a variable id.
    pub fn name(&self, var: VarId) -> Option<&str> {
        self.names.get(var as usize).map(|s| s.as_str())
    }

    /// Number of registered variables; the width of this query's
    /// solutions.
    pub fn width(&self) -> u16 {
        self.names.len() as u16
    }

    /// Returns true if the pattern text is a variable reference.
    pub fn is_var(text: &str) -> bool {
        is_variable(text)
    }
}
