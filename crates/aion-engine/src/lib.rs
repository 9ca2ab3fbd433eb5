//! Aion engine: the multi-index bitemporal quad store and its streaming
//! query runtime.
//!
//! The [`Store`] facade coordinates one atom store and one B+tree per
//! maintained index order. Writes intern terms once, build the rotated
//! composite key for every index, and insert under a single-writer lock;
//! reads route each pattern to the best index and stream solutions through
//! pull-based operators (pattern match, joins, OPTIONAL, UNION, FILTER,
//! property paths, solution modifiers, aggregates). N3 patches layer
//! binding-driven mutation on top with undo-logged atomicity.

pub mod expr;
pub mod operators;
pub mod patch;
pub mod select;
pub mod solution;
pub mod stats;
pub mod store;
pub mod temporal;

pub use patch::{Patch, PatchOutcome, PatchTerm, PatchTriple};
pub use solution::{Solution, VarRegistry};
pub use store::{QuadIter, Store, StoreStatistics};

pub use aion_common::{
    AionError, CancelToken, ErrorKind, Result, StoreOptions, TemporalFilter,
};
