//! Aion common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all Aion components:
//! the error model, page structures, RDF term and atom types, and the
//! composite key model shared by every index order.

pub mod cancel;
pub mod config;
pub mod error;
pub mod key;
pub mod page;
pub mod term;
pub mod time;

pub use cancel::CancelToken;
pub use config::{CacheConfig, StoreOptions};
pub use error::{AionError, ErrorKind, Result};
pub use key::{EntryLayout, EntryMeta, IndexOrder, KeyBuf, TemporalFilter};
pub use page::{PageHeader, PageId, PAGE_SIZE};
pub use term::{Atom, PatternTerm, Quad, TriplePattern, VarId, ATOM_MAX, ATOM_MIN, DEFAULT_GRAPH};
