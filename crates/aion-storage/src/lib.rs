//! Memory-mapped B+tree storage engine for Aion.
//!
//! One B+tree per index order, each in its own page file with a metadata
//! block at page 0. Trees store fixed-width composite keys with an 8-byte
//! value and optional per-entry metadata; node degree derives from the
//! entry layout. Durability is fence-ordered: data pages flush through the
//! memory map first, the metadata block last, so a crash between the two
//! leaves the previous consistent tree.

pub mod btree;
pub mod disk;
pub mod meta;

pub use btree::{BTree, LeafEntryRef, TreeScan};
pub use disk::{DiskManager, DiskManagerConfig};
pub use meta::TreeMeta;
