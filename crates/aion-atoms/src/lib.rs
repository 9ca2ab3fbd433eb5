//! Persistent atom interning for Aion.
//!
//! An atom is a 32-bit id assigned at most once per distinct byte content.
//! Content lives in append-only 64 KiB chunks; a side table of
//! `(chunk, offset, length, hash)` records maps ids back to bytes, and a
//! hash index maps bytes to ids. Both survive restarts; a damaged side
//! table is rebuilt by scanning the chunk file.

pub mod store;

pub use store::{AtomStore, CHUNK_SIZE};
