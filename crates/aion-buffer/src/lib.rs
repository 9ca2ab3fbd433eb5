//! Bounded page cache for Aion.
//!
//! A fixed number of frames cache 16 KiB pages read from memory-mapped
//! index files. Eviction is LRU; dirty pages are handed back to the caller
//! on eviction so they flow through the mmap writeback path before the
//! frame is reused. Pins are implicit in borrow scope via RAII guards, and
//! eviction never removes a pinned frame.

pub mod frame;
pub mod page_table;
pub mod pool;
pub mod replacer;

pub use frame::{FrameId, PageFrame};
pub use pool::{EvictedPage, PageCache, PageCacheStats, PageReadGuard, PageWriteGuard};
pub use replacer::{LruReplacer, Replacer};
