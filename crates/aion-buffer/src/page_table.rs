//! Lock-free page table mapping page IDs to cache frames.

use crate::frame::FrameId;
use aion_common::page::PageId;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Direct array size for file_id=0 pages. Covers the first 16384 pages
/// (~256 MB at 16 KB pages) of the primary index file.
const DIRECT_PATH_SIZE: usize = 16384;

/// Sentinel value for empty slots in the direct path.
const EMPTY_FRAME: u32 = u32::MAX;

/// Sentinel value for empty key slots in the hash table.
const EMPTY_KEY: u64 = u64::MAX;

/// Sentinel value for deleted key slots.
const TOMBSTONE_KEY: u64 = u64::MAX - 1;

/// Lock-free page table mapping PageId to FrameId.
///
/// Two-tier lookup: a direct array for the primary file's low page
/// numbers, and an open-addressing hash table with linear probing for
/// everything else.
pub struct PageTable {
    /// Direct array for file_id=0 pages. Stores frame_id directly.
    direct_path: Box<[AtomicU32]>,
    /// Hash table keys (full 64-bit PageId).
    hash_keys: Box<[AtomicU64]>,
    /// Hash table values (frame_id).
    hash_values: Box<[AtomicU32]>,
    /// Bitmask for hash table indexing (hash_size - 1).
    hash_mask: usize,
}

impl PageTable {
    /// Creates a new page table with capacity for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        // Hash table size = next power of 2, 2x capacity for ~50% load factor
        let hash_size = (capacity * 2).next_power_of_two().max(1024);

        let direct_path: Box<[AtomicU32]> = (0..DIRECT_PATH_SIZE)
            .map(|_| AtomicU32::new(EMPTY_FRAME))
            .collect();
        let hash_keys: Box<[AtomicU64]> = (0..hash_size)
            .map(|_| AtomicU64::new(EMPTY_KEY))
            .collect();
        let hash_values: Box<[AtomicU32]> = (0..hash_size)
            .map(|_| AtomicU32::new(EMPTY_FRAME))
            .collect();

        Self {
            direct_path,
            hash_keys,
            hash_values,
            hash_mask: hash_size - 1,
        }
    }

    #[inline]
    fn hash_index(&self, key: u64) -> usize {
        // Fibonacci hashing spreads sequential page numbers.
        (key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize & self.hash_mask
    }

    #[inline]
    fn is_direct(page_id: PageId) -> bool {
        page_id.file_id == 0 && page_id.page_num < DIRECT_PATH_SIZE as u32
    }

    /// Looks up a page ID and returns its frame ID if present.
    #[inline(always)]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        if Self::is_direct(page_id) {
            let val = self.direct_path[page_id.page_num as usize].load(Ordering::Acquire);
            if val != EMPTY_FRAME {
                return Some(FrameId(val));
            }
            return None;
        }
        self.get_from_hash(page_id)
    }

    #[inline]
    fn get_from_hash(&self, page_id: PageId) -> Option<FrameId> {
        let key = page_id.as_u64();
        let mut idx = self.hash_index(key);

        for _ in 0..self.hash_keys.len() {
            let stored_key = self.hash_keys[idx].load(Ordering::Acquire);
            if stored_key == EMPTY_KEY {
                return None;
            }
            if stored_key == key {
                return Some(FrameId(self.hash_values[idx].load(Ordering::Acquire)));
            }
            // Skip tombstones and continue probing
            idx = (idx + 1) & self.hash_mask;
        }
        None
    }

    /// Inserts a page ID to frame ID mapping. Returns true on success.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) -> bool {
        if Self::is_direct(page_id) {
            self.direct_path[page_id.page_num as usize].store(frame_id.0, Ordering::Release);
            return true;
        }

        let key = page_id.as_u64();
        let mut idx = self.hash_index(key);

        for _ in 0..self.hash_keys.len() {
            let stored_key = self.hash_keys[idx].load(Ordering::Acquire);
            if stored_key == EMPTY_KEY || stored_key == TOMBSTONE_KEY || stored_key == key {
                // Value first, then key, so a concurrent reader that sees
                // the key also sees the value.
                self.hash_values[idx].store(frame_id.0, Ordering::Release);
                self.hash_keys[idx].store(key, Ordering::Release);
                return true;
            }
            idx = (idx + 1) & self.hash_mask;
        }
        false
    }

    /// Removes a mapping. Returns the frame it mapped to, if any.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        if Self::is_direct(page_id) {
            let prev = self.direct_path[page_id.page_num as usize]
                .swap(EMPTY_FRAME, Ordering::AcqRel);
            if prev != EMPTY_FRAME {
                return Some(FrameId(prev));
            }
            return None;
        }

        let key = page_id.as_u64();
        let mut idx = self.hash_index(key);

        for _ in 0..self.hash_keys.len() {
            let stored_key = self.hash_keys[idx].load(Ordering::Acquire);
            if stored_key == EMPTY_KEY {
                return None;
            }
            if stored_key == key {
                let frame = self.hash_values[idx].load(Ordering::Acquire);
                self.hash_keys[idx].store(TOMBSTONE_KEY, Ordering::Release);
                return Some(FrameId(frame));
            }
            idx = (idx + 1) & self.hash_mask;
        }
        None
    }

    /// Number of mapped pages.
    pub fn len(&self) -> usize {
        let direct = self
            .direct_path
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed) != EMPTY_FRAME)
            .count();
        let hashed = self
            .hash_keys
            .iter()
            .filter(|slot| {
                let k = slot.load(Ordering::Relaxed);
                k != EMPTY_KEY && k != TOMBSTONE_KEY
            })
            .count();
        direct + hashed
    }

    /// Returns true if no pages are mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the page is mapped.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.get(page_id).is_some()
    }

    /// Visits every mapping; the callback returns false to stop early.
    pub fn for_each(&self, mut f: impl FnMut(PageId, FrameId) -> bool) {
        for (page_num, slot) in self.direct_path.iter().enumerate() {
            let val = slot.load(Ordering::Acquire);
            if val != EMPTY_FRAME && !f(PageId::new(0, page_num as u32), FrameId(val)) {
                return;
            }
        }
        for (idx, slot) in self.hash_keys.iter().enumerate() {
            let key = slot.load(Ordering::Acquire);
            if key != EMPTY_KEY && key != TOMBSTONE_KEY {
                let frame = self.hash_values[idx].load(Ordering::Acquire);
                if !f(PageId::from_u64(key), FrameId(frame)) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_table_direct_path() {
        let table = PageTable::new(16);
        let page_id = PageId::new(0, 5);

        assert!(table.get(page_id).is_none());
        assert!(table.insert(page_id, FrameId(3)));
        assert_eq!(table.get(page_id), Some(FrameId(3)));
        assert_eq!(table.remove(page_id), Some(FrameId(3)));
        assert!(table.get(page_id).is_none());
    }

    #[test]
    fn test_page_table_hash_path() {
        let table = PageTable::new(16);
        // High file_id forces the hash path.
        let page_id = PageId::new(3, 77);

        assert!(table.insert(page_id, FrameId(9)));
        assert_eq!(table.get(page_id), Some(FrameId(9)));
        assert_eq!(table.remove(page_id), Some(FrameId(9)));
        assert!(table.get(page_id).is_none());
    }

    #[test]
    fn test_page_table_overwrite() {
        let table = PageTable::new(16);
        let page_id = PageId::new(1, 1);

        table.insert(page_id, FrameId(1));
        table.insert(page_id, FrameId(2));
        assert_eq!(table.get(page_id), Some(FrameId(2)));
    }

    #[test]
    fn test_page_table_len() {
        let table = PageTable::new(16);
        assert!(table.is_empty());

        table.insert(PageId::new(0, 1), FrameId(1));
        table.insert(PageId::new(2, 1), FrameId(2));
        assert_eq!(table.len(), 2);

        table.remove(PageId::new(2, 1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_page_table_tombstone_reuse() {
        let table = PageTable::new(16);
        let a = PageId::new(5, 100);
        let b = PageId::new(5, 200);

        table.insert(a, FrameId(1));
        table.remove(a);
        table.insert(b, FrameId(2));

        assert!(table.get(a).is_none());
        assert_eq!(table.get(b), Some(FrameId(2)));
    }

    #[test]
    fn test_page_table_for_each() {
        let table = PageTable::new(16);
        table.insert(PageId::new(0, 1), FrameId(1));
        table.insert(PageId::new(1, 2), FrameId(2));
        table.insert(PageId::new(2, 3), FrameId(3));

        let mut seen = Vec::new();
        table.for_each(|page_id, frame_id| {
            seen.push((page_id, frame_id));
            true
        });
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_page_table_many_hash_entries() {
        let table = PageTable::new(256);
        for i in 0..200u32 {
            assert!(table.insert(PageId::new(7, i), FrameId(i)));
        }
        for i in 0..200u32 {
            assert_eq!(table.get(PageId::new(7, i)), Some(FrameId(i)));
        }
    }
}
