//! The page cache.

use crate::frame::{FrameId, PageFrame};
use crate::page_table::PageTable;
use crate::replacer::{LruReplacer, Replacer};
use aion_common::config::CacheConfig;
use aion_common::page::{PageId, PAGE_SIZE};
use aion_common::{AionError, Result};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use sysinfo::System;

/// A dirty page that was evicted from the cache. The caller must push it
/// through the mmap writeback path before the data is lost.
#[derive(Debug)]
pub struct EvictedPage {
    /// Identity of the evicted page.
    pub page_id: PageId,
    /// The page contents at eviction time.
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Bounded page cache.
///
/// A fixed number of frames cache pages by count, not bytes (pages are
/// fixed-size). Lookup goes through a lock-free page table; reuse takes
/// the free list first and otherwise evicts the least-recently-used
/// unpinned frame, handing any dirty contents back to the caller. Pins
/// are implicit in borrow scope: the RAII guards pin on acquisition and
/// release on drop, and eviction never touches a pinned frame.
pub struct PageCache {
    /// Configuration.
    config: CacheConfig,
    /// The frame slots.
    frames: Vec<PageFrame>,
    /// Page ID to frame ID mapping (lock-free reads).
    page_table: PageTable,
    /// Frames not holding any page.
    free_list: Mutex<Vec<FrameId>>,
    /// Least-recently-used eviction order.
    replacer: LruReplacer,
}

impl PageCache {
    /// Creates a new page cache.
    pub fn new(config: CacheConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| PageFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: LruReplacer::new(num_frames),
        }
    }

    /// Creates a page cache sized to 25% of available system RAM, with a
    /// floor of 1,000 frames so small machines still cache usefully.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(CacheConfig { num_frames })
    }

    /// Returns the number of frames in the cache.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently cached.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is cached.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    #[inline]
    fn frame(&self, frame_id: FrameId) -> &PageFrame {
        &self.frames[frame_id.0 as usize]
    }

    /// Fetches a cached page, pinning it and touching its LRU stamp.
    /// Returns None on miss.
    #[inline(always)]
    pub fn fetch_page(&self, page_id: PageId) -> Option<&PageFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = self.frame(frame_id);
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Finds a frame for a new resident: the free list first, otherwise
    /// the least-recently-used unpinned frame. The victim's mapping is
    /// severed before its contents are captured, so no lookup can land on
    /// a frame that is being repurposed.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        let victim_id = self
            .replacer
            .evict(|fid| self.frame(fid).pin_count() == 0)
            .ok_or(AionError::CacheFull)?;
        let frame = self.frame(victim_id);

        let evicted = match frame.occupant() {
            Some(page_id) => {
                self.page_table.remove(page_id);
                frame.is_dirty().then(|| EvictedPage {
                    page_id,
                    data: frame.snapshot(),
                })
            }
            None => None,
        };

        Ok((victim_id, evicted))
    }

    /// Makes a (zeroed) page resident, pinned. An already-resident page
    /// is returned as-is.
    ///
    /// The second tuple element carries any dirty page evicted to make
    /// room; the caller must write it back.
    #[inline]
    pub fn new_page(&self, page_id: PageId) -> Result<(&PageFrame, Option<EvictedPage>)> {
        if let Some(frame) = self.fetch_page(page_id) {
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;
        let frame = self.frame(frame_id);
        frame.reset();
        frame.assign(page_id);
        frame.pin();
        self.replacer.record_access(frame_id);
        self.page_table.insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Makes a page resident from bytes read off disk, pinned.
    #[inline]
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&PageFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.load(data);
        Ok((frame, evicted))
    }

    /// Drops one pin on a page, marking it dirty in the same transition
    /// when `dirty` is set. At zero pins the frame becomes evictable.
    #[inline]
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        match self.page_table.get(page_id) {
            Some(frame_id) => {
                self.frame(frame_id).release(dirty);
                true
            }
            None => false,
        }
    }

    /// Pushes one frame's bytes through the writeback callback and clears
    /// its dirty flag.
    fn write_back<F>(&self, page_id: PageId, frame: &PageFrame, flush_fn: &mut F) -> Result<()>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let data = frame.read();
        flush_fn(page_id, &data[..])?;
        frame.mark_clean();
        Ok(())
    }

    /// Flushes one page if dirty. Returns true if it was written back.
    pub fn flush_page<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let frame_id = match self.page_table.get(page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(false),
        };
        let frame = self.frame(frame_id);
        if !frame.is_dirty() {
            return Ok(false);
        }
        self.write_back(page_id, frame, &mut flush_fn)?;
        Ok(true)
    }

    /// Flushes every dirty page. Returns the number written back.
    ///
    /// Targets are collected up front so the table walk is finished
    /// before the callback runs; a page dirtied after collection is the
    /// next checkpoint's problem.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut dirty = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            if self.frame(frame_id).is_dirty() {
                dirty.push((page_id, frame_id));
            }
            true
        });

        let mut flushed = 0;
        for (page_id, frame_id) in dirty {
            let frame = self.frame(frame_id);
            if frame.is_dirty() {
                self.write_back(page_id, frame, &mut flush_fn)?;
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops a page from the cache, recycling its frame. Refused (false)
    /// while any pin is held.
    ///
    /// Structural deletions run under the store's single-writer lock, so
    /// no new writer pin can appear between the pin check and the unmap;
    /// a concurrent reader pin keeps the frame alive and the delete is
    /// simply refused.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let frame_id = match self.page_table.get(page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let frame = self.frame(frame_id);
        if frame.is_pinned() {
            return false;
        }

        self.page_table.remove(page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        self.free_list.lock().push(frame_id);
        true
    }

    /// Borrows a cached page for reading. The guard holds the pin and the
    /// page's read lock for its whole lifetime; dropping it releases
    /// both. None on miss.
    pub fn read_page(&self, page_id: PageId) -> Option<PageReadGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        let data = frame.read();
        Some(PageReadGuard {
            page_id,
            frame,
            data,
        })
    }

    /// Borrows a cached page for writing. Any write borrow is assumed to
    /// modify the page: the guard releases its pin with the dirty flag in
    /// one transition on drop. None on miss.
    pub fn write_page(&self, page_id: PageId) -> Option<PageWriteGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        let data = frame.write();
        Some(PageWriteGuard {
            page_id,
            frame,
            data,
        })
    }

    /// Returns statistics about the cache, derived from a sweep over the
    /// frame slots.
    pub fn stats(&self) -> PageCacheStats {
        let mut used_frames = 0;
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for frame in &self.frames {
            if frame.is_vacant() {
                continue;
            }
            used_frames += 1;
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        PageCacheStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames,
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the page cache.
#[derive(Debug, Clone)]
pub struct PageCacheStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// Shared borrow of a cached page.
///
/// Holds the frame's pin and read lock together, so the bytes cannot move
/// or change for the guard's lifetime. Dereferences straight to the page
/// bytes.
pub struct PageReadGuard<'a> {
    page_id: PageId,
    frame: &'a PageFrame,
    data: parking_lot::RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl PageReadGuard<'_> {
    /// The borrowed page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.frame.release(false);
    }
}

/// Exclusive borrow of a cached page.
///
/// Write access implies modification: dropping the guard releases the pin
/// and marks the page dirty in a single state transition, so eviction can
/// never catch the page unpinned-but-still-clean.
pub struct PageWriteGuard<'a> {
    page_id: PageId,
    frame: &'a PageFrame,
    data: parking_lot::RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl PageWriteGuard<'_> {
    /// The borrowed page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.frame.release(true);
    }
}
