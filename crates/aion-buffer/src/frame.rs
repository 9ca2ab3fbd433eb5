//! Cache frames.
//!
//! A frame is one 16 KiB slot of the cache. Its bookkeeping lives in two
//! atomics: `occupant` names the resident page, and `state` packs the
//! dirty flag together with the pin count into one word. Packing matters
//! for eviction: "unpin and mark dirty" is a single atomic transition, so
//! the eviction sweep can never observe a frame between dropping its last
//! pin and gaining its dirty flag.

use aion_common::page::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// `occupant` value for a frame holding no page.
const VACANT: u64 = u64::MAX;

/// Dirty flag bit of the state word.
const DIRTY_BIT: u32 = 1 << 31;

/// Pin-count portion of the state word.
const PIN_MASK: u32 = DIRTY_BIT - 1;

/// Index of a frame within the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// One cache slot: a page-sized buffer plus residency and usage state.
///
/// State transitions are lock-free; only the buffer itself sits behind a
/// read-write lock, taken by the RAII page guards for the duration of a
/// borrow.
pub struct PageFrame {
    /// Frame index, fixed for the cache's lifetime.
    frame_id: FrameId,
    /// Resident page, packed via `PageId::as_u64` (`VACANT` = none).
    occupant: AtomicU64,
    /// Bit 31: dirty. Bits 0..31: pin count.
    state: AtomicU32,
    /// The page bytes.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl PageFrame {
    /// Creates a vacant frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            occupant: AtomicU64::new(VACANT),
            state: AtomicU32::new(0),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// This frame's index.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// The resident page, if any.
    #[inline]
    pub fn occupant(&self) -> Option<PageId> {
        let packed = self.occupant.load(Ordering::Acquire);
        if packed == VACANT {
            None
        } else {
            Some(PageId::from_u64(packed))
        }
    }

    /// Installs a page as this frame's occupant.
    #[inline]
    pub fn assign(&self, page_id: PageId) {
        self.occupant.store(page_id.as_u64(), Ordering::Release);
    }

    /// Returns true if no page is resident.
    #[inline]
    pub fn is_vacant(&self) -> bool {
        self.occupant.load(Ordering::Acquire) == VACANT
    }

    /// Takes a pin, keeping the frame out of eviction's reach. Returns
    /// the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        let prev = self.state.fetch_add(1, Ordering::AcqRel);
        (prev & PIN_MASK) + 1
    }

    /// Drops one pin, optionally marking the page dirty in the same
    /// atomic transition. Saturates at zero pins. Returns the new pin
    /// count.
    #[inline]
    pub fn release(&self, dirty: bool) -> u32 {
        let prev = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let pins = state & PIN_MASK;
                let mut next = if pins == 0 { state } else { state - 1 };
                if dirty {
                    next |= DIRTY_BIT;
                }
                Some(next)
            })
            .expect("state update closure never refuses");
        (prev & PIN_MASK).saturating_sub(1)
    }

    /// The current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.state.load(Ordering::Acquire) & PIN_MASK
    }

    /// Returns true while any pin is held.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the page has unwritten modifications.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.state.load(Ordering::Acquire) & DIRTY_BIT != 0
    }

    /// Clears the dirty flag, leaving pins untouched. Called after the
    /// page flowed through the writeback path.
    #[inline]
    pub fn mark_clean(&self) {
        self.state.fetch_and(!DIRTY_BIT, Ordering::AcqRel);
    }

    /// Borrows the page bytes for reading.
    #[inline]
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Borrows the page bytes for writing.
    #[inline]
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Fills the frame from page bytes read off disk.
    #[inline]
    pub fn load(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
    }

    /// Copies the page bytes out, for eviction capture.
    #[inline]
    pub fn snapshot(&self) -> Box<[u8; PAGE_SIZE]> {
        let data = self.data.read();
        let mut copy = Box::new([0u8; PAGE_SIZE]);
        copy.copy_from_slice(&data[..]);
        copy
    }

    /// Vacates the frame: no occupant, no pins, clean, zeroed bytes.
    pub fn reset(&self) {
        self.occupant.store(VACANT, Ordering::Release);
        self.state.store(0, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFrame")
            .field("frame_id", &self.frame_id)
            .field("occupant", &self.occupant())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_starts_vacant_and_clean() {
        let frame = PageFrame::new(FrameId(3));
        assert_eq!(frame.frame_id(), FrameId(3));
        assert!(frame.is_vacant());
        assert!(frame.occupant().is_none());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_frame_occupancy() {
        let frame = PageFrame::new(FrameId(0));
        let page_id = PageId::new(2, 77);

        frame.assign(page_id);
        assert!(!frame.is_vacant());
        assert_eq!(frame.occupant(), Some(page_id));
    }

    #[test]
    fn test_pin_release_counts() {
        let frame = PageFrame::new(FrameId(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert!(frame.is_pinned());

        assert_eq!(frame.release(false), 1);
        assert_eq!(frame.release(false), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let frame = PageFrame::new(FrameId(0));
        assert_eq!(frame.release(false), 0);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_release_dirty_is_one_transition() {
        let frame = PageFrame::new(FrameId(0));
        frame.pin();

        // The pin drop and the dirty flag land together: there is no
        // observable instant where the frame is unpinned but still clean.
        assert_eq!(frame.release(true), 0);
        assert!(frame.is_dirty());
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_release_on_unpinned_frame_still_marks_dirty() {
        let frame = PageFrame::new(FrameId(0));
        frame.release(true);
        assert!(frame.is_dirty());
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_mark_clean_preserves_pins() {
        let frame = PageFrame::new(FrameId(0));
        frame.pin();
        frame.release(true);
        frame.pin();

        frame.mark_clean();
        assert!(!frame.is_dirty());
        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_load_and_snapshot_roundtrip() {
        let frame = PageFrame::new(FrameId(0));
        let mut src = [0u8; PAGE_SIZE];
        src[0] = 0xAB;
        src[PAGE_SIZE - 1] = 0xCD;

        frame.load(&src);
        let copy = frame.snapshot();
        assert_eq!(copy[0], 0xAB);
        assert_eq!(copy[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_reset_vacates_everything() {
        let frame = PageFrame::new(FrameId(0));
        frame.assign(PageId::new(1, 1));
        frame.pin();
        frame.release(true);
        frame.write()[0] = 0xFF;

        frame.reset();

        assert!(frame.is_vacant());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert_eq!(frame.read()[0], 0);
    }
}
