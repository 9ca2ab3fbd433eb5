//! Page replacement policies for the cache.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction among frames accepted by
    /// `evictable` (typically "pin count is zero").
    ///
    /// Returns None if no candidate is evictable.
    fn evict(&self, evictable: impl Fn(FrameId) -> bool) -> Option<FrameId>
    where
        Self: Sized;

    /// Removes a frame from the replacer's bookkeeping.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of tracked frames.
    fn size(&self) -> usize;
}

/// Least-recently-used replacement.
///
/// Each access stamps the frame with a monotonically increasing counter;
/// eviction picks the evictable frame with the smallest stamp. The stamp
/// read on access is a single atomic increment, so the hot fetch path
/// takes no lock beyond the stamp-table mutex.
pub struct LruReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Monotonic access counter.
    clock: AtomicU64,
    /// Frame → last-access stamp, for frames currently tracked.
    stamps: Mutex<HashMap<FrameId, u64>>,
}

impl LruReplacer {
    /// Creates a new LRU replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            clock: AtomicU64::new(0),
            stamps: Mutex::new(HashMap::with_capacity(num_frames)),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for LruReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        self.stamps.lock().insert(frame_id, stamp);
    }

    fn evict(&self, evictable: impl Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut stamps = self.stamps.lock();

        let victim = stamps
            .iter()
            .filter(|(frame_id, _)| evictable(**frame_id))
            .min_by_key(|(_, stamp)| **stamp)
            .map(|(frame_id, _)| *frame_id)?;

        stamps.remove(&victim);
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        self.stamps.lock().remove(&frame_id);
    }

    fn size(&self) -> usize {
        self.stamps.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_new() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_evict_empty() {
        let replacer = LruReplacer::new(10);
        assert!(replacer.evict(|_| true).is_none());
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let replacer = LruReplacer::new(10);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));
        // Re-access frame 0, making frame 1 the coldest.
        replacer.record_access(FrameId(0));

        assert_eq!(replacer.evict(|_| true), Some(FrameId(1)));
        assert_eq!(replacer.evict(|_| true), Some(FrameId(2)));
        assert_eq!(replacer.evict(|_| true), Some(FrameId(0)));
        assert!(replacer.evict(|_| true).is_none());
    }

    #[test]
    fn test_lru_evict_respects_predicate() {
        let replacer = LruReplacer::new(10);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        // Frame 0 is the LRU victim but the predicate (a pin) protects it.
        let victim = replacer.evict(|f| f != FrameId(0));
        assert_eq!(victim, Some(FrameId(1)));

        // Nothing else is evictable.
        assert!(replacer.evict(|f| f != FrameId(0)).is_none());
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_lru_remove() {
        let replacer = LruReplacer::new(10);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        assert_eq!(replacer.size(), 2);

        replacer.remove(FrameId(0));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(|_| true), Some(FrameId(1)));
    }

    #[test]
    fn test_lru_out_of_bounds_access_ignored() {
        let replacer = LruReplacer::new(5);
        replacer.record_access(FrameId(100));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_reaccess_updates_stamp() {
        let replacer = LruReplacer::new(5);

        for i in 0..5 {
            replacer.record_access(FrameId(i));
        }
        // Touch them all again in reverse: frame 4 is now coldest.
        for i in (0..5).rev() {
            replacer.record_access(FrameId(i));
        }

        assert_eq!(replacer.evict(|_| true), Some(FrameId(4)));
    }
}
