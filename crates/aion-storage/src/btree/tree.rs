//! Tree-level operations over the page cache.

use super::node::{InternalPage, LeafPage};
use super::scan::TreeScan;
use super::MAX_HEIGHT;
use crate::disk::DiskManager;
use crate::meta::TreeMeta;
use aion_common::cancel::CancelToken;
use aion_common::key::{EntryLayout, EntryMeta, KeyBuf};
use aion_common::page::{PageHeader, PageId, PageType, PAGE_SIZE};
use aion_common::{AionError, Result};
use aion_buffer::PageCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One B+ tree: a single index order persisted in its own page file.
///
/// Readers are wait-free with respect to each other: they snapshot the
/// root pointer at scan start and read pages through the shared cache.
/// Structural mutations assume the caller holds the store's single-writer
/// lock; the tree itself only guards its metadata bookkeeping.
pub struct BTree {
    /// File this tree lives in.
    file_id: u32,
    /// Fixed entry layout, validated against the metadata block on open.
    layout: EntryLayout,
    /// Shared disk manager.
    disk: Arc<DiskManager>,
    /// Shared page cache.
    cache: Arc<PageCache>,
    /// Working metadata; persisted by `write_meta` at commit.
    meta: Mutex<TreeMeta>,
    /// Root snapshot for readers.
    root_page: AtomicU32,
}

impl BTree {
    /// Opens or initializes the tree in `<stem>.tdb`.
    ///
    /// A fresh file gets a metadata block and an empty leaf root, fenced
    /// before first use. An existing file must carry the magic, pass the
    /// metadata checksum, and match the expected entry layout.
    pub fn open(
        disk: Arc<DiskManager>,
        cache: Arc<PageCache>,
        file_id: u32,
        stem: &str,
        layout: EntryLayout,
    ) -> Result<Self> {
        disk.open_file(file_id, stem)?;

        let meta = match TreeMeta::read(&disk, file_id)? {
            Some(found) => {
                if found.layout != layout {
                    return Err(AionError::Corruption {
                        page_id: PageId::new(file_id, 0).as_u64(),
                        reason: format!(
                            "entry layout mismatch: file has {:?}, store expects {:?}",
                            found.layout, layout
                        ),
                    });
                }
                found
            }
            None => {
                let fresh = TreeMeta::fresh(layout);
                let mut root = Box::new([0u8; PAGE_SIZE]);
                LeafPage::init(&mut root[..], PageId::new(file_id, fresh.root_page));
                disk.write_page(PageId::new(file_id, fresh.root_page), &root)?;
                disk.fence(file_id)?;
                fresh.write(&disk, file_id)?;
                tracing::info!(file_id, stem, "initialized fresh tree");
                fresh
            }
        };

        let root_page = meta.root_page;
        Ok(Self {
            file_id,
            layout,
            disk,
            cache,
            meta: Mutex::new(meta),
            root_page: AtomicU32::new(root_page),
        })
    }

    /// The file id this tree occupies.
    #[inline]
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// The fixed entry layout of this tree.
    #[inline]
    pub fn layout(&self) -> &EntryLayout {
        &self.layout
    }

    /// Number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.meta.lock().entry_count
    }

    /// Root page snapshot for readers.
    #[inline]
    pub fn root_snapshot(&self) -> u32 {
        self.root_page.load(Ordering::Acquire)
    }

    // =========================================================================
    // Page access through the cache
    // =========================================================================

    /// Runs `f` over a read borrow of a page. A cache hit rides the RAII
    /// guard (pin and lock released together at scope end); a miss loads
    /// through the disk manager, writing back whatever dirty page the
    /// load evicted.
    pub(crate) fn with_page<R>(
        &self,
        page_num: u32,
        f: impl FnOnce(&[u8]) -> Result<R>,
    ) -> Result<R> {
        let page_id = PageId::new(self.file_id, page_num);

        if let Some(guard) = self.cache.read_page(page_id) {
            return f(&guard[..]);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.cache.load_page(page_id, &data[..])?;
        if let Some(e) = evicted {
            self.disk.write_page(e.page_id, &e.data)?;
        }
        let result = f(&frame.read()[..]);
        self.cache.unpin_page(page_id, false);
        result
    }

    /// Runs `f` over a write borrow of a page. The write guard marks the
    /// page dirty as it releases, so the mutation reaches the writeback
    /// path at the next checkpoint or eviction.
    fn with_page_mut<R>(&self, page_num: u32, f: impl FnOnce(&mut [u8]) -> Result<R>) -> Result<R> {
        let page_id = PageId::new(self.file_id, page_num);

        if let Some(mut guard) = self.cache.write_page(page_id) {
            return f(&mut guard[..]);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.cache.load_page(page_id, &data[..])?;
        if let Some(e) = evicted {
            self.disk.write_page(e.page_id, &e.data)?;
        }
        let result = f(&mut frame.write()[..]);
        self.cache.unpin_page(page_id, true);
        result
    }

    /// Installs a fully formed page into cache and mmap. Used for split
    /// products, which must be complete before anything links to them.
    fn publish_page(&self, page_num: u32, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let page_id = PageId::new(self.file_id, page_num);
        self.disk.write_page(page_id, data)?;
        let (_, evicted) = self.cache.load_page(page_id, &data[..])?;
        if let Some(e) = evicted {
            self.disk.write_page(e.page_id, &e.data)?;
        }
        self.cache.unpin_page(page_id, true);
        Ok(())
    }

    /// Copies a page out of the cache for scan-side iteration. The
    /// destination buffer is reused across leaves, so a long scan costs
    /// one allocation total.
    pub(crate) fn copy_page_into(&self, page_num: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        self.with_page(page_num, |data| {
            buf.copy_from_slice(data);
            Ok(())
        })
    }

    /// Copies a page out of the cache into a fresh buffer.
    pub(crate) fn copy_page(&self, page_num: u32) -> Result<Box<[u8; PAGE_SIZE]>> {
        let mut copy = Box::new([0u8; PAGE_SIZE]);
        self.copy_page_into(page_num, &mut copy)?;
        Ok(copy)
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Walks root to leaf for `key`, recording the path. Returns the page
    /// numbers visited, leaf last.
    fn find_path(&self, key: &[u8]) -> Result<([u32; MAX_HEIGHT], usize)> {
        let key_len = self.layout.key_len as usize;
        let mut path = [0u32; MAX_HEIGHT];
        let mut depth = 0;
        let mut current = self.root_snapshot();

        loop {
            if depth >= MAX_HEIGHT {
                return Err(AionError::Corruption {
                    page_id: PageId::new(self.file_id, current).as_u64(),
                    reason: "tree deeper than maximum height".to_string(),
                });
            }
            path[depth] = current;
            depth += 1;

            let next = self.with_page(current, |data| {
                let header = PageHeader::from_bytes(data);
                match header.page_type {
                    PageType::BTreeLeaf => Ok(None),
                    PageType::BTreeInternal => {
                        Ok(Some(InternalPage::find_child(data, key_len, key)))
                    }
                    other => Err(AionError::Corruption {
                        page_id: PageId::new(self.file_id, current).as_u64(),
                        reason: format!("unexpected page type {:?} on search path", other),
                    }),
                }
            })?;

            match next {
                Some(child) => current = child,
                None => return Ok((path, depth)),
            }
        }
    }

    /// Finds the leaf that would contain `key`.
    pub(crate) fn find_leaf(&self, key: &[u8]) -> Result<u32> {
        let (path, depth) = self.find_path(key)?;
        Ok(path[depth - 1])
    }

    // =========================================================================
    // Mutations (caller holds the single-writer lock)
    // =========================================================================

    /// Inserts an entry. Idempotent on exact key match: returns Ok(false)
    /// and leaves the entry count unchanged when the key already exists.
    pub fn insert(&self, key: &[u8], value: u64, entry_meta: &EntryMeta) -> Result<bool> {
        debug_assert_eq!(key.len(), self.layout.key_len as usize);
        let (path, depth) = self.find_path(key)?;
        let leaf = path[depth - 1];

        let outcome = self.with_page_mut(leaf, |data| {
            LeafPage::validate(data, &self.layout, PageId::new(self.file_id, leaf))?;
            match LeafPage::search(data, &self.layout, key) {
                Ok(_) => Ok(Some(false)),
                Err(idx) => {
                    match LeafPage::insert_at(data, &self.layout, idx, key, value, entry_meta) {
                        Ok(()) => Ok(Some(true)),
                        Err(AionError::PageFull) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            }
        })?;

        match outcome {
            Some(inserted) => {
                if inserted {
                    self.meta.lock().entry_count += 1;
                }
                Ok(inserted)
            }
            None => {
                self.insert_with_split(key, value, entry_meta, &path[..depth])?;
                self.meta.lock().entry_count += 1;
                Ok(true)
            }
        }
    }

    /// Split-on-overflow path: splits the full leaf, inserts the pending
    /// entry into the proper half, and promotes the separator upward.
    fn insert_with_split(
        &self,
        key: &[u8],
        value: u64,
        entry_meta: &EntryMeta,
        path: &[u32],
    ) -> Result<()> {
        let leaf_num = path[path.len() - 1];
        let right_num = self.allocate_page()?;
        let right_page_id = PageId::new(self.file_id, right_num);

        let mut left = self.copy_page(leaf_num)?;
        let (separator, mut right) = LeafPage::split(&mut left[..], &self.layout, right_page_id);

        // Insert the pending entry; a key equal to the separator belongs
        // to the right half.
        if key < separator.as_slice() {
            let idx = LeafPage::search(&left[..], &self.layout, key)
                .expect_err("key was absent before the split");
            LeafPage::insert_at(&mut left[..], &self.layout, idx, key, value, entry_meta)?;
        } else {
            let idx = LeafPage::search(&right[..], &self.layout, key)
                .expect_err("key was absent before the split");
            LeafPage::insert_at(&mut right[..], &self.layout, idx, key, value, entry_meta)?;
        }

        // Publish the fully formed right page before linking it into the
        // sibling chain, then rewrite the left page with its new link, and
        // only then touch parent separators. Readers never observe a page
        // mid-split.
        self.publish_page(right_num, &right)?;
        LeafPage::set_next_leaf(&mut left[..], Some(right_num));
        self.with_page_mut(leaf_num, |data| {
            data.copy_from_slice(&left[..]);
            Ok(())
        })?;

        self.promote(separator, right_num, &path[..path.len() - 1])
    }

    /// Promotes a separator into the parent chain, splitting internal
    /// nodes as needed; an overflowing root grows the tree by one level.
    fn promote(&self, separator: KeyBuf, right_child: u32, parents: &[u32]) -> Result<()> {
        let key_len = self.layout.key_len as usize;
        let mut separator = separator;
        let mut right_child = right_child;
        let mut level = parents.len();

        loop {
            if level == 0 {
                return self.grow_root(separator, right_child);
            }
            let parent = parents[level - 1];

            let fitted = self.with_page_mut(parent, |data| {
                InternalPage::validate(data, key_len, PageId::new(self.file_id, parent))?;
                match InternalPage::insert(data, key_len, separator.as_slice(), right_child) {
                    Ok(()) => Ok(true),
                    Err(AionError::PageFull) => Ok(false),
                    Err(e) => Err(e),
                }
            })?;
            if fitted {
                return Ok(());
            }

            // Split the internal node and keep promoting.
            let new_num = self.allocate_page()?;
            let new_page_id = PageId::new(self.file_id, new_num);

            let mut node = self.copy_page(parent)?;
            let (promoted, mut right) = InternalPage::split(&mut node[..], key_len, new_page_id);

            if separator.as_slice() < promoted.as_slice() {
                InternalPage::insert(&mut node[..], key_len, separator.as_slice(), right_child)?;
            } else {
                InternalPage::insert(&mut right[..], key_len, separator.as_slice(), right_child)?;
            }

            self.publish_page(new_num, &right)?;
            self.with_page_mut(parent, |data| {
                data.copy_from_slice(&node[..]);
                Ok(())
            })?;

            separator = promoted;
            right_child = new_num;
            level -= 1;
        }
    }

    /// Creates a new root after the old root split, deepening the tree.
    fn grow_root(&self, separator: KeyBuf, right_child: u32) -> Result<()> {
        let key_len = self.layout.key_len as usize;
        let old_root = self.root_snapshot();

        let old_level = self.with_page(old_root, |data| {
            let header = PageHeader::from_bytes(data);
            Ok(match header.page_type {
                PageType::BTreeInternal => InternalPage::level(data) + 1,
                _ => 0,
            })
        })?;

        let new_root_num = self.allocate_page()?;
        let mut new_root = Box::new([0u8; PAGE_SIZE]);
        InternalPage::init(
            &mut new_root[..],
            PageId::new(self.file_id, new_root_num),
            old_level,
        );
        InternalPage::set_leftmost_child(&mut new_root[..], old_root);
        InternalPage::insert(&mut new_root[..], key_len, separator.as_slice(), right_child)?;

        self.publish_page(new_root_num, &new_root)?;

        self.meta.lock().root_page = new_root_num;
        self.root_page.store(new_root_num, Ordering::Release);
        tracing::debug!(file_id = self.file_id, new_root = new_root_num, "root split");
        Ok(())
    }

    /// Allocates the next page number, extending the file first so a new
    /// page is always backed before anything references it.
    fn allocate_page(&self) -> Result<u32> {
        let mut meta = self.meta.lock();
        let page_num = meta.next_page;
        meta.next_page = meta.next_page.checked_add(1).ok_or_else(|| {
            AionError::StorageFull("page address space exhausted".to_string())
        })?;
        self.disk.ensure_capacity(self.file_id, meta.next_page)?;
        Ok(page_num)
    }

    /// Point lookup. Returns the value and metadata for an exact key.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<(u64, EntryMeta)>> {
        let leaf = self.find_leaf(key)?;
        self.with_page(leaf, |data| {
            LeafPage::validate(data, &self.layout, PageId::new(self.file_id, leaf))?;
            Ok(LeafPage::search(data, &self.layout, key)
                .ok()
                .map(|idx| {
                    (
                        LeafPage::value_at(data, &self.layout, idx),
                        LeafPage::meta_at(data, &self.layout, idx),
                    )
                }))
        })
    }

    /// Removes an entry. Returns true if the key was present. Leaf
    /// underflow is tolerated; rebalancing is deferred.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let leaf = self.find_leaf(key)?;
        let removed = self.with_page_mut(leaf, |data| {
            match LeafPage::search(data, &self.layout, key) {
                Ok(idx) => {
                    LeafPage::remove_at(data, &self.layout, idx);
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        })?;
        if removed {
            let mut meta = self.meta.lock();
            meta.entry_count = meta.entry_count.saturating_sub(1);
        }
        Ok(removed)
    }

    /// Rewrites the metadata block of an existing entry in place
    /// (tombstone flag, modified-at stamp, version bump). Returns true if
    /// the key was present.
    pub fn set_meta(&self, key: &[u8], entry_meta: &EntryMeta) -> Result<bool> {
        let leaf = self.find_leaf(key)?;
        self.with_page_mut(leaf, |data| {
            match LeafPage::search(data, &self.layout, key) {
                Ok(idx) => {
                    LeafPage::set_meta_at(data, &self.layout, idx, entry_meta);
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        })
    }

    /// Streaming range scan over `[min, max]` (inclusive bounds, already
    /// encoded for this tree's order). `min > max` yields nothing.
    pub fn scan(&self, min: &[u8], max: &[u8], cancel: CancelToken) -> TreeScan<'_> {
        TreeScan::new(self, min, max, cancel)
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Writes the metadata block and fences it. Data pages must already be
    /// fenced; this is the commit point for everything written before it.
    pub fn write_meta(&self) -> Result<()> {
        let meta = *self.meta.lock();
        meta.write(&self.disk, self.file_id)
    }

    /// Full checkpoint for a standalone tree: flush dirty cache pages,
    /// fence data, then commit metadata.
    pub fn commit(&self) -> Result<()> {
        self.cache
            .flush_all(|page_id, data| {
                if page_id.file_id == self.file_id {
                    let mut page = [0u8; PAGE_SIZE];
                    page.copy_from_slice(data);
                    self.disk.write_page(page_id, &page)
                } else {
                    Ok(())
                }
            })
            .map(|_| ())?;
        self.disk.fence(self.file_id)?;
        self.write_meta()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use aion_common::config::CacheConfig;
    use aion_common::key::IndexOrder;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn test_tree(dir: &std::path::Path) -> BTree {
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.to_path_buf(),
                fsync_enabled: true,
            })
            .unwrap(),
        );
        let cache = Arc::new(PageCache::new(CacheConfig { num_frames: 64 }));
        BTree::open(
            disk,
            cache,
            0,
            "spo",
            EntryLayout::for_order(IndexOrder::Spo, false),
        )
        .unwrap()
    }

    fn key12(n: u32) -> [u8; 12] {
        let mut k = [0u8; 12];
        k[4..8].copy_from_slice(&n.to_be_bytes());
        k
    }

    #[test]
    fn test_insert_into_empty_tree() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());

        assert!(tree.insert(&key12(5), 50, &EntryMeta::default()).unwrap());
        assert_eq!(tree.entry_count(), 1);
        assert_eq!(tree.lookup(&key12(5)).unwrap().unwrap().0, 50);
        assert!(tree.lookup(&key12(6)).unwrap().is_none());
    }

    #[test]
    fn test_insert_idempotent_on_exact_key() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());

        assert!(tree.insert(&key12(1), 10, &EntryMeta::default()).unwrap());
        assert!(!tree.insert(&key12(1), 20, &EntryMeta::default()).unwrap());
        assert_eq!(tree.entry_count(), 1);
        // Original value retained.
        assert_eq!(tree.lookup(&key12(1)).unwrap().unwrap().0, 10);
    }

    #[test]
    fn test_insert_across_leaf_splits() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());

        // Well past one leaf (~816 entries for this layout).
        let n = 3_000u32;
        let mut order: Vec<u32> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(42));

        for &i in &order {
            assert!(tree.insert(&key12(i), i as u64, &EntryMeta::default()).unwrap());
        }
        assert_eq!(tree.entry_count(), n as u64);

        for i in 0..n {
            assert_eq!(tree.lookup(&key12(i)).unwrap().unwrap().0, i as u64);
        }
    }

    #[test]
    fn test_root_split_deepens_tree() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());
        let root_before = tree.root_snapshot();

        for i in 0..2_000u32 {
            tree.insert(&key12(i), 0, &EntryMeta::default()).unwrap();
        }
        assert_ne!(tree.root_snapshot(), root_before);
    }

    #[test]
    fn test_scan_ascending_across_leaf_boundary() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());

        for i in 0..2_000u32 {
            tree.insert(&key12(i), i as u64, &EntryMeta::default()).unwrap();
        }

        let min = key12(100);
        let max = key12(200);
        let mut scan = tree.scan(&min, &max, CancelToken::new());
        let mut seen = Vec::new();
        while scan.advance().unwrap() {
            seen.push(scan.current().value);
        }
        let expected: Vec<u64> = (100..=200).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_scan_empty_range() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());
        tree.insert(&key12(5), 5, &EntryMeta::default()).unwrap();

        // min > max yields nothing.
        let mut scan = tree.scan(&key12(9), &key12(3), CancelToken::new());
        assert!(!scan.advance().unwrap());
    }

    #[test]
    fn test_scan_full_tree_is_sorted_leaf_chain() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());

        let n = 2_500u32;
        let mut order: Vec<u32> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(7));
        for &i in &order {
            tree.insert(&key12(i), i as u64, &EntryMeta::default()).unwrap();
        }

        // Walking leaves from the leftmost yields every key in ascending
        // order exactly once.
        let min = key12(0);
        let max = key12(n - 1);
        let mut scan = tree.scan(&min, &max, CancelToken::new());
        let mut prev: Option<u64> = None;
        let mut count = 0u64;
        while scan.advance().unwrap() {
            let v = scan.current().value;
            if let Some(p) = prev {
                assert!(v > p, "scan out of order: {} after {}", v, p);
            }
            prev = Some(v);
            count += 1;
        }
        assert_eq!(count, n as u64);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());

        tree.insert(&key12(1), 1, &EntryMeta::default()).unwrap();
        tree.insert(&key12(2), 2, &EntryMeta::default()).unwrap();

        assert!(tree.delete(&key12(1)).unwrap());
        assert!(!tree.delete(&key12(1)).unwrap());
        assert_eq!(tree.entry_count(), 1);
        assert!(tree.lookup(&key12(1)).unwrap().is_none());
        assert!(tree.lookup(&key12(2)).unwrap().is_some());
    }

    #[test]
    fn test_set_meta_in_place() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: true,
            })
            .unwrap(),
        );
        let cache = Arc::new(PageCache::new(CacheConfig { num_frames: 64 }));
        let tree = BTree::open(
            disk,
            cache,
            0,
            "spot",
            EntryLayout::for_order(IndexOrder::Spot, false),
        )
        .unwrap();

        let key = [9u8; 36];
        tree.insert(&key, 0, &EntryMeta::new(100)).unwrap();

        let mut meta = tree.lookup(&key).unwrap().unwrap().1;
        meta.set_tombstone(true);
        meta.version += 1;
        assert!(tree.set_meta(&key, &meta).unwrap());

        let read = tree.lookup(&key).unwrap().unwrap().1;
        assert!(read.is_tombstone());
        assert_eq!(read.version, 2);
        assert!(!tree.set_meta(&[0u8; 36], &meta).unwrap());
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let tree = test_tree(dir.path());
            for i in 0..1_500u32 {
                tree.insert(&key12(i), i as u64, &EntryMeta::default()).unwrap();
            }
            tree.commit().unwrap();
        }

        let tree = test_tree(dir.path());
        assert_eq!(tree.entry_count(), 1_500);
        for i in (0..1_500u32).step_by(97) {
            assert_eq!(tree.lookup(&key12(i)).unwrap().unwrap().0, i as u64);
        }
    }

    #[test]
    fn test_uncommitted_writes_do_not_survive() {
        let dir = tempdir().unwrap();
        {
            let tree = test_tree(dir.path());
            tree.insert(&key12(1), 1, &EntryMeta::default()).unwrap();
            tree.commit().unwrap();
            // Written but never committed: no cache flush, no meta fence.
            tree.insert(&key12(2), 2, &EntryMeta::default()).unwrap();
        }

        let tree = test_tree(dir.path());
        assert_eq!(tree.entry_count(), 1);
        assert!(tree.lookup(&key12(1)).unwrap().is_some());
    }

    #[test]
    fn test_scan_cancellation() {
        let dir = tempdir().unwrap();
        let tree = test_tree(dir.path());
        for i in 0..100u32 {
            tree.insert(&key12(i), i as u64, &EntryMeta::default()).unwrap();
        }

        let cancel = CancelToken::new();
        let mut scan = tree.scan(&key12(0), &key12(99), cancel.clone());
        assert!(scan.advance().unwrap());

        cancel.cancel();
        let err = scan.advance().unwrap_err();
        assert!(matches!(err, AionError::Cancelled));
    }

    #[test]
    fn test_open_rejects_layout_mismatch() {
        let dir = tempdir().unwrap();
        {
            let tree = test_tree(dir.path());
            tree.commit().unwrap();
        }

        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: true,
            })
            .unwrap(),
        );
        let cache = Arc::new(PageCache::new(CacheConfig { num_frames: 16 }));
        let result = BTree::open(
            disk,
            cache,
            0,
            "spo",
            EntryLayout::for_order(IndexOrder::Spot, false),
        );
        assert!(matches!(result, Err(AionError::Corruption { .. })));
    }
}
