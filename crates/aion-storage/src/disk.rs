//! Memory-mapped page file management.

use aion_common::page::{PageId, PAGE_SIZE};
use aion_common::{AionError, Result};
use memmap2::MmapMut;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Pages added per file extension, amortizing remaps.
const GROWTH_PAGES: u32 = 64;

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for page files.
    pub data_dir: PathBuf,
    /// Flush memory-mapped ranges on fence. Disabling trades durability
    /// for bulk-load speed.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages the memory-mapped page files of one store.
///
/// Each file_id maps to one index file (`<stem>.tdb`), registered at store
/// open. Reads copy the page out of the map; writes copy in; `fence`
/// flushes the map, forming the ordering barrier recovery depends on.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open mapped files keyed by file_id.
    files: Mutex<HashMap<u32, MappedFile>>,
}

/// One memory-mapped page file.
struct MappedFile {
    /// The underlying file handle.
    file: std::fs::File,
    /// Writable map over the whole file.
    map: MmapMut,
    /// Number of pages currently mapped.
    num_pages: u32,
}

impl MappedFile {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut len = file.metadata()?.len();
        if len == 0 {
            // A map must cover at least one page; size fresh files to the
            // first growth chunk.
            len = GROWTH_PAGES as u64 * PAGE_SIZE as u64;
            file.set_len(len)
                .map_err(|e| AionError::StorageFull(format!("extend {}: {}", path.display(), e)))?;
        }

        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            file,
            num_pages: (len / PAGE_SIZE as u64) as u32,
            map,
        })
    }

    /// Grows the file to hold at least `min_pages` pages and remaps.
    fn grow(&mut self, min_pages: u32) -> Result<()> {
        if min_pages <= self.num_pages {
            return Ok(());
        }
        let new_pages = min_pages
            .checked_add(GROWTH_PAGES - 1)
            .map(|n| n - n % GROWTH_PAGES)
            .ok_or_else(|| AionError::StorageFull("page file at maximum size".to_string()))?;

        self.file
            .set_len(new_pages as u64 * PAGE_SIZE as u64)
            .map_err(|e| AionError::StorageFull(format!("file extension failed: {}", e)))?;
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        self.num_pages = new_pages;
        Ok(())
    }

    #[inline]
    fn page_range(&self, page_num: u32) -> std::ops::Range<usize> {
        let start = page_num as usize * PAGE_SIZE;
        start..start + PAGE_SIZE
    }
}

impl DiskManager {
    /// Creates a new disk manager rooted at the configured directory.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Opens (or creates) the page file for `file_id` under the given
    /// file-name stem. Must be called once per file before any page I/O.
    pub fn open_file(&self, file_id: u32, stem: &str) -> Result<()> {
        let mut files = self.files.lock();
        if files.contains_key(&file_id) {
            return Ok(());
        }
        let path = self.config.data_dir.join(format!("{}.tdb", stem));
        files.insert(file_id, MappedFile::open(&path)?);
        Ok(())
    }

    /// Reads a page out of the map.
    pub fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let files = self.files.lock();
        let handle = files
            .get(&page_id.file_id)
            .ok_or(AionError::PageNotFound {
                page_id: page_id.as_u64(),
            })?;

        if page_id.page_num >= handle.num_pages {
            return Err(AionError::PageNotFound {
                page_id: page_id.as_u64(),
            });
        }

        let mut buffer = Box::new([0u8; PAGE_SIZE]);
        buffer.copy_from_slice(&handle.map[handle.page_range(page_id.page_num)]);
        Ok(buffer)
    }

    /// Writes a page into the map. The write is visible to readers of the
    /// map immediately but only durable after `fence`.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut files = self.files.lock();
        let handle = files
            .get_mut(&page_id.file_id)
            .ok_or(AionError::PageNotFound {
                page_id: page_id.as_u64(),
            })?;

        if page_id.page_num >= handle.num_pages {
            handle.grow(page_id.page_num + 1)?;
        }

        let range = handle.page_range(page_id.page_num);
        handle.map[range].copy_from_slice(data);
        Ok(())
    }

    /// Ensures the file can hold `num_pages` pages, extending it if
    /// needed. Writers extend the file before publishing a new root.
    pub fn ensure_capacity(&self, file_id: u32, num_pages: u32) -> Result<()> {
        let mut files = self.files.lock();
        let handle = files.get_mut(&file_id).ok_or(AionError::PageNotFound {
            page_id: PageId::new(file_id, 0).as_u64(),
        })?;
        handle.grow(num_pages)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let files = self.files.lock();
        let handle = files.get(&file_id).ok_or(AionError::PageNotFound {
            page_id: PageId::new(file_id, 0).as_u64(),
        })?;
        Ok(handle.num_pages)
    }

    /// Flushes one file's map. This is the write fence: everything written
    /// before it is durable after it returns.
    pub fn fence(&self, file_id: u32) -> Result<()> {
        if !self.config.fsync_enabled {
            return Ok(());
        }
        let files = self.files.lock();
        let handle = files.get(&file_id).ok_or(AionError::PageNotFound {
            page_id: PageId::new(file_id, 0).as_u64(),
        })?;
        handle.map.flush()?;
        Ok(())
    }

    /// Fences every open file.
    pub fn fence_all(&self) -> Result<()> {
        if !self.config.fsync_enabled {
            return Ok(());
        }
        let files = self.files.lock();
        for handle in files.values() {
            handle.map.flush()?;
        }
        Ok(())
    }

    /// Total mapped bytes across all files.
    pub fn bytes_mapped(&self) -> usize {
        let files = self.files.lock();
        files
            .values()
            .map(|h| h.num_pages as usize * PAGE_SIZE)
            .sum()
    }

    /// Closes all files, fencing first.
    pub fn close_all(&self) -> Result<()> {
        self.fence_all()?;
        self.files.lock().clear();
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
