//! Per-tree metadata block and recovery.

use crate::disk::DiskManager;
use aion_common::key::EntryLayout;
use aion_common::page::{PageId, PAGE_SIZE};
use aion_common::{AionError, Result};

/// Magic number identifying an Aion tree file ("AIONTDB\x01").
pub const TREE_MAGIC: u64 = 0x41494F4E_54444201;

/// Format version; bumps require migration or a fresh build.
pub const FORMAT_VERSION: u16 = 1;

/// Per-tree metadata stored at page 0 of the tree file.
///
/// Layout (LE fields, CRC32 over the preceding bytes at the end):
/// - magic: 8 bytes
/// - version: 2 bytes
/// - key_len: 2 bytes
/// - value_len: 2 bytes
/// - meta_len: 2 bytes
/// - root_page: 4 bytes
/// - next_page: 4 bytes
/// - entry_count: 8 bytes
/// - atom_generation: 8 bytes
/// - checksum: 4 bytes
///
/// Commit ordering: data pages are fenced first, this block is rewritten
/// and fenced last. A crash before the metadata fence leaves the tree in
/// its previous consistent state; pages at or beyond the recorded
/// `next_page` are orphans and get reused because allocation resumes from
/// the recorded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMeta {
    /// Entry layout of this tree, validated on open.
    pub layout: EntryLayout,
    /// Page number of the root (leaf or internal).
    pub root_page: u32,
    /// Next page number to allocate.
    pub next_page: u32,
    /// Number of live entries.
    pub entry_count: u64,
    /// Generation counter of the companion atom store at last commit.
    pub atom_generation: u64,
}

impl TreeMeta {
    const ENCODED_LEN: usize = 8 + 2 + 2 + 2 + 2 + 4 + 4 + 8 + 8 + 4;

    /// Metadata for a freshly initialized tree: an empty leaf root at
    /// page 1, allocation continuing at page 2.
    pub fn fresh(layout: EntryLayout) -> Self {
        Self {
            layout,
            root_page: 1,
            next_page: 2,
            entry_count: 0,
            atom_generation: 0,
        }
    }

    /// Serializes this block into a full metadata page.
    pub fn to_page(&self) -> Box<[u8; PAGE_SIZE]> {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        let mut at = 0;

        page[at..at + 8].copy_from_slice(&TREE_MAGIC.to_le_bytes());
        at += 8;
        page[at..at + 2].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        at += 2;
        page[at..at + 2].copy_from_slice(&self.layout.key_len.to_le_bytes());
        at += 2;
        page[at..at + 2].copy_from_slice(&self.layout.value_len.to_le_bytes());
        at += 2;
        page[at..at + 2].copy_from_slice(&self.layout.meta_len.to_le_bytes());
        at += 2;
        page[at..at + 4].copy_from_slice(&self.root_page.to_le_bytes());
        at += 4;
        page[at..at + 4].copy_from_slice(&self.next_page.to_le_bytes());
        at += 4;
        page[at..at + 8].copy_from_slice(&self.entry_count.to_le_bytes());
        at += 8;
        page[at..at + 8].copy_from_slice(&self.atom_generation.to_le_bytes());
        at += 8;

        let checksum = crc32fast::hash(&page[..at]);
        page[at..at + 4].copy_from_slice(&checksum.to_le_bytes());
        page
    }

    /// Parses a metadata page.
    ///
    /// Returns `Ok(None)` for an all-zero (never written) block, an error
    /// on a foreign magic or checksum failure, and the metadata otherwise.
    pub fn from_page(page: &[u8]) -> Result<Option<Self>> {
        let magic = u64::from_le_bytes(page[0..8].try_into().expect("slice of 8"));
        if magic == 0 {
            return Ok(None);
        }
        if magic != TREE_MAGIC {
            return Err(AionError::MagicMismatch {
                expected: TREE_MAGIC,
                actual: magic,
            });
        }

        let body = &page[..Self::ENCODED_LEN - 4];
        let stored = u32::from_le_bytes(
            page[Self::ENCODED_LEN - 4..Self::ENCODED_LEN]
                .try_into()
                .expect("slice of 4"),
        );
        if crc32fast::hash(body) != stored {
            return Err(AionError::ChecksumMismatch {
                context: "tree metadata block".to_string(),
            });
        }

        let version = u16::from_le_bytes([page[8], page[9]]);
        if version != FORMAT_VERSION {
            return Err(AionError::Corruption {
                page_id: 0,
                reason: format!("unsupported format version {}", version),
            });
        }

        let layout = EntryLayout {
            key_len: u16::from_le_bytes([page[10], page[11]]),
            value_len: u16::from_le_bytes([page[12], page[13]]),
            meta_len: u16::from_le_bytes([page[14], page[15]]),
        };
        let root_page = u32::from_le_bytes([page[16], page[17], page[18], page[19]]);
        let next_page = u32::from_le_bytes([page[20], page[21], page[22], page[23]]);
        let entry_count = u64::from_le_bytes(page[24..32].try_into().expect("slice of 8"));
        let atom_generation = u64::from_le_bytes(page[32..40].try_into().expect("slice of 8"));

        if root_page == 0 || next_page <= root_page {
            return Err(AionError::Corruption {
                page_id: 0,
                reason: format!(
                    "impossible page bookkeeping: root={}, next={}",
                    root_page, next_page
                ),
            });
        }

        Ok(Some(Self {
            layout,
            root_page,
            next_page,
            entry_count,
            atom_generation,
        }))
    }

    /// Reads the metadata block from a tree file. `Ok(None)` means the
    /// block was never written (fresh file).
    pub fn read(disk: &DiskManager, file_id: u32) -> Result<Option<Self>> {
        let page = disk.read_page(PageId::new(file_id, 0))?;
        Self::from_page(&page[..])
    }

    /// Writes the metadata block and fences it. This is the commit point.
    pub fn write(&self, disk: &DiskManager, file_id: u32) -> Result<()> {
        disk.write_page(PageId::new(file_id, 0), &self.to_page())?;
        disk.fence(file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use aion_common::key::IndexOrder;
    use tempfile::tempdir;

    fn layout() -> EntryLayout {
        EntryLayout::for_order(IndexOrder::Spot, true)
    }

    #[test]
    fn test_meta_fresh() {
        let meta = TreeMeta::fresh(layout());
        assert_eq!(meta.root_page, 1);
        assert_eq!(meta.next_page, 2);
        assert_eq!(meta.entry_count, 0);
    }

    #[test]
    fn test_meta_page_roundtrip() {
        let mut meta = TreeMeta::fresh(layout());
        meta.root_page = 17;
        meta.next_page = 42;
        meta.entry_count = 123_456;
        meta.atom_generation = 9;

        let page = meta.to_page();
        let recovered = TreeMeta::from_page(&page[..]).unwrap().unwrap();
        assert_eq!(recovered, meta);
    }

    #[test]
    fn test_meta_blank_page_is_none() {
        let page = [0u8; PAGE_SIZE];
        assert!(TreeMeta::from_page(&page).unwrap().is_none());
    }

    #[test]
    fn test_meta_foreign_magic_rejected() {
        let mut page = [0u8; PAGE_SIZE];
        page[0..8].copy_from_slice(&0xDEAD_BEEF_u64.to_le_bytes());
        let err = TreeMeta::from_page(&page).unwrap_err();
        assert!(matches!(err, AionError::MagicMismatch { .. }));
    }

    #[test]
    fn test_meta_checksum_failure_rejected() {
        let meta = TreeMeta::fresh(layout());
        let mut page = meta.to_page();
        page[20] ^= 0xFF; // flip a bit inside next_page
        let err = TreeMeta::from_page(&page[..]).unwrap_err();
        assert!(matches!(err, AionError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_meta_impossible_bookkeeping_rejected() {
        let mut meta = TreeMeta::fresh(layout());
        meta.root_page = 5;
        meta.next_page = 3;
        let page = meta.to_page();
        let err = TreeMeta::from_page(&page[..]).unwrap_err();
        assert!(matches!(err, AionError::Corruption { .. }));
    }

    #[test]
    fn test_meta_disk_roundtrip() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: true,
        })
        .unwrap();
        disk.open_file(0, "spot").unwrap();

        assert!(TreeMeta::read(&disk, 0).unwrap().is_none());

        let mut meta = TreeMeta::fresh(layout());
        meta.entry_count = 7;
        meta.write(&disk, 0).unwrap();

        let recovered = TreeMeta::read(&disk, 0).unwrap().unwrap();
        assert_eq!(recovered, meta);
    }
}
