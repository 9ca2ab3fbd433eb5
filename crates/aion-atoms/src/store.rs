//! The atom store: chunked backing storage plus hash index.

use aion_common::term::{Atom, ATOM_MAX, DEFAULT_GRAPH, DEFAULT_GRAPH_IRI};
use aion_common::{AionError, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use xxhash_rust::xxh32::xxh32;

/// Size of one backing chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Marker length value for the unused tail of a chunk.
const UNUSED_TAIL: u32 = u32::MAX;

/// Magic bytes at the head of the side-table file ("AIDX").
const INDEX_MAGIC: [u8; 4] = *b"AIDX";

/// Seed for the content hash. Fixed so hashes are stable across processes
/// and versions.
const HASH_SEED: u32 = 0;

/// One side-table record: where an atom's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AtomEntry {
    /// Chunk index.
    chunk: u32,
    /// Byte offset of the record inside the chunk (points at the length
    /// prefix).
    offset: u32,
    /// Content length in bytes.
    len: u32,
    /// xxh32 of the content.
    hash: u32,
}

impl AtomEntry {
    /// On-disk size of one record.
    const SIZE: usize = 16;

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.chunk.to_le_bytes());
        buf[4..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.hash.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            chunk: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            offset: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            len: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            hash: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }
}

/// Persistent string ↔ atom interning store.
///
/// Atom 0 and `u32::MAX` are reserved sentinels and never assigned. The
/// first interned content receives atom 1; a fresh store pre-interns the
/// default graph IRI so `DEFAULT_GRAPH` is stable everywhere.
///
/// The store's lifecycle is tied to its owner: dropping it releases all
/// chunks. There is no process-wide pool.
pub struct AtomStore {
    /// Chunk file path; the side table lives at `<path>.idx`.
    path: PathBuf,
    /// Backing chunks. The last chunk is partially filled up to `tail`.
    chunks: Vec<Box<[u8; CHUNK_SIZE]>>,
    /// Write offset within the last chunk.
    tail: usize,
    /// Side table, indexed by `atom - 1`.
    entries: Vec<AtomEntry>,
    /// Hash → atoms with that content hash. Collisions are resolved by
    /// byte comparison against the backing store.
    by_hash: HashMap<u32, Vec<Atom>>,
    /// Unflushed writes exist.
    dirty: bool,
}

impl AtomStore {
    /// Opens or creates an atom store at `path`.
    ///
    /// A fresh store interns the default graph IRI eagerly. An existing
    /// store is loaded from its chunk file; if the side table is missing,
    /// truncated, or fails its checksum, it is rebuilt by scanning chunks.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = if path.exists() {
            Self::load(path)?
        } else {
            Self {
                path,
                chunks: Vec::new(),
                tail: CHUNK_SIZE, // force first chunk allocation
                entries: Vec::new(),
                by_hash: HashMap::new(),
                dirty: false,
            }
        };

        if store.entries.is_empty() {
            let graph = store.intern(DEFAULT_GRAPH_IRI.as_bytes())?;
            debug_assert_eq!(graph, DEFAULT_GRAPH);
        }
        Ok(store)
    }

    /// Returns the atom for `content`, interning it if absent.
    ///
    /// Assignment is at-most-once per distinct content: equal byte
    /// sequences map to the same atom across restarts.
    pub fn intern(&mut self, content: &[u8]) -> Result<Atom> {
        let hash = xxh32(content, HASH_SEED);
        if let Some(atom) = self.find(hash, content) {
            return Ok(atom);
        }

        let next = self.entries.len() as u64 + 1;
        if next >= ATOM_MAX as u64 {
            return Err(AionError::AtomStoreExhausted);
        }

        let record_len = 4 + content.len();
        if record_len > CHUNK_SIZE {
            return Err(AionError::StorageFull(format!(
                "term of {} bytes exceeds chunk size",
                content.len()
            )));
        }

        // Rollover: a record never spans chunks. Mark the unused tail so a
        // rebuild scan knows to skip to the next chunk.
        if self.tail + record_len > CHUNK_SIZE {
            if self.tail + 4 <= CHUNK_SIZE {
                let chunk = self.chunks.last_mut().expect("tail implies a chunk");
                chunk[self.tail..self.tail + 4].copy_from_slice(&UNUSED_TAIL.to_le_bytes());
            }
            self.chunks.push(Box::new([0u8; CHUNK_SIZE]));
            self.tail = 0;
        }

        let chunk_idx = self.chunks.len() as u32 - 1;
        let offset = self.tail as u32;
        let chunk = self.chunks.last_mut().expect("chunk allocated above");
        chunk[self.tail..self.tail + 4].copy_from_slice(&(content.len() as u32).to_le_bytes());
        chunk[self.tail + 4..self.tail + record_len].copy_from_slice(content);
        self.tail += record_len;

        let atom = next as Atom;
        self.entries.push(AtomEntry {
            chunk: chunk_idx,
            offset,
            len: content.len() as u32,
            hash,
        });
        self.by_hash.entry(hash).or_default().push(atom);
        self.dirty = true;
        Ok(atom)
    }

    /// Returns the content bytes for `atom` as a borrowed view into the
    /// backing store. Constant time.
    pub fn lookup(&self, atom: Atom) -> Result<&[u8]> {
        if atom == 0 || atom == ATOM_MAX {
            return Err(AionError::AtomNotFound { atom });
        }
        let entry = self
            .entries
            .get(atom as usize - 1)
            .ok_or(AionError::AtomNotFound { atom })?;
        let chunk = &self.chunks[entry.chunk as usize];
        let start = entry.offset as usize + 4;
        Ok(&chunk[start..start + entry.len as usize])
    }

    /// Read-only lookup of an existing atom; used by queries to resolve
    /// bound terms without allocating ids.
    pub fn id_of(&self, content: &[u8]) -> Option<Atom> {
        self.find(xxh32(content, HASH_SEED), content)
    }

    /// Number of atoms assigned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no atoms are assigned.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total backing bytes (whole chunks).
    pub fn bytes_used(&self) -> usize {
        self.chunks.len() * CHUNK_SIZE
    }

    fn find(&self, hash: u32, content: &[u8]) -> Option<Atom> {
        let candidates = self.by_hash.get(&hash)?;
        for &atom in candidates {
            let entry = &self.entries[atom as usize - 1];
            let chunk = &self.chunks[entry.chunk as usize];
            let start = entry.offset as usize + 4;
            if &chunk[start..start + entry.len as usize] == content {
                return Some(atom);
            }
        }
        None
    }

    /// Writes chunks and side table durably. A no-op when clean.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut chunk_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        for chunk in &self.chunks {
            chunk_file.write_all(&chunk[..])?;
        }
        chunk_file.sync_all()?;

        let mut body = Vec::with_capacity(self.entries.len() * AtomEntry::SIZE);
        for entry in &self.entries {
            body.extend_from_slice(&entry.to_bytes());
        }
        let checksum = crc32fast::hash(&body);

        let mut index_file = File::create(self.index_path())?;
        index_file.write_all(&INDEX_MAGIC)?;
        index_file.write_all(&(self.entries.len() as u32).to_le_bytes())?;
        index_file.write_all(&body)?;
        index_file.write_all(&checksum.to_le_bytes())?;
        index_file.sync_all()?;

        self.dirty = false;
        tracing::debug!(atoms = self.entries.len(), chunks = self.chunks.len(), "atom store flushed");
        Ok(())
    }

    fn index_path(&self) -> PathBuf {
        let mut p = self.path.clone().into_os_string();
        p.push(".idx");
        PathBuf::from(p)
    }

    fn load(path: PathBuf) -> Result<Self> {
        let mut raw = Vec::new();
        File::open(&path)?.read_to_end(&mut raw)?;
        if raw.len() % CHUNK_SIZE != 0 {
            return Err(AionError::ChecksumMismatch {
                context: format!("atom chunk file {} not chunk-aligned", path.display()),
            });
        }

        let mut chunks = Vec::with_capacity(raw.len() / CHUNK_SIZE);
        for slab in raw.chunks_exact(CHUNK_SIZE) {
            let mut chunk = Box::new([0u8; CHUNK_SIZE]);
            chunk.copy_from_slice(slab);
            chunks.push(chunk);
        }

        let mut store = Self {
            path,
            chunks,
            tail: 0,
            entries: Vec::new(),
            by_hash: HashMap::new(),
            dirty: false,
        };

        match store.load_index() {
            Ok(entries) => store.install_entries(entries),
            Err(err) => {
                tracing::warn!(error = %err, "atom side table invalid, rebuilding from chunks");
                let entries = store.scan_chunks();
                store.install_entries(entries);
                store.dirty = true;
            }
        }
        Ok(store)
    }

    fn load_index(&self) -> Result<Vec<AtomEntry>> {
        let mut raw = Vec::new();
        File::open(self.index_path())?.read_to_end(&mut raw)?;

        if raw.len() < 12 || raw[0..4] != INDEX_MAGIC {
            return Err(AionError::ChecksumMismatch {
                context: "atom side table header".to_string(),
            });
        }
        let count = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
        let body_len = count * AtomEntry::SIZE;
        if raw.len() != 8 + body_len + 4 {
            return Err(AionError::ChecksumMismatch {
                context: "atom side table size marker".to_string(),
            });
        }

        let body = &raw[8..8 + body_len];
        let stored = u32::from_le_bytes([
            raw[8 + body_len],
            raw[9 + body_len],
            raw[10 + body_len],
            raw[11 + body_len],
        ]);
        if crc32fast::hash(body) != stored {
            return Err(AionError::ChecksumMismatch {
                context: "atom side table checksum".to_string(),
            });
        }

        let mut entries = Vec::with_capacity(count);
        for record in body.chunks_exact(AtomEntry::SIZE) {
            let entry = AtomEntry::from_bytes(record);
            if entry.chunk as usize >= self.chunks.len()
                || entry.offset as usize + 4 + entry.len as usize > CHUNK_SIZE
            {
                return Err(AionError::ChecksumMismatch {
                    context: "atom side table record out of range".to_string(),
                });
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Reconstructs the side table by walking length-prefixed records in
    /// every chunk. A zero or tail-marker length ends a chunk.
    fn scan_chunks(&self) -> Vec<AtomEntry> {
        let mut entries = Vec::new();
        for (chunk_idx, chunk) in self.chunks.iter().enumerate() {
            let mut at = 0usize;
            while at + 4 <= CHUNK_SIZE {
                let len = u32::from_le_bytes([
                    chunk[at],
                    chunk[at + 1],
                    chunk[at + 2],
                    chunk[at + 3],
                ]);
                if len == 0 || len == UNUSED_TAIL {
                    break;
                }
                let len = len as usize;
                if at + 4 + len > CHUNK_SIZE {
                    break;
                }
                let content = &chunk[at + 4..at + 4 + len];
                entries.push(AtomEntry {
                    chunk: chunk_idx as u32,
                    offset: at as u32,
                    len: len as u32,
                    hash: xxh32(content, HASH_SEED),
                });
                at += 4 + len;
            }
        }
        entries
    }

    fn install_entries(&mut self, entries: Vec<AtomEntry>) {
        self.by_hash.clear();
        for (i, entry) in entries.iter().enumerate() {
            self.by_hash
                .entry(entry.hash)
                .or_default()
                .push(i as Atom + 1);
        }
        // The write cursor resumes right after the last record; rollover
        // only ever allocates a chunk together with its first record, so
        // the last record always lives in the last chunk.
        self.tail = match entries.last() {
            Some(e) => e.offset as usize + 4 + e.len as usize,
            None => {
                if self.chunks.is_empty() {
                    CHUNK_SIZE
                } else {
                    0
                }
            }
        };
        self.entries = entries;
    }
}

impl Drop for AtomStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_store() -> (AtomStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = AtomStore::open(dir.path().join("test.tdb.atoms")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_default_graph_is_atom_one() {
        let (store, _dir) = test_store();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.lookup(DEFAULT_GRAPH).unwrap(),
            DEFAULT_GRAPH_IRI.as_bytes()
        );
    }

    #[test]
    fn test_intern_roundtrip() {
        let (mut store, _dir) = test_store();
        let atom = store.intern(b"<urn:example:alice>").unwrap();
        assert_eq!(store.lookup(atom).unwrap(), b"<urn:example:alice>");
    }

    #[test]
    fn test_intern_idempotent() {
        let (mut store, _dir) = test_store();
        let a = store.intern(b"\"value\"").unwrap();
        let b = store.intern(b"\"value\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 2); // default graph + one term
    }

    #[test]
    fn test_id_of() {
        let (mut store, _dir) = test_store();
        assert!(store.id_of(b"<urn:x>").is_none());
        let atom = store.intern(b"<urn:x>").unwrap();
        assert_eq!(store.id_of(b"<urn:x>"), Some(atom));
    }

    #[test]
    fn test_lookup_sentinels_fail() {
        let (store, _dir) = test_store();
        assert!(store.lookup(0).is_err());
        assert!(store.lookup(ATOM_MAX).is_err());
        assert!(store.lookup(999).is_err());
    }

    #[test]
    fn test_distinct_content_distinct_atoms() {
        let (mut store, _dir) = test_store();
        let a = store.intern(b"<urn:a>").unwrap();
        let b = store.intern(b"<urn:b>").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_chunk_rollover_mid_intern() {
        let (mut store, _dir) = test_store();

        // Fill past one chunk with ~1 KiB terms.
        let mut atoms = Vec::new();
        for i in 0..100 {
            let content = format!("<urn:bulk:{}:{}>", i, "x".repeat(1000));
            atoms.push((store.intern(content.as_bytes()).unwrap(), content));
        }
        assert!(store.chunks.len() > 1, "expected rollover to a second chunk");

        // Everything still resolves after the rollover.
        for (atom, content) in &atoms {
            assert_eq!(store.lookup(*atom).unwrap(), content.as_bytes());
        }
    }

    #[test]
    fn test_oversized_term_rejected() {
        let (mut store, _dir) = test_store();
        let huge = vec![b'x'; CHUNK_SIZE];
        let err = store.intern(&huge).unwrap_err();
        assert_eq!(err.kind(), aion_common::ErrorKind::StorageFull);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atoms.tdb.atoms");
        let mut atoms = Vec::new();

        {
            let mut store = AtomStore::open(&path).unwrap();
            for i in 0..500 {
                let content = format!("<urn:persist:{}>", i);
                atoms.push((store.intern(content.as_bytes()).unwrap(), content));
            }
            store.flush().unwrap();
        }

        let mut store = AtomStore::open(&path).unwrap();
        for (atom, content) in &atoms {
            assert_eq!(store.lookup(*atom).unwrap(), content.as_bytes());
            assert_eq!(store.id_of(content.as_bytes()), Some(*atom));
        }
        // Ids keep advancing from where they left off.
        let next = store.intern(b"<urn:persist:new>").unwrap();
        assert_eq!(next as usize, store.len());
    }

    #[test]
    fn test_rebuild_after_index_damage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atoms.tdb.atoms");
        let mut atoms = Vec::new();

        {
            let mut store = AtomStore::open(&path).unwrap();
            for i in 0..50 {
                let content = format!("<urn:rebuild:{}>", i);
                atoms.push((store.intern(content.as_bytes()).unwrap(), content));
            }
            store.flush().unwrap();
        }

        // Corrupt the side table checksum.
        let idx_path = {
            let mut p = path.clone().into_os_string();
            p.push(".idx");
            PathBuf::from(p)
        };
        let mut raw = std::fs::read(&idx_path).unwrap();
        let len = raw.len();
        raw[len - 1] ^= 0xFF;
        std::fs::write(&idx_path, raw).unwrap();

        // Open rebuilds from chunks; every atom survives with the same id.
        let store = AtomStore::open(&path).unwrap();
        for (atom, content) in &atoms {
            assert_eq!(store.lookup(*atom).unwrap(), content.as_bytes());
        }
    }

    #[test]
    fn test_bytes_used_grows_by_chunk() {
        let (mut store, _dir) = test_store();
        assert_eq!(store.bytes_used(), CHUNK_SIZE);
        for i in 0..100 {
            let content = format!("<urn:grow:{}:{}>", i, "y".repeat(1000));
            store.intern(content.as_bytes()).unwrap();
        }
        assert!(store.bytes_used() >= 2 * CHUNK_SIZE);
        assert_eq!(store.bytes_used() % CHUNK_SIZE, 0);
    }
}
