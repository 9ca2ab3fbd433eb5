//! Composite key model shared by every index order.
//!
//! Keys are fixed-width concatenations of big-endian fields so that memcmp
//! equals semantic compare. Two flavors exist:
//!
//! - Triple keys: three 32-bit atoms in one of three rotations
//!   (SPO, POS, OSP), 12 bytes.
//! - Bitemporal keys: three atoms plus `valid_from`, `valid_to`, and
//!   `transaction_time` as 64-bit millisecond epochs, 36 bytes. Rotations
//!   SPOT, POST, OSPT keep the times trailing; TSPO leads with
//!   `valid_from` for time-range scans.
//!
//! When the store is configured with named graphs, a 4-byte graph atom is
//! prefixed to every key, making per-graph scans a contiguous range.

use crate::term::Atom;

/// Width of a triple key without graph prefix.
pub const TRIPLE_KEY_LEN: usize = 12;

/// Width of a bitemporal key without graph prefix.
pub const TEMPORAL_KEY_LEN: usize = 36;

/// Width of the optional leading graph atom.
pub const GRAPH_PREFIX_LEN: usize = 4;

/// Largest possible key width (temporal + graph prefix).
pub const MAX_KEY_LEN: usize = TEMPORAL_KEY_LEN + GRAPH_PREFIX_LEN;

/// Width of the per-entry value payload.
pub const VALUE_LEN: usize = 8;

/// `valid_to` encoding for an open-ended interval.
pub const TIME_OPEN_END: u64 = u64::MAX;

/// Field-rotation orderings of the composite key. Each order is a separate
/// B+tree over the same logical data, optimized for a different set of
/// bound pattern positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexOrder {
    /// Subject, predicate, object.
    Spo,
    /// Predicate, object, subject.
    Pos,
    /// Object, subject, predicate.
    Osp,
    /// Subject, predicate, object, then times.
    Spot,
    /// Predicate, object, subject, then times.
    Post,
    /// Object, subject, predicate, then times.
    Ospt,
    /// Valid-from leading, then subject, predicate, object, remaining times.
    Tspo,
}

impl IndexOrder {
    /// The three orders maintained by a non-temporal store.
    pub const TRIPLE: [IndexOrder; 3] = [IndexOrder::Spo, IndexOrder::Pos, IndexOrder::Osp];

    /// The four orders maintained by a temporal store.
    pub const TEMPORAL: [IndexOrder; 4] = [
        IndexOrder::Spot,
        IndexOrder::Post,
        IndexOrder::Ospt,
        IndexOrder::Tspo,
    ];

    /// Returns true if this order carries time fields.
    #[inline]
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            IndexOrder::Spot | IndexOrder::Post | IndexOrder::Ospt | IndexOrder::Tspo
        )
    }

    /// Key width for this order, with or without a graph prefix.
    #[inline]
    pub fn key_len(&self, with_graph: bool) -> usize {
        let base = if self.is_temporal() {
            TEMPORAL_KEY_LEN
        } else {
            TRIPLE_KEY_LEN
        };
        if with_graph {
            base + GRAPH_PREFIX_LEN
        } else {
            base
        }
    }

    /// File-name stem for this order's index file.
    pub fn file_stem(&self) -> &'static str {
        match self {
            IndexOrder::Spo => "spo",
            IndexOrder::Pos => "pos",
            IndexOrder::Osp => "osp",
            IndexOrder::Spot => "spot",
            IndexOrder::Post => "post",
            IndexOrder::Ospt => "ospt",
            IndexOrder::Tspo => "tspo",
        }
    }

    /// Stable file id for this order within a store.
    pub fn file_id(&self) -> u32 {
        match self {
            IndexOrder::Spo => 0,
            IndexOrder::Pos => 1,
            IndexOrder::Osp => 2,
            IndexOrder::Spot => 0,
            IndexOrder::Post => 1,
            IndexOrder::Ospt => 2,
            IndexOrder::Tspo => 3,
        }
    }
}

impl std::fmt::Display for IndexOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// Canonical field set of a composite key, independent of rotation.
///
/// Time fields are ignored for non-temporal orders; the graph is ignored
/// when the store runs without named graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyComponents {
    /// Graph atom (only encoded when the store has named graphs).
    pub graph: Atom,
    /// Subject atom.
    pub subject: Atom,
    /// Predicate atom.
    pub predicate: Atom,
    /// Object atom.
    pub object: Atom,
    /// Start of the valid-time interval, ms since epoch.
    pub valid_from: u64,
    /// Exclusive end of the valid-time interval; `TIME_OPEN_END` = open.
    pub valid_to: u64,
    /// Instant the fact was recorded; never mutated.
    pub tx_time: u64,
}

/// A fixed-capacity encoded key.
///
/// Keys are at most `MAX_KEY_LEN` bytes, so the buffer lives inline with
/// no heap allocation on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBuf {
    buf: [u8; MAX_KEY_LEN],
    len: u8,
}

impl KeyBuf {
    /// Creates an empty key buffer.
    pub fn new() -> Self {
        Self {
            buf: [0u8; MAX_KEY_LEN],
            len: 0,
        }
    }

    /// Copies an already-encoded key. Panics if it exceeds `MAX_KEY_LEN`.
    pub fn from_slice(key: &[u8]) -> Self {
        assert!(key.len() <= MAX_KEY_LEN);
        let mut buf = [0u8; MAX_KEY_LEN];
        buf[..key.len()].copy_from_slice(key);
        Self {
            buf,
            len: key.len() as u8,
        }
    }

    /// Returns the encoded key bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    /// Returns the key length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true if nothing has been encoded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn push_u32(&mut self, value: u32) {
        let at = self.len as usize;
        self.buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
        self.len += 4;
    }

    #[inline]
    fn push_u64(&mut self, value: u64) {
        let at = self.len as usize;
        self.buf[at..at + 8].copy_from_slice(&value.to_be_bytes());
        self.len += 8;
    }
}

impl Default for KeyBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for KeyBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Encodes a composite key for the given order.
pub fn encode_key(order: IndexOrder, with_graph: bool, c: &KeyComponents) -> KeyBuf {
    let mut key = KeyBuf::new();
    if with_graph {
        key.push_u32(c.graph);
    }
    match order {
        IndexOrder::Spo => {
            key.push_u32(c.subject);
            key.push_u32(c.predicate);
            key.push_u32(c.object);
        }
        IndexOrder::Pos => {
            key.push_u32(c.predicate);
            key.push_u32(c.object);
            key.push_u32(c.subject);
        }
        IndexOrder::Osp => {
            key.push_u32(c.object);
            key.push_u32(c.subject);
            key.push_u32(c.predicate);
        }
        IndexOrder::Spot => {
            key.push_u32(c.subject);
            key.push_u32(c.predicate);
            key.push_u32(c.object);
            key.push_u64(c.valid_from);
            key.push_u64(c.valid_to);
            key.push_u64(c.tx_time);
        }
        IndexOrder::Post => {
            key.push_u32(c.predicate);
            key.push_u32(c.object);
            key.push_u32(c.subject);
            key.push_u64(c.valid_from);
            key.push_u64(c.valid_to);
            key.push_u64(c.tx_time);
        }
        IndexOrder::Ospt => {
            key.push_u32(c.object);
            key.push_u32(c.subject);
            key.push_u32(c.predicate);
            key.push_u64(c.valid_from);
            key.push_u64(c.valid_to);
            key.push_u64(c.tx_time);
        }
        IndexOrder::Tspo => {
            key.push_u64(c.valid_from);
            key.push_u32(c.subject);
            key.push_u32(c.predicate);
            key.push_u32(c.object);
            key.push_u64(c.valid_to);
            key.push_u64(c.tx_time);
        }
    }
    key
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_be_bytes([
        buf[at],
        buf[at + 1],
        buf[at + 2],
        buf[at + 3],
        buf[at + 4],
        buf[at + 5],
        buf[at + 6],
        buf[at + 7],
    ])
}

/// Decodes a composite key back to canonical components.
///
/// The key must have exactly `order.key_len(with_graph)` bytes.
pub fn decode_key(order: IndexOrder, with_graph: bool, key: &[u8]) -> KeyComponents {
    debug_assert_eq!(key.len(), order.key_len(with_graph));
    let mut c = KeyComponents::default();
    let mut at = 0;
    if with_graph {
        c.graph = read_u32(key, at);
        at += 4;
    }
    match order {
        IndexOrder::Spo | IndexOrder::Spot => {
            c.subject = read_u32(key, at);
            c.predicate = read_u32(key, at + 4);
            c.object = read_u32(key, at + 8);
            at += 12;
        }
        IndexOrder::Pos | IndexOrder::Post => {
            c.predicate = read_u32(key, at);
            c.object = read_u32(key, at + 4);
            c.subject = read_u32(key, at + 8);
            at += 12;
        }
        IndexOrder::Osp | IndexOrder::Ospt => {
            c.object = read_u32(key, at);
            c.subject = read_u32(key, at + 4);
            c.predicate = read_u32(key, at + 8);
            at += 12;
        }
        IndexOrder::Tspo => {
            c.valid_from = read_u64(key, at);
            c.subject = read_u32(key, at + 8);
            c.predicate = read_u32(key, at + 12);
            c.object = read_u32(key, at + 16);
            at += 20;
        }
    }
    if order.is_temporal() {
        if order != IndexOrder::Tspo {
            c.valid_from = read_u64(key, at);
            at += 8;
        }
        c.valid_to = read_u64(key, at);
        c.tx_time = read_u64(key, at + 8);
    }
    c
}

/// Temporal query predicate, applied to each candidate entry's valid-time
/// interval at enumeration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalFilter {
    /// The fact was valid at instant `t`: `valid_from <= t < valid_to`.
    AsOf(u64),
    /// The interval overlaps `[lo, hi)`: `valid_from < hi && valid_to > lo`.
    Range {
        /// Window start (inclusive).
        lo: u64,
        /// Window end (exclusive).
        hi: u64,
    },
    /// Every non-tombstoned version.
    AllTime,
    /// The fact is valid now; resolved to `AsOf(now)` at query start.
    Current,
}

impl TemporalFilter {
    /// Resolves `Current` against a concrete clock reading. Other variants
    /// are returned unchanged.
    pub fn resolve(self, now_ms: u64) -> TemporalFilter {
        match self {
            TemporalFilter::Current => TemporalFilter::AsOf(now_ms),
            other => other,
        }
    }

    /// Returns true if an interval `[valid_from, valid_to)` satisfies this
    /// predicate. `Current` must be resolved first.
    #[inline]
    pub fn matches(&self, valid_from: u64, valid_to: u64) -> bool {
        match *self {
            TemporalFilter::AsOf(t) => valid_from <= t && t < valid_to,
            TemporalFilter::Range { lo, hi } => valid_from < hi && valid_to > lo,
            TemporalFilter::AllTime => true,
            TemporalFilter::Current => {
                debug_assert!(false, "Current must be resolved before matching");
                false
            }
        }
    }

    /// Upper bound on `valid_from` for a leading-time (TSPO) scan, or
    /// `TIME_OPEN_END` when the predicate does not cap it.
    pub fn valid_from_upper_bound(&self) -> u64 {
        match *self {
            TemporalFilter::AsOf(t) => t,
            // valid_from < hi, so the largest admissible value is hi - 1.
            TemporalFilter::Range { hi, .. } => hi.saturating_sub(1),
            TemporalFilter::AllTime | TemporalFilter::Current => TIME_OPEN_END,
        }
    }
}

/// Per-entry metadata stored alongside temporal keys.
///
/// Layout (16 bytes, little-endian):
/// - created_at: 4 bytes (seconds since epoch)
/// - modified_at: 4 bytes (seconds since epoch; 0 = never modified)
/// - version: 4 bytes
/// - flags: 1 byte (bit 0 = tombstone)
/// - reserved: 3 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryMeta {
    /// Creation time, seconds since epoch.
    pub created_at: u32,
    /// Last modification time, seconds since epoch (0 = never).
    pub modified_at: u32,
    /// Version counter, bumped on every rewrite of the entry.
    pub version: u32,
    /// Flag bits.
    pub flags: u8,
}

impl EntryMeta {
    /// Size of the metadata block in bytes.
    pub const SIZE: usize = 16;

    /// Tombstone flag bit.
    pub const TOMBSTONE: u8 = 0b0000_0001;

    /// Creates metadata for a freshly inserted entry.
    pub fn new(created_at: u32) -> Self {
        Self {
            created_at,
            modified_at: 0,
            version: 1,
            flags: 0,
        }
    }

    /// Returns true if the tombstone flag is set.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.flags & Self::TOMBSTONE != 0
    }

    /// Sets or clears the tombstone flag.
    pub fn set_tombstone(&mut self, tombstone: bool) {
        if tombstone {
            self.flags |= Self::TOMBSTONE;
        } else {
            self.flags &= !Self::TOMBSTONE;
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.created_at.to_le_bytes());
        buf[4..8].copy_from_slice(&self.modified_at.to_le_bytes());
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12] = self.flags;
        // bytes 13-15 reserved
        buf
    }

    /// Deserializes from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            created_at: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            modified_at: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            version: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            flags: buf[12],
        }
    }
}

/// Fixed entry layout of one B+tree: key, value, and metadata widths.
///
/// The layout is recorded in the tree's metadata block and validated on
/// open; node degree derives from it as
/// `(PAGE_SIZE - headers) / entry_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLayout {
    /// Key width in bytes.
    pub key_len: u16,
    /// Value width in bytes.
    pub value_len: u16,
    /// Metadata width in bytes (0 for non-temporal trees).
    pub meta_len: u16,
}

impl EntryLayout {
    /// Layout for an index order under the given graph configuration.
    pub fn for_order(order: IndexOrder, with_graph: bool) -> Self {
        Self {
            key_len: order.key_len(with_graph) as u16,
            value_len: VALUE_LEN as u16,
            meta_len: if order.is_temporal() {
                EntryMeta::SIZE as u16
            } else {
                0
            },
        }
    }

    /// Total width of one leaf entry.
    #[inline]
    pub fn entry_size(&self) -> usize {
        self.key_len as usize + self.value_len as usize + self.meta_len as usize
    }
}
