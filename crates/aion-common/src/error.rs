//! Error types for Aion.

use thiserror::Error;

/// Result type alias using AionError.
pub type Result<T> = std::result::Result<T, AionError>;

/// Errors that can occur in Aion operations.
#[derive(Debug, Error)]
pub enum AionError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Lookup failures
    #[error("Atom not found: {atom}")]
    AtomNotFound { atom: u32 },

    #[error("Key not found")]
    KeyNotFound,

    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    // Input validation
    #[error("Invalid term: {0}")]
    InvalidTerm(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid validity interval: [{valid_from}, {valid_to})")]
    InvalidInterval { valid_from: u64, valid_to: u64 },

    #[error("Malformed patch: {0}")]
    MalformedPatch(String),

    // Space exhaustion
    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("Atom store exhausted")]
    AtomStoreExhausted,

    // Structural corruption
    #[error("Corruption in page {page_id}: {reason}")]
    Corruption { page_id: u64, reason: String },

    #[error("Magic mismatch: expected {expected:#018x}, got {actual:#018x}")]
    MagicMismatch { expected: u64, actual: u64 },

    #[error("Checksum mismatch in {context}")]
    ChecksumMismatch { context: String },

    // Mutation outcomes
    #[error("Patch failed and was rolled back: {0}")]
    PatchFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Writer lock busy")]
    Busy,

    // Buffer management
    #[error("Page cache full, unable to allocate frame")]
    CacheFull,

    // Internal B+tree signals (never escape the storage crate)
    #[error("B+tree page full")]
    PageFull,
}

/// Coarse error classification with a stable numeric code.
///
/// Surrounding systems (HTTP, CLI, RPC) key their status mapping off these
/// codes, so the values are part of the on-the-wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorKind {
    /// Atom, key, or page missing on lookup. Recoverable by the caller.
    NotFound = 1,
    /// Malformed triple, bad pattern, or unbound variable in a mutation.
    InvalidInput = 2,
    /// File extension or atom chunk append failed. Fails the operation.
    StorageFull = 3,
    /// Magic mismatch, impossible entry count, or checksum failure. Aborts.
    Corruption = 4,
    /// A patch batch was rolled back.
    PatchFailed = 5,
    /// Cooperative cancellation.
    Cancelled = 6,
    /// Writer contention timeout on the single-writer lock.
    Busy = 7,
    /// Underlying I/O failure.
    Io = 8,
    /// Internal signal or resource limit; not part of the public contract.
    Internal = 9,
}

impl AionError {
    /// Returns the coarse classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AionError::AtomNotFound { .. }
            | AionError::KeyNotFound
            | AionError::PageNotFound { .. } => ErrorKind::NotFound,
            AionError::InvalidTerm(_)
            | AionError::InvalidPattern(_)
            | AionError::InvalidInterval { .. }
            | AionError::MalformedPatch(_) => ErrorKind::InvalidInput,
            AionError::StorageFull(_) | AionError::AtomStoreExhausted => ErrorKind::StorageFull,
            AionError::Corruption { .. }
            | AionError::MagicMismatch { .. }
            | AionError::ChecksumMismatch { .. } => ErrorKind::Corruption,
            AionError::PatchFailed(_) => ErrorKind::PatchFailed,
            AionError::Cancelled => ErrorKind::Cancelled,
            AionError::Busy => ErrorKind::Busy,
            AionError::Io(_) => ErrorKind::Io,
            AionError::CacheFull | AionError::PageFull => ErrorKind::Internal,
        }
    }

    /// Returns the stable numeric code for this error.
    pub fn code(&self) -> u16 {
        self.kind() as u16
    }

    /// Returns true if the caller may retry or otherwise recover.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::InvalidInput
                | ErrorKind::PatchFailed
                | ErrorKind::Cancelled
                | ErrorKind::Busy
        )
    }
}
