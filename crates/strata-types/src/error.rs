//! Error taxonomy.
//!
//! Every user-observable failure maps to exactly one variant. Read-path
//! errors never invalidate a previously loaded generation; write-path errors
//! are terminal for the builder.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, CacheError>;

/// The single public error type.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The reader has no generation loaded: before the first successful
    /// open, after `delete`, or after a failed update with no prior good
    /// generation.
    #[error("no cache generation is loaded")]
    Uninitialized,

    /// Key absent, or present with a non-matching type tag.
    #[error("key not found")]
    NotFound,

    /// `insert` was called with an empty key.
    #[error("empty key")]
    EmptyKey,

    /// The next arena write would not fit in an `offset_bits`-wide field.
    /// Carries the configured width so callers can retry with a larger one.
    #[error("offset bits {offset_bits} too short")]
    OffsetBitsExhausted { offset_bits: u16 },

    /// The slot array cannot accept another key.
    #[error("keyspace is full: {entries} entries in {slots} slots")]
    KeyspaceFull { entries: u64, slots: u64 },

    /// A configuration parameter is out of range.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The decompressed artifact hashed differently than the published
    /// checksum.
    #[error("checksum mismatch: computed {computed} != published {published}")]
    ChecksumMismatch { computed: String, published: String },

    /// A network or filesystem fetch failed.
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// Malformed artifact header or truncated arena.
    #[error("malformed cache: {0}")]
    Decode(String),

    /// Local filesystem failure outside the fetch path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Transport error constructor keeping the failing URL.
    pub fn transport(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CacheError::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Decode error constructor.
    pub fn decode(message: impl Into<String>) -> Self {
        CacheError::Decode(message.into())
    }

    /// True for errors the update loop treats as recoverable (logged,
    /// retried at the next tick).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::Transport { .. }
                | CacheError::ChecksumMismatch { .. }
                | CacheError::Decode(_)
                | CacheError::Io(_)
        )
    }
}
