//! Pluggable key-value transport.
//!
//! Every record the store manages bottoms out in flat string pairs, so the
//! whole engine is written against the small [`KvBackend`] trait rather than
//! one concrete database. Two backends ship with the crate:
//!
//! - [`MemoryBackend`] keeps pairs in process memory, for tests and
//!   single-process embedding.
//! - [`SledBackend`] persists pairs in a sled tree on disk.

pub mod memory;
pub mod pattern;
pub mod sled_backend;

pub use memory::MemoryBackend;
pub use pattern::matches_pattern;
pub use sled_backend::SledBackend;

/// Errors surfaced by a key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("storage engine error: {0}")]
    Storage(#[from] sled::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("value encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("backend lock poisoned: {0}")]
    Poisoned(String),
}

/// One pair queued for a batched write, with an optional time-to-live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    /// Seconds until the pair expires. `None` stores it without expiry.
    pub ttl: Option<u64>,
}

impl KvEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, ttl: Option<u64>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }
}

/// Flat string key-value service the record store runs on.
///
/// Implementations must be safe to share across threads; the store wraps a
/// single backend instance in an `Arc` and calls it from the caller's thread
/// as well as the deferred worker.
///
/// Writing a pair replaces any previous value *and* any previous expiry:
/// a `set` with `ttl: None` makes the pair permanent again, mirroring how
/// `SET` without `EX` behaves on a Redis-style server.
pub trait KvBackend: Send + Sync {
    /// Reads one value. Expired pairs read as `None`.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Reads many values in one round trip, preserving input order.
    fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError>;

    /// Writes one pair, optionally with a time-to-live in seconds.
    fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), KvError>;

    /// Writes a batch of pairs.
    fn multi_set(&self, entries: &[KvEntry]) -> Result<(), KvError>;

    /// Removes the given keys, returning how many existed.
    fn delete(&self, keys: &[String]) -> Result<u64, KvError>;

    /// Lists live keys matching a glob pattern (see [`matches_pattern`]).
    ///
    /// Order is backend-defined; both shipped backends return keys in
    /// lexicographic order.
    fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, KvError>;
}
