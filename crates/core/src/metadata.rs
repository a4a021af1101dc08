//! File metadata records and the authoritative metadata store
//!
//! The store is the single sequencer for per-file versions. An update is
//! accepted only when it proposes exactly `stored.version + 1` (or version 1
//! for a filename it has never seen), and the whole check-then-write runs
//! under one write lock so concurrent proposals for the same version can
//! never both win.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Per-file version counter
pub type Version = u64;

/// Version value that signals a rejected update on the wire
pub const STALE_VERSION: i64 = -1;

/// Mapping of filename to its latest known metadata
pub type Index = HashMap<String, FileMetadata>;

/// Versioned description of one file: its ordered chunk hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Path relative to the sync root, `/`-separated
    pub filename: String,
    /// Starts at 1 for a file's first creation
    pub version: Version,
    /// Ordered chunk hashes, or `[TOMBSTONE]` for a deleted file
    pub chunk_hashes: Vec<ContentHash>,
}

impl FileMetadata {
    #[must_use]
    pub fn new(filename: impl Into<String>, version: Version, chunk_hashes: Vec<ContentHash>) -> Self {
        Self {
            filename: filename.into(),
            version,
            chunk_hashes,
        }
    }

    /// Deletion record at the given version
    #[must_use]
    pub fn tombstone(filename: impl Into<String>, version: Version) -> Self {
        Self::new(filename, version, vec![ContentHash::TOMBSTONE])
    }

    /// Whether this record marks the file as deleted
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self.chunk_hashes.as_slice(), [only] if only.is_tombstone())
    }
}

/// Result of a compare-and-set update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Stored; carries the new current version
    Accepted(Version),
    /// Proposed version was not `current + 1`; nothing changed
    Stale,
}

impl UpdateOutcome {
    /// Encode as the wire version value (`-1` for stale)
    #[must_use]
    pub fn to_wire(self) -> i64 {
        match self {
            Self::Accepted(v) => v as i64,
            Self::Stale => STALE_VERSION,
        }
    }

    /// Decode a wire version value; any negative value is stale
    #[must_use]
    pub fn from_wire(version: i64) -> Self {
        if version < 0 {
            Self::Stale
        } else {
            Self::Accepted(version as Version)
        }
    }
}

/// Authoritative filename -> metadata map plus the block store address.
#[derive(Debug)]
pub struct MetaStore {
    files: RwLock<Index>,
    block_store_addr: String,
}

impl MetaStore {
    /// Create an empty store advertising `block_store_addr`
    #[must_use]
    pub fn new(block_store_addr: impl Into<String>) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            block_store_addr: block_store_addr.into(),
        }
    }

    /// Full snapshot of every tracked file
    #[must_use]
    pub fn file_info_map(&self) -> Index {
        self.files.read().clone()
    }

    /// Where chunk payloads live
    #[must_use]
    pub fn block_store_addr(&self) -> &str {
        &self.block_store_addr
    }

    /// Current record for one file
    #[must_use]
    pub fn get(&self, filename: &str) -> Option<FileMetadata> {
        self.files.read().get(filename).cloned()
    }

    /// Number of tracked files, tombstones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether no file has ever been committed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Compare-and-set the record for `meta.filename`.
    pub fn update_file(&self, meta: FileMetadata) -> UpdateOutcome {
        let mut files = self.files.write();

        let expected = files.get(&meta.filename).map_or(1, |current| current.version + 1);
        if meta.version != expected {
            tracing::debug!(
                file = %meta.filename,
                proposed = meta.version,
                expected,
                "rejecting stale update"
            );
            return UpdateOutcome::Stale;
        }

        let version = meta.version;
        files.insert(meta.filename.clone(), meta);
        UpdateOutcome::Accepted(version)
    }
}
