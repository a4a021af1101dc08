//! Snapshot: A point-in-time view of a directory tree

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::scan::FileEntry;

/// A snapshot of a directory tree at a point in time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// All readable files, keyed by `/`-separated relative name
    pub files: HashMap<String, FileEntry>,
    /// Files seen on disk that could not be read this pass
    pub skipped: BTreeSet<String>,
}

impl Snapshot {
    /// Create a snapshot from scanned entries
    #[must_use]
    pub fn new(entries: Vec<FileEntry>, skipped: BTreeSet<String>) -> Self {
        let files = entries.into_iter().map(|e| (e.name.clone(), e)).collect();
        Self { files, skipped }
    }

    /// Create a snapshot with no unreadable files
    #[must_use]
    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        Self::new(entries, BTreeSet::new())
    }

    /// Create an empty snapshot
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Get a file by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FileEntry> {
        self.files.get(name)
    }

    /// Whether `name` exists on disk, or might exist under a path that
    /// could not be read. A skipped directory covers everything below it;
    /// an empty skipped entry covers the whole tree.
    #[must_use]
    pub fn is_present(&self, name: &str) -> bool {
        self.files.contains_key(name)
            || self.skipped.iter().any(|prefix| {
                name.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| prefix.is_empty() || rest.is_empty() || rest.starts_with('/'))
            })
    }

    /// Total bytes across readable files
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|e| e.size).sum()
    }
}
