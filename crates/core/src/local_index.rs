//! Local index: the last state this client confirmed in sync
//!
//! Persisted with rkyv under `<root>/.surfstore/index.rkyv`. An entry is
//! only written after a successful commit or complete download, so the
//! index never reflects speculative state.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use rkyv::rancor::Error as RkyvError;
use rkyv::{Archive, Deserialize, Serialize};

use crate::hash::ContentHash;
use crate::metadata::{FileMetadata, Index, Version};

/// Directory under the sync root holding client state
pub const INDEX_DIR: &str = ".surfstore";

/// Index file name inside [`INDEX_DIR`]
pub const INDEX_FILE: &str = "index.rkyv";

/// State of a file at its last successful sync
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct IndexedFile {
    /// Version confirmed by the metadata service
    pub version: Version,
    /// Ordered chunk hashes at that version
    pub hashes: Vec<[u8; 32]>,
}

impl IndexedFile {
    fn to_metadata(&self, filename: &str) -> FileMetadata {
        FileMetadata::new(
            filename,
            self.version,
            self.hashes.iter().copied().map(ContentHash::from_raw).collect(),
        )
    }
}

impl From<&FileMetadata> for IndexedFile {
    fn from(meta: &FileMetadata) -> Self {
        Self {
            version: meta.version,
            hashes: meta.chunk_hashes.iter().map(|h| *h.as_bytes()).collect(),
        }
    }
}

/// Durable filename -> (version, hash list) record
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct LocalIndex {
    files: HashMap<String, IndexedFile>,
}

impl LocalIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the index file for a sync root
    #[must_use]
    pub fn path(root: &Path) -> PathBuf {
        root.join(INDEX_DIR).join(INDEX_FILE)
    }

    /// Load the index, or return an empty one if none was saved yet
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or decoded.
    /// Callers must not sync against an unknown baseline.
    pub fn load(root: &Path) -> color_eyre::Result<Self> {
        let index_path = Self::path(root);

        let bytes = match std::fs::read(&index_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        // rkyv validates alignment, so copy out of the plain Vec first
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);

        rkyv::from_bytes::<Self, RkyvError>(&aligned).map_err(|e| {
            color_eyre::eyre::eyre!("corrupt local index {}: {e}", index_path.display())
        })
    }

    /// Save atomically: write a sibling temp file, fsync, rename over.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, root: &Path) -> color_eyre::Result<()> {
        let dir = root.join(INDEX_DIR);
        std::fs::create_dir_all(&dir)?;

        let bytes = rkyv::to_bytes::<RkyvError>(self)
            .map_err(|e| color_eyre::eyre::eyre!("failed to serialize local index: {e}"))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(INDEX_FILE))?;
        Ok(())
    }

    /// Synced metadata for one file
    #[must_use]
    pub fn get(&self, filename: &str) -> Option<FileMetadata> {
        self.files.get(filename).map(|f| f.to_metadata(filename))
    }

    /// Synced version for one file
    #[must_use]
    pub fn version(&self, filename: &str) -> Option<Version> {
        self.files.get(filename).map(|f| f.version)
    }

    /// Record a confirmed state
    pub fn insert(&mut self, meta: &FileMetadata) {
        self.files
            .insert(meta.filename.clone(), IndexedFile::from(meta));
    }

    /// Whether the file has ever been synced
    #[must_use]
    pub fn contains(&self, filename: &str) -> bool {
        self.files.contains_key(filename)
    }

    /// Number of tracked files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Materialize as a metadata index
    #[must_use]
    pub fn to_index(&self) -> Index {
        self.files
            .iter()
            .map(|(name, f)| (name.clone(), f.to_metadata(name)))
            .collect()
    }
}
