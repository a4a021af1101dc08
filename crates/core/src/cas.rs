//! Persistent content-addressable block storage
//!
//! Stores blocks by their BLAKE3 hash in LMDB. Never stores the same
//! content twice and survives server restarts.

use std::path::Path;

use bytes::Bytes;
use heed::types::Bytes as HeedBytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::block_store::{BlockBackend, StoreStats};
use crate::hash::ContentHash;

/// Content-addressable block store using LMDB.
///
/// Key: ContentHash (32 bytes)
/// Value: raw block bytes
pub struct DiskBlockStore {
    env: Env,
    /// blocks database: hash -> data
    blocks: Database<HeedBytes, HeedBytes>,
}

impl DiskBlockStore {
    /// Open or create a block store at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or created.
    pub fn open(path: &Path) -> color_eyre::Result<Self> {
        std::fs::create_dir_all(path)?;

        // SAFETY: Standard LMDB memory-mapped I/O; the directory is owned
        // by this process for as long as the Env is open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(16 * 1024 * 1024 * 1024) // 16GB address space
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let blocks: Database<HeedBytes, HeedBytes> = env
            .database_options()
            .types::<HeedBytes, HeedBytes>()
            .name("blocks")
            .create(&mut wtxn)?;
        wtxn.commit()?;

        Ok(Self { env, blocks })
    }
}

impl BlockBackend for DiskBlockStore {
    fn get(&self, hash: &ContentHash) -> color_eyre::Result<Option<Bytes>> {
        let rtxn = self.env.read_txn()?;
        let data = self.blocks.get(&rtxn, hash.as_bytes())?;
        Ok(data.map(Bytes::copy_from_slice))
    }

    fn put(&self, data: Bytes) -> color_eyre::Result<ContentHash> {
        let hash = ContentHash::from_bytes(&data);
        let mut wtxn = self.env.write_txn()?;

        if self.blocks.get(&wtxn, hash.as_bytes())?.is_none() {
            self.blocks.put(&mut wtxn, hash.as_bytes(), &data)?;
            wtxn.commit()?;
        }

        Ok(hash)
    }

    fn has_blocks(&self, hashes: &[ContentHash]) -> color_eyre::Result<Vec<ContentHash>> {
        let rtxn = self.env.read_txn()?;
        let mut present = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if self.blocks.get(&rtxn, hash.as_bytes())?.is_some() {
                present.push(*hash);
            }
        }
        Ok(present)
    }

    fn stats(&self) -> color_eyre::Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        let mut stats = StoreStats::default();

        for entry in self.blocks.iter(&rtxn)? {
            let (_, data) = entry?;
            stats.count += 1;
            stats.total_bytes += data.len() as u64;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlockStore::open(dir.path()).unwrap();

        let data = Bytes::from_static(b"hello world chunk data");
        let hash = ContentHash::from_bytes(&data);

        assert!(store.get(&hash).unwrap().is_none());

        assert_eq!(store.put(data.clone()).unwrap(), hash);
        assert_eq!(store.get(&hash).unwrap(), Some(data.clone()));

        // Store again - nothing new is written
        store.put(data).unwrap();
        assert_eq!(store.stats().unwrap().count, 1);
    }

    #[test]
    fn test_has_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlockStore::open(dir.path()).unwrap();

        let h1 = store.put(Bytes::from_static(b"chunk one")).unwrap();
        let h2 = ContentHash::from_bytes(b"chunk two");
        let h3 = ContentHash::from_bytes(b"chunk three");

        assert_eq!(store.has_blocks(&[h1, h2, h3]).unwrap(), vec![h1]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let hash = {
            let store = DiskBlockStore::open(dir.path()).unwrap();
            store.put(Bytes::from_static(b"durable")).unwrap()
        };

        let store = DiskBlockStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get(&hash).unwrap().as_deref(),
            Some(b"durable".as_slice())
        );
        assert_eq!(
            store.stats().unwrap(),
            StoreStats {
                count: 1,
                total_bytes: 7
            }
        );
    }
}
