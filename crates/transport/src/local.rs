//! Local in-process transport
//!
//! Calls go straight to the stores, with no serialization. Used by tests
//! and by anything embedding the services in the same process.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use surfstore_core::{
    Block, BlockBackend, ContentHash, FileMetadata, Index, MemoryBlockStore, MetaStore,
    UpdateOutcome,
};

use crate::{BlockService, MetadataService, ServiceError, ServiceResult, Transport};

/// Block service backed by a store in this process
#[derive(Clone)]
pub struct LocalBlockService {
    store: Arc<dyn BlockBackend>,
}

impl LocalBlockService {
    pub fn new(store: Arc<dyn BlockBackend>) -> Self {
        Self { store }
    }
}

fn backend_error(e: &color_eyre::Report) -> ServiceError {
    ServiceError::Remote(e.to_string())
}

#[async_trait]
impl BlockService for LocalBlockService {
    async fn get_block(&self, hash: ContentHash) -> ServiceResult<Block> {
        match self.store.get(&hash).map_err(|e| backend_error(&e))? {
            Some(data) => Ok(Block { hash, data }),
            None => Err(ServiceError::BlockNotFound(hash)),
        }
    }

    async fn put_block(&self, data: Bytes) -> ServiceResult<bool> {
        self.store.put(data).map_err(|e| backend_error(&e))?;
        Ok(true)
    }

    async fn has_blocks(&self, hashes: Vec<ContentHash>) -> ServiceResult<Vec<ContentHash>> {
        self.store.has_blocks(&hashes).map_err(|e| backend_error(&e))
    }
}

/// Metadata service backed by a store in this process
#[derive(Clone)]
pub struct LocalMetadataService {
    store: Arc<MetaStore>,
}

impl LocalMetadataService {
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MetadataService for LocalMetadataService {
    async fn get_file_info_map(&self) -> ServiceResult<Index> {
        Ok(self.store.file_info_map())
    }

    async fn update_file(&self, meta: FileMetadata) -> ServiceResult<UpdateOutcome> {
        Ok(self.store.update_file(meta))
    }

    async fn get_block_store_addr(&self) -> ServiceResult<String> {
        Ok(self.store.block_store_addr().to_string())
    }
}

/// Local transport: one metadata store and one block store, shared
#[derive(Clone)]
pub struct LocalTransport {
    meta: Arc<MetaStore>,
    blocks: Arc<dyn BlockBackend>,
}

impl LocalTransport {
    /// Address advertised by an in-process metadata store
    pub const BLOCK_STORE_ADDR: &'static str = "local";

    /// Fresh in-memory services
    #[must_use]
    pub fn new() -> Self {
        Self::with_stores(
            Arc::new(MetaStore::new(Self::BLOCK_STORE_ADDR)),
            Arc::new(MemoryBlockStore::new()),
        )
    }

    /// Wrap existing stores, e.g. to share them between several clients
    pub fn with_stores(meta: Arc<MetaStore>, blocks: Arc<dyn BlockBackend>) -> Self {
        Self { meta, blocks }
    }

    #[must_use]
    pub fn meta_store(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    #[must_use]
    pub fn block_store(&self) -> &Arc<dyn BlockBackend> {
        &self.blocks
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalTransport {
    fn metadata(&self) -> Arc<dyn MetadataService> {
        Arc::new(LocalMetadataService::new(Arc::clone(&self.meta)))
    }

    fn block_service(&self, _addr: &str) -> Arc<dyn BlockService> {
        Arc::new(LocalBlockService::new(Arc::clone(&self.blocks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_block_roundtrip() {
        let transport = LocalTransport::new();
        let blocks = transport.block_service(LocalTransport::BLOCK_STORE_ADDR);

        let data = Bytes::from_static(b"ABCD");
        let hash = ContentHash::from_bytes(&data);
        assert!(blocks.put_block(data.clone()).await.unwrap());

        let block = blocks.get_block(hash).await.unwrap();
        assert_eq!(block.data, data);
        assert!(block.verify());

        let missing = ContentHash::from_bytes(b"EFG");
        assert!(matches!(
            blocks.get_block(missing).await,
            Err(ServiceError::BlockNotFound(h)) if h == missing
        ));
        assert_eq!(blocks.has_blocks(vec![missing, hash]).await.unwrap(), vec![hash]);
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let transport = LocalTransport::new();
        let meta = transport.metadata();

        assert_eq!(meta.get_block_store_addr().await.unwrap(), "local");

        let record = FileMetadata::new("a.txt", 1, vec![ContentHash::from_bytes(b"a")]);
        assert_eq!(
            meta.update_file(record.clone()).await.unwrap(),
            UpdateOutcome::Accepted(1)
        );
        assert_eq!(meta.update_file(record.clone()).await.unwrap(), UpdateOutcome::Stale);

        let index = meta.get_file_info_map().await.unwrap();
        assert_eq!(index.get("a.txt"), Some(&record));
    }

    #[tokio::test]
    async fn test_clients_share_stores() {
        let transport = LocalTransport::new();
        let other = transport.clone();

        transport
            .metadata()
            .update_file(FileMetadata::new("shared.txt", 1, vec![]))
            .await
            .unwrap();

        assert_eq!(other.meta_store().len(), 1);
    }
}
