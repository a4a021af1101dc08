//! surfstore-transport: service interfaces and their transports
//!
//! The sync engine talks to the block and metadata services through the
//! [`BlockService`] and [`MetadataService`] traits. [`LocalTransport`] wires
//! them straight to in-process stores; [`TcpTransport`] speaks the framed
//! protocol to a `surfstore-server`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use surfstore_core::{Block, ContentHash, FileMetadata, Index, UpdateOutcome};

pub mod local;
pub mod server;
pub mod tcp;

pub use local::{LocalBlockService, LocalMetadataService, LocalTransport};
pub use server::{Services, serve};
pub use tcp::{TcpBlockClient, TcpMetadataClient, TcpTransport};

/// Failure of a single remote call
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("block {0} not found")]
    BlockNotFound(ContentHash),

    #[error("call timed out after {0} ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ServiceError {
    /// Timeouts and connection failures; worth retrying on the next run
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Content-addressed chunk storage
#[async_trait]
pub trait BlockService: Send + Sync {
    /// Fetch a block; [`ServiceError::BlockNotFound`] if absent
    async fn get_block(&self, hash: ContentHash) -> ServiceResult<Block>;

    /// Store a block under `H(data)`; idempotent
    async fn put_block(&self, data: Bytes) -> ServiceResult<bool>;

    /// Subset of `hashes` already stored
    async fn has_blocks(&self, hashes: Vec<ContentHash>) -> ServiceResult<Vec<ContentHash>>;
}

/// Authoritative filename -> metadata mapping
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn get_file_info_map(&self) -> ServiceResult<Index>;

    /// Compare-and-set; stale proposals return [`UpdateOutcome::Stale`]
    async fn update_file(&self, meta: FileMetadata) -> ServiceResult<UpdateOutcome>;

    async fn get_block_store_addr(&self) -> ServiceResult<String>;
}

/// Resolves service handles for one sync root
pub trait Transport: Send + Sync {
    fn metadata(&self) -> Arc<dyn MetadataService>;

    /// Block service at an address advertised by the metadata service
    fn block_service(&self, addr: &str) -> Arc<dyn BlockService>;
}
