//! surfstore-core: Core sync primitives
//!
//! Provides hashing, fixed-size chunking, the block and metadata stores,
//! the local index, directory scanning, sync planning and the wire protocol.

pub mod block;
pub mod block_store;
pub mod cas;
pub mod chunker;
pub mod config;
pub mod hash;
pub mod local_index;
pub mod metadata;
pub mod plan;
pub mod protocol;
pub mod scan;
pub mod snapshot;

pub use block::Block;
pub use block_store::{BlockBackend, MemoryBlockStore, StoreStats};
pub use cas::DiskBlockStore;
pub use chunker::{DEFAULT_BLOCK_SIZE, chunk_file, split_blocks};
pub use config::SyncConfig;
pub use hash::ContentHash;
pub use local_index::LocalIndex;
pub use metadata::{FileMetadata, Index, MetaStore, UpdateOutcome, Version};
pub use plan::{SyncPlan, plan_sync};
pub use protocol::{Message, ProtocolReader, ProtocolWriter};
pub use scan::{FileEntry, Scanner};
pub use snapshot::Snapshot;
