//! TCP transport
//!
//! Each call opens a connection, sends one request frame and reads one
//! response frame. The whole exchange, connect included, is bounded by the
//! configured timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use surfstore_core::protocol::{HEADER_LEN, parse_header};
use surfstore_core::{Block, ContentHash, FileMetadata, Index, Message, UpdateOutcome};

use crate::{BlockService, MetadataService, ServiceError, ServiceResult, Transport};

/// Read one frame; `None` if the peer closed the connection between frames
///
/// # Errors
/// Returns an error on I/O failure or a malformed frame
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> ServiceResult<Option<Message>> {
    let mut header = [0u8; HEADER_LEN];
    match r.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let (msg_type, len) = parse_header(header).map_err(|e| ServiceError::Protocol(e.to_string()))?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;

    Message::decode(msg_type, &payload)
        .map(Some)
        .map_err(|e| ServiceError::Protocol(e.to_string()))
}

/// Write one frame and flush
///
/// # Errors
/// Returns an error if the message cannot be encoded or written
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, message: &Message) -> ServiceResult<()> {
    let frame = message
        .encode()
        .map_err(|e| ServiceError::Protocol(e.to_string()))?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Connection settings shared by both clients
#[derive(Debug, Clone)]
struct Endpoint {
    addr: String,
    timeout: Duration,
}

impl Endpoint {
    async fn call(&self, request: Message) -> ServiceResult<Message> {
        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            write_frame(&mut stream, &request).await?;
            let response = read_frame(&mut stream).await?.ok_or_else(|| {
                ServiceError::Protocol("connection closed before response".into())
            })?;
            Ok::<_, ServiceError>(response)
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ServiceError::Timeout(self.timeout.as_millis() as u64))??;

        match response {
            Message::Error(message) => Err(ServiceError::Remote(message)),
            other => Ok(other),
        }
    }
}

fn unexpected(expected: &str, got: &Message) -> ServiceError {
    ServiceError::Protocol(format!(
        "expected {expected}, got message type {:#04x}",
        got.msg_type()
    ))
}

/// Block service client
#[derive(Debug, Clone)]
pub struct TcpBlockClient {
    endpoint: Endpoint,
}

impl TcpBlockClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: Endpoint {
                addr: addr.into(),
                timeout,
            },
        }
    }
}

#[async_trait]
impl BlockService for TcpBlockClient {
    async fn get_block(&self, hash: ContentHash) -> ServiceResult<Block> {
        match self.endpoint.call(Message::GetBlock(hash)).await? {
            Message::Block(data) => {
                let block = Block::new(data);
                if block.hash != hash {
                    return Err(ServiceError::Protocol(format!(
                        "asked for block {hash}, received {}",
                        block.hash
                    )));
                }
                debug!(%hash, size = block.size(), "fetched block");
                Ok(block)
            }
            Message::BlockNotFound(missing) => Err(ServiceError::BlockNotFound(missing)),
            other => Err(unexpected("Block", &other)),
        }
    }

    async fn put_block(&self, data: Bytes) -> ServiceResult<bool> {
        match self.endpoint.call(Message::PutBlock(data)).await? {
            Message::PutResult(ok) => Ok(ok),
            other => Err(unexpected("PutResult", &other)),
        }
    }

    async fn has_blocks(&self, hashes: Vec<ContentHash>) -> ServiceResult<Vec<ContentHash>> {
        match self.endpoint.call(Message::HasBlocks(hashes)).await? {
            Message::BlockHashes(present) => Ok(present),
            other => Err(unexpected("BlockHashes", &other)),
        }
    }
}

/// Metadata service client
#[derive(Debug, Clone)]
pub struct TcpMetadataClient {
    endpoint: Endpoint,
}

impl TcpMetadataClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: Endpoint {
                addr: addr.into(),
                timeout,
            },
        }
    }
}

#[async_trait]
impl MetadataService for TcpMetadataClient {
    async fn get_file_info_map(&self) -> ServiceResult<Index> {
        match self.endpoint.call(Message::GetFileInfoMap).await? {
            Message::FileInfoMap(records) => Ok(records
                .into_iter()
                .map(|meta| (meta.filename.clone(), meta))
                .collect()),
            other => Err(unexpected("FileInfoMap", &other)),
        }
    }

    async fn update_file(&self, meta: FileMetadata) -> ServiceResult<UpdateOutcome> {
        match self.endpoint.call(Message::UpdateFile(meta)).await? {
            Message::Version(version) => Ok(UpdateOutcome::from_wire(version)),
            other => Err(unexpected("Version", &other)),
        }
    }

    async fn get_block_store_addr(&self) -> ServiceResult<String> {
        match self.endpoint.call(Message::GetBlockStoreAddr).await? {
            Message::BlockStoreAddr(addr) => Ok(addr),
            other => Err(unexpected("BlockStoreAddr", &other)),
        }
    }
}

/// Transport to a metadata service over TCP; block services are dialed
/// at whatever address the metadata service advertises
#[derive(Debug, Clone)]
pub struct TcpTransport {
    meta_addr: String,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(meta_addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            meta_addr: meta_addr.into(),
            timeout,
        }
    }
}

impl Transport for TcpTransport {
    fn metadata(&self) -> Arc<dyn MetadataService> {
        Arc::new(TcpMetadataClient::new(self.meta_addr.clone(), self.timeout))
    }

    fn block_service(&self, addr: &str) -> Arc<dyn BlockService> {
        Arc::new(TcpBlockClient::new(addr, self.timeout))
    }
}
