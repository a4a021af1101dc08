//! TCP server hosting the metadata service, the block service, or both
//!
//! Every connection may carry any number of sequential request frames; each
//! gets exactly one response frame.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use surfstore_core::{BlockBackend, Message, MetaStore};

use crate::ServiceResult;
use crate::tcp::{read_frame, write_frame};

/// Stores served by one listener
#[derive(Default)]
pub struct Services {
    /// Metadata service state, if hosted here
    pub meta: Option<Arc<MetaStore>>,
    /// Block service state, if hosted here
    pub blocks: Option<Arc<dyn BlockBackend>>,
}

impl Services {
    /// Answer one request
    #[must_use]
    pub fn handle_message(&self, request: Message) -> Message {
        match request {
            Message::GetBlock(hash) => self.with_blocks(|blocks| match blocks.get(&hash) {
                Ok(Some(data)) => Message::Block(data),
                Ok(None) => Message::BlockNotFound(hash),
                Err(e) => Message::Error(e.to_string()),
            }),

            Message::PutBlock(data) => self.with_blocks(|blocks| match blocks.put(data) {
                Ok(hash) => {
                    debug!(%hash, "stored block");
                    Message::PutResult(true)
                }
                Err(e) => Message::Error(e.to_string()),
            }),

            Message::HasBlocks(hashes) => {
                self.with_blocks(|blocks| match blocks.has_blocks(&hashes) {
                    Ok(present) => Message::BlockHashes(present),
                    Err(e) => Message::Error(e.to_string()),
                })
            }

            Message::GetFileInfoMap => {
                self.with_meta(|meta| Message::file_info_map(meta.file_info_map()))
            }

            Message::UpdateFile(record) => self.with_meta(|meta| {
                let filename = record.filename.clone();
                let outcome = meta.update_file(record);
                info!(file = %filename, ?outcome, "update file");
                Message::Version(outcome.to_wire())
            }),

            Message::GetBlockStoreAddr => {
                self.with_meta(|meta| Message::BlockStoreAddr(meta.block_store_addr().to_string()))
            }

            other => Message::Error(format!(
                "not a request: message type {:#04x}",
                other.msg_type()
            )),
        }
    }

    fn with_blocks(&self, f: impl FnOnce(&dyn BlockBackend) -> Message) -> Message {
        match &self.blocks {
            Some(blocks) => f(blocks.as_ref()),
            None => Message::Error("block service is not hosted here".into()),
        }
    }

    fn with_meta(&self, f: impl FnOnce(&MetaStore) -> Message) -> Message {
        match &self.meta {
            Some(meta) => f(meta.as_ref()),
            None => Message::Error("metadata service is not hosted here".into()),
        }
    }
}

/// Accept connections until the task is dropped
///
/// A failed `accept` (descriptor exhaustion, an aborted handshake) is
/// logged and retried; it never stops the service.
///
/// # Errors
/// Returns an error if the listener has no local address
pub async fn serve(listener: TcpListener, services: Arc<Services>) -> color_eyre::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                let delay = accept_retry_delay(&e);
                warn!("accept failed, retrying in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        let services = Arc::clone(&services);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, services).await {
                warn!(%peer, "connection error: {e}");
            }
        });
    }
}

/// Backoff before the next `accept` after a failure
fn accept_retry_delay(error: &std::io::Error) -> Duration {
    use std::io::ErrorKind;

    match error.kind() {
        // Only this one connection failed
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted => {
            Duration::ZERO
        }
        // Usually out of descriptors; give open connections time to close
        _ => Duration::from_millis(100),
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    services: Arc<Services>,
) -> ServiceResult<()> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.split();
    let requests = serve_stream(reader, writer, services).await?;
    debug!(%peer, requests, "connection closed");
    Ok(())
}

/// Answer request frames until the peer closes; returns how many were served
async fn serve_stream<R, W>(reader: R, writer: W, services: Arc<Services>) -> ServiceResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);

    let mut requests = 0u64;
    while let Some(request) = read_frame(&mut reader).await? {
        let response = respond(&services, request).await;
        write_frame(&mut writer, &response).await?;
        requests += 1;
    }
    Ok(requests)
}

/// Run one request, moving block store work off the async workers
async fn respond(services: &Arc<Services>, request: Message) -> Message {
    if !touches_blocks(&request) {
        return services.handle_message(request);
    }

    let services = Arc::clone(services);
    tokio::task::spawn_blocking(move || services.handle_message(request))
        .await
        .unwrap_or_else(|e| Message::Error(format!("block request aborted: {e}")))
}

/// Requests served by the block backend, which may do disk I/O
fn touches_blocks(request: &Message) -> bool {
    matches!(
        request,
        Message::GetBlock(_) | Message::PutBlock(_) | Message::HasBlocks(_)
    )
}
