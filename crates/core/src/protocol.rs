//! Binary protocol for block and metadata service RPCs
//!
//! Wire format (all integers are big-endian):
//!
//! Request/Response frame:
//! ```text
//! +--------+--------+------------------+
//! | type   | length | payload          |
//! | 1 byte | 4 bytes| variable         |
//! +--------+--------+------------------+
//! ```
//!
//! Message types:
//! - 0x01: GetBlock (hash:32)
//! - 0x02: Block (data)
//! - 0x03: BlockNotFound (hash:32)
//! - 0x04: PutBlock (data)
//! - 0x05: PutResult (ok:1)
//! - 0x06: HasBlocks (count:4, hashes:[32]*count)
//! - 0x07: BlockHashes (count:4, hashes:[32]*count)
//! - 0x10: GetFileInfoMap (no payload)
//! - 0x11: FileInfoMap (count:4, metadata*count)
//! - 0x12: UpdateFile (metadata)
//! - 0x13: Version (version:i64, -1 when stale)
//! - 0x14: GetBlockStoreAddr (no payload)
//! - 0x15: BlockStoreAddr (utf-8 address)
//! - 0x7f: Error (utf-8 message)
//!
//! A metadata record is `name_len:2, name, version:8, count:4, hashes:[32]*count`.

use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};

use crate::ContentHash;
use crate::metadata::{FileMetadata, Index};

/// Largest payload accepted from a peer
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Size of the `type | length` frame header
pub const HEADER_LEN: usize = 5;

/// Message type identifiers
pub mod msg {
    // Block service
    pub const GET_BLOCK: u8 = 0x01;
    pub const BLOCK: u8 = 0x02;
    pub const BLOCK_NOT_FOUND: u8 = 0x03;
    pub const PUT_BLOCK: u8 = 0x04;
    pub const PUT_RESULT: u8 = 0x05;
    pub const HAS_BLOCKS: u8 = 0x06;
    pub const BLOCK_HASHES: u8 = 0x07;
    // Metadata service
    pub const GET_FILE_INFO_MAP: u8 = 0x10;
    pub const FILE_INFO_MAP: u8 = 0x11;
    pub const UPDATE_FILE: u8 = 0x12;
    pub const VERSION: u8 = 0x13;
    pub const GET_BLOCK_STORE_ADDR: u8 = 0x14;
    pub const BLOCK_STORE_ADDR: u8 = 0x15;

    pub const ERROR: u8 = 0x7f;
}

/// Message sent or received over a service connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask for the block stored under a hash
    GetBlock(ContentHash),
    /// Block payload
    Block(Bytes),
    /// No block is stored under this hash
    BlockNotFound(ContentHash),
    /// Store a block under `H(data)`
    PutBlock(Bytes),
    /// Whether a put succeeded
    PutResult(bool),
    /// Which of these hashes are stored?
    HasBlocks(Vec<ContentHash>),
    /// Subset of a `HasBlocks` request that is present
    BlockHashes(Vec<ContentHash>),
    GetFileInfoMap,
    FileInfoMap(Vec<FileMetadata>),
    /// Compare-and-set a file record
    UpdateFile(FileMetadata),
    /// Accepted version, or -1 for a stale update
    Version(i64),
    GetBlockStoreAddr,
    BlockStoreAddr(String),
    /// Request failed on the peer
    Error(String),
}

impl Message {
    /// Wire type byte
    #[must_use]
    pub fn msg_type(&self) -> u8 {
        match self {
            Self::GetBlock(_) => msg::GET_BLOCK,
            Self::Block(_) => msg::BLOCK,
            Self::BlockNotFound(_) => msg::BLOCK_NOT_FOUND,
            Self::PutBlock(_) => msg::PUT_BLOCK,
            Self::PutResult(_) => msg::PUT_RESULT,
            Self::HasBlocks(_) => msg::HAS_BLOCKS,
            Self::BlockHashes(_) => msg::BLOCK_HASHES,
            Self::GetFileInfoMap => msg::GET_FILE_INFO_MAP,
            Self::FileInfoMap(_) => msg::FILE_INFO_MAP,
            Self::UpdateFile(_) => msg::UPDATE_FILE,
            Self::Version(_) => msg::VERSION,
            Self::GetBlockStoreAddr => msg::GET_BLOCK_STORE_ADDR,
            Self::BlockStoreAddr(_) => msg::BLOCK_STORE_ADDR,
            Self::Error(_) => msg::ERROR,
        }
    }

    /// Build a `FileInfoMap` response with records in filename order
    #[must_use]
    pub fn file_info_map(index: Index) -> Self {
        let mut records: Vec<_> = index.into_values().collect();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Self::FileInfoMap(records)
    }

    fn encode_payload(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::GetBlock(hash) | Self::BlockNotFound(hash) => {
                buf.extend_from_slice(hash.as_bytes());
            }
            Self::Block(data) | Self::PutBlock(data) => buf.extend_from_slice(data),
            Self::PutResult(ok) => buf.push(u8::from(*ok)),
            Self::HasBlocks(hashes) | Self::BlockHashes(hashes) => encode_hashes(&mut buf, hashes),
            Self::GetFileInfoMap | Self::GetBlockStoreAddr => {}
            Self::FileInfoMap(records) => {
                buf.extend_from_slice(&(records.len() as u32).to_be_bytes());
                for meta in records {
                    encode_metadata(&mut buf, meta)?;
                }
            }
            Self::UpdateFile(meta) => encode_metadata(&mut buf, meta)?,
            Self::Version(version) => buf.extend_from_slice(&version.to_be_bytes()),
            Self::BlockStoreAddr(text) | Self::Error(text) => buf.extend_from_slice(text.as_bytes()),
        }
        Ok(buf)
    }

    /// Encode as a complete frame
    ///
    /// # Errors
    /// Returns an error if the payload exceeds [`MAX_FRAME_LEN`] or a
    /// filename is longer than 65535 bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| eyre!("frame too large: {} bytes", payload.len()))?;

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        write_header(&mut frame, self.msg_type(), len)?;
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a payload whose header has already been read
    ///
    /// # Errors
    /// Returns an error for an unknown type or a malformed payload
    pub fn decode(msg_type: u8, payload: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(payload);

        let message = match msg_type {
            msg::GET_BLOCK => Self::GetBlock(read_hash(&mut cursor)?),
            msg::BLOCK => Self::Block(Bytes::copy_from_slice(payload)),
            msg::BLOCK_NOT_FOUND => Self::BlockNotFound(read_hash(&mut cursor)?),
            msg::PUT_BLOCK => Self::PutBlock(Bytes::copy_from_slice(payload)),
            msg::PUT_RESULT => {
                let mut ok = [0u8; 1];
                cursor.read_exact(&mut ok)?;
                Self::PutResult(ok[0] != 0)
            }
            msg::HAS_BLOCKS => Self::HasBlocks(decode_hashes(&mut cursor)?),
            msg::BLOCK_HASHES => Self::BlockHashes(decode_hashes(&mut cursor)?),
            msg::GET_FILE_INFO_MAP => Self::GetFileInfoMap,
            msg::FILE_INFO_MAP => {
                let count = read_u32(&mut cursor)? as usize;
                // Each record is at least 14 bytes; bound the allocation by the payload
                let mut records = Vec::with_capacity(count.min(payload.len() / 14));
                for _ in 0..count {
                    records.push(decode_metadata(&mut cursor)?);
                }
                Self::FileInfoMap(records)
            }
            msg::UPDATE_FILE => Self::UpdateFile(decode_metadata(&mut cursor)?),
            msg::VERSION => {
                let mut version = [0u8; 8];
                cursor.read_exact(&mut version)?;
                Self::Version(i64::from_be_bytes(version))
            }
            msg::GET_BLOCK_STORE_ADDR => Self::GetBlockStoreAddr,
            msg::BLOCK_STORE_ADDR => Self::BlockStoreAddr(String::from_utf8(payload.to_vec())?),
            msg::ERROR => Self::Error(String::from_utf8_lossy(payload).to_string()),
            _ => bail!("Unknown message type: {msg_type}"),
        };

        Ok(message)
    }
}

/// Write a frame header (type + length)
fn write_header<W: Write>(w: &mut W, msg_type: u8, len: u32) -> std::io::Result<()> {
    w.write_all(&[msg_type])?;
    w.write_all(&len.to_be_bytes())?;
    Ok(())
}

/// Parse a frame header, returns (type, length)
///
/// # Errors
/// Returns an error if the declared length exceeds [`MAX_FRAME_LEN`]
pub fn parse_header(header: [u8; HEADER_LEN]) -> Result<(u8, u32)> {
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_FRAME_LEN {
        bail!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}");
    }
    Ok((header[0], len))
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_hash<R: Read>(r: &mut R) -> std::io::Result<ContentHash> {
    let mut hash_buf = [0u8; 32];
    r.read_exact(&mut hash_buf)?;
    Ok(ContentHash::from_raw(hash_buf))
}

fn encode_hashes(buf: &mut Vec<u8>, hashes: &[ContentHash]) {
    buf.extend_from_slice(&(hashes.len() as u32).to_be_bytes());
    for hash in hashes {
        buf.extend_from_slice(hash.as_bytes());
    }
}

fn decode_hashes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<ContentHash>> {
    let count = read_u32(cursor)? as usize;
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if count > remaining / 32 {
        bail!("hash list of {count} entries does not fit in {remaining} bytes");
    }

    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        hashes.push(read_hash(cursor)?);
    }
    Ok(hashes)
}

fn encode_metadata(buf: &mut Vec<u8>, meta: &FileMetadata) -> Result<()> {
    let name = meta.filename.as_bytes();
    let name_len =
        u16::try_from(name.len()).map_err(|_| eyre!("filename too long: {}", meta.filename))?;
    buf.extend_from_slice(&name_len.to_be_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&meta.version.to_be_bytes());
    encode_hashes(buf, &meta.chunk_hashes);
    Ok(())
}

fn decode_metadata(cursor: &mut Cursor<&[u8]>) -> Result<FileMetadata> {
    let mut len_buf = [0u8; 2];
    cursor.read_exact(&mut len_buf)?;
    let mut name = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    cursor.read_exact(&mut name)?;

    let mut version = [0u8; 8];
    cursor.read_exact(&mut version)?;

    Ok(FileMetadata::new(
        String::from_utf8(name)?,
        u64::from_be_bytes(version),
        decode_hashes(cursor)?,
    ))
}

/// Protocol writer for sending messages
pub struct ProtocolWriter<W> {
    inner: W,
}

impl<W: Write> ProtocolWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send one message and flush
    ///
    /// # Errors
    /// Returns an error if the message cannot be encoded or written
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.inner.write_all(&message.encode()?)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Get inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Protocol reader for receiving messages
pub struct ProtocolReader<R> {
    inner: R,
}

impl<R: Read> ProtocolReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read next message
    ///
    /// # Errors
    /// Returns an error on I/O failure, an oversized frame or a malformed payload
    pub fn read_message(&mut self) -> Result<Message> {
        let mut header = [0u8; HEADER_LEN];
        self.inner.read_exact(&mut header)?;
        let (msg_type, len) = parse_header(header)?;

        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload)?;
        Message::decode(msg_type, &payload)
    }

    /// Get inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: &Message) -> Message {
        let mut buf = Vec::new();
        ProtocolWriter::new(&mut buf).send(message).unwrap();
        ProtocolReader::new(Cursor::new(buf)).read_message().unwrap()
    }

    #[test]
    fn test_update_file_roundtrip() {
        let message = Message::UpdateFile(FileMetadata::new(
            "docs/notes.txt",
            7,
            vec![ContentHash::from_bytes(b"ABCD"), ContentHash::from_bytes(b"EFG")],
        ));
        assert_eq!(roundtrip(&message), message);
    }

    #[test]
    fn test_file_info_map_is_sorted_and_keeps_tombstones() {
        let mut index = Index::new();
        index.insert("b.txt".into(), FileMetadata::tombstone("b.txt", 3));
        index.insert(
            "a.txt".into(),
            FileMetadata::new("a.txt", 1, vec![ContentHash::from_bytes(b"a")]),
        );

        let Message::FileInfoMap(records) = roundtrip(&Message::file_info_map(index)) else {
            panic!("Wrong message type");
        };
        assert_eq!(records[0].filename, "a.txt");
        assert!(records[1].is_tombstone());
        assert_eq!(records[1].version, 3);
    }

    #[test]
    fn test_stale_version_on_the_wire() {
        assert_eq!(roundtrip(&Message::Version(-1)), Message::Version(-1));
    }

    #[test]
    fn test_frame_layout() {
        let frame = Message::PutBlock(Bytes::from_static(b"EFG")).encode().unwrap();
        assert_eq!(frame, vec![msg::PUT_BLOCK, 0, 0, 0, 3, b'E', b'F', b'G']);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut header = [msg::BLOCK, 0, 0, 0, 0];
        header[1..].copy_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        assert!(parse_header(header).is_err());
    }

    #[test]
    fn test_truncated_hash_list_is_rejected() {
        // Claims 1000 hashes but carries none
        let payload = 1000u32.to_be_bytes();
        assert!(Message::decode(msg::HAS_BLOCKS, &payload).is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(Message::decode(0x42, &[]).is_err());
    }
}
