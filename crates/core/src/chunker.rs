//! Fixed-size chunking
//!
//! A file is sliced at `block_size` boundaries; only the final chunk may be
//! shorter. The ordered list of chunk hashes is the file's fingerprint.

use std::io::Read;
use std::path::Path;

use bytes::Bytes;

use crate::block::Block;
use crate::hash::ContentHash;

/// Default chunk size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// A fixed-size chunk with its location and hash
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Chunk {
    /// Byte offset in the source data
    pub offset: u64,
    /// Length of this chunk in bytes
    pub length: u32,
    /// BLAKE3 hash of the chunk content
    pub hash: ContentHash,
}

/// Number of chunks a file of `file_size` bytes occupies
#[must_use]
pub fn block_count(file_size: u64, block_size: usize) -> u64 {
    file_size.div_ceil(block_size.max(1) as u64)
}

/// Chunk data into fixed-size pieces.
///
/// Returns an iterator over chunks, allowing lazy evaluation and chaining.
pub fn chunk_data(data: &[u8], block_size: usize) -> impl Iterator<Item = Chunk> + '_ {
    let block_size = block_size.max(1);
    data.chunks(block_size).enumerate().map(move |(i, piece)| Chunk {
        offset: (i * block_size) as u64,
        length: piece.len() as u32,
        hash: ContentHash::from_bytes(piece),
    })
}

/// Ordered hash list of `data`
#[must_use]
pub fn hash_list(data: &[u8], block_size: usize) -> Vec<ContentHash> {
    chunk_data(data, block_size).map(|c| c.hash).collect()
}

/// Split data into owned blocks ready for upload
#[must_use]
pub fn split_blocks(data: &Bytes, block_size: usize) -> Vec<Block> {
    chunk_data(data, block_size)
        .map(|c| {
            let start = c.offset as usize;
            Block {
                hash: c.hash,
                data: data.slice(start..start + c.length as usize),
            }
        })
        .collect()
}

/// Hash a file block by block without loading it whole.
///
/// # Errors
/// Returns an error if the file cannot be opened or read
pub fn chunk_file(path: &Path, block_size: usize) -> color_eyre::Result<Vec<ContentHash>> {
    let mut file = std::fs::File::open(path)?;
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut hashes = Vec::new();

    loop {
        let filled = fill_block(&mut file, &mut buffer)?;
        if filled == 0 {
            break;
        }
        hashes.push(ContentHash::from_bytes(&buffer[..filled]));
        if filled < buffer.len() {
            break;
        }
    }

    Ok(hashes)
}

/// Read until `buf` is full or EOF; a single `read` may return less.
fn fill_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_abcdefg() {
        let chunks: Vec<_> = chunk_data(b"ABCDEFG", 4).collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].hash, ContentHash::from_bytes(b"ABCD"));
        assert_eq!(chunks[1].hash, ContentHash::from_bytes(b"EFG"));
        assert_eq!(chunks[1].offset, 4);
        assert_eq!(chunks[1].length, 3);
        assert_eq!(block_count(7, 4), 2);
    }

    #[test]
    fn test_chunk_deterministic() {
        let data = b"hello world this is some test data that should be chunked".repeat(100);

        assert_eq!(hash_list(&data, 64), hash_list(&data, 64));
        assert_ne!(hash_list(&data, 64), hash_list(&data, 128));
    }

    #[test]
    fn test_split_blocks_reassemble() {
        let data = Bytes::from(b"some test data for chunking".repeat(50));
        let blocks = split_blocks(&data, 100);

        assert_eq!(blocks.len() as u64, block_count(data.len() as u64, 100));
        assert!(blocks.iter().all(Block::verify));

        let reassembled: Vec<u8> = blocks.iter().flat_map(|b| b.data.iter().copied()).collect();
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_chunk() {
        assert_eq!(hash_list(b"ABCDEFGH", 4).len(), 2);
        assert_eq!(block_count(8, 4), 2);
    }

    #[test]
    fn test_empty_data() {
        assert!(chunk_data(b"", 4).next().is_none());
        assert_eq!(block_count(0, 4), 0);
    }

    #[test]
    fn test_chunk_file_matches_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(chunk_file(&path, 4096).unwrap(), hash_list(&data, 4096));
    }

    #[test]
    fn test_fill_block_handles_short_reads() {
        /// Reader that returns at most 3 bytes per call
        struct Trickle<'a>(&'a [u8]);

        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = buf.len().min(3).min(self.0.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let mut reader = Trickle(b"ABCDEFG");
        let mut buf = [0u8; 4];
        assert_eq!(fill_block(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ABCD");
        assert_eq!(fill_block(&mut reader, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"EFG");
    }
}
