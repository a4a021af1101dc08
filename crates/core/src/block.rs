//! A content-addressed chunk of file data

use bytes::Bytes;

use crate::hash::ContentHash;

/// A chunk payload together with its identity `hash = H(data)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// BLAKE3 hash of `data`
    pub hash: ContentHash,
    /// Raw chunk bytes
    pub data: Bytes,
}

impl Block {
    /// Create a block, computing its hash
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            hash: ContentHash::from_bytes(&data),
            data,
        }
    }

    /// Payload size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check that the hash matches the payload
    #[must_use]
    pub fn verify(&self) -> bool {
        ContentHash::from_bytes(&self.data) == self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_identity() {
        let block = Block::new(Bytes::from_static(b"ABCD"));
        assert_eq!(block.hash, ContentHash::from_bytes(b"ABCD"));
        assert_eq!(block.size(), 4);
        assert!(block.verify());

        let forged = Block {
            hash: ContentHash::from_bytes(b"other"),
            data: Bytes::from_static(b"ABCD"),
        };
        assert!(!forged.verify());
    }
}
