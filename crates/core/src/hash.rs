//! Content-addressed hashing using BLAKE3

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A content hash using BLAKE3 (256-bit)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Reserved hash marking a deleted file.
    ///
    /// A tombstone's hash list is exactly `[ContentHash::TOMBSTONE]`.
    pub const TOMBSTONE: Self = Self([0u8; 32]);

    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Wrap raw hash bytes without hashing
    #[must_use]
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string
    ///
    /// # Errors
    /// Returns an error if the string is not valid hex or has the wrong length
    pub fn from_hex(s: &str) -> color_eyre::Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| color_eyre::eyre::eyre!("invalid content hash {s:?}: {e}"))?;
        Ok(Self(bytes))
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether this is the deletion sentinel
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        *self == Self::TOMBSTONE
    }
}

impl FromStr for ContentHash {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentHash({})", hex.get(..16).unwrap_or(&hex))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", hex.get(..16).unwrap_or(&hex))
    }
}
