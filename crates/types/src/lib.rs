//! Shared types for peercache nodes
//!
//! Defines blob identity, block addressing and the fixed block
//! granularity used by the cache, the router and the fetch path.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed block size used for cache granularity.
///
/// A blob is logically divided into `BLOCK_SIZE` blocks; block index =
/// `offset / BLOCK_SIZE`. The tail block of a blob may be shorter.
pub const BLOCK_SIZE: u64 = 1024 * 1024;

/// Opaque, content-addressed blob identity.
///
/// The key is the blob's upstream URL. It is never parsed by the cache
/// or the router; both work with its SHA-256 digest. Only the fetch
/// path interprets it, and only when the origin sentinel is the chosen
/// candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobKey(String);

impl BlobKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable content digest of the key, used for on-disk naming.
    pub fn digest(&self) -> BlobDigest {
        let hash = Sha256::digest(self.0.as_bytes());
        BlobDigest(hex::encode(hash))
    }

    /// Stable routing hash, identical on every node for the same key.
    ///
    /// Derived from the first 8 bytes of the SHA-256 digest so that
    /// independently configured nodes converge on the same candidate
    /// ordering.
    pub fn route_hash(&self) -> u64 {
        let hash = Sha256::digest(self.0.as_bytes());
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&hash[..8]);
        u64::from_be_bytes(buf)
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hex-encoded SHA-256 digest of a blob key.
///
/// Survives process restart (it is the on-disk directory name), so the
/// cache index is rebuilt from digests alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobDigest(String);

impl BlobDigest {
    /// Wrap an already hex-encoded digest (e.g. a directory name found
    /// during recovery). Returns `None` if it is not a SHA-256 hex string.
    pub fn from_hex(hex_digest: &str) -> Option<Self> {
        if hex_digest.len() == 64 && hex_digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(hex_digest.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache entry key: one block of one blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub digest: BlobDigest,
    pub index: u64,
}

impl BlockKey {
    pub fn new(digest: BlobDigest, index: u64) -> Self {
        Self { digest, index }
    }

    /// Byte offset of the start of this block within the blob.
    pub fn block_offset(&self) -> u64 {
        self.index * BLOCK_SIZE
    }

    /// On-disk file name for this block.
    pub fn file_name(&self) -> String {
        format!("{}.blk", self.index)
    }
}

impl std::fmt::Display for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", &self.digest.as_str()[..12], self.index)
    }
}

/// Indices of the blocks covering `[offset, offset + length)`.
///
/// `length` must be non-zero. A window reaching past the end of the
/// `u64` address space saturates at the last addressable block.
pub fn covering_blocks(offset: u64, length: u64) -> std::ops::RangeInclusive<u64> {
    let first = offset / BLOCK_SIZE;
    let last = offset.saturating_add(length.saturating_sub(1)) / BLOCK_SIZE;
    first..=last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let a = BlobKey::new("https://registry.example/v2/blobs/sha256:abc");
        let b = BlobKey::new("https://registry.example/v2/blobs/sha256:abc");
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.route_hash(), b.route_hash());
        assert_eq!(a.digest().as_str().len(), 64);
    }

    #[test]
    fn test_route_hash_differs_across_keys() {
        let a = BlobKey::new("sha256:abc");
        let b = BlobKey::new("sha256:def");
        assert_ne!(a.route_hash(), b.route_hash());
    }

    #[test]
    fn test_digest_from_hex_roundtrip() {
        let digest = BlobKey::new("sha256:abc").digest();
        let parsed = BlobDigest::from_hex(digest.as_str()).expect("valid hex digest");
        assert_eq!(parsed, digest);

        assert!(BlobDigest::from_hex("not-a-digest").is_none());
        assert!(BlobDigest::from_hex("abcd").is_none());
    }

    #[test]
    fn test_covering_blocks() {
        assert_eq!(covering_blocks(0, 1), 0..=0);
        assert_eq!(covering_blocks(0, BLOCK_SIZE), 0..=0);
        assert_eq!(covering_blocks(0, BLOCK_SIZE + 1), 0..=1);
        assert_eq!(covering_blocks(BLOCK_SIZE - 1, 2), 0..=1);
        assert_eq!(covering_blocks(3 * BLOCK_SIZE, 10), 3..=3);
    }

    /// A window touching the top of the address space must not wrap.
    #[test]
    fn test_covering_blocks_saturates_at_address_space_end() {
        let last_block = u64::MAX / BLOCK_SIZE;
        assert_eq!(
            covering_blocks(u64::MAX - 1, 3),
            (u64::MAX - 1) / BLOCK_SIZE..=last_block
        );
        assert_eq!(covering_blocks(u64::MAX, u64::MAX), u64::MAX / BLOCK_SIZE..=last_block);
    }

    #[test]
    fn test_block_key_layout() {
        let key = BlockKey::new(BlobKey::new("x").digest(), 7);
        assert_eq!(key.block_offset(), 7 * BLOCK_SIZE);
        assert_eq!(key.file_name(), "7.blk");
    }
}
