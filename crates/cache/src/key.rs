//! Content-addressed cache keys

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bytes in a cache key digest (SHA-256)
pub const KEY_LENGTH: usize = 32;

/// Opaque content-derived identifier of one unit of cacheable work
///
/// Keys are supplied by the caller, derived from the inputs of the work;
/// this subsystem never computes them. Equality and hashing are by digest
/// bytes. A key is never mutated and never enumerated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey([u8; KEY_LENGTH]);

impl CacheKey {
    /// Create a key from raw digest bytes
    #[must_use]
    pub fn from_bytes(digest: [u8; KEY_LENGTH]) -> Self {
        Self(digest)
    }

    /// Parse a key from its lowercase hex representation
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not exactly 64 hex characters.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != KEY_LENGTH * 2 {
            return Err(Error::configuration(format!(
                "Cache key must be {} hex characters, got {}",
                KEY_LENGTH * 2,
                hex_str.len()
            )));
        }
        let mut digest = [0u8; KEY_LENGTH];
        hex::decode_to_slice(hex_str, &mut digest)
            .map_err(|e| Error::configuration(format!("Invalid cache key: {e}")))?;
        Ok(Self(digest))
    }

    /// The raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// The lowercase hex representation
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let key = CacheKey::from_bytes([0xab; KEY_LENGTH]);
        let hex_str = key.to_hex();
        assert_eq!(hex_str.len(), 64);
        assert_eq!(CacheKey::from_hex(&hex_str).unwrap(), key);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(CacheKey::from_hex("abcd").is_err());
        assert!(CacheKey::from_hex(&"ab".repeat(33)).is_err());
    }

    #[test]
    fn rejects_non_hex() {
        assert!(CacheKey::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn equality_is_by_digest_bytes() {
        let a = CacheKey::from_bytes([1; KEY_LENGTH]);
        let b = CacheKey::from_bytes([1; KEY_LENGTH]);
        let c = CacheKey::from_bytes([2; KEY_LENGTH]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_is_lowercase_hex() {
        let key = CacheKey::from_bytes([0xFF; KEY_LENGTH]);
        assert_eq!(key.to_string(), "ff".repeat(32));
    }
}
