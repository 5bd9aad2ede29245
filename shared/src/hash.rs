use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::{ChainError, Result};

/// 256-bit SHA-256 digest identifying transactions, blocks and merkle nodes.
///
/// Serialized forms are always lowercase hex, which is also what the
/// proof-of-work predicate is defined over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash (the genesis `previous_hash`).
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a hash from a 32-byte array.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the SHA-256 digest of the provided data.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        Self(hash)
    }

    /// Counts the leading zero hex digits (4 bits each) of the digest.
    #[must_use]
    pub fn leading_hex_zeros(&self) -> u32 {
        let mut zeros = 0;
        for &byte in &self.0 {
            if byte == 0 {
                zeros += 2;
            } else {
                if byte < 0x10 {
                    zeros += 1;
                }
                break;
            }
        }
        zeros
    }

    /// Checks whether the hex form starts with `difficulty` zero digits.
    #[must_use]
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_hex_zeros() >= difficulty
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ChainError::Serialization(format!("invalid hash hex: {e}")))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::Serialization("hash must be 32 bytes".to_string()))?;
        Ok(Self(hash))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = Hash256;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 64-character hex string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Hash256, E> {
                v.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}
