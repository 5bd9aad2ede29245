use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::{ChainError, Result};

/// Network identifier every address starts with; foreign prefixes are
/// rejected.
pub const ADDRESS_PREFIX: &str = "KD";

/// Prefix plus the base32 form of a 20-byte truncated SHA-256 (32 digits).
pub const ADDRESS_LEN: usize = 34;

/// Pay-to-public-key-hash address.
///
/// Derived as `"KD" + base32(SHA256(public_key)[..20])`, uppercase, no
/// padding. Two addresses are equal iff their byte representations match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Derives the address owned by `public_key` (raw key bytes).
    #[must_use]
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = Sha256::digest(public_key);
        Self(format!("{ADDRESS_PREFIX}{}", BASE32_NOPAD.encode(&digest[..20])))
    }

    /// The reserved address no key is known for; it receives the zero-amount
    /// genesis output.
    #[must_use]
    pub fn reserved() -> Self {
        Self(format!("{ADDRESS_PREFIX}{}", "A".repeat(ADDRESS_LEN - 2)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = |reason: &str| ChainError::InvalidAddress(format!("{s:?}: {reason}"));

        if !s.starts_with(ADDRESS_PREFIX) {
            return Err(bad("missing KD network prefix"));
        }
        if s.len() != ADDRESS_LEN {
            return Err(bad("wrong length"));
        }
        let payload = &s[ADDRESS_PREFIX.len()..];
        BASE32_NOPAD
            .decode(payload.as_bytes())
            .map_err(|_| bad("payload is not uppercase base32"))?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Address {
    type Error = ChainError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}
