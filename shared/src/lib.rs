//! Primitives shared by every Kaidos crate: SHA-256 hashing, fixed-point
//! amounts, `KD` addresses, secp256k1 keys and the error taxonomy.

pub mod address;
pub mod amount;
pub mod error;
pub mod hash;
pub mod keys;

pub use address::{Address, ADDRESS_LEN, ADDRESS_PREFIX};
pub use amount::{Amount, UNITS_PER_COIN};
pub use error::{ChainError, Result};
pub use hash::Hash256;
pub use keys::{address_of_public_key, verify_signature, KeyPair};
