use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroize;

use crate::{Address, ChainError, Hash256, Result};

/// secp256k1 keypair backing one wallet address.
///
/// Public keys travel as 33-byte compressed points, signatures as 64-byte
/// compact `(r, s)` pairs, both hex-encoded on the wire. Signatures cover
/// the SHA-256 digest of the transaction's shared signing preimage.
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        Self { secret, public }
    }

    /// Restores a keypair from a hex-encoded secret key.
    ///
    /// # Errors
    ///
    /// Returns `MalformedKey` if the hex or the scalar is invalid.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let mut bytes = hex::decode(secret_hex)
            .map_err(|e| ChainError::MalformedKey(format!("secret key hex: {e}")))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| ChainError::MalformedKey(format!("secret key: {e}")));
        bytes.zeroize();
        let secret = secret?;
        let public = secret.public_key(&Secp256k1::new());
        Ok(Self { secret, public })
    }

    /// Hex form of the secret key, for wallet files.
    #[must_use]
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }

    /// Hex form of the compressed public key.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// The pay-to-public-key-hash address of this keypair.
    #[must_use]
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public.serialize())
    }

    /// Signs `preimage`, returning the hex compact signature.
    #[must_use]
    pub fn sign(&self, preimage: &[u8]) -> String {
        let secp = Secp256k1::new();
        let message = Message::from_digest(*Hash256::sha256(preimage).as_bytes());
        let signature = secp.sign_ecdsa(&message, &self.secret);
        hex::encode(signature.serialize_compact())
    }
}

/// Verifies a hex compact signature over `preimage` by the given hex public
/// key. `Ok(false)` means the signature is well-formed but does not match.
///
/// # Errors
///
/// Returns `MalformedKey` or `InvalidSignature` on undecodable inputs.
pub fn verify_signature(public_key_hex: &str, signature_hex: &str, preimage: &[u8]) -> Result<bool> {
    let public = public_key_from_hex(public_key_hex)?;
    let sig_bytes = hex::decode(signature_hex)
        .map_err(|e| ChainError::InvalidSignature(format!("hex: {e}")))?;
    let signature = Signature::from_compact(&sig_bytes)
        .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;

    let secp = Secp256k1::new();
    let message = Message::from_digest(*Hash256::sha256(preimage).as_bytes());
    Ok(secp.verify_ecdsa(&message, &signature, &public).is_ok())
}

/// Derives the address committed to by a hex public key.
///
/// # Errors
///
/// Returns `MalformedKey` if the key does not decode to a curve point.
pub fn address_of_public_key(public_key_hex: &str) -> Result<Address> {
    let public = public_key_from_hex(public_key_hex)?;
    Ok(Address::from_public_key(&public.serialize()))
}

fn public_key_from_hex(public_key_hex: &str) -> Result<PublicKey> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| ChainError::MalformedKey(format!("public key hex: {e}")))?;
    PublicKey::from_slice(&bytes).map_err(|e| ChainError::MalformedKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keys = KeyPair::generate();
        let signature = keys.sign(b"shared signing preimage");

        assert!(verify_signature(&keys.public_key_hex(), &signature, b"shared signing preimage")
            .unwrap());
        assert!(!verify_signature(&keys.public_key_hex(), &signature, b"different preimage")
            .unwrap());
    }

    #[test]
    fn test_signature_is_64_bytes() {
        let keys = KeyPair::generate();
        let signature = keys.sign(b"message");
        assert_eq!(hex::decode(signature).unwrap().len(), 64);
    }

    #[test]
    fn test_foreign_key_does_not_verify() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let signature = mallory.sign(b"message");
        assert!(!verify_signature(&alice.public_key_hex(), &signature, b"message").unwrap());
    }

    #[test]
    fn test_secret_round_trip() {
        let keys = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&keys.secret_hex()).unwrap();
        assert_eq!(keys.public_key_hex(), restored.public_key_hex());
        assert_eq!(keys.address(), restored.address());
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(
            KeyPair::from_secret_hex("not hex"),
            Err(ChainError::MalformedKey(_))
        ));
        assert!(matches!(
            verify_signature("02bad", &"00".repeat(64), b"m"),
            Err(ChainError::MalformedKey(_))
        ));
        let keys = KeyPair::generate();
        assert!(matches!(
            verify_signature(&keys.public_key_hex(), "zz", b"m"),
            Err(ChainError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_address_of_public_key_matches_keypair() {
        let keys = KeyPair::generate();
        let derived = address_of_public_key(&keys.public_key_hex()).unwrap();
        assert_eq!(derived, keys.address());
    }
}
