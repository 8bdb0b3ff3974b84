//! Ed25519 key material for token signing and verification.

use std::fmt;

use ed25519_dalek::Verifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::encoding::{base64_decode, base64_encode, hex_encode};
use crate::error::AuthError;

// --- PublicKey ---

/// Verifying half of a token-signing keypair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse the unpadded base64url form used in config files.
    pub fn from_base64(s: &str) -> Result<Self, AuthError> {
        let bytes =
            base64_decode(s).map_err(|e| AuthError::InvalidKey(format!("public key: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AuthError::InvalidKey("public key must be 32 bytes".to_string()))?;
        Ok(Self(arr))
    }

    /// `grid_` + first 8 hex chars of SHA-256 of the key. Short enough for
    /// log lines, long enough to tell keys apart.
    pub fn fingerprint(&self) -> String {
        let digest: [u8; 32] = Sha256::digest(self.0).into();
        format!("grid_{}", &hex_encode(&digest)[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base64_encode(&self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64_encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

// --- SigningKey ---

#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    pub fn generate<R: rand::CryptoRng + rand::RngCore>(rng: &mut R) -> Self {
        Self(ed25519_dalek::SigningKey::generate(rng))
    }

    /// Reconstruct from the raw 32-byte seed.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Raw 32-byte seed, suitable for persistent storage.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message).to_bytes())
    }
}

// --- Signature ---

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &base64_encode(&self.0[..8]))
    }
}

// --- Standalone verify ---

pub fn verify(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), AuthError> {
    let vk = ed25519_dalek::VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|_| AuthError::InvalidSignature)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    vk.verify(message, &sig)
        .map_err(|_| AuthError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let sk = SigningKey::generate(&mut rand::rng());
        let sig = sk.sign(b"claims bytes");
        assert!(verify(&sk.public_key(), b"claims bytes", &sig).is_ok());
    }

    #[test]
    fn wrong_key_rejected() {
        let sk = SigningKey::generate(&mut rand::rng());
        let other = SigningKey::generate(&mut rand::rng());
        let sig = sk.sign(b"payload");
        assert_eq!(
            verify(&other.public_key(), b"payload", &sig),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn tampered_message_rejected() {
        let sk = SigningKey::generate(&mut rand::rng());
        let sig = sk.sign(b"original");
        assert!(verify(&sk.public_key(), b"tampered", &sig).is_err());
    }

    #[test]
    fn base64_parse_roundtrip() {
        let pk = PublicKey::from_bytes([9u8; 32]);
        let parsed = PublicKey::from_base64(&pk.to_string()).unwrap();
        assert_eq!(pk, parsed);
    }

    #[test]
    fn base64_parse_rejects_wrong_length() {
        let err = PublicKey::from_base64(&base64_encode(&[1u8; 16])).unwrap_err();
        assert_eq!(err.error_code(), "invalid_key");
    }

    #[test]
    fn fingerprint_shape() {
        let fp = PublicKey::from_bytes([42u8; 32]).fingerprint();
        assert!(fp.starts_with("grid_"), "got: {fp}");
        assert_eq!(fp.len(), 13);
        // Deterministic for the same key.
        assert_eq!(fp, PublicKey::from_bytes([42u8; 32]).fingerprint());
    }

    #[test]
    fn seed_roundtrip_preserves_identity() {
        let sk = SigningKey::generate(&mut rand::rng());
        let restored = SigningKey::from_bytes(sk.to_bytes());
        assert_eq!(sk.public_key(), restored.public_key());
        let sig = restored.sign(b"still mine");
        assert!(verify(&sk.public_key(), b"still mine", &sig).is_ok());
    }

    #[test]
    fn public_key_serde_roundtrip() {
        let pk = PublicKey::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&pk).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, back);
    }
}
