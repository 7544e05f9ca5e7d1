//! Symmetric encryption using AES-256-GCM

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::protocol::constants::{PROVISIONED_KEY_INFO, SESSION_KEY_INFO};
use crate::{Error, Result};

fn cipher_for(bytes: &[u8; 32]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(bytes))
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<EncryptedPayload> {
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))?;

    Ok(EncryptedPayload {
        nonce: nonce_bytes,
        ciphertext,
    })
}

fn open(cipher: &Aes256Gcm, payload: &EncryptedPayload) -> Result<Vec<u8>> {
    let nonce = Nonce::from_slice(&payload.nonce);

    cipher
        .decrypt(nonce, payload.ciphertext.as_ref())
        .map_err(|e| Error::Crypto(format!("decryption failed: {}", e)))
}

/// Short-lived key agreed during a pairing handshake
#[derive(Clone)]
pub struct SessionKey {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

impl SessionKey {
    /// Derive a session key from PAKE output: SHA256(secret || SESSION_KEY_INFO)
    pub fn from_shared_secret(shared: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(shared);
        hasher.update(SESSION_KEY_INFO);
        let key_bytes: [u8; 32] = hasher.finalize().into();

        Self {
            cipher: cipher_for(&key_bytes),
        }
    }

    /// Encrypt data with a random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        seal(&self.cipher, plaintext)
    }

    /// Decrypt an encrypted payload
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        open(&self.cipher, payload)
    }
}

/// The cluster's shared secret. Holding it is what makes a peer trusted.
#[derive(Clone)]
pub struct ClusterKey {
    bytes: [u8; 32],
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl PartialEq for ClusterKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for ClusterKey {}

impl ClusterKey {
    /// Generate a new random cluster key
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(&bytes)
    }

    /// Create from raw bytes (persistence, key transport)
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            bytes: *bytes,
            cipher: cipher_for(bytes),
        }
    }

    /// Deterministic key for a provisioned (name, pin) pair
    pub fn derive_provisioned(network_name: &str, pin: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(PROVISIONED_KEY_INFO);
        hasher.update((network_name.len() as u32).to_be_bytes());
        hasher.update(network_name.as_bytes());
        hasher.update(pin.as_bytes());
        let bytes: [u8; 32] = hasher.finalize().into();
        Self::from_bytes(&bytes)
    }

    /// Export as raw bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    /// Human-readable fingerprint (first 8 bytes of SHA256, base64)
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.bytes);
        BASE64.encode(&hash[..8])
    }

    /// Encrypt data with a random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        seal(&self.cipher, plaintext)
    }

    /// Decrypt data sealed under this key. Any failure means the sender does
    /// not hold the cluster key.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        open(&self.cipher, payload)
            .map_err(|_| Error::Authentication("payload not sealed with the cluster key".to_string()))
    }

    /// Serialize a value as JSON and seal it
    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<EncryptedPayload> {
        self.encrypt(&serde_json::to_vec(value)?)
    }

    /// Open a sealed JSON value
    pub fn open_json<T: serde::de::DeserializeOwned>(&self, payload: &EncryptedPayload) -> Result<T> {
        let plaintext = self.decrypt(payload)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Encrypted data with its nonce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(with = "crate::crypto::serde_utils::base64_array")]
    pub nonce: [u8; 12],
    #[serde(with = "crate::crypto::serde_utils::base64_bytes")]
    pub ciphertext: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_roundtrip() {
        let alice = SessionKey::from_shared_secret(b"same pake output");
        let bob = SessionKey::from_shared_secret(b"same pake output");

        let encrypted = alice.encrypt(b"Hello from Alice!").unwrap();
        assert_eq!(bob.decrypt(&encrypted).unwrap(), b"Hello from Alice!");
    }

    #[test]
    fn test_session_key_mismatch_fails() {
        let alice = SessionKey::from_shared_secret(b"one");
        let mallory = SessionKey::from_shared_secret(b"two");

        let encrypted = alice.encrypt(b"secret").unwrap();
        assert!(mallory.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_different_nonces() {
        let key = ClusterKey::generate();
        let enc1 = key.encrypt(b"same message").unwrap();
        let enc2 = key.encrypt(b"same message").unwrap();

        assert_ne!(enc1.nonce, enc2.nonce);
        assert_ne!(enc1.ciphertext, enc2.ciphertext);
    }

    #[test]
    fn test_wrong_cluster_key_is_authentication_error() {
        let ours = ClusterKey::generate();
        let theirs = ClusterKey::generate();

        let sealed = theirs.encrypt(b"clipboard").unwrap();
        assert!(matches!(ours.decrypt(&sealed), Err(Error::Authentication(_))));
    }

    #[test]
    fn test_provisioned_key_is_deterministic() {
        let a = ClusterKey::derive_provisioned("alpha", "AB12CD");
        let b = ClusterKey::derive_provisioned("alpha", "AB12CD");
        let c = ClusterKey::derive_provisioned("alpha", "ZZ99ZZ");
        let d = ClusterKey::derive_provisioned("alphaA", "B12CD");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_cluster_key_bytes_roundtrip() {
        let key = ClusterKey::generate();
        let restored = ClusterKey::from_bytes(&key.to_bytes());
        assert_eq!(key, restored);
        assert_eq!(key.fingerprint(), restored.fingerprint());
    }
}
