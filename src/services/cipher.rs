//! Symmetric payload cipher
//!
//! Authenticated encryption of session payloads with one process-wide key.
//!
//! # Security
//!
//! - ChaCha20-Poly1305 AEAD: integrity is verified on every decryption
//! - A fresh random 96-bit nonce per encryption, so equal plaintexts yield
//!   different tokens
//! - Tokens are `base64url(nonce || ciphertext || tag)` without padding

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key length in bytes
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Error types for cipher operations
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The configured key is unusable
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Malformed token, wrong key, or tampered ciphertext
    #[error("Decryption failed: {0}")]
    Decryption(&'static str),

    /// Encryption failed
    #[error("Encryption failed")]
    Encryption,

    /// Payload could not be (de)serialized
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Process-wide authenticated cipher
#[derive(Clone)]
pub struct Cipher {
    aead: ChaCha20Poly1305,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Create a cipher from raw key bytes
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Create a cipher from a URL-safe base64 encoded key
    ///
    /// # Errors
    ///
    /// Returns `CipherError::InvalidKey` if the key is not valid base64 or
    /// does not decode to exactly 32 bytes.
    pub fn from_base64_key(encoded: &str) -> Result<Self, CipherError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim().trim_end_matches('='))
            .map_err(|e| CipherError::InvalidKey(format!("not url-safe base64: {}", e)))?;

        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CipherError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;

        Ok(Self::new(&key))
    }

    /// Generate a fresh random key, URL-safe base64 encoded
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        URL_SAFE_NO_PAD.encode(key)
    }

    /// Encrypt a byte payload into a token
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decrypt a token produced by `encrypt`
    ///
    /// # Errors
    ///
    /// Returns `CipherError::Decryption` if the token is malformed, was
    /// sealed under another key, or was modified.
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CipherError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CipherError::Decryption("token is not url-safe base64"))?;

        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Decryption("token is too short"));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.aead
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decryption("authentication failed"))
    }

    /// Serialize a value to JSON and encrypt it
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String, CipherError> {
        let json = serde_json::to_vec(value)?;
        self.encrypt(&json)
    }

    /// Decrypt a token and deserialize the JSON inside
    pub fn decrypt_json<T: DeserializeOwned>(&self, token: &str) -> Result<T, CipherError> {
        let json = self.decrypt(token)?;
        Ok(serde_json::from_slice(&json)?)
    }
}
