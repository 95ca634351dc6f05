//! End-to-end encryption wire contract.
//!
//! The server never decrypts anything; this module exists so clients (and
//! the test-suite) produce and consume exactly the bytes the server stores.
//!
//! - key: Argon2id(password, salt), 32 bytes, used as a ChaCha20-Poly1305 key
//! - verification hash: hex(SHA-256(password ‖ salt)), sent to the server
//!   to gate downloads; it is not the key and cannot be turned into it
//! - payload: a sequence of frames, see [`frame`]

pub mod frame;

use argon2::Argon2;
use base64::{Engine as _, engine::general_purpose};
use sha2::{Digest, Sha256};
use std::{fmt, io};
use thiserror::Error;

pub use frame::{
    DEFAULT_CHUNK_SIZE, FrameCodec, MAX_CHUNK_SIZE, decrypt_stream, encrypt_stream,
    encrypted_len,
};

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
/// Argon2 refuses shorter salts.
pub const MIN_SALT_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Wrong password and tampered ciphertext are deliberately indistinguishable.
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("encrypted stream ended in the middle of a frame")]
    Truncated,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("invalid salt: {0}")]
    InvalidSalt(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Symmetric AEAD key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&"<redacted>").finish()
    }
}

/// Fresh random salt for a new upload.
pub fn generate_salt() -> [u8; SALT_LEN] {
    rand::random()
}

pub fn encode_salt(salt: &[u8]) -> String {
    general_purpose::STANDARD.encode(salt)
}

/// Decode the base64 salt carried in `X-File-Salt` / file metadata.
pub fn decode_salt(encoded: &str) -> CryptoResult<Vec<u8>> {
    let salt = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| CryptoError::InvalidSalt(err.to_string()))?;
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::InvalidSalt(format!(
            "salt must be at least {} bytes, got {}",
            MIN_SALT_LEN,
            salt.len()
        )));
    }
    Ok(salt)
}

/// Derive the AEAD key from a password with Argon2id (default parameters).
pub fn derive_key(password: &str, salt: &[u8]) -> CryptoResult<SecretKey> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::InvalidSalt(format!(
            "salt must be at least {} bytes",
            MIN_SALT_LEN
        )));
    }
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(SecretKey(key))
}

/// Password proof sent to the server: lowercase hex SHA-256 of password ‖ salt.
pub fn verification_hash(password: &str, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hex::encode(hasher.finalize())
}
