//! Key material and blob encryption
//!
//! The master key is random and persisted once. The working AES-256-GCM key
//! is derived from it with PBKDF2-HMAC-SHA256 over a salt; rotation replaces
//! only the salt (and so the derived key).
//!
//! Blob layout: `MAGIC || salt (16 bytes) || nonce (12 bytes) || ciphertext+tag`.
//! The salt travels with the blob so a reader can tell which derived key
//! sealed it even when the salt file on disk disagrees.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use quill_core::{StorageError, Timestamp};
use sha2::Sha256;
use std::time::Duration;

pub const MASTER_KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Blob format marker.
pub const BLOB_MAGIC: &[u8; 4] = b"QCB2";

pub type MasterKey = [u8; MASTER_KEY_LEN];
pub type Salt = [u8; SALT_LEN];

pub fn generate_master_key() -> MasterKey {
    rand::random()
}

pub fn generate_salt() -> Salt {
    rand::random()
}

const HEADER_LEN: usize = BLOB_MAGIC.len() + SALT_LEN + NONCE_LEN;

/// Salt recorded in a blob header.
pub fn blob_salt(blob: &[u8]) -> Result<Salt, StorageError> {
    if blob.len() < HEADER_LEN || &blob[..BLOB_MAGIC.len()] != BLOB_MAGIC {
        return Err(StorageError::Decryption {
            reason: "unrecognized blob header".to_string(),
        });
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&blob[BLOB_MAGIC.len()..BLOB_MAGIC.len() + SALT_LEN]);
    Ok(salt)
}

/// Active key material for one cache.
pub struct EncryptionContext {
    master_key: MasterKey,
    salt: Salt,
    cipher: Aes256Gcm,
    iterations: u32,
    last_rotation: Timestamp,
}

impl EncryptionContext {
    pub fn new(
        master_key: MasterKey,
        salt: Salt,
        iterations: u32,
        last_rotation: Timestamp,
    ) -> Result<Self, StorageError> {
        let cipher = derive_cipher(&master_key, &salt, iterations)?;
        Ok(Self {
            master_key,
            salt,
            cipher,
            iterations,
            last_rotation,
        })
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    pub fn last_rotation(&self) -> Timestamp {
        self.last_rotation
    }

    pub fn set_last_rotation(&mut self, at: Timestamp) {
        self.last_rotation = at;
    }

    /// Whether `interval` has elapsed since the last rotation.
    pub fn rotation_due(&self, interval: Duration, now: Timestamp) -> bool {
        let elapsed = now.signed_duration_since(self.last_rotation);
        // A clock that went backwards never triggers rotation
        elapsed
            .to_std()
            .map(|elapsed| elapsed >= interval)
            .unwrap_or(false)
    }

    /// Context derived from the same master key with a fresh salt.
    ///
    /// `self` is left untouched so the caller can keep it if persisting the
    /// new salt fails.
    pub fn rotated(&self, now: Timestamp) -> Result<Self, StorageError> {
        Self::new(self.master_key, generate_salt(), self.iterations, now)
    }

    /// Context for the same master key under `salt`, keeping the rotation time.
    pub fn with_salt(&self, salt: Salt) -> Result<Self, StorageError> {
        Self::new(self.master_key, salt, self.iterations, self.last_rotation)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = GenericArray::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| StorageError::Encryption {
                reason: e.to_string(),
            })?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.extend_from_slice(BLOB_MAGIC);
        blob.extend_from_slice(&self.salt);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, StorageError> {
        if blob_salt(blob)? != self.salt {
            return Err(StorageError::Decryption {
                reason: "blob sealed under a different salt".to_string(),
            });
        }
        let nonce = GenericArray::from_slice(&blob[HEADER_LEN - NONCE_LEN..HEADER_LEN]);
        self.cipher
            .decrypt(nonce, &blob[HEADER_LEN..])
            .map_err(|_| StorageError::Decryption {
                reason: "authentication failed (wrong key or tampered blob)".to_string(),
            })
    }
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("master_key", &"[REDACTED]")
            .field("salt", &hex::encode(self.salt))
            .field("iterations", &self.iterations)
            .field("last_rotation", &self.last_rotation)
            .finish()
    }
}

fn derive_cipher(master_key: &MasterKey, salt: &Salt, iterations: u32) -> Result<Aes256Gcm, StorageError> {
    let mut derived = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(master_key, salt, iterations, &mut derived);
    Aes256Gcm::new_from_slice(&derived).map_err(|e| StorageError::Encryption {
        reason: e.to_string(),
    })
}
