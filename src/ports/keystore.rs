//! Key store port: where the field encryption key lives.

use crate::domain::{CryptoError, FieldKey};

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("Key file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Source of the single data key.
pub trait KeyStore {
    /// Load the persisted key, creating it first if none exists.
    ///
    /// Idempotent: once a key exists it is returned unchanged.
    ///
    /// # Errors
    /// Returns error if the key cannot be read or written, or the persisted
    /// key has the wrong length.
    fn load_or_create(&self) -> Result<FieldKey, KeyStoreError>;
}
