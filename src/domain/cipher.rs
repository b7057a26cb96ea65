//! Field-level encryption for sensitive patient columns.
//!
//! One AES-256-GCM key protects every encrypted column in the store. The stored
//! form of a ciphertext is standard base64 of `nonce (12 bytes) || ciphertext || tag`.
//!
//! # Memory Security
//!
//! `FieldKey` implements `Zeroize` and `ZeroizeOnDrop`; its `Debug` output only
//! shows a SHA-256 fingerprint.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the symmetric key in bytes.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Ciphertext stored for blank plaintext.
pub const EMPTY_CIPHERTEXT: &str = "";

/// Placeholder shown instead of a diagnosis that cannot be decrypted.
pub const DECRYPTION_FAILED: &str = "[DECRYPTION_FAILED]";

/// Error type for cryptographic operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Ciphertext is not valid base64")]
    Encoding,

    #[error("Ciphertext is truncated ({0} bytes)")]
    Truncated(usize),

    #[error("Decryption failed: authentication tag mismatch")]
    Authentication,

    #[error("Decrypted text is not valid UTF-8")]
    Utf8,
}

/// The symmetric key used for all field encryption.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FieldKey {
    bytes: [u8; KEY_LEN],

    /// Key fingerprint for identification (NOT secret)
    #[zeroize(skip)]
    pub fingerprint: String,
}

impl FieldKey {
    /// Generate fresh key material from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        let key = Self::from_array(bytes);
        bytes.zeroize();
        key
    }

    /// Build a key from raw bytes.
    ///
    /// # Errors
    /// Returns `InvalidKeyFormat` unless exactly 32 bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyFormat(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_array(array))
    }

    fn from_array(bytes: [u8; KEY_LEN]) -> Self {
        let fingerprint = compute_fingerprint(&bytes);
        Self { bytes, fingerprint }
    }

    /// Get the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// Intentionally NOT deriving Debug to prevent accidental key leakage
impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldKey")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Encrypts and decrypts individual text fields under one `FieldKey`.
///
/// Constructed once and handed to every service that needs it; there is no
/// process-wide cipher.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl FieldCipher {
    /// Create a cipher bound to `key`.
    #[must_use]
    pub fn new(key: &FieldKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
            fingerprint: key.fingerprint.clone(),
        }
    }

    /// Fingerprint of the key this cipher was built from.
    #[must_use]
    pub fn key_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypt a text field.
    ///
    /// Blank input (empty or whitespace only) maps to `EMPTY_CIPHERTEXT`
    /// without touching the cipher.
    ///
    /// # Errors
    /// Returns `CryptoError::Encryption` if the AEAD rejects the input.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.trim().is_empty() {
            return Ok(EMPTY_CIPHERTEXT.to_string());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut framed = Vec::with_capacity(NONCE_LEN + sealed.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(framed))
    }

    /// Encrypt an optional field; `None` behaves like blank input.
    ///
    /// # Errors
    /// See [`FieldCipher::encrypt`].
    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<String, CryptoError> {
        plaintext.map_or_else(|| Ok(EMPTY_CIPHERTEXT.to_string()), |p| self.encrypt(p))
    }

    /// Decrypt a text field produced by [`FieldCipher::encrypt`].
    ///
    /// # Errors
    /// Distinguishes malformed encoding, truncation, authentication failure
    /// (wrong key or tampering) and non-UTF-8 plaintext.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let trimmed = ciphertext.trim();
        if trimmed.is_empty() {
            return Ok(String::new());
        }

        let framed = general_purpose::STANDARD
            .decode(trimmed)
            .map_err(|_| CryptoError::Encoding)?;
        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated(framed.len()));
        }

        let (nonce, sealed) = framed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
    }

    /// Decrypt for display: failures become `DECRYPTION_FAILED`.
    #[must_use]
    pub fn decrypt_or_placeholder(&self, ciphertext: &str) -> String {
        match self.decrypt(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(
                    key_fingerprint = %self.fingerprint,
                    error = %e,
                    "Ciphertext unreadable under current key, showing placeholder"
                );
                DECRYPTION_FAILED.to_string()
            }
        }
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("key_fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// First 8 bytes of SHA-256 over the key, hex encoded.
fn compute_fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
