//! Password hashing and verification.
//!
//! Two stored formats coexist in the `users` table:
//! - unsalted SHA-256 hex (64 characters), the format existing databases use
//! - Argon2id PHC strings (`$argon2id$...`), random salt per password
//!
//! Verification dispatches on the stored format, so switching the scheme for
//! new accounts never locks out old ones. Anything else in the column is a
//! legacy plaintext credential, see [`StoredCredential::Legacy`].

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Errors raised while hashing a password.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Unknown password scheme: {0}")]
    UnknownScheme(String),
}

/// Hash format used for newly written credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordScheme {
    /// Unsalted SHA-256 hex; deterministic and compatible with existing rows.
    #[default]
    Sha256,
    /// Salted, memory-hard Argon2id.
    Argon2id,
}

impl PasswordScheme {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Argon2id => "argon2id",
        }
    }

    /// Hash `password` in this scheme.
    ///
    /// # Errors
    /// Returns error if Argon2 rejects its parameters.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        match self {
            Self::Sha256 => Ok(hash_password(password)),
            Self::Argon2id => hash_argon2id(password),
        }
    }
}

impl std::str::FromStr for PasswordScheme {
    type Err = PasswordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "argon2id" | "argon2" => Ok(Self::Argon2id),
            other => Err(PasswordError::UnknownScheme(other.to_string())),
        }
    }
}

impl std::fmt::Display for PasswordScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of value sits in a `password_hash` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredCredential<'a> {
    Sha256Hex(&'a str),
    Phc(&'a str),
    /// Not hash-shaped: a plaintext password carried over from an old schema.
    Legacy(&'a str),
}

impl<'a> StoredCredential<'a> {
    #[must_use]
    pub fn classify(stored: &'a str) -> Self {
        if stored.starts_with("$argon2") {
            Self::Phc(stored)
        } else if stored.len() == 64 && stored.bytes().all(|b| b.is_ascii_hexdigit()) {
            Self::Sha256Hex(stored)
        } else {
            Self::Legacy(stored)
        }
    }

    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

/// Unsalted SHA-256 of the UTF-8 password, lowercase hex.
///
/// Deterministic: the same password always yields the same hash.
#[must_use]
pub fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn argon2id() -> Result<Argon2<'static>, PasswordError> {
    let params = Params::new(47104, 1, 1, Some(32))
        .map_err(|e| PasswordError::Hashing(format!("Invalid Argon2 params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn hash_argon2id(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut aes_gcm::aead::OsRng);
    argon2id()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Check `password` against a stored SHA-256 or Argon2id hash.
///
/// Legacy plaintext values never verify here; they are only accepted through
/// the time-boxed migration path in the authentication service.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    match StoredCredential::classify(stored) {
        StoredCredential::Sha256Hex(expected) => {
            constant_time_eq_str(&hash_password(password), &expected.to_ascii_lowercase())
        }
        StoredCredential::Phc(phc) => match PasswordHash::new(phc) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored Argon2 hash is malformed");
                false
            }
        },
        StoredCredential::Legacy(_) => false,
    }
}

// Constant-time compare for ASCII hex digests.
fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_is_deterministic() {
        let hash1 = hash_password("testpass123");
        let hash2 = hash_password("testpass123");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_password("testpass124"));
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hash_password("admin123"),
            "240be518fabd2724ddb6f04eeb1da5967448d7e831c08c8fa822809f74c720a9"
        );
    }

    #[test]
    fn test_verify_sha256() {
        let stored = hash_password("doctor123");
        assert!(verify_password("doctor123", &stored));
        assert!(!verify_password("doctor124", &stored));
    }

    #[test]
    fn test_verify_uppercase_sha256() {
        let stored = hash_password("nurse123").to_ascii_uppercase();
        assert!(matches!(StoredCredential::classify(&stored), StoredCredential::Sha256Hex(_)));
        assert!(verify_password("nurse123", &stored));
        assert!(!verify_password("nurse124", &stored));
    }

    #[test]
    fn test_constant_time_eq_str() {
        assert!(constant_time_eq_str("abc", "abc"));
        assert!(!constant_time_eq_str("abc", "abd"));
        assert!(!constant_time_eq_str("abc", "abcd"));
    }

    #[test]
    fn test_argon2id_roundtrip() {
        let stored = PasswordScheme::Argon2id.hash("recept123").expect("Hashing should succeed");
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify_password("recept123", &stored));
        assert!(!verify_password("recept124", &stored));
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            StoredCredential::classify(&hash_password("x")),
            StoredCredential::Sha256Hex(_)
        ));
        assert!(matches!(
            StoredCredential::classify("$argon2id$v=19$m=47104,t=1,p=1$c2FsdA$aGFzaA"),
            StoredCredential::Phc(_)
        ));
        assert!(StoredCredential::classify("admin123").is_legacy());
    }

    #[test]
    fn test_legacy_plaintext_never_verifies() {
        assert!(!verify_password("admin123", "admin123"));
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!("SHA256".parse::<PasswordScheme>().unwrap(), PasswordScheme::Sha256);
        assert_eq!("argon2id".parse::<PasswordScheme>().unwrap(), PasswordScheme::Argon2id);
        assert!("md5".parse::<PasswordScheme>().is_err());
    }
}
