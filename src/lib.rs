//! # Medivault
//!
//! Patient record store with GDPR-motivated protections.
//!
//! This crate provides:
//! - AES-256-GCM field encryption of diagnoses at rest
//! - display-time masking of names and contact details
//! - one-way anonymization (Article 17)
//! - an append-only audit trail written in the same transaction as each
//!   mutation (Article 30)
//! - role-ranked access control for administrators, doctors and receptionists
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core business types (records, users, audit entries, cipher)
//! - `ports`: Trait definitions for storage and key persistence
//! - `adapters`: Concrete implementations (SQLite, key file, log sanitizer)
//! - `application`: Services orchestrating domain and ports
//! - `config`: Environment-driven runtime settings

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use adapters::StorageError;
pub use config::Config;
pub use domain::{Identity, PatientInput, PatientRecord, Role, Session};

/// Result type for Medivault operations
pub type Result<T> = std::result::Result<T, MedivaultError>;

/// Main error type for Medivault
#[derive(Debug, thiserror::Error)]
pub enum MedivaultError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Patient {0} is already anonymized")]
    AlreadyAnonymized(i64),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("Permission denied: requires {required} role")]
    PermissionDenied { required: Role },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(StorageError),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(#[from] domain::CryptoError),

    #[error("Password hashing failed: {0}")]
    Password(#[from] domain::PasswordError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Username already exists: {0}")]
    DuplicateUser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StorageError> for MedivaultError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            StorageError::DuplicateUser(username) => Self::DuplicateUser(username),
            other => Self::StoreUnavailable(other),
        }
    }
}

impl From<ports::KeyStoreError> for MedivaultError {
    fn from(err: ports::KeyStoreError) -> Self {
        match err {
            ports::KeyStoreError::Io(e) => Self::Io(e),
            ports::KeyStoreError::Crypto(e) => Self::Crypto(e),
        }
    }
}

impl MedivaultError {
    /// Text safe to show an end user.
    ///
    /// Store and crypto failures collapse to generic wording; their details
    /// belong in the (sanitized) logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(_) => "Record not found".to_string(),
            Self::AlreadyAnonymized(id) => format!("Patient ID {id} is already anonymized"),
            Self::InvalidCredentials => "invalid credentials".to_string(),
            Self::PermissionDenied { .. } => "You do not have permission for this action".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::DuplicateUser(username) => format!("Username already exists: {username}"),
            Self::StoreUnavailable(_) | Self::Io(_) | Self::Serialization(_) => {
                "The record store is unavailable, please try again".to_string()
            }
            Self::Crypto(_) | Self::Password(_) => "A cryptographic operation failed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_taxonomy() {
        assert!(matches!(
            MedivaultError::from(StorageError::NotFound("patient 9".into())),
            MedivaultError::NotFound(_)
        ));
        assert!(matches!(
            MedivaultError::from(StorageError::DuplicateUser("admin".into())),
            MedivaultError::DuplicateUser(_)
        ));
        assert!(matches!(
            MedivaultError::from(StorageError::Unavailable("lock".into())),
            MedivaultError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn test_user_messages_hide_internals() {
        let err = MedivaultError::from(StorageError::Serialization("no such table: logs".into()));
        assert!(!err.user_message().contains("logs"));
        assert_eq!(MedivaultError::InvalidCredentials.to_string(), "invalid credentials");
    }
}
