//! Domain layer: Core business types and logic.
//!
//! Pure types and functions with no storage or I/O. Cryptography lives here
//! because the cipher is a value handed to services, not a port.

mod audit;
mod cipher;
mod masking;
pub mod password;
mod patient;
mod user;

pub use audit::{
    AuditAction, AuditLogEntry, AuditPolicy, LogQuery, NewAuditEntry, UnknownAction,
    DEFAULT_LOG_LIMIT,
};
pub use cipher::{CryptoError, FieldCipher, FieldKey, DECRYPTION_FAILED, EMPTY_CIPHERTEXT, KEY_LEN};
pub use masking::{mask_contact, mask_name};
pub use password::{PasswordError, PasswordScheme};
pub use patient::{anonymized_name, PatientInput, PatientRecord, ANONYMIZED, MAX_AGE};
pub use user::{check_permission, Identity, Role, Session, StoredUser, UnknownRole, UserAccount};
