//! Adapters layer: Concrete implementations of ports.
//!
//! - `sqlite`: SQLite for users, patients and the audit log
//! - `keyfile`: the data key on local disk
//! - `sanitize`: PII filtering for logs

pub mod keyfile;
pub mod sanitize;
pub mod sqlite;

pub use keyfile::FileKeyStore;
pub use sqlite::{SqliteStorage, StorageError};
