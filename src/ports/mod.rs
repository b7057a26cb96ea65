//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the services and external systems (database, key file).

mod keystore;
mod storage;

pub use keystore::{KeyStore, KeyStoreError};
pub use storage::{DatabaseStats, PatientRow, Storage, StorageTx};
