//! Storage port: Trait for persistent storage operations.
//!
//! This trait abstracts the relational backend (SQLite) from the services.
//! Reads go straight through the handle; every mutation runs inside a
//! [`StorageTx`] so that it commits or rolls back together with its audit
//! entry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    AuditLogEntry, LogQuery, NewAuditEntry, PatientRecord, Role, StoredUser, UserAccount,
};

/// Column values for a patient row, as written by add and update.
#[derive(Clone)]
pub struct PatientRow {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub contact: String,
    pub diagnosis: String,
    pub diagnosis_encrypted: String,
}

impl std::fmt::Debug for PatientRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatientRow")
            .field("age", &self.age)
            .field("gender", &self.gender)
            .finish_non_exhaustive()
    }
}

/// Row counts shown on the console dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Patients that are not anonymized.
    pub total_patients: usize,
    pub anonymized_patients: usize,
    pub total_logs: usize,
    pub total_users: usize,
}

/// Trait for the record, audit and credential store.
///
/// Implementations hold a single connection; a live transaction owns it, so
/// calling a read method on the handle while a transaction is open from the
/// same thread blocks.
pub trait Storage: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open transaction borrowing this store.
    type Tx<'a>: StorageTx<Error = Self::Error>
    where
        Self: 'a;

    /// Start a write transaction.
    ///
    /// # Errors
    /// Returns error if the connection is unavailable or already busy.
    fn begin(&self) -> Result<Self::Tx<'_>, Self::Error>;

    /// Load one patient, anonymized or not.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn get_patient(&self, id: i64) -> Result<Option<PatientRecord>, Self::Error>;

    /// Admission time descending, ties broken by id descending.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn list_patients(&self, include_anonymized: bool) -> Result<Vec<PatientRecord>, Self::Error>;

    /// Audit entries matching `query`, newest first.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn query_logs(&self, query: &LogQuery) -> Result<Vec<AuditLogEntry>, Self::Error>;

    /// Total number of audit entries.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn count_logs(&self) -> Result<usize, Self::Error>;

    /// # Errors
    /// Returns error if storage operation fails.
    fn find_user(&self, username: &str) -> Result<Option<StoredUser>, Self::Error>;

    /// # Errors
    /// Returns error if storage operation fails.
    fn list_users(&self) -> Result<Vec<UserAccount>, Self::Error>;

    /// # Errors
    /// Returns error if storage operation fails.
    fn stats(&self) -> Result<DatabaseStats, Self::Error>;
}

/// A write transaction. Dropping it without [`StorageTx::commit`] rolls back.
pub trait StorageTx {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Insert a patient row and return its id.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn insert_patient(
        &mut self,
        row: &PatientRow,
        admission_date: DateTime<Utc>,
    ) -> Result<i64, Self::Error>;

    /// # Errors
    /// Returns error if storage operation fails.
    fn get_patient(&mut self, id: i64) -> Result<Option<PatientRecord>, Self::Error>;

    /// Overwrite the mutable columns of an existing row.
    ///
    /// # Errors
    /// Returns `NotFound` if no row has this id.
    fn update_patient(&mut self, id: i64, row: &PatientRow) -> Result<(), Self::Error>;

    /// Write the anonymization placeholders and set the flag.
    ///
    /// # Errors
    /// Returns `NotFound` if no row has this id.
    fn anonymize_patient(&mut self, id: i64) -> Result<(), Self::Error>;

    /// Append one audit entry timestamped `at`; returns its id.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn append_log(&mut self, entry: &NewAuditEntry, at: DateTime<Utc>) -> Result<i64, Self::Error>;

    /// # Errors
    /// Returns `DuplicateUser` if the username is taken.
    fn insert_user(
        &mut self,
        username: &str,
        password_hash: &str,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<UserAccount, Self::Error>;

    /// # Errors
    /// Returns error if storage operation fails.
    fn count_users(&mut self) -> Result<usize, Self::Error>;

    /// Replace a user's stored credential.
    ///
    /// # Errors
    /// Returns `NotFound` if no user has this id.
    fn set_password_hash(&mut self, user_id: i64, password_hash: &str) -> Result<(), Self::Error>;

    /// Make every write in this transaction durable.
    ///
    /// # Errors
    /// Returns error if the commit fails; the transaction is then rolled back.
    fn commit(self) -> Result<(), Self::Error>;
}
