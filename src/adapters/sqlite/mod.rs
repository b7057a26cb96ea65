//! SQLite adapter: Implementation of Storage.
//!
//! Persists users, patients and the audit log in three tables whose layout is
//! shared with existing hospital databases.
//!
//! # Mutex Behavior
//!
//! The connection is protected by a `Mutex`. A [`SqliteTx`] holds the guard for
//! its whole lifetime, so at most one transaction is open per handle. A
//! poisoned mutex surfaces as [`StorageError::Unavailable`] instead of a panic.
//!
//! # Timestamps
//!
//! Written as RFC 3339 UTC with microseconds (`2024-05-01T09:30:00.000000Z`).
//! Rows from older provisioning scripts (`2024-05-01 09:30:00` or naive ISO
//! 8601) are read as UTC.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, params_from_iter, types::Type, Connection, ErrorCode, Row};

use crate::domain::{
    anonymized_name, password, AuditAction, AuditLogEntry, LogQuery, NewAuditEntry,
    PatientRecord, Role, StoredUser, UserAccount, ANONYMIZED,
};
use crate::ports::{DatabaseStats, PatientRow, Storage, StorageTx};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Username already exists: {0}")]
    DuplicateUser(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL,
        created_at TEXT
    );

    CREATE TABLE IF NOT EXISTS patients (
        patient_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        age INTEGER,
        gender TEXT,
        contact TEXT,
        diagnosis TEXT,
        diagnosis_encrypted TEXT,
        admission_date TEXT,
        is_anonymized INTEGER DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS logs (
        log_id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER,
        role TEXT,
        action TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        details TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_logs_timestamp
        ON logs(timestamp DESC);
";

const PATIENT_COLUMNS: &str = "patient_id, name, age, gender, contact, diagnosis, \
                               diagnosis_encrypted, admission_date, is_anonymized";

/// Format a timestamp the way every column in this store is written.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, accepting the legacy naive formats as UTC.
///
/// # Errors
/// Returns the RFC 3339 parse error if no format matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let raw = raw.trim();
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(rfc_err) => ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
            .ok_or(rfc_err),
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<PatientRecord> {
    let age: i64 = row.get::<_, Option<i64>>(2)?.unwrap_or_default();
    let age = u32::try_from(age).map_err(|e| conversion_error(2, e))?;

    Ok(PatientRecord {
        id: row.get(0)?,
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        age,
        gender: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        contact: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        diagnosis: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        diagnosis_encrypted: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        admission_date: timestamp_column(row, 7)?,
        is_anonymized: row.get::<_, Option<i64>>(8)?.unwrap_or_default() != 0,
    })
}

/// `None` for a row whose action tag is outside [`AuditAction`]; such rows
/// are skipped so one foreign entry cannot hide the rest of the log.
fn log_from_row(row: &Row<'_>) -> rusqlite::Result<Option<AuditLogEntry>> {
    let id: i64 = row.get(0)?;
    // Foreign role strings in old rows are kept as "no role".
    let role = row
        .get::<_, Option<String>>(2)?
        .and_then(|raw| raw.parse::<Role>().ok());
    let action: String = row.get(3)?;
    let Ok(action) = action.parse::<AuditAction>() else {
        tracing::warn!(log_id = id, "Skipping log row with unknown action tag");
        return Ok(None);
    };

    Ok(Some(AuditLogEntry {
        id,
        user_id: row.get(1)?,
        role,
        action,
        timestamp: timestamp_column(row, 4)?,
        details: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    }))
}

/// `None` for an account whose role is outside [`Role`]; such accounts can
/// neither sign in nor be listed.
fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Option<UserAccount>> {
    let id: i64 = row.get(0)?;
    let role: String = row.get(2)?;
    let Ok(role) = role.parse::<Role>() else {
        tracing::warn!(user_id = id, "Ignoring account with unknown role");
        return Ok(None);
    };
    let created_at = match row.get::<_, Option<String>>(3)? {
        Some(raw) => Some(parse_timestamp(&raw).map_err(|e| conversion_error(3, e))?),
        None => None,
    };

    Ok(Some(UserAccount {
        id,
        username: row.get(1)?,
        role,
        created_at,
    }))
}

fn count(conn: &Connection, sql: &str) -> Result<usize, StorageError> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    usize::try_from(n).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn select_patient(conn: &Connection, id: i64) -> Result<Option<PatientRecord>, StorageError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE patient_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id], patient_from_row)?;
    let patient = rows.next().transpose()?;
    Ok(patient)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// SQLite storage adapter.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Create missing tables and migrate an old `users` layout.
    fn init_schema(&self) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        migrate_plaintext_users(&mut conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Run raw SQL against the connection. Test-only escape hatch for
    /// simulating a damaged schema.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), StorageError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Rebuild a `users` table that still stores plaintext in a `password`
/// column, hashing every password with SHA-256.
fn migrate_plaintext_users(conn: &mut Connection) -> Result<(), StorageError> {
    let columns = table_columns(conn, "users")?;
    if columns.is_empty() || columns.iter().any(|c| c == "password_hash") {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch("ALTER TABLE users RENAME TO users_old;")?;
    tx.execute_batch(
        r"
        CREATE TABLE users (
            user_id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT
        );
        ",
    )?;

    let migrated = if columns.iter().any(|c| c == "password") {
        let rows: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare("SELECT username, password, role FROM users_old")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        row.get(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        let now = format_timestamp(Utc::now());
        for (username, plaintext, role) in &rows {
            tx.execute(
                "INSERT INTO users (username, password_hash, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![username, password::hash_password(plaintext), role, now],
            )?;
        }
        rows.len()
    } else {
        0
    };

    tx.execute_batch("DROP TABLE users_old;")?;
    tx.commit()?;
    tracing::warn!(migrated, "Migrated users table to hashed passwords");
    Ok(())
}

impl Storage for SqliteStorage {
    type Error = StorageError;
    type Tx<'a> = SqliteTx<'a>;

    fn begin(&self) -> Result<SqliteTx<'_>, StorageError> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteTx {
            conn,
            finished: false,
        })
    }

    fn get_patient(&self, id: i64) -> Result<Option<PatientRecord>, Self::Error> {
        let conn = self.lock()?;
        select_patient(&conn, id)
    }

    fn list_patients(&self, include_anonymized: bool) -> Result<Vec<PatientRecord>, Self::Error> {
        let conn = self.lock()?;
        let filter = if include_anonymized {
            ""
        } else {
            "WHERE COALESCE(is_anonymized, 0) = 0"
        };
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients {filter} \
             ORDER BY admission_date DESC, patient_id DESC"
        );

        let mut stmt = conn.prepare(&sql)?;
        let patients = stmt
            .query_map([], patient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patients)
    }

    fn query_logs(&self, query: &LogQuery) -> Result<Vec<AuditLogEntry>, Self::Error> {
        let mut clauses = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(action) = query.action {
            clauses.push("action = ?");
            values.push(action.as_str().to_string().into());
        }
        if let Some(user_id) = query.user_id {
            clauses.push("user_id = ?");
            values.push(user_id.into());
        }
        if let Some(role) = query.role {
            clauses.push("role = ?");
            values.push(role.as_str().to_string().into());
        }
        if let Some(since) = query.since {
            clauses.push("timestamp >= ?");
            values.push(format_timestamp(since).into());
        }
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        values.push(limit.into());

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT log_id, user_id, role, action, timestamp, details FROM logs {filter} \
             ORDER BY timestamp DESC, log_id DESC LIMIT ?"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values), log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries.into_iter().flatten().collect())
    }

    fn count_logs(&self) -> Result<usize, Self::Error> {
        let conn = self.lock()?;
        count(&conn, "SELECT COUNT(*) FROM logs")
    }

    fn find_user(&self, username: &str) -> Result<Option<StoredUser>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, username, role, created_at, password_hash FROM users WHERE username = ?1",
        )?;
        let mut rows = stmt.query_map(params![username], |row| {
            let password_hash: String = row.get(4)?;
            Ok(account_from_row(row)?.map(|account| StoredUser {
                account,
                password_hash,
            }))
        })?;
        let user = rows.next().transpose()?.flatten();
        Ok(user)
    }

    fn list_users(&self) -> Result<Vec<UserAccount>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT user_id, username, role, created_at FROM users ORDER BY user_id")?;
        let users = stmt
            .query_map([], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users.into_iter().flatten().collect())
    }

    fn stats(&self) -> Result<DatabaseStats, Self::Error> {
        let conn = self.lock()?;
        Ok(DatabaseStats {
            total_patients: count(
                &conn,
                "SELECT COUNT(*) FROM patients WHERE COALESCE(is_anonymized, 0) = 0",
            )?,
            anonymized_patients: count(
                &conn,
                "SELECT COUNT(*) FROM patients WHERE COALESCE(is_anonymized, 0) = 1",
            )?,
            total_logs: count(&conn, "SELECT COUNT(*) FROM logs")?,
            total_users: count(&conn, "SELECT COUNT(*) FROM users")?,
        })
    }
}

/// An open `BEGIN IMMEDIATE` transaction holding the connection lock.
///
/// Rolled back on drop unless [`StorageTx::commit`] succeeded.
pub struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl StorageTx for SqliteTx<'_> {
    type Error = StorageError;

    fn insert_patient(
        &mut self,
        row: &PatientRow,
        admission_date: DateTime<Utc>,
    ) -> Result<i64, Self::Error> {
        self.conn.execute(
            r"
            INSERT INTO patients
                (name, age, gender, contact, diagnosis, diagnosis_encrypted, admission_date, is_anonymized)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
            ",
            params![
                row.name,
                row.age,
                row.gender,
                row.contact,
                row.diagnosis,
                row.diagnosis_encrypted,
                format_timestamp(admission_date),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(patient_id = id, "Inserted patient row");
        Ok(id)
    }

    fn get_patient(&mut self, id: i64) -> Result<Option<PatientRecord>, Self::Error> {
        select_patient(&self.conn, id)
    }

    fn update_patient(&mut self, id: i64, row: &PatientRow) -> Result<(), Self::Error> {
        let changed = self.conn.execute(
            r"
            UPDATE patients
            SET name = ?1, age = ?2, gender = ?3, contact = ?4,
                diagnosis = ?5, diagnosis_encrypted = ?6
            WHERE patient_id = ?7
            ",
            params![
                row.name,
                row.age,
                row.gender,
                row.contact,
                row.diagnosis,
                row.diagnosis_encrypted,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("patient {id}")));
        }
        Ok(())
    }

    fn anonymize_patient(&mut self, id: i64) -> Result<(), Self::Error> {
        let changed = self.conn.execute(
            r"
            UPDATE patients
            SET name = ?1, contact = ?2, diagnosis = ?2,
                diagnosis_encrypted = '', is_anonymized = 1
            WHERE patient_id = ?3
            ",
            params![anonymized_name(id), ANONYMIZED, id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("patient {id}")));
        }
        Ok(())
    }

    fn append_log(&mut self, entry: &NewAuditEntry, at: DateTime<Utc>) -> Result<i64, Self::Error> {
        self.conn.execute(
            "INSERT INTO logs (user_id, role, action, timestamp, details) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.user_id,
                entry.role.map(Role::as_str),
                entry.action.as_str(),
                format_timestamp(at),
                entry.details,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_user(
        &mut self,
        username: &str,
        password_hash: &str,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<UserAccount, Self::Error> {
        let created_at = created_at.trunc_subsecs(6);
        self.conn
            .execute(
                "INSERT INTO users (username, password_hash, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![username, password_hash, role.as_str(), format_timestamp(created_at)],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::DuplicateUser(username.to_string())
                } else {
                    StorageError::Database(e)
                }
            })?;

        Ok(UserAccount {
            id: self.conn.last_insert_rowid(),
            username: username.to_string(),
            role,
            created_at: Some(created_at),
        })
    }

    fn count_users(&mut self) -> Result<usize, Self::Error> {
        count(&self.conn, "SELECT COUNT(*) FROM users")
    }

    fn set_password_hash(&mut self, user_id: i64, password_hash: &str) -> Result<(), Self::Error> {
        let changed = self.conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE user_id = ?2",
            params![password_hash, user_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    fn commit(mut self) -> Result<(), Self::Error> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %e, "Rollback failed");
        } else {
            tracing::debug!("Transaction rolled back");
        }
    }
}
