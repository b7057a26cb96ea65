//! Export service: JSON dumps of the patient table and the audit log for
//! administrators.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapters::StorageError;
use crate::domain::{
    AuditAction, AuditLogEntry, AuditPolicy, Identity, LogQuery, NewAuditEntry, PatientRecord,
    Role,
};
use crate::ports::Storage;
use crate::Result;

use super::audit::AuditService;
use super::{require, store_err};

/// Upper bound on log entries in one export.
pub const EXPORT_LOG_LIMIT: usize = 10_000;

/// What to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Patients,
    Logs,
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patients => f.write_str("patients"),
            Self::Logs => f.write_str("logs"),
        }
    }
}

#[derive(Serialize)]
struct ExportDocument<'a, T: Serialize> {
    kind: ExportKind,
    exported_at: DateTime<Utc>,
    exported_by: &'a str,
    count: usize,
    items: &'a [T],
}

/// Service for audited data exports.
pub struct ExportService<S>
where
    S: Storage,
{
    storage: Arc<S>,
    audit: AuditService<S>,
}

impl<S> ExportService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>, policy: AuditPolicy) -> Self {
        Self {
            audit: AuditService::new(Arc::clone(&storage), policy),
            storage,
        }
    }

    /// Write `kind` as pretty JSON to `out`. Returns the number of items.
    ///
    /// The export is recorded as `EXPORT_DATA` before anything is written.
    ///
    /// # Errors
    /// `PermissionDenied` for non-admins; store, audit (strict policy) and
    /// write failures.
    pub fn export_to<W: Write>(&self, kind: ExportKind, actor: &Identity, out: W) -> Result<usize> {
        require(actor, Role::Admin)?;
        match kind {
            ExportKind::Patients => {
                let patients: Vec<PatientRecord> =
                    self.storage.list_patients(true).map_err(store_err)?;
                self.record(kind, patients.len(), actor)?;
                write_document(kind, actor, &patients, out)
            }
            ExportKind::Logs => {
                let logs: Vec<AuditLogEntry> = self
                    .storage
                    .query_logs(&LogQuery::recent(EXPORT_LOG_LIMIT))
                    .map_err(store_err)?;
                self.record(kind, logs.len(), actor)?;
                write_document(kind, actor, &logs, out)
            }
        }
    }

    /// Export to a newly created (or truncated) file at `path`.
    ///
    /// # Errors
    /// As [`ExportService::export_to`], plus file creation failures.
    pub fn export_to_path(&self, kind: ExportKind, actor: &Identity, path: &Path) -> Result<usize> {
        require(actor, Role::Admin)?;
        let file = File::create(path)?;
        let count = self.export_to(kind, actor, BufWriter::new(file))?;
        tracing::info!(kind = %kind, count, path = %path.display(), "Export written");
        Ok(count)
    }

    fn record(&self, kind: ExportKind, count: usize, actor: &Identity) -> Result<()> {
        self.audit.record(&NewAuditEntry::by(
            actor,
            AuditAction::ExportData,
            format!("Exported {count} {kind}"),
        ))
    }
}

fn write_document<T: Serialize, W: Write>(
    kind: ExportKind,
    actor: &Identity,
    items: &[T],
    mut out: W,
) -> Result<usize> {
    let document = ExportDocument {
        kind,
        exported_at: Utc::now(),
        exported_by: &actor.username,
        count: items.len(),
        items,
    };
    serde_json::to_writer_pretty(&mut out, &document)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteStorage;
    use crate::MedivaultError;

    fn identity(role: Role) -> Identity {
        Identity {
            user_id: 1,
            username: role.as_str().to_string(),
            role,
        }
    }

    #[test]
    fn test_export_logs_is_audited() {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let export = ExportService::new(Arc::clone(&storage), AuditPolicy::default());
        let admin = identity(Role::Admin);

        let mut buf = Vec::new();
        assert_eq!(export.export_to(ExportKind::Logs, &admin, &mut buf).unwrap(), 0);
        let doc: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(doc["kind"], "logs");
        assert_eq!(doc["exported_by"], "admin");

        // The first export's own EXPORT_DATA entry appears in the second.
        let mut buf = Vec::new();
        assert_eq!(export.export_to(ExportKind::Logs, &admin, &mut buf).unwrap(), 1);
        let doc: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(doc["items"][0]["action"], "EXPORT_DATA");
    }

    #[test]
    fn test_export_requires_admin() {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let export = ExportService::new(Arc::clone(&storage), AuditPolicy::default());
        let mut buf = Vec::new();

        assert!(matches!(
            export.export_to(ExportKind::Patients, &identity(Role::Doctor), &mut buf),
            Err(MedivaultError::PermissionDenied { .. })
        ));
        assert!(buf.is_empty());
        assert_eq!(storage.count_logs().unwrap(), 0);
    }

    #[test]
    fn test_export_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patients.json");
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let export = ExportService::new(storage, AuditPolicy::Strict);

        let count = export
            .export_to_path(ExportKind::Patients, &identity(Role::Admin), &path)
            .unwrap();
        assert_eq!(count, 0);
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["count"], 0);
    }
}
