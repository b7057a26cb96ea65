//! Audit service: reading and writing the processing record.

use std::sync::Arc;

use chrono::Utc;

use crate::adapters::StorageError;
use crate::domain::{
    AuditAction, AuditLogEntry, AuditPolicy, Identity, LogQuery, NewAuditEntry, Role,
};
use crate::ports::{Storage, StorageTx};
use crate::{MedivaultError, Result};

use super::{require, store_err};

/// Append `entry` inside an open transaction, honouring `policy`.
///
/// Under [`AuditPolicy::BestEffort`] a failed insert is logged and the caller
/// carries on, so the surrounding mutation still commits. Under
/// [`AuditPolicy::Strict`] the failure is returned and the caller's `?` drops
/// the transaction, rolling the mutation back. Session events are always best
/// effort.
pub(crate) fn append_in_tx<T>(tx: &mut T, policy: AuditPolicy, entry: &NewAuditEntry) -> Result<()>
where
    T: StorageTx,
    T::Error: Into<StorageError>,
{
    let Err(e) = tx.append_log(entry, Utc::now()) else {
        return Ok(());
    };
    let err: StorageError = e.into();

    if policy == AuditPolicy::Strict && !entry.action.is_session_event() {
        tracing::error!(action = %entry.action, error = %err, "Audit write failed, rolling back");
        return Err(MedivaultError::StoreUnavailable(err));
    }
    tracing::error!(action = %entry.action, error = %err, "Audit write failed, continuing without entry");
    Ok(())
}

/// Service over the append-only audit log.
pub struct AuditService<S>
where
    S: Storage,
{
    storage: Arc<S>,
    policy: AuditPolicy,
}

impl<S> AuditService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>, policy: AuditPolicy) -> Self {
        Self { storage, policy }
    }

    #[must_use]
    pub fn policy(&self) -> AuditPolicy {
        self.policy
    }

    /// Append one entry in its own transaction.
    ///
    /// # Errors
    /// Only under the strict policy, for non-session events, when the entry
    /// cannot be written.
    pub fn record(&self, entry: &NewAuditEntry) -> Result<()> {
        let mut tx = match self.storage.begin() {
            Ok(tx) => tx,
            Err(e) => {
                let err: StorageError = e.into();
                if self.policy == AuditPolicy::Strict && !entry.action.is_session_event() {
                    return Err(MedivaultError::StoreUnavailable(err));
                }
                tracing::error!(action = %entry.action, error = %err, "Audit store unavailable");
                return Ok(());
            }
        };
        append_in_tx(&mut tx, self.policy, entry)?;
        tx.commit().map_err(store_err)
    }

    /// Read the log as an administrator. The read itself is audited as
    /// `VIEW_LOGS`.
    ///
    /// # Errors
    /// `PermissionDenied` for non-admins; store failures.
    pub fn query(&self, actor: &Identity, query: &LogQuery) -> Result<Vec<AuditLogEntry>> {
        require(actor, Role::Admin)?;
        let entries = self.storage.query_logs(query).map_err(store_err)?;
        self.record(&NewAuditEntry::by(
            actor,
            AuditAction::ViewLogs,
            format!("Viewed {} log entries", entries.len()),
        ))?;
        Ok(entries)
    }

    /// Read the log without auditing the read (analytics and export use this).
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    pub fn entries(&self, query: &LogQuery) -> Result<Vec<AuditLogEntry>> {
        self.storage.query_logs(query).map_err(store_err)
    }

    /// # Errors
    /// Returns error if storage operation fails.
    pub fn count(&self) -> Result<usize> {
        self.storage.count_logs().map_err(store_err)
    }
}
