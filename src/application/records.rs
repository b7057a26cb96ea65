//! Record service: patient CRUD, anonymization and role-aware views.
//!
//! Every mutation runs in one store transaction together with its audit
//! entry. Log messages carry record ids only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapters::StorageError;
use crate::domain::{
    mask_contact, mask_name, AuditAction, AuditPolicy, FieldCipher, Identity, NewAuditEntry,
    PatientInput, PatientRecord, Role, ANONYMIZED, DECRYPTION_FAILED,
};
use crate::ports::{PatientRow, Storage, StorageTx};
use crate::{MedivaultError, Result};

use super::audit::append_in_tx;
use super::{require, store_err};

/// Shown in place of a diagnosis the viewer may not read.
pub const RESTRICTED: &str = "[RESTRICTED]";

/// The diagnosis as one viewer is allowed to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum DiagnosisView {
    Clear(String),
    Withheld,
    Unreadable,
}

impl std::fmt::Display for DiagnosisView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clear(text) => f.write_str(text),
            Self::Withheld => f.write_str(RESTRICTED),
            Self::Unreadable => f.write_str(DECRYPTION_FAILED),
        }
    }
}

/// A patient record projected for one identity.
///
/// - admin: clear fields, diagnosis decrypted
/// - doctor: name and contact masked, diagnosis withheld
/// - receptionist: clear name and contact, diagnosis withheld
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientView {
    pub id: i64,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub contact: String,
    pub diagnosis: DiagnosisView,
    pub admission_date: DateTime<Utc>,
    pub is_anonymized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeepDiagnosis {
    Yes,
    No,
}

/// Service for patient records.
pub struct RecordService<S>
where
    S: Storage,
{
    storage: Arc<S>,
    cipher: Arc<FieldCipher>,
    policy: AuditPolicy,
}

impl<S> RecordService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>, cipher: Arc<FieldCipher>, policy: AuditPolicy) -> Self {
        Self {
            storage,
            cipher,
            policy,
        }
    }

    fn row_from(&self, input: &PatientInput) -> Result<PatientRow> {
        input
            .validate()
            .map_err(|errors| MedivaultError::Validation(errors.join("; ")))?;

        Ok(PatientRow {
            name: input.name.trim().to_string(),
            age: input.age,
            gender: input.gender.trim().to_string(),
            contact: input.contact.trim().to_string(),
            diagnosis: input.diagnosis.clone(),
            diagnosis_encrypted: self.cipher.encrypt(&input.diagnosis)?,
        })
    }

    /// Register a patient; returns the new id.
    ///
    /// # Errors
    /// `PermissionDenied`, `Validation`, or store failures.
    pub fn add(&self, input: &PatientInput, actor: &Identity) -> Result<i64> {
        require(actor, Role::Receptionist)?;
        let row = self.row_from(input)?;

        let mut tx = self.storage.begin().map_err(store_err)?;
        let id = tx.insert_patient(&row, Utc::now()).map_err(store_err)?;
        append_in_tx(
            &mut tx,
            self.policy,
            &NewAuditEntry::by(
                actor,
                AuditAction::AddPatient,
                format!("Added patient: {} (ID: {id})", row.name),
            ),
        )?;
        tx.commit().map_err(store_err)?;

        tracing::info!(patient_id = id, actor = actor.user_id, "Patient added");
        Ok(id)
    }

    /// Overwrite every mutable field of a patient and re-encrypt the diagnosis.
    ///
    /// # Errors
    /// `NotFound`, `AlreadyAnonymized`, `PermissionDenied`, `Validation`, or
    /// store failures.
    pub fn update(&self, id: i64, input: &PatientInput, actor: &Identity) -> Result<()> {
        require(actor, Role::Receptionist)?;
        let row = self.row_from(input)?;
        self.write_update(id, row, actor, KeepDiagnosis::No)
    }

    /// Update name, age, gender and contact, keeping the stored diagnosis.
    ///
    /// This is the front-desk edit: `input.diagnosis` is ignored.
    ///
    /// # Errors
    /// As [`RecordService::update`].
    pub fn update_demographics(&self, id: i64, input: &PatientInput, actor: &Identity) -> Result<()> {
        require(actor, Role::Receptionist)?;
        let row = self.row_from(&PatientInput {
            diagnosis: String::new(),
            ..input.clone()
        })?;
        self.write_update(id, row, actor, KeepDiagnosis::Yes)
    }

    fn write_update(&self, id: i64, mut row: PatientRow, actor: &Identity, keep: KeepDiagnosis) -> Result<()> {
        let mut tx = self.storage.begin().map_err(store_err)?;
        let current = tx
            .get_patient(id)
            .map_err(store_err)?
            .ok_or_else(|| MedivaultError::NotFound(format!("patient {id}")))?;
        if current.is_anonymized {
            return Err(MedivaultError::AlreadyAnonymized(id));
        }
        // Kept diagnosis comes from this transaction, not an earlier read.
        if keep == KeepDiagnosis::Yes {
            row.diagnosis = current.diagnosis.clone();
            row.diagnosis_encrypted = current.diagnosis_encrypted.clone();
        }

        tx.update_patient(id, &row).map_err(store_err)?;
        append_in_tx(
            &mut tx,
            self.policy,
            &NewAuditEntry::by(
                actor,
                AuditAction::UpdatePatient,
                format!("Updated patient: {} -> {} (ID: {id})", current.name, row.name),
            ),
        )?;
        tx.commit().map_err(store_err)?;

        tracing::info!(patient_id = id, actor = actor.user_id, "Patient updated");
        Ok(())
    }

    /// Irreversibly anonymize a patient (GDPR Article 17).
    ///
    /// A second call on the same record fails with `AlreadyAnonymized`.
    ///
    /// # Errors
    /// `NotFound`, `AlreadyAnonymized`, `PermissionDenied`, or store failures.
    pub fn anonymize(&self, id: i64, actor: &Identity) -> Result<()> {
        require(actor, Role::Admin)?;

        let mut tx = self.storage.begin().map_err(store_err)?;
        let current = tx
            .get_patient(id)
            .map_err(store_err)?
            .ok_or_else(|| MedivaultError::NotFound(format!("patient {id}")))?;
        if current.is_anonymized {
            return Err(MedivaultError::AlreadyAnonymized(id));
        }

        tx.anonymize_patient(id).map_err(store_err)?;
        append_in_tx(
            &mut tx,
            self.policy,
            &NewAuditEntry::by(
                actor,
                AuditAction::AnonymizePatient,
                format!("Anonymized patient: {} (ID: {id})", current.name),
            ),
        )?;
        tx.commit().map_err(store_err)?;

        tracing::info!(patient_id = id, actor = actor.user_id, "Patient anonymized");
        Ok(())
    }

    /// Newest admission first.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    pub fn list(&self, include_anonymized: bool) -> Result<Vec<PatientRecord>> {
        self.storage.list_patients(include_anonymized).map_err(store_err)
    }

    /// # Errors
    /// Returns error if storage operation fails.
    pub fn get(&self, id: i64) -> Result<Option<PatientRecord>> {
        self.storage.get_patient(id).map_err(store_err)
    }

    /// Decrypt a record's diagnosis for display; administrators only.
    ///
    /// Undecryptable ciphertext yields `[DECRYPTION_FAILED]`.
    ///
    /// # Errors
    /// `PermissionDenied` for anyone below admin.
    pub fn decrypt_diagnosis(&self, record: &PatientRecord, actor: &Identity) -> Result<String> {
        require(actor, Role::Admin)?;
        Ok(self.cipher.decrypt_or_placeholder(&record.diagnosis_encrypted))
    }

    /// Project `record` for `viewer`.
    #[must_use]
    pub fn view(&self, record: &PatientRecord, viewer: &Identity) -> PatientView {
        let (name, contact, diagnosis) = match viewer.role {
            Role::Admin => (
                record.name.clone(),
                record.contact.clone(),
                self.admin_diagnosis(record),
            ),
            Role::Doctor => (
                mask_name(&record.name),
                mask_contact(&record.contact),
                DiagnosisView::Withheld,
            ),
            Role::Receptionist => (
                record.name.clone(),
                record.contact.clone(),
                DiagnosisView::Withheld,
            ),
        };

        PatientView {
            id: record.id,
            name,
            age: record.age,
            gender: record.gender.clone(),
            contact,
            diagnosis,
            admission_date: record.admission_date,
            is_anonymized: record.is_anonymized,
        }
    }

    fn admin_diagnosis(&self, record: &PatientRecord) -> DiagnosisView {
        if record.is_anonymized {
            return DiagnosisView::Clear(ANONYMIZED.to_string());
        }
        match self.cipher.decrypt(&record.diagnosis_encrypted) {
            Ok(text) => DiagnosisView::Clear(text),
            Err(e) => {
                tracing::warn!(patient_id = record.id, error = %e, "Diagnosis unreadable under current key");
                DiagnosisView::Unreadable
            }
        }
    }

    /// List records as `viewer` may see them.
    ///
    /// Only administrators may include anonymized rows.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    pub fn list_views(&self, viewer: &Identity, include_anonymized: bool) -> Result<Vec<PatientView>> {
        let include = include_anonymized && viewer.has_permission(Role::Admin);
        Ok(self
            .list(include)?
            .iter()
            .map(|record| self.view(record, viewer))
            .collect())
    }
}
