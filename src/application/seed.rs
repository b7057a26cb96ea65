//! Demonstration data for a fresh database.

use chrono::Utc;

use crate::adapters::StorageError;
use crate::domain::{AuditAction, AuditPolicy, FieldCipher, NewAuditEntry};
use crate::ports::{PatientRow, Storage, StorageTx};
use crate::Result;

use super::audit::append_in_tx;
use super::store_err;

/// (name, age, gender, contact, diagnosis)
pub const SAMPLE_PATIENTS: [(&str, u32, &str, &str, &str); 25] = [
    ("John Doe", 45, "Male", "+1234567890", "Hypertension"),
    ("Jane Smith", 32, "Female", "jane@email.com", "Asthma"),
    ("Bob Johnson", 67, "Male", "+1987654321", "Diabetes Type 2"),
    ("Alice Brown", 28, "Female", "alice@email.com", "Migraine"),
    ("Charlie Wilson", 52, "Male", "+1555123456", "Coronary Artery Disease"),
    ("Diana Davis", 41, "Female", "diana@email.com", "Thyroid Disorder"),
    ("Edward Miller", 73, "Male", "+1444987654", "Osteoarthritis"),
    ("Fiona Garcia", 36, "Female", "fiona@email.com", "Depression"),
    ("George Lee", 59, "Male", "+1333876543", "Chronic Kidney Disease"),
    ("Helen Taylor", 24, "Female", "helen@email.com", "Anxiety Disorder"),
    ("Ian Anderson", 38, "Male", "+1222765432", "Back Pain"),
    ("Julia Martinez", 55, "Female", "julia@email.com", "High Cholesterol"),
    ("Kevin White", 49, "Male", "+1111654321", "GERD"),
    ("Laura Thompson", 31, "Female", "laura@email.com", "Allergies"),
    ("Michael Harris", 64, "Male", "+1000543210", "Prostate Issues"),
    ("Nancy Clark", 27, "Female", "nancy@email.com", "Insomnia"),
    ("Oliver Lewis", 43, "Male", "+1999432109", "Arthritis"),
    ("Paula Walker", 39, "Female", "paula@email.com", "Fibromyalgia"),
    ("Quincy Hall", 71, "Male", "+1888321098", "COPD"),
    ("Rachel Young", 33, "Female", "rachel@email.com", "Endometriosis"),
    ("Samuel King", 58, "Male", "+1777210987", "Sleep Apnea"),
    ("Tina Wright", 46, "Female", "tina@email.com", "Irritable Bowel Syndrome"),
    ("Ulysses Adams", 62, "Male", "+1666109876", "Parkinson's Disease"),
    ("Victoria Nelson", 29, "Female", "victoria@email.com", "PCOS"),
    ("William Carter", 54, "Male", "+1555098765", "Hepatitis C"),
];

/// Insert [`SAMPLE_PATIENTS`] if the patient table is empty. Returns how many
/// rows were inserted.
///
/// # Errors
/// Returns error if encryption or storage fails.
pub fn seed_sample_patients<S>(storage: &S, cipher: &FieldCipher, policy: AuditPolicy) -> Result<usize>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    let stats = storage.stats().map_err(store_err)?;
    if stats.total_patients + stats.anonymized_patients > 0 {
        return Ok(0);
    }

    let mut rows = Vec::with_capacity(SAMPLE_PATIENTS.len());
    for (name, age, gender, contact, diagnosis) in SAMPLE_PATIENTS {
        rows.push(PatientRow {
            name: name.to_string(),
            age,
            gender: gender.to_string(),
            contact: contact.to_string(),
            diagnosis: diagnosis.to_string(),
            diagnosis_encrypted: cipher.encrypt(diagnosis)?,
        });
    }

    let mut tx = storage.begin().map_err(store_err)?;
    let now = Utc::now();
    for row in &rows {
        tx.insert_patient(row, now).map_err(store_err)?;
    }
    append_in_tx(
        &mut tx,
        policy,
        &NewAuditEntry::anonymous(
            AuditAction::AddPatient,
            format!("Seeded {} sample patients", rows.len()),
        ),
    )?;
    tx.commit().map_err(store_err)?;

    tracing::info!(count = rows.len(), "Seeded sample patients");
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteStorage;
    use crate::domain::{FieldKey, KEY_LEN};

    #[test]
    fn test_seed_once() {
        let storage = SqliteStorage::in_memory().unwrap();
        let cipher = FieldCipher::new(&FieldKey::from_bytes(&[9u8; KEY_LEN]).unwrap());

        assert_eq!(seed_sample_patients(&storage, &cipher, AuditPolicy::Strict).unwrap(), 25);
        assert_eq!(seed_sample_patients(&storage, &cipher, AuditPolicy::Strict).unwrap(), 0);

        let patients = storage.list_patients(false).unwrap();
        assert_eq!(patients.len(), 25);
        let john = patients.iter().find(|p| p.name == "John Doe").unwrap();
        assert_eq!(cipher.decrypt(&john.diagnosis_encrypted).unwrap(), "Hypertension");
        assert_eq!(storage.count_logs().unwrap(), 1);
    }
}
