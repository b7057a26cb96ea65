//! Patient record types.
//!
//! A record is never hard-deleted. Anonymization (GDPR Article 17) replaces the
//! identifying fields with fixed placeholders and sets `is_anonymized`, which is
//! one-way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder written over contact and diagnosis on anonymization.
pub const ANONYMIZED: &str = "ANONYMIZED";

/// Upper bound accepted for `age`.
pub const MAX_AGE: u32 = 120;

/// Name written over an anonymized record: `ANONYMIZED_<id>`.
#[must_use]
pub fn anonymized_name(id: i64) -> String {
    format!("{ANONYMIZED}_{id}")
}

/// Fields supplied when registering or editing a patient.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct PatientInput {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub contact: String,
    /// Plaintext diagnosis; encrypted before it reaches the store.
    pub diagnosis: String,
}

impl PatientInput {
    /// Check the input before it is written.
    ///
    /// # Errors
    /// Returns the list of violated rules.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Name must not be empty".to_string());
        }
        if self.age > MAX_AGE {
            errors.push(format!("Age must be between 0 and {MAX_AGE}, got {}", self.age));
        }
        if self.gender.trim().is_empty() {
            errors.push("Gender must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// Identifying fields stay out of Debug output so they cannot reach the logs.
impl std::fmt::Debug for PatientInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatientInput")
            .field("age", &self.age)
            .field("gender", &self.gender)
            .finish_non_exhaustive()
    }
}

/// A stored patient row.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: i64,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub contact: String,
    /// Plaintext diagnosis column, kept for the legacy schema.
    pub diagnosis: String,
    /// Base64 AES-GCM ciphertext of the diagnosis, `""` when blank.
    pub diagnosis_encrypted: String,
    pub admission_date: DateTime<Utc>,
    pub is_anonymized: bool,
}

impl PatientRecord {
    /// Whether the identifying fields carry the anonymization placeholders.
    #[must_use]
    pub fn has_placeholders(&self) -> bool {
        self.name == anonymized_name(self.id)
            && self.contact == ANONYMIZED
            && self.diagnosis == ANONYMIZED
            && self.diagnosis_encrypted.is_empty()
    }
}

impl std::fmt::Debug for PatientRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatientRecord")
            .field("id", &self.id)
            .field("age", &self.age)
            .field("gender", &self.gender)
            .field("admission_date", &self.admission_date)
            .field("is_anonymized", &self.is_anonymized)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PatientInput {
        PatientInput {
            name: "Ali Khan".to_string(),
            age: 45,
            gender: "Male".to_string(),
            contact: "+92-300-1234567".to_string(),
            diagnosis: "Hypertension".to_string(),
        }
    }

    #[test]
    fn test_valid_input() {
        assert!(input().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_every_error() {
        let bad = PatientInput {
            name: "  ".to_string(),
            age: 121,
            gender: String::new(),
            ..input()
        };
        let errors = bad.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_age_bounds_inclusive() {
        assert!(PatientInput { age: 0, ..input() }.validate().is_ok());
        assert!(PatientInput { age: 120, ..input() }.validate().is_ok());
    }

    #[test]
    fn test_anonymized_name() {
        assert_eq!(anonymized_name(42), "ANONYMIZED_42");
    }

    #[test]
    fn test_debug_hides_identifying_fields() {
        let debug = format!("{:?}", input());
        assert!(!debug.contains("Ali"));
        assert!(!debug.contains("1234567"));
        assert!(!debug.contains("Hypertension"));
    }
}
