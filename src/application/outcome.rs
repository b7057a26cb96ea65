//! User-facing operation results for the console.

use serde::Serialize;

use crate::{MedivaultError, Result};

/// Success flag plus a message safe to show the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failure outcome; store and crypto details stay out of the message.
    #[must_use]
    pub fn failed(err: &MedivaultError) -> Self {
        Self {
            success: false,
            message: err.user_message(),
        }
    }

    /// Map `result` to an outcome, building the success text from its value.
    pub fn from_result<T, F>(result: Result<T>, on_success: F) -> Self
    where
        F: FnOnce(T) -> String,
    {
        match result {
            Ok(value) => Self::ok(on_success(value)),
            Err(e) => {
                tracing::debug!(error = %e, "Operation failed");
                Self::failed(&e)
            }
        }
    }

    #[must_use]
    pub fn patient_added(result: Result<i64>) -> Self {
        Self::from_result(result, |id| format!("Patient added successfully (ID: {id})"))
    }

    #[must_use]
    pub fn patient_updated(id: i64, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok("Patient updated successfully"),
            Err(e) => Self::patient_failed(id, &e),
        }
    }

    #[must_use]
    pub fn patient_anonymized(id: i64, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok("Patient anonymized successfully"),
            Err(e) => Self::patient_failed(id, &e),
        }
    }

    fn patient_failed(id: i64, err: &MedivaultError) -> Self {
        match err {
            MedivaultError::NotFound(_) => Self {
                success: false,
                message: format!("Patient ID {id} not found"),
            },
            other => Self::failed(other),
        }
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.success {
            write!(f, "{}", self.message)
        } else {
            write!(f, "Error: {}", self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StorageError;

    #[test]
    fn test_messages() {
        assert_eq!(
            OperationOutcome::patient_added(Ok(7)).message,
            "Patient added successfully (ID: 7)"
        );
        assert_eq!(
            OperationOutcome::patient_updated(7, Err(MedivaultError::NotFound("patient 7".into()))).message,
            "Patient ID 7 not found"
        );
        assert_eq!(
            OperationOutcome::patient_anonymized(7, Err(MedivaultError::AlreadyAnonymized(7))).message,
            "Patient ID 7 is already anonymized"
        );
    }

    #[test]
    fn test_store_failure_is_generic() {
        let outcome = OperationOutcome::patient_added(Err(MedivaultError::from(
            StorageError::Serialization("disk I/O error at /var/db".into()),
        )));
        assert!(!outcome.success);
        assert!(!outcome.message.contains("/var/db"));
        assert!(outcome.to_string().starts_with("Error: "));
    }
}
