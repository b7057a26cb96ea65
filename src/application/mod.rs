//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases of the application.

mod analytics;
mod audit;
mod auth;
mod export;
mod outcome;
mod records;
mod seed;

pub use analytics::{
    ActivityReport, AnalyticsService, Dashboard, ACTIVITY_LOG_LIMIT, DASHBOARD_LOG_LIMIT,
};
pub use audit::AuditService;
pub use auth::{AuthService, DEFAULT_USERS};
pub use export::{ExportKind, ExportService, EXPORT_LOG_LIMIT};
pub use outcome::OperationOutcome;
pub use records::{DiagnosisView, PatientView, RecordService, RESTRICTED};
pub use seed::{seed_sample_patients, SAMPLE_PATIENTS};

use crate::adapters::StorageError;
use crate::domain::{Identity, Role};
use crate::{MedivaultError, Result};

pub(crate) fn store_err<E: Into<StorageError>>(e: E) -> MedivaultError {
    MedivaultError::from(e.into())
}

/// Deny unless `actor` holds at least `required`.
pub(crate) fn require(actor: &Identity, required: Role) -> Result<()> {
    if actor.has_permission(required) {
        return Ok(());
    }
    tracing::warn!(
        user_id = actor.user_id,
        role = %actor.role,
        required = %required,
        "Permission denied"
    );
    Err(MedivaultError::PermissionDenied { required })
}
