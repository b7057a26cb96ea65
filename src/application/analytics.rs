//! Analytics service: aggregate views over the audit trail and patient
//! demographics for the admin dashboard.
//!
//! Reports contain counts only, never names or contact details.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Timelike};
use serde::Serialize;

use crate::adapters::StorageError;
use crate::domain::{AuditLogEntry, Identity, LogQuery, PatientRecord, Role};
use crate::ports::{DatabaseStats, Storage};
use crate::Result;

use super::{require, store_err};

/// Audit entries considered by an activity report.
pub const ACTIVITY_LOG_LIMIT: usize = 500;

/// Recent entries shown on the dashboard.
pub const DASHBOARD_LOG_LIMIT: usize = 10;

/// Label used for entries without a recorded role.
pub const UNKNOWN_ROLE: &str = "unknown";

/// Headline numbers plus the most recent log entries.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub stats: DatabaseStats,
    pub recent_logs: Vec<AuditLogEntry>,
}

/// Aggregated activity and demographics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityReport {
    pub actions_per_day: BTreeMap<NaiveDate, usize>,
    pub actions_per_role: BTreeMap<String, usize>,
    pub actions_per_type: BTreeMap<String, usize>,
    /// Entries per hour of day (UTC), all 24 hours present.
    pub hourly_activity: [usize; 24],
    /// Patients per age decade, keyed by the decade's lower bound.
    pub age_distribution: BTreeMap<u32, usize>,
    pub mean_age: Option<f64>,
    pub gender_counts: BTreeMap<String, usize>,
    pub logs_considered: usize,
    pub patients_considered: usize,
}

impl ActivityReport {
    /// Build a report from already-loaded entries and records.
    #[must_use]
    pub fn build(logs: &[AuditLogEntry], patients: &[PatientRecord]) -> Self {
        let mut report = Self {
            logs_considered: logs.len(),
            patients_considered: patients.len(),
            ..Self::default()
        };

        for entry in logs {
            *report
                .actions_per_day
                .entry(entry.timestamp.date_naive())
                .or_default() += 1;
            let role = entry.role.map_or(UNKNOWN_ROLE, Role::as_str);
            *report.actions_per_role.entry(role.to_string()).or_default() += 1;
            *report
                .actions_per_type
                .entry(entry.action.as_str().to_string())
                .or_default() += 1;
            report.hourly_activity[entry.timestamp.hour() as usize] += 1;
        }

        for patient in patients {
            *report.age_distribution.entry(patient.age / 10 * 10).or_default() += 1;
            let gender = if patient.gender.trim().is_empty() {
                "Unspecified"
            } else {
                patient.gender.trim()
            };
            *report.gender_counts.entry(gender.to_string()).or_default() += 1;
        }

        if !patients.is_empty() {
            let total: u64 = patients.iter().map(|p| u64::from(p.age)).sum();
            report.mean_age = Some(total as f64 / patients.len() as f64);
        }

        report
    }

    /// The busiest hour of day, if any activity was seen.
    #[must_use]
    pub fn peak_hour(&self) -> Option<usize> {
        let (hour, count) = self
            .hourly_activity
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))?;
        (*count > 0).then_some(hour)
    }
}

/// Service for administrator reporting.
pub struct AnalyticsService<S>
where
    S: Storage,
{
    storage: Arc<S>,
}

impl<S> AnalyticsService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// # Errors
    /// `PermissionDenied` for non-admins; store failures.
    pub fn dashboard(&self, actor: &Identity) -> Result<Dashboard> {
        require(actor, Role::Admin)?;
        let stats = self.storage.stats().map_err(store_err)?;
        let recent_logs = self
            .storage
            .query_logs(&LogQuery::recent(DASHBOARD_LOG_LIMIT))
            .map_err(store_err)?;
        Ok(Dashboard { stats, recent_logs })
    }

    /// Activity over the latest [`ACTIVITY_LOG_LIMIT`] entries and the
    /// demographics of non-anonymized patients.
    ///
    /// # Errors
    /// `PermissionDenied` for non-admins; store failures.
    pub fn activity_report(&self, actor: &Identity) -> Result<ActivityReport> {
        require(actor, Role::Admin)?;
        let logs = self
            .storage
            .query_logs(&LogQuery::recent(ACTIVITY_LOG_LIMIT))
            .map_err(store_err)?;
        let patients = self.storage.list_patients(false).map_err(store_err)?;

        let report = ActivityReport::build(&logs, &patients);
        tracing::debug!(
            logs = report.logs_considered,
            patients = report.patients_considered,
            "Built activity report"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteStorage;
    use crate::domain::AuditAction;
    use crate::MedivaultError;
    use chrono::{TimeZone, Utc};

    fn entry(id: i64, action: AuditAction, role: Option<Role>, hour: u32, day: u32) -> AuditLogEntry {
        AuditLogEntry {
            id,
            user_id: Some(1),
            role,
            action,
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, hour, 15, 0).unwrap(),
            details: String::new(),
        }
    }

    fn patient(id: i64, age: u32, gender: &str) -> PatientRecord {
        PatientRecord {
            id,
            name: format!("P{id}"),
            age,
            gender: gender.to_string(),
            contact: String::new(),
            diagnosis: String::new(),
            diagnosis_encrypted: String::new(),
            admission_date: Utc::now(),
            is_anonymized: false,
        }
    }

    #[test]
    fn test_build_report() {
        let logs = vec![
            entry(1, AuditAction::Login, Some(Role::Admin), 9, 1),
            entry(2, AuditAction::AddPatient, Some(Role::Receptionist), 9, 1),
            entry(3, AuditAction::AddPatient, None, 14, 2),
        ];
        let patients = vec![patient(1, 45, "Male"), patient(2, 32, "Female"), patient(3, 38, "")];

        let report = ActivityReport::build(&logs, &patients);

        assert_eq!(report.actions_per_day.len(), 2);
        assert_eq!(
            report.actions_per_day[&NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()],
            2
        );
        assert_eq!(report.actions_per_role[UNKNOWN_ROLE], 1);
        assert_eq!(report.actions_per_type["ADD_PATIENT"], 2);
        assert_eq!(report.hourly_activity.iter().sum::<usize>(), 3);
        assert_eq!(report.hourly_activity[9], 2);
        assert_eq!(report.peak_hour(), Some(9));

        assert_eq!(report.age_distribution[&30], 2);
        assert_eq!(report.age_distribution[&40], 1);
        let mean = report.mean_age.unwrap();
        assert!((mean - 115.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.gender_counts["Unspecified"], 1);
    }

    #[test]
    fn test_empty_report() {
        let report = ActivityReport::build(&[], &[]);
        assert!(report.mean_age.is_none());
        assert_eq!(report.peak_hour(), None);
        assert_eq!(report.hourly_activity.len(), 24);
    }

    #[test]
    fn test_dashboard_requires_admin() {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let analytics = AnalyticsService::new(storage);
        let doctor = Identity {
            user_id: 2,
            username: "doctor1".to_string(),
            role: Role::Doctor,
        };
        let admin = Identity {
            user_id: 1,
            username: "admin".to_string(),
            role: Role::Admin,
        };

        assert!(matches!(
            analytics.dashboard(&doctor),
            Err(MedivaultError::PermissionDenied { .. })
        ));
        let dashboard = analytics.dashboard(&admin).unwrap();
        assert_eq!(dashboard.stats.total_patients, 0);
        assert!(dashboard.recent_logs.is_empty());
        assert_eq!(analytics.activity_report(&admin).unwrap().logs_considered, 0);
    }
}
