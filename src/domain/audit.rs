//! Audit trail types (GDPR Article 30 record of processing).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::{Identity, Role};

/// Default number of entries returned by a log query.
pub const DEFAULT_LOG_LIMIT: usize = 100;

/// Closed vocabulary of audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    AddPatient,
    UpdatePatient,
    AnonymizePatient,
    Login,
    Logout,
    ViewLogs,
    CreateUser,
    ExportData,
    PasswordMigrated,
}

impl AuditAction {
    pub const ALL: [AuditAction; 9] = [
        Self::AddPatient,
        Self::UpdatePatient,
        Self::AnonymizePatient,
        Self::Login,
        Self::Logout,
        Self::ViewLogs,
        Self::CreateUser,
        Self::ExportData,
        Self::PasswordMigrated,
    ];

    /// Tag stored in `logs.action`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddPatient => "ADD_PATIENT",
            Self::UpdatePatient => "UPDATE_PATIENT",
            Self::AnonymizePatient => "ANONYMIZE_PATIENT",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::ViewLogs => "VIEW_LOGS",
            Self::CreateUser => "CREATE_USER",
            Self::ExportData => "EXPORT_DATA",
            Self::PasswordMigrated => "PASSWORD_MIGRATED",
        }
    }

    /// Session events never roll back the operation that triggered them.
    #[must_use]
    pub fn is_session_event(self) -> bool {
        matches!(self, Self::Login | Self::Logout)
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown audit action: {0:?}")]
pub struct UnknownAction(pub String);

impl std::str::FromStr for AuditAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == tag)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// One row of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub role: Option<Role>,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// An entry about to be appended; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub user_id: Option<i64>,
    pub role: Option<Role>,
    pub action: AuditAction,
    pub details: String,
}

impl NewAuditEntry {
    /// Entry attributed to an authenticated actor.
    pub fn by(identity: &Identity, action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            user_id: Some(identity.user_id),
            role: Some(identity.role),
            action,
            details: details.into(),
        }
    }

    /// Entry with no actor, e.g. a failed or system-initiated event.
    pub fn anonymous(action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            user_id: None,
            role: None,
            action,
            details: details.into(),
        }
    }
}

/// Filters for reading the audit log, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub limit: usize,
    pub action: Option<AuditAction>,
    pub user_id: Option<i64>,
    pub role: Option<Role>,
    pub since: Option<DateTime<Utc>>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LOG_LIMIT,
            action: None,
            user_id: None,
            role: None,
            since: None,
        }
    }
}

impl LogQuery {
    #[must_use]
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

/// What happens to a mutation when its audit entry cannot be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditPolicy {
    /// Log the failure and commit the mutation anyway.
    #[default]
    BestEffort,
    /// Roll the mutation back.
    Strict,
}

impl AuditPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BestEffort => "best-effort",
            Self::Strict => "strict",
        }
    }
}

impl std::fmt::Display for AuditPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" | "besteffort" => Ok(Self::BestEffort),
            "strict" => Ok(Self::Strict),
            other => Err(format!("Unknown audit policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_tags_roundtrip() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
        assert_eq!("add-patient".parse::<AuditAction>().unwrap(), AuditAction::AddPatient);
        assert!("DROP_TABLE".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_action_serde_matches_stored_tag() {
        let json = serde_json::to_string(&AuditAction::AnonymizePatient).unwrap();
        assert_eq!(json, "\"ANONYMIZE_PATIENT\"");
    }

    #[test]
    fn test_entry_attribution() {
        let admin = Identity {
            user_id: 7,
            username: "admin".to_string(),
            role: Role::Admin,
        };
        let entry = NewAuditEntry::by(&admin, AuditAction::Login, "User logged in");
        assert_eq!(entry.user_id, Some(7));
        assert_eq!(entry.role, Some(Role::Admin));

        let system = NewAuditEntry::anonymous(AuditAction::PasswordMigrated, "x");
        assert!(system.user_id.is_none() && system.role.is_none());
    }

    #[test]
    fn test_log_query_builder() {
        let query = LogQuery::recent(10)
            .with_action(AuditAction::AddPatient)
            .with_role(Role::Receptionist);
        assert_eq!(query.limit, 10);
        assert_eq!(query.action, Some(AuditAction::AddPatient));
        assert_eq!(LogQuery::default().limit, DEFAULT_LOG_LIMIT);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("strict".parse::<AuditPolicy>().unwrap(), AuditPolicy::Strict);
        assert_eq!("Best-Effort".parse::<AuditPolicy>().unwrap(), AuditPolicy::BestEffort);
        assert!("sometimes".parse::<AuditPolicy>().is_err());
        assert_eq!(AuditPolicy::default(), AuditPolicy::BestEffort);
    }
}
