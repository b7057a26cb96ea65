//! Runtime configuration read from `MEDIVAULT_*` environment variables.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AuditPolicy, PasswordScheme};
use crate::{MedivaultError, Result};

pub const DB_PATH_ENV: &str = "MEDIVAULT_DB_PATH";
pub const KEY_FILE_ENV: &str = "MEDIVAULT_KEY_FILE";
pub const AUDIT_POLICY_ENV: &str = "MEDIVAULT_AUDIT_POLICY";
pub const PASSWORD_SCHEME_ENV: &str = "MEDIVAULT_PASSWORD_SCHEME";
pub const LEGACY_LOGIN_UNTIL_ENV: &str = "MEDIVAULT_LEGACY_LOGIN_UNTIL";

const DEFAULT_DB_PATH: &str = "hospital.db";
const DEFAULT_KEY_FILE: &str = "medivault.key";

/// Settings shared by the services and the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub db_path: PathBuf,
    pub key_file: PathBuf,
    pub audit_policy: AuditPolicy,
    /// Scheme for newly written password hashes.
    pub password_scheme: PasswordScheme,
    /// Plaintext credentials from an old schema are accepted until this instant.
    pub legacy_login_until: Option<DateTime<Utc>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
            audit_policy: AuditPolicy::default(),
            password_scheme: PasswordScheme::default(),
            legacy_login_until: None,
        }
    }
}

impl Config {
    /// Read the process environment.
    ///
    /// # Errors
    /// Returns `Validation` if a variable is set to an unrecognised value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset or blank
    /// variables fall back to the defaults.
    ///
    /// # Errors
    /// Returns `Validation` if a variable is set to an unrecognised value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(path) = get(DB_PATH_ENV) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(path) = get(KEY_FILE_ENV) {
            config.key_file = PathBuf::from(path);
        }
        if let Some(raw) = get(AUDIT_POLICY_ENV) {
            config.audit_policy = raw
                .parse()
                .map_err(|e| MedivaultError::Validation(format!("{AUDIT_POLICY_ENV}: {e}")))?;
        }
        if let Some(raw) = get(PASSWORD_SCHEME_ENV) {
            config.password_scheme = raw
                .parse()
                .map_err(|e| MedivaultError::Validation(format!("{PASSWORD_SCHEME_ENV}: {e}")))?;
        }
        if let Some(raw) = get(LEGACY_LOGIN_UNTIL_ENV) {
            let until = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                MedivaultError::Validation(format!("{LEGACY_LOGIN_UNTIL_ENV}: {e}"))
            })?;
            config.legacy_login_until = Some(until.with_timezone(&Utc));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.db_path, PathBuf::from("hospital.db"));
        assert_eq!(config.audit_policy, AuditPolicy::BestEffort);
        assert_eq!(config.password_scheme, PasswordScheme::Sha256);
        assert!(config.legacy_login_until.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            (DB_PATH_ENV, "/var/lib/medivault/ward.db"),
            (AUDIT_POLICY_ENV, "strict"),
            (PASSWORD_SCHEME_ENV, "argon2id"),
            (LEGACY_LOGIN_UNTIL_ENV, "2030-01-01T00:00:00Z"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/medivault/ward.db"));
        assert_eq!(config.audit_policy, AuditPolicy::Strict);
        assert_eq!(config.password_scheme, PasswordScheme::Argon2id);
        assert_eq!(
            config.legacy_login_until.unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = Config::from_lookup(lookup(&[(AUDIT_POLICY_ENV, "  ")])).unwrap();
        assert_eq!(config.audit_policy, AuditPolicy::BestEffort);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (name, value) in [
            (AUDIT_POLICY_ENV, "sometimes"),
            (PASSWORD_SCHEME_ENV, "md5"),
            (LEGACY_LOGIN_UNTIL_ENV, "next tuesday"),
        ] {
            let result = Config::from_lookup(lookup(&[(name, value)]));
            assert!(matches!(result, Err(MedivaultError::Validation(_))), "{name}={value}");
        }
    }

    #[test]
    fn test_serializes_for_display() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["audit_policy"], "best-effort");
        assert_eq!(json["password_scheme"], "sha256");
    }
}
