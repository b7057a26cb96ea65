//! Authentication service: login, logout and user administration.
//!
//! Unknown users and wrong passwords fail identically with
//! `InvalidCredentials`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::adapters::StorageError;
use crate::domain::password::{verify_password, StoredCredential};
use crate::domain::{
    AuditAction, AuditPolicy, Identity, NewAuditEntry, PasswordScheme, Role, Session, StoredUser,
    UserAccount,
};
use crate::ports::{Storage, StorageTx};
use crate::{MedivaultError, Result};

use super::audit::{append_in_tx, AuditService};
use super::{require, store_err};

/// Accounts created when the users table is empty.
pub const DEFAULT_USERS: [(&str, &str, Role); 3] = [
    ("admin", "admin123", Role::Admin),
    ("doctor1", "doctor123", Role::Doctor),
    ("receptionist1", "recept123", Role::Receptionist),
];

/// Service for credentials and sessions.
pub struct AuthService<S>
where
    S: Storage,
{
    storage: Arc<S>,
    audit: AuditService<S>,
    scheme: PasswordScheme,
    legacy_login_until: Option<DateTime<Utc>>,
}

impl<S> AuthService<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(storage: Arc<S>, policy: AuditPolicy, scheme: PasswordScheme) -> Self {
        Self {
            audit: AuditService::new(Arc::clone(&storage), policy),
            storage,
            scheme,
            legacy_login_until: None,
        }
    }

    /// Accept plaintext credentials left by an old schema until `until`.
    #[must_use]
    pub fn with_legacy_login_until(mut self, until: Option<DateTime<Utc>>) -> Self {
        self.legacy_login_until = until;
        self
    }

    fn legacy_window_open(&self) -> bool {
        self.legacy_login_until.is_some_and(|until| Utc::now() < until)
    }

    /// Check a username and password.
    ///
    /// On success a `LOGIN` entry is written (best effort).
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown user or wrong password; store
    /// failures.
    pub fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let Some(user) = self.storage.find_user(username).map_err(store_err)? else {
            tracing::warn!("Login rejected: unknown user");
            return Err(MedivaultError::InvalidCredentials);
        };

        match StoredCredential::classify(&user.password_hash) {
            StoredCredential::Legacy(stored) => {
                if !self.legacy_window_open() || stored != password {
                    tracing::warn!(user_id = user.account.id, "Login rejected: legacy credential");
                    return Err(MedivaultError::InvalidCredentials);
                }
                self.upgrade_legacy(&user, password)?;
            }
            _ => {
                if !verify_password(password, &user.password_hash) {
                    tracing::warn!(user_id = user.account.id, "Login rejected: wrong password");
                    return Err(MedivaultError::InvalidCredentials);
                }
            }
        }

        let identity = Identity::from(user.account);
        self.audit
            .record(&NewAuditEntry::by(&identity, AuditAction::Login, "User logged in"))?;
        tracing::info!(user_id = identity.user_id, role = %identity.role, "Login successful");
        Ok(identity)
    }

    fn upgrade_legacy(&self, user: &StoredUser, password: &str) -> Result<()> {
        let hash = self.scheme.hash(password)?;
        let mut tx = self.storage.begin().map_err(store_err)?;
        tx.set_password_hash(user.account.id, &hash).map_err(store_err)?;
        append_in_tx(
            &mut tx,
            self.audit.policy(),
            &NewAuditEntry {
                user_id: Some(user.account.id),
                role: Some(user.account.role),
                action: AuditAction::PasswordMigrated,
                details: format!("Migrated legacy credential to {}", self.scheme),
            },
        )?;
        tx.commit().map_err(store_err)?;
        tracing::warn!(user_id = user.account.id, "Upgraded legacy plaintext credential");
        Ok(())
    }

    /// Log in and put the identity into `session`.
    ///
    /// # Errors
    /// As [`AuthService::login`]; the session is left unchanged on failure.
    pub fn sign_in(&self, session: &mut Session, username: &str, password: &str) -> Result<Identity> {
        let identity = self.login(username, password)?;
        session.sign_in(identity.clone());
        Ok(identity)
    }

    /// End the session, writing `LOGOUT` (best effort) if someone was signed in.
    pub fn logout(&self, session: &mut Session) -> Option<Identity> {
        let identity = session.sign_out()?;
        if let Err(e) = self
            .audit
            .record(&NewAuditEntry::by(&identity, AuditAction::Logout, "User logged out"))
        {
            tracing::error!(error = %e, "Logout audit failed");
        }
        tracing::info!(user_id = identity.user_id, "Logged out");
        Some(identity)
    }

    /// Insert the default accounts if there are no users yet. Returns how
    /// many were created.
    ///
    /// # Errors
    /// Returns error if hashing or storage fails.
    pub fn seed_default_users(&self) -> Result<usize> {
        let mut tx = self.storage.begin().map_err(store_err)?;
        if tx.count_users().map_err(store_err)? > 0 {
            return Ok(0);
        }

        let now = Utc::now();
        for (username, password, role) in DEFAULT_USERS {
            let hash = self.scheme.hash(password)?;
            tx.insert_user(username, &hash, role, now).map_err(store_err)?;
            append_in_tx(
                &mut tx,
                self.audit.policy(),
                &NewAuditEntry::anonymous(
                    AuditAction::CreateUser,
                    format!("Created default user: {username} ({role})"),
                ),
            )?;
        }
        tx.commit().map_err(store_err)?;

        tracing::info!(count = DEFAULT_USERS.len(), "Seeded default users");
        Ok(DEFAULT_USERS.len())
    }

    /// Create an account; administrators only.
    ///
    /// # Errors
    /// `PermissionDenied`, `Validation` for blank fields, `DuplicateUser`.
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
        actor: &Identity,
    ) -> Result<UserAccount> {
        require(actor, Role::Admin)?;
        let username = username.trim();
        if username.is_empty() {
            return Err(MedivaultError::Validation("Username must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(MedivaultError::Validation("Password must not be empty".to_string()));
        }

        let hash = self.scheme.hash(password)?;
        let mut tx = self.storage.begin().map_err(store_err)?;
        let account = tx
            .insert_user(username, &hash, role, Utc::now())
            .map_err(store_err)?;
        append_in_tx(
            &mut tx,
            self.audit.policy(),
            &NewAuditEntry::by(
                actor,
                AuditAction::CreateUser,
                format!("Created user: {username} ({role})"),
            ),
        )?;
        tx.commit().map_err(store_err)?;

        tracing::info!(user_id = account.id, role = %role, "User created");
        Ok(account)
    }

    /// # Errors
    /// `PermissionDenied` for non-admins; store failures.
    pub fn list_users(&self, actor: &Identity) -> Result<Vec<UserAccount>> {
        require(actor, Role::Admin)?;
        self.storage.list_users().map_err(store_err)
    }

    /// # Errors
    /// Returns error if storage operation fails.
    pub fn user_role(&self, username: &str) -> Result<Option<Role>> {
        Ok(self
            .storage
            .find_user(username)
            .map_err(store_err)?
            .map(|user| user.account.role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteStorage;
    use crate::domain::password::hash_password;
    use crate::domain::LogQuery;

    fn service() -> (Arc<SqliteStorage>, AuthService<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let auth = AuthService::new(Arc::clone(&storage), AuditPolicy::default(), PasswordScheme::Sha256);
        (storage, auth)
    }

    #[test]
    fn test_seed_is_idempotent() {
        let (storage, auth) = service();
        assert_eq!(auth.seed_default_users().unwrap(), 3);
        assert_eq!(auth.seed_default_users().unwrap(), 0);
        assert_eq!(storage.list_users().unwrap().len(), 3);
        assert_eq!(
            storage.find_user("admin").unwrap().unwrap().password_hash,
            hash_password("admin123")
        );
    }

    #[test]
    fn test_login_success_and_audit() {
        let (storage, auth) = service();
        auth.seed_default_users().unwrap();

        let identity = auth.login("doctor1", "doctor123").unwrap();
        assert_eq!(identity.role, Role::Doctor);

        let logins = storage
            .query_logs(&LogQuery::default().with_action(AuditAction::Login))
            .unwrap();
        assert_eq!(logins.len(), 1);
        assert_eq!(logins[0].user_id, Some(identity.user_id));
    }

    #[test]
    fn test_unknown_user_and_wrong_password_look_the_same() {
        let (_, auth) = service();
        auth.seed_default_users().unwrap();

        let unknown = auth.login("nobody", "admin123").unwrap_err();
        let wrong = auth.login("admin", "admin124").unwrap_err();
        assert!(matches!(unknown, MedivaultError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[test]
    fn test_session_sign_in_and_logout() {
        let (storage, auth) = service();
        auth.seed_default_users().unwrap();
        let mut session = Session::default();

        assert!(auth.sign_in(&mut session, "admin", "nope").is_err());
        assert!(!session.is_authenticated());

        auth.sign_in(&mut session, "receptionist1", "recept123").unwrap();
        assert!(session.check_permission(Role::Receptionist));
        assert!(!session.check_permission(Role::Doctor));

        let out = auth.logout(&mut session).expect("Was signed in");
        assert_eq!(out.username, "receptionist1");
        assert!(auth.logout(&mut session).is_none());
        assert_eq!(
            storage
                .query_logs(&LogQuery::default().with_action(AuditAction::Logout))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_create_user_with_argon2() {
        let storage = Arc::new(SqliteStorage::in_memory().unwrap());
        let auth = AuthService::new(Arc::clone(&storage), AuditPolicy::default(), PasswordScheme::Argon2id);
        auth.seed_default_users().unwrap();
        let admin = auth.login("admin", "admin123").unwrap();

        auth.create_user("nurse1", "nurse123", Role::Receptionist, &admin).unwrap();
        assert!(storage
            .find_user("nurse1")
            .unwrap()
            .unwrap()
            .password_hash
            .starts_with("$argon2id$"));
        assert_eq!(auth.login("nurse1", "nurse123").unwrap().role, Role::Receptionist);
        assert_eq!(auth.user_role("nurse1").unwrap(), Some(Role::Receptionist));
        assert_eq!(auth.user_role("ghost").unwrap(), None);
    }

    #[test]
    fn test_create_user_rules() {
        let (_, auth) = service();
        auth.seed_default_users().unwrap();
        let admin = auth.login("admin", "admin123").unwrap();
        let doctor = auth.login("doctor1", "doctor123").unwrap();

        assert!(matches!(
            auth.create_user("x", "y", Role::Doctor, &doctor),
            Err(MedivaultError::PermissionDenied { .. })
        ));
        assert!(matches!(
            auth.create_user("doctor1", "pw", Role::Doctor, &admin),
            Err(MedivaultError::DuplicateUser(_))
        ));
        assert!(matches!(
            auth.create_user("  ", "pw", Role::Doctor, &admin),
            Err(MedivaultError::Validation(_))
        ));
        assert_eq!(auth.list_users(&admin).unwrap().len(), 3);
        assert!(auth.list_users(&doctor).is_err());
    }

    #[test]
    fn test_unknown_role_cannot_log_in() {
        let (storage, auth) = service();
        let hash = hash_password("nurse123");
        storage
            .execute_raw(&format!(
                "INSERT INTO users (username, password_hash, role) VALUES ('nurse1', '{hash}', 'nurse')"
            ))
            .unwrap();

        assert!(matches!(
            auth.login("nurse1", "nurse123"),
            Err(MedivaultError::InvalidCredentials)
        ));
    }

    fn plant_legacy_user(storage: &SqliteStorage) {
        storage
            .execute_raw(
                "INSERT INTO users (username, password_hash, role) VALUES ('legacy', 'plain-secret', 'doctor')",
            )
            .unwrap();
    }

    #[test]
    fn test_legacy_credential_rejected_without_window() {
        let (storage, auth) = service();
        plant_legacy_user(&storage);
        assert!(matches!(
            auth.login("legacy", "plain-secret"),
            Err(MedivaultError::InvalidCredentials)
        ));

        let expired = auth.with_legacy_login_until(Some(Utc::now() - chrono::Duration::hours(1)));
        assert!(expired.login("legacy", "plain-secret").is_err());
    }

    #[test]
    fn test_legacy_credential_upgraded_inside_window() {
        let (storage, auth) = service();
        plant_legacy_user(&storage);
        let auth = auth.with_legacy_login_until(Some(Utc::now() + chrono::Duration::days(1)));

        assert!(auth.login("legacy", "wrong").is_err());
        let identity = auth.login("legacy", "plain-secret").unwrap();
        assert_eq!(identity.role, Role::Doctor);

        let stored = storage.find_user("legacy").unwrap().unwrap().password_hash;
        assert_eq!(stored, hash_password("plain-secret"));
        let migrated = storage
            .query_logs(&LogQuery::default().with_action(AuditAction::PasswordMigrated))
            .unwrap();
        assert_eq!(migrated.len(), 1);

        // The upgraded hash keeps working after the window closes.
        let closed = auth.with_legacy_login_until(None);
        assert!(closed.login("legacy", "plain-secret").is_ok());
    }
}
