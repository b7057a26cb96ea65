//! Users, roles and the interactive session.

use serde::{Deserialize, Serialize};

/// Staff role, ordered by privilege.
///
/// The order is total: `Admin > Doctor > Receptionist`. A permission check
/// grants access when the caller's role ranks at least as high as the
/// required one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Front desk: registers and edits patients, never sees diagnoses.
    Receptionist,
    /// Clinician: reads masked patient data.
    Doctor,
    /// Administrator: decrypts, anonymizes, reads the audit log.
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Doctor, Role::Receptionist];

    /// Numeric privilege rank.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Receptionist => 1,
            Self::Doctor => 2,
            Self::Admin => 3,
        }
    }

    /// Value stored in the `role` columns.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Receptionist => "receptionist",
            Self::Doctor => "doctor",
            Self::Admin => "admin",
        }
    }

    /// Whether this role satisfies `required`.
    #[must_use]
    pub fn satisfies(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role string that matches none of the known roles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0:?}")]
pub struct UnknownRole(pub String);

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "doctor" => Ok(Self::Doctor),
            "receptionist" => Ok(Self::Receptionist),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// A user account without its credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A user account together with the stored password hash.
#[derive(Clone)]
pub struct StoredUser {
    pub account: UserAccount,
    pub password_hash: String,
}

impl std::fmt::Debug for StoredUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredUser")
            .field("account", &self.account)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
}

impl Identity {
    #[must_use]
    pub fn has_permission(&self, required: Role) -> bool {
        self.role.satisfies(required)
    }
}

impl From<UserAccount> for Identity {
    fn from(account: UserAccount) -> Self {
        Self {
            user_id: account.id,
            username: account.username,
            role: account.role,
        }
    }
}

/// Grant iff the identity's role ranks at least as high as `required`.
#[must_use]
pub fn check_permission(identity: &Identity, required: Role) -> bool {
    identity.has_permission(required)
}

/// State of one interactive session.
///
/// "Logged in" and "has an identity" are the same fact, so they cannot
/// disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Anonymous,
    Authenticated(Identity),
}

impl Session {
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(identity) => Some(identity),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// An anonymous session holds no permissions at all.
    #[must_use]
    pub fn check_permission(&self, required: Role) -> bool {
        self.identity().is_some_and(|identity| identity.has_permission(required))
    }

    pub fn sign_in(&mut self, identity: Identity) {
        *self = Self::Authenticated(identity);
    }

    /// Reset to anonymous, returning the identity that was signed in.
    pub fn sign_out(&mut self) -> Option<Identity> {
        match std::mem::take(self) {
            Self::Anonymous => None,
            Self::Authenticated(identity) => Some(identity),
        }
    }
}
