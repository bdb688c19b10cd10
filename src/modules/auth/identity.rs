use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::modules::encryption::SecretHash;

/// Stable identifier of an account
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct IdentityId(pub Uuid);

impl IdentityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Account roles, lowest privilege first
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Librarian,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Librarian => "librarian",
            Role::Admin => "admin",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Member
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "member" => Ok(Role::Member),
            "librarian" => Ok(Role::Librarian),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// A previously used password hash and when it was replaced
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PasswordHistoryEntry {
    pub hash: SecretHash,
    pub changed_at: DateTime<Utc>,
}

/// One registered security question with its hashed answer
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChallengeRecord {
    pub question_id: String,
    pub question_text: String,
    pub answer_hash: SecretHash,
}

/// Timestamp and outcome of the latest login attempt
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LoginAttempt {
    pub at: DateTime<Utc>,
    pub success: bool,
}

/// Represents a single account with its credentials and security metadata.
///
/// Values are never mutated in place by callers: every component takes an
/// `Identity` and returns the next one, and the persistence port swaps it in
/// only if `version` still matches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: IdentityId,
    pub email: String,            // Email as entered by the user (for display)
    pub email_normalized: String, // Lowercase version for lookups and comparisons
    pub handle: Option<String>,
    pub handle_normalized: Option<String>,
    pub full_name: String,
    pub role: Role,
    pub password_hash: SecretHash,
    pub password_history: Vec<PasswordHistoryEntry>, // Newest first
    pub password_changed_at: DateTime<Utc>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_attempt: Option<LoginAttempt>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub challenges: Vec<ChallengeRecord>,
    pub reauthenticated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Identity {
    /// Whether a lock is set and has not yet elapsed at `now`
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if now < until)
    }

    /// Look up a registered challenge by question identifier
    pub fn challenge(&self, question_id: &str) -> Option<&ChallengeRecord> {
        self.challenges.iter().find(|c| c.question_id == question_id)
    }

    /// Name used in logs and audit events: the handle when set, else the email
    pub fn display_name(&self) -> &str {
        self.handle.as_deref().unwrap_or(&self.email)
    }
}

/// Normalize an email or handle for uniqueness checks and lookups
pub fn normalize_login(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Authenticated caller, handed back by a successful login
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Session {
    pub identity_id: IdentityId,
    pub role: Role,
    pub display_name: String,
    pub authenticated_at: DateTime<Utc>,
    /// Previous successful login, if any
    pub last_success_at: Option<DateTime<Utc>>,
}
