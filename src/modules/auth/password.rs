use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::identity::{Identity, PasswordHistoryEntry};
use crate::modules::config::DeskConfig;
use crate::modules::encryption::{verify_secret, SecretHash};
use crate::modules::error::PasswordPolicyError;

/// Reasons a password fails the complexity rule
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("must be at least {0} characters")]
    TooShort(usize),
    #[error("must contain an uppercase letter")]
    NoUppercase,
    #[error("must contain a lowercase letter")]
    NoLowercase,
    #[error("must contain a number")]
    NoNumber,
    #[error("must contain a symbol")]
    NoSpecialChar,
}

/// Function to validate password strength.
///
/// Signup and password change both go through this rule.
pub fn validate_password(password: &str, min_length: usize) -> Result<(), PasswordError> {
    if password.chars().count() < min_length {
        return Err(PasswordError::TooShort(min_length));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(PasswordError::NoUppercase);
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(PasswordError::NoLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordError::NoNumber);
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        return Err(PasswordError::NoSpecialChar);
    }
    Ok(())
}

/// Pure decision logic for accepting a new password
#[derive(Debug, Clone)]
pub struct PasswordPolicyEngine {
    min_length: usize,
    history_depth: usize,
    min_age: Duration,
}

impl PasswordPolicyEngine {
    pub fn new(min_length: usize, history_depth: usize, min_age: Duration) -> Self {
        Self {
            min_length,
            history_depth,
            min_age,
        }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        Self::new(
            config.password_min_length,
            config.password_history_depth,
            config.min_password_age(),
        )
    }

    /// Complexity rule only, for boundaries that have no account yet
    pub fn check_strength(&self, candidate: &str) -> Result<(), PasswordPolicyError> {
        validate_password(candidate, self.min_length).map_err(PasswordPolicyError::TooWeak)
    }

    /// Decide whether `identity` may rotate to `candidate` at `now`.
    ///
    /// Checks run in order: strength, current password, history, minimum age.
    /// Reuse is always decided by hashing the plaintext against each stored hash.
    pub fn evaluate(
        &self,
        identity: &Identity,
        candidate: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PasswordPolicyError> {
        self.check_strength(candidate)?;

        if verify_secret(candidate, &identity.password_hash) {
            return Err(PasswordPolicyError::ReuseCurrent);
        }

        let reused = identity
            .password_history
            .iter()
            .take(self.history_depth)
            .any(|entry| verify_secret(candidate, &entry.hash));
        if reused {
            return Err(PasswordPolicyError::ReuseHistory);
        }

        let retry_after = identity.password_changed_at + self.min_age;
        if now < retry_after {
            return Err(PasswordPolicyError::TooRecent { retry_after });
        }

        Ok(())
    }

    /// Install `new_hash` as the active password, pushing the prior one onto history
    pub fn rotate(&self, identity: &Identity, new_hash: SecretHash, now: DateTime<Utc>) -> Identity {
        let mut next = identity.clone();
        let previous = std::mem::replace(&mut next.password_hash, new_hash);

        next.password_history.insert(
            0,
            PasswordHistoryEntry {
                hash: previous,
                changed_at: now,
            },
        );
        next.password_history.truncate(self.history_depth);
        next.password_changed_at = now;
        next
    }
}

/// Helper function to read a password securely
pub fn read_password() -> std::io::Result<String> {
    rpassword::read_password()
}
