//! Error taxonomy shared by every lending-desk component.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::modules::access::Action;
use crate::modules::auth::password::PasswordError;
use crate::modules::lending::ReservationStatus;
use crate::modules::storage::StoreError;
use crate::modules::utils::time::format_duration;

/// Result alias used across the crate.
pub type DeskResult<T> = Result<T, DeskError>;

/// Message returned for every bad-credential outcome, whichever half was wrong.
pub const INVALID_CREDENTIALS: &str = "Invalid username and/or password.";

/// Errors produced by lending-desk operations.
///
/// None of these are retried internally; each one terminates the request that
/// triggered it.
#[derive(Debug, Error)]
pub enum DeskError {
    /// Malformed input, rejected before any state is touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown identity or wrong password.
    #[error("{}", INVALID_CREDENTIALS)]
    Authentication,

    /// The account is locked until the given instant.
    #[error("account temporarily locked until {until}")]
    AccountLocked { until: DateTime<Utc> },

    /// No session was presented.
    #[error("authentication required")]
    Unauthenticated,

    /// The caller's role may not perform the action.
    #[error("forbidden: role may not perform {action}")]
    Forbidden { action: Action },

    #[error(transparent)]
    PasswordPolicy(#[from] PasswordPolicyError),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    /// Password change attempted without a fresh re-authentication stamp.
    #[error("re-authentication required")]
    ReauthRequired,

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The named record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Persistence failure. The detail is logged, never returned to callers.
    #[error("internal error")]
    Internal(String),
}

/// Password rejections from the policy engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordPolicyError {
    #[error("new password must differ from the current password")]
    ReuseCurrent,
    #[error("new password matches a recently used password")]
    ReuseHistory,
    #[error("password was changed too recently; try again after {retry_after}")]
    TooRecent { retry_after: DateTime<Utc> },
    #[error("password too weak: {0}")]
    TooWeak(#[from] PasswordError),
}

/// Challenge-question failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("exactly two distinct security questions are required")]
    CountInvalid,
    #[error("security answers must be at least {min_length} characters and not a common answer")]
    AnswerWeak { min_length: usize },
    #[error("security answer did not match")]
    Mismatch,
    #[error("unknown security question '{0}'")]
    UnknownQuestion(String),
}

/// State conflicts on identities and lending records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("item is already lent")]
    AlreadyLent,
    #[error("item is not currently lent")]
    NotLent,
    #[error("reservation is {status} and accepts no further transitions")]
    TerminalStateViolation { status: ReservationStatus },
    #[error("reservation cannot move from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("an account with that email or handle already exists")]
    DuplicateIdentity,
}

impl DeskError {
    /// Stable short code recorded in audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            DeskError::Validation(_) => "validation",
            DeskError::Authentication => "authentication",
            DeskError::AccountLocked { .. } => "account_locked",
            DeskError::Unauthenticated => "unauthenticated",
            DeskError::Forbidden { .. } => "forbidden",
            DeskError::PasswordPolicy(PasswordPolicyError::ReuseCurrent) => "password_reuse_current",
            DeskError::PasswordPolicy(PasswordPolicyError::ReuseHistory) => "password_reuse_history",
            DeskError::PasswordPolicy(PasswordPolicyError::TooRecent { .. }) => "password_too_recent",
            DeskError::PasswordPolicy(PasswordPolicyError::TooWeak(_)) => "password_too_weak",
            DeskError::Challenge(ChallengeError::CountInvalid) => "challenge_count_invalid",
            DeskError::Challenge(ChallengeError::AnswerWeak { .. }) => "challenge_answer_weak",
            DeskError::Challenge(ChallengeError::Mismatch) => "challenge_mismatch",
            DeskError::Challenge(ChallengeError::UnknownQuestion(_)) => "challenge_unknown_question",
            DeskError::ReauthRequired => "reauth_required",
            DeskError::Conflict(ConflictError::AlreadyLent) => "already_lent",
            DeskError::Conflict(ConflictError::NotLent) => "not_lent",
            DeskError::Conflict(ConflictError::TerminalStateViolation { .. }) => "terminal_state",
            DeskError::Conflict(ConflictError::InvalidTransition { .. }) => "invalid_transition",
            DeskError::Conflict(ConflictError::DuplicateIdentity) => "duplicate_identity",
            DeskError::NotFound(_) => "not_found",
            DeskError::Internal(_) => "internal",
        }
    }

    /// Text that is safe to hand back to the caller verbatim.
    pub fn public_message(&self) -> String {
        match self {
            DeskError::Authentication => INVALID_CREDENTIALS.to_string(),
            DeskError::Internal(_) => "Something went wrong, please try again.".to_string(),
            other => other.to_string(),
        }
    }

    /// `public_message`, with the time left on a lock spelled out
    pub fn public_message_at(&self, now: DateTime<Utc>) -> String {
        match self {
            DeskError::AccountLocked { until } => format!(
                "Account is locked, try again in {}.",
                format_duration(*until - now)
            ),
            other => other.public_message(),
        }
    }

    /// Whether the failure should be recorded as an access denial rather than a failure.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            DeskError::Unauthenticated
                | DeskError::Forbidden { .. }
                | DeskError::AccountLocked { .. }
                | DeskError::ReauthRequired
        )
    }
}

impl From<StoreError> for DeskError {
    fn from(error: StoreError) -> Self {
        log::error!("Persistence failure: {}", error);
        DeskError::Internal(error.to_string())
    }
}
