use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

use super::challenge::{build_challenges, normalize_answer, ChallengeAnswer, ChallengePolicy};
use super::identity::{normalize_login, Identity, IdentityId, Role};
use super::lockout::{FailureOutcome, LockoutGuard};
use super::password::PasswordPolicyEngine;
use crate::modules::access::Action;
use crate::modules::config::DeskConfig;
use crate::modules::encryption::{burn_verification, hash_secret, verify_secret};
use crate::modules::error::{ChallengeError, ConflictError, DeskError, DeskResult};
use crate::modules::storage::{IdentityPort, StoreError};
use crate::modules::utils::clock::Clock;
use crate::modules::utils::logging::format_sensitive;

/// Upper bound on optimistic write attempts for one identity update
const MAX_WRITE_ATTEMPTS: usize = 8;

/// Input for creating an account
#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub email: String,
    pub handle: Option<String>,
    pub full_name: String,
    pub password: String,
    pub challenges: Vec<ChallengeAnswer>,
}

/// A successful password verification with lockout bookkeeping applied
#[derive(Debug, Clone)]
pub struct VerifiedLogin {
    pub identity: Identity,
    /// Successful login before this one
    pub previous_success: Option<DateTime<Utc>>,
}

enum AttemptVerdict {
    Accepted,
    Rejected,
    Locked(DateTime<Utc>),
}

fn validate_email(email: &str) -> DeskResult<()> {
    let valid = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !domain.contains('@')
            }
            None => false,
        };
    if valid {
        Ok(())
    } else {
        Err(DeskError::Validation("a valid email address is required".to_string()))
    }
}

fn validate_handle(handle: &str) -> DeskResult<()> {
    let length = handle.chars().count();
    if !(3..=32).contains(&length)
        || !handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(DeskError::Validation(
            "handle must be 3-32 letters, digits, '.', '_' or '-'".to_string(),
        ));
    }
    Ok(())
}

/// Sole owner of identity mutation.
///
/// Every change is computed as a new `Identity` from the stored one and written
/// back with a version check; on a concurrent write the change is recomputed
/// from the fresh value.
pub struct CredentialStore {
    identities: Arc<dyn IdentityPort>,
    clock: Arc<dyn Clock>,
    policy: PasswordPolicyEngine,
    lockout: LockoutGuard,
    challenge_policy: ChallengePolicy,
    hash_iterations: u32,
}

impl CredentialStore {
    pub fn new(identities: Arc<dyn IdentityPort>, clock: Arc<dyn Clock>, config: &DeskConfig) -> Self {
        Self {
            identities,
            clock,
            policy: PasswordPolicyEngine::from_config(config),
            lockout: LockoutGuard::from_config(config),
            challenge_policy: ChallengePolicy::from_config(config),
            hash_iterations: config.hash_iterations,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Load an identity or fail with `NotFound`
    pub fn identity(&self, id: IdentityId) -> DeskResult<Identity> {
        self.identities
            .identity(id)?
            .ok_or(DeskError::NotFound("identity"))
    }

    pub fn find_by_login(&self, login: &str) -> DeskResult<Option<Identity>> {
        Ok(self.identities.find_by_login(&normalize_login(login))?)
    }

    pub fn identities(&self) -> DeskResult<Vec<Identity>> {
        Ok(self.identities.identities()?)
    }

    /// Create a new account with the given role.
    ///
    /// All input is validated before anything is hashed or stored.
    pub fn register(&self, request: SignupRequest, role: Role) -> DeskResult<Identity> {
        let identity = self.new_identity(request, role)?;
        self.store_new(identity, |identity| self.identities.insert_identity(identity))
    }

    /// Create the first administrator; refused once any admin exists
    pub fn register_first_admin(&self, request: SignupRequest) -> DeskResult<Identity> {
        let identity = self.new_identity(request, Role::Admin)?;
        self.store_new(identity, |identity| self.identities.insert_first_admin(identity))
    }

    fn new_identity(&self, request: SignupRequest, role: Role) -> DeskResult<Identity> {
        let email = request.email.trim().to_string();
        validate_email(&email)?;

        let full_name = request.full_name.trim().to_string();
        if full_name.is_empty() || full_name.chars().count() > 200 {
            return Err(DeskError::Validation(
                "full name must be 1-200 characters".to_string(),
            ));
        }

        let handle = match request.handle.as_deref().map(str::trim) {
            Some(handle) if !handle.is_empty() => {
                validate_handle(handle)?;
                Some(handle.to_string())
            }
            _ => None,
        };

        self.policy.check_strength(&request.password)?;
        self.challenge_policy.validate(&request.challenges)?;

        let now = self.clock.now();
        Ok(Identity {
            id: IdentityId::new(),
            email_normalized: normalize_login(&email),
            email,
            handle_normalized: handle.as_deref().map(normalize_login),
            handle,
            full_name,
            role,
            password_hash: hash_secret(&request.password, self.hash_iterations),
            password_history: Vec::new(),
            password_changed_at: now,
            failed_attempts: 0,
            locked_until: None,
            last_login_attempt: None,
            last_success_at: None,
            challenges: build_challenges(&request.challenges, self.hash_iterations),
            reauthenticated_at: None,
            created_at: now,
            version: 0,
        })
    }

    fn store_new(
        &self,
        identity: Identity,
        insert: impl FnOnce(Identity) -> Result<(), StoreError>,
    ) -> DeskResult<Identity> {
        match insert(identity.clone()) {
            Ok(()) => {
                info!(
                    "Registered identity {} as {}",
                    format_sensitive(&identity.email),
                    identity.role
                );
                Ok(identity)
            }
            Err(StoreError::Duplicate(_)) => Err(ConflictError::DuplicateIdentity.into()),
            Err(StoreError::VersionConflict("admin")) => Err(DeskError::Forbidden {
                action: Action::ChangeRole,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `change` to the stored identity with optimistic concurrency.
    ///
    /// `change` may run more than once and must be a pure function of its input.
    pub fn update<T>(
        &self,
        id: IdentityId,
        mut change: impl FnMut(&Identity) -> DeskResult<(Identity, T)>,
    ) -> DeskResult<(Identity, T)> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.identity(id)?;
            let (next, output) = change(&current)?;
            match self.identities.replace_identity(current.version, next) {
                Ok(stored) => return Ok((stored, output)),
                Err(StoreError::VersionConflict(_)) => {
                    debug!("Identity {} changed underneath update (attempt {})", id, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!("Identity {} update abandoned after {} attempts", id, MAX_WRITE_ATTEMPTS);
        Err(DeskError::Internal("identity update kept conflicting".to_string()))
    }

    /// Constant-effort password check; never says which part was wrong
    pub fn verify_password(&self, identity: &Identity, password: &str) -> bool {
        verify_secret(password, &identity.password_hash)
    }

    /// Constant-effort check of one challenge answer
    pub fn verify_challenge_answer(&self, identity: &Identity, question_id: &str, answer: &str) -> bool {
        match identity.challenge(question_id) {
            Some(record) => verify_secret(&normalize_answer(answer), &record.answer_hash),
            None => {
                burn_verification(self.hash_iterations);
                false
            }
        }
    }

    /// Verify a login identifier and password under the lockout rules
    pub fn authenticate(&self, login: &str, password: &str) -> DeskResult<VerifiedLogin> {
        match self.find_by_login(login)? {
            Some(identity) => self.verify_guarded(&identity, password),
            None => {
                // Same hashing effort as a real account
                burn_verification(self.hash_iterations);
                Err(DeskError::Authentication)
            }
        }
    }

    /// Password check with lockout bookkeeping, for an identity already in hand.
    ///
    /// While locked the password is not even hashed and nothing is written.
    pub fn verify_guarded(&self, identity: &Identity, password: &str) -> DeskResult<VerifiedLogin> {
        let now = self.clock.now();
        self.lockout.check(identity, now)?;

        let matched = self.verify_password(identity, password);
        let previous_success = identity.last_success_at;

        let (stored, verdict) = self.update(identity.id, |current| {
            // Another attempt may have locked the account since it was read
            self.lockout.check(current, now)?;

            let accepted = if current.password_hash == identity.password_hash {
                matched
            } else {
                self.verify_password(current, password)
            };

            if accepted {
                Ok((self.lockout.record_success(current, now), AttemptVerdict::Accepted))
            } else {
                let (next, outcome) = self.lockout.record_failure(current, now);
                let verdict = match outcome {
                    FailureOutcome::Counted(_) => AttemptVerdict::Rejected,
                    FailureOutcome::Locked(until) => AttemptVerdict::Locked(until),
                };
                Ok((next, verdict))
            }
        })?;

        match verdict {
            AttemptVerdict::Accepted => Ok(VerifiedLogin {
                identity: stored,
                previous_success,
            }),
            AttemptVerdict::Rejected => Err(DeskError::Authentication),
            AttemptVerdict::Locked(until) => {
                warn!(
                    "Identity {} locked until {}",
                    format_sensitive(&stored.email),
                    until
                );
                Err(DeskError::AccountLocked { until })
            }
        }
    }

    /// Rotate the password after `precondition` accepts the stored identity.
    ///
    /// Any outstanding re-authentication stamp is consumed by a successful rotation.
    pub fn rotate_password(
        &self,
        id: IdentityId,
        candidate: &str,
        precondition: impl Fn(&Identity, DateTime<Utc>) -> DeskResult<()>,
    ) -> DeskResult<Identity> {
        // Cheap rule first so weak passwords never cost a hash
        self.policy.check_strength(candidate)?;
        let new_hash = hash_secret(candidate, self.hash_iterations);
        let now = self.clock.now();

        let (stored, ()) = self.update(id, |current| {
            precondition(current, now)?;
            self.policy.evaluate(current, candidate, now)?;
            let mut next = self.policy.rotate(current, new_hash.clone(), now);
            next.reauthenticated_at = None;
            Ok((next, ()))
        })?;

        info!("Password rotated for {}", format_sensitive(&stored.email));
        Ok(stored)
    }

    /// Set a new password, subject to the reuse and age policy
    pub fn set_password(&self, id: IdentityId, candidate: &str) -> DeskResult<Identity> {
        self.rotate_password(id, candidate, |_, _| Ok(()))
    }

    /// Replace both challenge questions
    pub fn set_challenge_answers(&self, id: IdentityId, answers: &[ChallengeAnswer]) -> DeskResult<Identity> {
        self.challenge_policy.validate(answers)?;
        let challenges = build_challenges(answers, self.hash_iterations);

        let (stored, ()) = self.update(id, |current| {
            let mut next = current.clone();
            next.challenges = challenges.clone();
            Ok((next, ()))
        })?;
        Ok(stored)
    }

    /// Change an account's role, returning the role it had before
    pub fn change_role(&self, id: IdentityId, role: Role) -> DeskResult<(Identity, Role)> {
        self.update(id, |current| {
            let mut next = current.clone();
            next.role = role;
            Ok((next, current.role))
        })
    }

    /// Record a completed step-up re-authentication
    pub fn stamp_reauth(&self, id: IdentityId, at: DateTime<Utc>) -> DeskResult<Identity> {
        let (stored, ()) = self.update(id, |current| {
            if current.challenges.len() != crate::CHALLENGE_QUESTION_COUNT {
                return Err(ChallengeError::CountInvalid.into());
            }
            let mut next = current.clone();
            next.reauthenticated_at = Some(at);
            Ok((next, ()))
        })?;
        Ok(stored)
    }
}
