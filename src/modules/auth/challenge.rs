use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::credentials::CredentialStore;
use super::identity::{ChallengeRecord, Identity, IdentityId};
use crate::modules::config::DeskConfig;
use crate::modules::encryption::hash_secret;
use crate::modules::error::{ChallengeError, DeskError, DeskResult};
use crate::CHALLENGE_QUESTION_COUNT;

/// Question catalog offered at signup
pub const SECURITY_QUESTIONS: &[(&str, &str)] = &[
    ("q01", "Random teacher name?"),
    ("q02", "First book you disliked?"),
    ("q03", "A nickname you never use?"),
    ("q04", "Random phrase (3 words)?"),
    ("q05", "Imaginary street name?"),
    ("q06", "Three random words?"),
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SecurityQuestion {
    pub id: String,
    pub text: String,
}

/// All questions a new account can choose from
pub fn security_questions() -> Vec<SecurityQuestion> {
    SECURITY_QUESTIONS
        .iter()
        .map(|(id, text)| SecurityQuestion {
            id: id.to_string(),
            text: text.to_string(),
        })
        .collect()
}

fn catalog_text(question_id: &str) -> Option<&'static str> {
    SECURITY_QUESTIONS
        .iter()
        .find(|(id, _)| *id == question_id)
        .map(|(_, text)| *text)
}

/// One answered security question, as supplied by the user
#[derive(Debug, Clone)]
pub struct ChallengeAnswer {
    pub question_id: String,
    /// Display text; blank means "use the catalog text"
    pub question_text: String,
    pub answer: String,
}

impl ChallengeAnswer {
    pub fn new(question_id: &str, question_text: &str, answer: &str) -> Self {
        Self {
            question_id: question_id.to_string(),
            question_text: question_text.to_string(),
            answer: answer.to_string(),
        }
    }
}

/// Answers are compared trimmed and case-folded
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

/// Strength rules for challenge answers
#[derive(Debug, Clone)]
pub struct ChallengePolicy {
    min_length: usize,
    denylist: HashSet<String>,
}

impl ChallengePolicy {
    pub fn new(min_length: usize, denylist: &[String]) -> Self {
        Self {
            min_length,
            denylist: denylist.iter().map(|entry| normalize_answer(entry)).collect(),
        }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        Self::new(config.challenge_answer_min_length, &config.challenge_answer_denylist)
    }

    /// Exactly two distinct catalog questions, each with a non-trivial answer
    pub fn validate(&self, answers: &[ChallengeAnswer]) -> Result<(), ChallengeError> {
        if answers.len() != CHALLENGE_QUESTION_COUNT {
            return Err(ChallengeError::CountInvalid);
        }
        let distinct: HashSet<&str> = answers.iter().map(|a| a.question_id.trim()).collect();
        if distinct.len() != CHALLENGE_QUESTION_COUNT {
            return Err(ChallengeError::CountInvalid);
        }

        for answer in answers {
            let question_id = answer.question_id.trim();
            if catalog_text(question_id).is_none() {
                return Err(ChallengeError::UnknownQuestion(question_id.to_string()));
            }

            let trimmed = answer.answer.trim();
            if trimmed.chars().count() < self.min_length
                || self.denylist.contains(&normalize_answer(trimmed))
            {
                return Err(ChallengeError::AnswerWeak {
                    min_length: self.min_length,
                });
            }
        }
        Ok(())
    }
}

/// Hash validated answers into stored records
pub fn build_challenges(answers: &[ChallengeAnswer], iterations: u32) -> Vec<ChallengeRecord> {
    answers
        .iter()
        .map(|answer| {
            let question_id = answer.question_id.trim().to_string();
            let question_text = match answer.question_text.trim() {
                "" => catalog_text(&question_id).unwrap_or_default().to_string(),
                text => text.to_string(),
            };
            ChallengeRecord {
                question_id,
                question_text,
                answer_hash: hash_secret(&normalize_answer(&answer.answer), iterations),
            }
        })
        .collect()
}

/// Step-up re-authentication: current password, then one challenge answer.
///
/// A successful pass stamps the identity; a password change is honored only
/// inside the window after that stamp, and consumes it.
#[derive(Debug, Clone)]
pub struct ChallengeVerifier {
    window: Duration,
}

impl ChallengeVerifier {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        Self::new(config.reauth_window())
    }

    /// Pick one of the identity's registered questions at random
    pub fn pick_question(&self, identity: &Identity) -> DeskResult<SecurityQuestion> {
        identity
            .challenges
            .choose(&mut rand::thread_rng())
            .map(|record| SecurityQuestion {
                id: record.question_id.clone(),
                text: record.question_text.clone(),
            })
            .ok_or(DeskError::Challenge(ChallengeError::CountInvalid))
    }

    /// Run both checks in order and stamp the identity on success.
    ///
    /// The password step goes through the lockout guard; a wrong password is
    /// reported as an authentication failure, a wrong answer as a challenge mismatch.
    pub fn reauthenticate(
        &self,
        credentials: &CredentialStore,
        id: IdentityId,
        password: &str,
        question_id: &str,
        answer: &str,
    ) -> DeskResult<Identity> {
        let identity = credentials.identity(id)?;
        let verified = credentials.verify_guarded(&identity, password)?;

        if !credentials.verify_challenge_answer(&verified.identity, question_id, answer) {
            return Err(ChallengeError::Mismatch.into());
        }

        credentials.stamp_reauth(id, credentials.now())
    }

    /// Whether `identity` holds a usable stamp at `now`
    pub fn check_fresh(&self, identity: &Identity, now: DateTime<Utc>) -> DeskResult<()> {
        match identity.reauthenticated_at {
            Some(stamp) if stamp <= now && now <= stamp + self.window => Ok(()),
            _ => Err(DeskError::ReauthRequired),
        }
    }

    /// Rotate the password if a fresh stamp exists; the stamp is consumed
    pub fn change_password(
        &self,
        credentials: &CredentialStore,
        id: IdentityId,
        new_password: &str,
    ) -> DeskResult<Identity> {
        credentials.rotate_password(id, new_password, |current, now| self.check_fresh(current, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::auth::credentials::SignupRequest;
    use crate::modules::auth::Role;
    use crate::modules::error::PasswordPolicyError;
    use crate::modules::storage::MemoryStore;
    use crate::modules::utils::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn policy() -> ChallengePolicy {
        ChallengePolicy::from_config(&DeskConfig::default())
    }

    fn setup() -> (CredentialStore, ChallengeVerifier, Arc<ManualClock>, IdentityId) {
        let config = DeskConfig {
            hash_iterations: 1_000,
            ..DeskConfig::default()
        };
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()));
        let credentials = CredentialStore::new(Arc::new(MemoryStore::new()), clock.clone(), &config);
        let identity = credentials
            .register(
                SignupRequest {
                    email: "bob@example.com".to_string(),
                    handle: Some("bob".to_string()),
                    full_name: "Bob Smith".to_string(),
                    password: "Bobs-Password1".to_string(),
                    challenges: vec![
                        ChallengeAnswer::new("q02", "", "Moby Dick"),
                        ChallengeAnswer::new("q04", "", "purple walrus tea"),
                    ],
                },
                Role::Member,
            )
            .unwrap();
        (credentials, ChallengeVerifier::from_config(&config), clock, identity.id)
    }

    #[test]
    fn test_answer_validation() {
        let policy = policy();
        let good = vec![
            ChallengeAnswer::new("q01", "", "Mr Fenwick"),
            ChallengeAnswer::new("q02", "", "Moby Dick"),
        ];
        assert!(policy.validate(&good).is_ok());

        let same_question = vec![
            ChallengeAnswer::new("q01", "", "Mr Fenwick"),
            ChallengeAnswer::new("q01", "", "Moby Dick"),
        ];
        assert_eq!(policy.validate(&same_question), Err(ChallengeError::CountInvalid));
        assert_eq!(policy.validate(&good[..1]), Err(ChallengeError::CountInvalid));

        let short = vec![
            ChallengeAnswer::new("q01", "", "  Bob  "),
            ChallengeAnswer::new("q02", "", "Moby Dick"),
        ];
        assert!(matches!(policy.validate(&short), Err(ChallengeError::AnswerWeak { .. })));

        let common = vec![
            ChallengeAnswer::new("q01", "", "QWERTY"),
            ChallengeAnswer::new("q02", "", "Moby Dick"),
        ];
        assert!(matches!(policy.validate(&common), Err(ChallengeError::AnswerWeak { .. })));

        let unknown = vec![
            ChallengeAnswer::new("q99", "Favorite color?", "Vermilion"),
            ChallengeAnswer::new("q02", "", "Moby Dick"),
        ];
        assert_eq!(
            policy.validate(&unknown),
            Err(ChallengeError::UnknownQuestion("q99".to_string()))
        );
    }

    #[test]
    fn test_catalog_text_fills_blank_question() {
        let records = build_challenges(
            &[
                ChallengeAnswer::new("q05", "", "Lantern Row"),
                ChallengeAnswer::new("q06", "Pick three words", "violet ember kite"),
            ],
            1_000,
        );
        assert_eq!(records[0].question_text, "Imaginary street name?");
        assert_eq!(records[1].question_text, "Pick three words");
    }

    #[test]
    fn test_reauth_then_change_password() {
        let (credentials, verifier, clock, id) = setup();
        clock.advance(Duration::days(2));

        // No stamp yet
        assert!(matches!(
            verifier.change_password(&credentials, id, "Bobs-Password2"),
            Err(DeskError::ReauthRequired)
        ));

        let stamped = verifier
            .reauthenticate(&credentials, id, "Bobs-Password1", "q02", "moby dick")
            .unwrap();
        assert!(stamped.reauthenticated_at.is_some());

        let changed = verifier.change_password(&credentials, id, "Bobs-Password2").unwrap();
        assert!(changed.reauthenticated_at.is_none());
        assert!(credentials.verify_password(&changed, "Bobs-Password2"));

        // Single use
        clock.advance(Duration::days(2));
        assert!(matches!(
            verifier.change_password(&credentials, id, "Bobs-Password3"),
            Err(DeskError::ReauthRequired)
        ));
    }

    #[test]
    fn test_reauth_checks_password_before_challenge() {
        let (credentials, verifier, _, id) = setup();

        // Wrong password with a right answer: authentication failure
        assert!(matches!(
            verifier.reauthenticate(&credentials, id, "Wrong-Password9", "q02", "Moby Dick"),
            Err(DeskError::Authentication)
        ));
        // Right password with a wrong answer: challenge mismatch
        assert!(matches!(
            verifier.reauthenticate(&credentials, id, "Bobs-Password1", "q02", "Ahab"),
            Err(DeskError::Challenge(ChallengeError::Mismatch))
        ));
        assert!(credentials.identity(id).unwrap().reauthenticated_at.is_none());
    }

    #[test]
    fn test_stale_stamp_rejected() {
        let (credentials, verifier, clock, id) = setup();
        clock.advance(Duration::days(2));
        verifier
            .reauthenticate(&credentials, id, "Bobs-Password1", "q04", "Purple Walrus Tea")
            .unwrap();

        clock.advance(Duration::minutes(6));
        assert!(matches!(
            verifier.change_password(&credentials, id, "Bobs-Password2"),
            Err(DeskError::ReauthRequired)
        ));
    }

    #[test]
    fn test_policy_rejection_keeps_stamp() {
        let (credentials, verifier, clock, id) = setup();
        clock.advance(Duration::days(2));
        verifier
            .reauthenticate(&credentials, id, "Bobs-Password1", "q02", "Moby Dick")
            .unwrap();

        assert!(matches!(
            verifier.change_password(&credentials, id, "Bobs-Password1"),
            Err(DeskError::PasswordPolicy(PasswordPolicyError::ReuseCurrent))
        ));
        assert!(verifier.change_password(&credentials, id, "Bobs-Password2").is_ok());
    }

    #[test]
    fn test_pick_question_is_registered() {
        let (credentials, verifier, _, id) = setup();
        let identity = credentials.identity(id).unwrap();
        for _ in 0..10 {
            let question = verifier.pick_question(&identity).unwrap();
            assert!(question.id == "q02" || question.id == "q04");
        }
    }
}
