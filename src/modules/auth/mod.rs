pub mod challenge;
pub mod credentials;
pub mod identity;
pub mod lockout;
pub mod password;

// Re-export the main types and functions
pub use challenge::{
    security_questions, ChallengeAnswer, ChallengePolicy, ChallengeVerifier, SecurityQuestion,
};
pub use credentials::{CredentialStore, SignupRequest, VerifiedLogin};
pub use identity::{
    ChallengeRecord, Identity, IdentityId, LoginAttempt, PasswordHistoryEntry, Role, Session,
};
pub use lockout::{FailureOutcome, LockoutGuard};
pub use password::{validate_password, PasswordError, PasswordPolicyEngine};
