use chrono::{DateTime, Duration, Utc};

use super::identity::{Identity, LoginAttempt};
use crate::modules::config::DeskConfig;
use crate::modules::error::{DeskError, DeskResult};

/// What a failed attempt did to the account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Counter incremented, still unlocked
    Counted(u32),
    /// Threshold reached, locked until the given instant
    Locked(DateTime<Utc>),
}

/// Consecutive-failure tracking and timed lock per identity.
///
/// All methods are pure: they take an identity and return the next one.
#[derive(Debug, Clone)]
pub struct LockoutGuard {
    threshold: u32,
    duration: Duration,
}

impl LockoutGuard {
    pub fn new(threshold: u32, duration: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            duration,
        }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        Self::new(config.lockout_threshold, config.lockout_duration())
    }

    /// Reject while a lock is in force. Does not touch the counter.
    pub fn check(&self, identity: &Identity, now: DateTime<Utc>) -> DeskResult<()> {
        match identity.locked_until {
            Some(until) if now < until => Err(DeskError::AccountLocked { until }),
            _ => Ok(()),
        }
    }

    /// Record a failed verification
    pub fn record_failure(&self, identity: &Identity, now: DateTime<Utc>) -> (Identity, FailureOutcome) {
        let mut next = identity.clone();

        // An elapsed lock is cleared by the first attempt after it
        if matches!(next.locked_until, Some(until) if now >= until) {
            next.locked_until = None;
        }

        next.failed_attempts += 1;
        next.last_login_attempt = Some(LoginAttempt { at: now, success: false });

        if next.failed_attempts >= self.threshold {
            let until = now + self.duration;
            next.locked_until = Some(until);
            next.failed_attempts = 0;
            return (next, FailureOutcome::Locked(until));
        }

        let count = next.failed_attempts;
        (next, FailureOutcome::Counted(count))
    }

    /// Record a successful verification and reset counters
    pub fn record_success(&self, identity: &Identity, now: DateTime<Utc>) -> Identity {
        let mut next = identity.clone();
        next.failed_attempts = 0;
        next.locked_until = None;
        next.last_login_attempt = Some(LoginAttempt { at: now, success: true });
        next.last_success_at = Some(now);
        next
    }
}
