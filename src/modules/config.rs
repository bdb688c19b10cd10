use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::modules::encryption::keys::DEFAULT_ITERATIONS;

/// Answers too common to protect anything
pub const DEFAULT_ANSWER_DENYLIST: &[&str] = &[
    "password", "123456", "qwerty", "abc123", "letmein", "iloveyou", "secret",
    "answer", "nothing", "unknown", "idontknow", "dontknow", "none", "n/a",
    "asdfgh", "test123", "aaaaaa",
];

/// Security and lending settings for a desk instance
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DeskConfig {
    pub password_min_length: usize,
    pub password_history_depth: usize,
    pub min_password_age_secs: i64,
    pub lockout_threshold: u32,
    pub lockout_duration_secs: i64,
    pub reauth_window_secs: i64,
    pub challenge_answer_min_length: usize,
    pub challenge_answer_denylist: Vec<String>,
    pub hash_iterations: u32,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            password_min_length: 10,
            password_history_depth: 5,
            min_password_age_secs: 86_400,
            lockout_threshold: 5,
            lockout_duration_secs: 900,
            reauth_window_secs: 300,
            challenge_answer_min_length: 6,
            challenge_answer_denylist: DEFAULT_ANSWER_DENYLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            hash_iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl DeskConfig {
    pub fn min_password_age(&self) -> Duration {
        Duration::seconds(self.min_password_age_secs)
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::seconds(self.lockout_duration_secs)
    }

    pub fn reauth_window(&self) -> Duration {
        Duration::seconds(self.reauth_window_secs)
    }

    /// Reject settings that would disable a protection outright
    pub fn validate(&self) -> Result<(), String> {
        if self.lockout_threshold == 0 {
            return Err("lockout_threshold must be at least 1".to_string());
        }
        if self.password_min_length == 0 || self.challenge_answer_min_length == 0 {
            return Err("minimum lengths must be positive".to_string());
        }
        if self.min_password_age_secs < 0
            || self.lockout_duration_secs <= 0
            || self.reauth_window_secs <= 0
        {
            return Err("durations must be positive".to_string());
        }
        if self.hash_iterations == 0 {
            return Err("hash_iterations must be positive".to_string());
        }
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        let config: DeskConfig =
            serde_json::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}
