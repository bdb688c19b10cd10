//! Structured audit events and the sink they are written to.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

use super::logging::format_sensitive;

/// Security-relevant actions that leave an audit trail
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    AccessDeny,
    Signup,
    Login,
    AccountLocked,
    Reauth,
    PasswordChange,
    ItemCreate,
    Borrow,
    Hold,
    Return,
    ReservationTransition,
    RoleChange,
    AuditRead,
    TransactionsRead,
    CatalogRead,
    LoansRead,
    ReservationsRead,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AccessDeny => "ACCESS_DENY",
            AuditAction::Signup => "SIGNUP",
            AuditAction::Login => "LOGIN",
            AuditAction::AccountLocked => "ACCOUNT_LOCKED",
            AuditAction::Reauth => "REAUTH",
            AuditAction::PasswordChange => "PASSWORD_CHANGE",
            AuditAction::ItemCreate => "ITEM_CREATE",
            AuditAction::Borrow => "BORROW",
            AuditAction::Hold => "HOLD",
            AuditAction::Return => "RETURN",
            AuditAction::ReservationTransition => "RESERVATION_TRANSITION",
            AuditAction::RoleChange => "ROLE_CHANGE",
            AuditAction::AuditRead => "AUDIT_READ",
            AuditAction::TransactionsRead => "TRANSACTIONS_READ",
            AuditAction::CatalogRead => "CATALOG_READ",
            AuditAction::LoansRead => "LOANS_READ",
            AuditAction::ReservationsRead => "RESERVATIONS_READ",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

/// One audit trail entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub event: AuditAction,
    /// Who acted: display name, login identifier, or "anonymous"
    pub actor: String,
    /// What was acted on, when there is something to name
    pub target: Option<String>,
    pub outcome: AuditOutcome,
    /// Error kind or short note
    pub detail: Option<String>,
}

/// Where audit events go. Implementations must not drop events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);

    /// Every event recorded so far, oldest first
    fn events(&self) -> Vec<AuditEvent>;
}

/// In-process audit trail that mirrors each event to the log
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously persisted events
    pub fn with_events(events: Vec<AuditEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: &AuditEvent) {
        match event.outcome {
            AuditOutcome::Success => info!(
                "Audit event: evt={}, actor={}, target={:?}, outcome=success, detail={:?}",
                event.event,
                format_sensitive(&event.actor),
                event.target,
                event.detail
            ),
            outcome => warn!(
                "Audit event: evt={}, actor={}, target={:?}, outcome={:?}, detail={:?}",
                event.event,
                format_sensitive(&event.actor),
                event.target,
                outcome,
                event.detail
            ),
        }

        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }

    fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_kept_in_order() {
        let log = MemoryAuditLog::new();
        for (event, outcome) in [
            (AuditAction::Login, AuditOutcome::Failed),
            (AuditAction::AccountLocked, AuditOutcome::Denied),
        ] {
            log.record(&AuditEvent {
                at: Utc::now(),
                event,
                actor: "alice@example.com".to_string(),
                target: None,
                outcome,
                detail: None,
            });
        }

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, AuditAction::Login);
        assert_eq!(events[1].outcome, AuditOutcome::Denied);
    }

    #[test]
    fn test_event_names_match_serialized_form() {
        let json = serde_json::to_string(&AuditAction::ReservationTransition).unwrap();
        assert_eq!(json, format!("\"{}\"", AuditAction::ReservationTransition.as_str()));
        assert_eq!(AuditAction::AccessDeny.to_string(), "ACCESS_DENY");
    }
}
