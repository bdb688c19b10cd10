use serde::{Deserialize, Serialize};
use std::fmt;

use crate::modules::auth::Role;
use crate::modules::error::{DeskError, DeskResult};

/// Everything an authenticated caller can ask the desk to do
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    BrowseCatalog,
    ListOwnLoans,
    BorrowItem,
    PlaceHold,
    CancelOwnHold,
    ViewSecurityQuestion,
    Reauthenticate,
    ChangePassword,
    CreateItem,
    ProcessReturn,
    ManageReservations,
    ListTransactions,
    ChangeRole,
    ReadAuditTrail,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::BrowseCatalog => "browse_catalog",
            Action::ListOwnLoans => "list_own_loans",
            Action::BorrowItem => "borrow_item",
            Action::PlaceHold => "place_hold",
            Action::CancelOwnHold => "cancel_own_hold",
            Action::ViewSecurityQuestion => "view_security_question",
            Action::Reauthenticate => "reauthenticate",
            Action::ChangePassword => "change_password",
            Action::CreateItem => "create_item",
            Action::ProcessReturn => "process_return",
            Action::ManageReservations => "manage_reservations",
            Action::ListTransactions => "list_transactions",
            Action::ChangeRole => "change_role",
            Action::ReadAuditTrail => "read_audit_trail",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowest role allowed to perform each action
const ACCESS_TABLE: &[(Action, Role)] = &[
    (Action::BrowseCatalog, Role::Member),
    (Action::ListOwnLoans, Role::Member),
    (Action::BorrowItem, Role::Member),
    (Action::PlaceHold, Role::Member),
    (Action::CancelOwnHold, Role::Member),
    (Action::ViewSecurityQuestion, Role::Member),
    (Action::Reauthenticate, Role::Member),
    (Action::ChangePassword, Role::Member),
    (Action::CreateItem, Role::Librarian),
    (Action::ProcessReturn, Role::Librarian),
    (Action::ManageReservations, Role::Librarian),
    (Action::ListTransactions, Role::Admin),
    (Action::ChangeRole, Role::Admin),
    (Action::ReadAuditTrail, Role::Admin),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Table-driven authorization
pub struct RoleGate;

impl RoleGate {
    /// Minimum role for `action`. Actions missing from the table need the highest role.
    pub fn required_role(action: Action) -> Role {
        ACCESS_TABLE
            .iter()
            .find(|(entry, _)| *entry == action)
            .map(|(_, role)| *role)
            .unwrap_or(Role::Admin)
    }

    /// Pure decision for a caller's role; `None` is an unauthenticated caller
    pub fn decide(role: Option<Role>, action: Action) -> Decision {
        match role {
            Some(role) if role >= Self::required_role(action) => Decision::Allow,
            _ => Decision::Deny,
        }
    }

    /// Like [`RoleGate::decide`], but with the error a denied caller should see
    pub fn check(role: Option<Role>, action: Action) -> DeskResult<()> {
        match (role, Self::decide(role, action)) {
            (_, Decision::Allow) => Ok(()),
            (None, Decision::Deny) => Err(DeskError::Unauthenticated),
            (Some(_), Decision::Deny) => Err(DeskError::Forbidden { action }),
        }
    }
}
