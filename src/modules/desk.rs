//! The lending desk: every externally callable operation, behind one role gate
//! and one audit trail.

use log::{debug, info};
use std::sync::Arc;

use crate::modules::access::{Action, RoleGate};
use crate::modules::auth::{
    security_questions, ChallengeVerifier, CredentialStore, Identity, Role, SecurityQuestion,
    Session, SignupRequest,
};
use crate::modules::config::DeskConfig;
use crate::modules::error::{DeskError, DeskResult};
use crate::modules::lending::{
    CatalogItem, ItemId, LendingStateMachine, Reservation, ReservationId, ReservationStatus,
    TransactionRecord, TransitionOutcome,
};
use crate::modules::storage::{IdentityPort, LendingPort};
use crate::modules::utils::audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink};
use crate::modules::utils::clock::Clock;

const ANONYMOUS: &str = "anonymous";

fn actor_of(session: Option<&Session>) -> String {
    session
        .map(|s| s.display_name.clone())
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

/// Facade over the account-security components and the lending engine.
///
/// Authorization always uses the caller's current role as stored, not the role
/// captured in the session when it was issued.
pub struct LendingDesk {
    credentials: CredentialStore,
    challenges: ChallengeVerifier,
    lending: LendingStateMachine,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl LendingDesk {
    pub fn new(
        identities: Arc<dyn IdentityPort>,
        ledger: Arc<dyn LendingPort>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: &DeskConfig,
    ) -> DeskResult<Self> {
        config.validate().map_err(DeskError::Validation)?;

        Ok(Self {
            credentials: CredentialStore::new(identities, clock.clone(), config),
            challenges: ChallengeVerifier::from_config(config),
            lending: LendingStateMachine::new(ledger, clock.clone()),
            audit,
            clock,
        })
    }

    // --- audit plumbing ---

    fn record(
        &self,
        event: AuditAction,
        actor: &str,
        target: Option<String>,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        self.audit.record(&AuditEvent {
            at: self.clock.now(),
            event,
            actor: actor.to_string(),
            target,
            outcome,
            detail,
        });
    }

    fn record_error(&self, event: AuditAction, actor: &str, target: Option<String>, error: &DeskError) {
        let (event, outcome) = match error {
            DeskError::Unauthenticated | DeskError::Forbidden { .. } => {
                (AuditAction::AccessDeny, AuditOutcome::Denied)
            }
            DeskError::AccountLocked { .. } => (AuditAction::AccountLocked, AuditOutcome::Denied),
            e if e.is_denial() => (event, AuditOutcome::Denied),
            _ => (event, AuditOutcome::Failed),
        };
        let target = match (event, target) {
            (AuditAction::AccessDeny, _) => match error {
                DeskError::Forbidden { action } => Some(action.to_string()),
                _ => None,
            },
            (_, target) => target,
        };
        self.record(event, actor, target, outcome, Some(error.kind().to_string()));
    }

    /// Record the outcome of `result` and hand it back unchanged
    fn audited_with<T>(
        &self,
        event: AuditAction,
        actor: &str,
        target: Option<String>,
        result: DeskResult<T>,
        detail: impl FnOnce(&T) -> Option<String>,
    ) -> DeskResult<T> {
        match &result {
            Ok(value) => self.record(event, actor, target, AuditOutcome::Success, detail(value)),
            Err(error) => self.record_error(event, actor, target, error),
        }
        result
    }

    fn audited<T>(
        &self,
        event: AuditAction,
        actor: &str,
        target: Option<String>,
        result: DeskResult<T>,
    ) -> DeskResult<T> {
        self.audited_with(event, actor, target, result, |_| None)
    }

    /// Read-only operations only leave a trail when they fail
    fn audited_on_failure<T>(&self, event: AuditAction, actor: &str, result: DeskResult<T>) -> DeskResult<T> {
        if let Err(error) = &result {
            self.record_error(event, actor, None, error);
        }
        result
    }

    /// Resolve the session to its stored identity and check `action` against its role
    fn authorize(&self, session: Option<&Session>, action: Action) -> DeskResult<Identity> {
        let session = session.ok_or(DeskError::Unauthenticated)?;
        let identity = match self.credentials.identity(session.identity_id) {
            Ok(identity) => identity,
            Err(DeskError::NotFound(_)) => return Err(DeskError::Unauthenticated),
            Err(e) => return Err(e),
        };
        if identity.role != session.role {
            debug!(
                "Session role {} is stale, identity now holds {}",
                session.role, identity.role
            );
        }
        RoleGate::check(Some(identity.role), action)?;
        Ok(identity)
    }

    // --- accounts ---

    /// Questions a new account picks its two challenges from
    pub fn security_questions(&self) -> Vec<SecurityQuestion> {
        security_questions()
    }

    /// Self-service signup. New accounts always start as members.
    pub fn create_account(&self, request: SignupRequest) -> DeskResult<Identity> {
        let actor = request.email.trim().to_string();
        let result = self.credentials.register(request, Role::Member);
        self.audited_with(AuditAction::Signup, &actor, None, result, |identity| {
            Some(identity.role.to_string())
        })
    }

    /// Create the first administrator. Refused once any admin exists.
    pub fn bootstrap_admin(&self, request: SignupRequest) -> DeskResult<Identity> {
        let actor = request.email.trim().to_string();
        let result = self.credentials.register_first_admin(request);
        self.audited_with(AuditAction::Signup, &actor, None, result, |identity| {
            Some(identity.role.to_string())
        })
    }

    /// Verify a login identifier (email or handle) and password
    pub fn authenticate(&self, login: &str, password: &str) -> DeskResult<Session> {
        let now = self.clock.now();
        let result = self
            .credentials
            .authenticate(login, password)
            .map(|verified| Session {
                identity_id: verified.identity.id,
                role: verified.identity.role,
                display_name: verified.identity.display_name().to_string(),
                authenticated_at: now,
                last_success_at: verified.previous_success,
            });
        self.audited(AuditAction::Login, login.trim(), None, result)
    }

    /// One of the caller's two registered questions, for the re-authentication prompt
    pub fn security_question(&self, session: Option<&Session>) -> DeskResult<SecurityQuestion> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ViewSecurityQuestion)
            .and_then(|identity| self.challenges.pick_question(&identity));
        self.audited_on_failure(AuditAction::Reauth, &actor, result)
    }

    /// Step-up check: current password, then one challenge answer
    pub fn reauthenticate(
        &self,
        session: Option<&Session>,
        password: &str,
        question_id: &str,
        answer: &str,
    ) -> DeskResult<()> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::Reauthenticate)
            .and_then(|identity| {
                self.challenges
                    .reauthenticate(&self.credentials, identity.id, password, question_id, answer)
            })
            .map(|_| ());
        self.audited(AuditAction::Reauth, &actor, Some(question_id.to_string()), result)
    }

    /// Rotate the caller's password inside a fresh re-authentication window
    pub fn change_password(&self, session: Option<&Session>, new_password: &str) -> DeskResult<()> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ChangePassword)
            .and_then(|identity| {
                self.challenges
                    .change_password(&self.credentials, identity.id, new_password)
            })
            .map(|_| ());
        self.audited(AuditAction::PasswordChange, &actor, None, result)
    }

    /// Grant `role` to the account behind `target_login`
    pub fn change_role(
        &self,
        session: Option<&Session>,
        target_login: &str,
        role: Role,
    ) -> DeskResult<Identity> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ChangeRole)
            .and_then(|_| {
                self.credentials
                    .find_by_login(target_login)?
                    .ok_or(DeskError::NotFound("identity"))
            })
            .and_then(|target| self.credentials.change_role(target.id, role));

        let (identity, previous) = self.audited_with(
            AuditAction::RoleChange,
            &actor,
            Some(target_login.trim().to_string()),
            result,
            |(_, previous)| Some(format!("{} -> {}", previous, role)),
        )?;
        info!("Role of {} changed from {} to {}", identity.id, previous, role);
        Ok(identity)
    }

    // --- catalog ---

    pub fn list_catalog(&self, session: Option<&Session>) -> DeskResult<Vec<CatalogItem>> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::BrowseCatalog)
            .and_then(|_| self.lending.catalog());
        self.audited_on_failure(AuditAction::CatalogRead, &actor, result)
    }

    /// Active holds and loans of the caller
    pub fn list_own_loans(&self, session: Option<&Session>) -> DeskResult<Vec<(Reservation, CatalogItem)>> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ListOwnLoans)
            .and_then(|identity| self.lending.active_for(identity.id));
        self.audited_on_failure(AuditAction::LoansRead, &actor, result)
    }

    pub fn create_item(&self, session: Option<&Session>, title: &str, author: &str) -> DeskResult<CatalogItem> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::CreateItem)
            .and_then(|_| self.lending.create_item(title, author));
        self.audited_with(AuditAction::ItemCreate, &actor, None, result, |item| {
            Some(item.id.to_string())
        })
    }

    // --- lending ---

    pub fn borrow(
        &self,
        session: Option<&Session>,
        item_id: ItemId,
    ) -> DeskResult<(Reservation, TransactionRecord)> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::BorrowItem)
            .and_then(|identity| self.lending.borrow(identity.id, item_id));
        self.audited(AuditAction::Borrow, &actor, Some(item_id.to_string()), result)
    }

    pub fn place_hold(&self, session: Option<&Session>, item_id: ItemId) -> DeskResult<Reservation> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::PlaceHold)
            .and_then(|identity| self.lending.place_hold(identity.id, item_id));
        self.audited(AuditAction::Hold, &actor, Some(item_id.to_string()), result)
    }

    /// Withdraw one of the caller's own pending holds
    pub fn cancel_hold(
        &self,
        session: Option<&Session>,
        reservation_id: ReservationId,
    ) -> DeskResult<TransitionOutcome> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::CancelOwnHold)
            .and_then(|identity| self.lending.cancel_hold(identity.id, reservation_id));
        self.audited_with(
            AuditAction::ReservationTransition,
            &actor,
            Some(reservation_id.to_string()),
            result,
            |outcome| Some(outcome.reservation.status.to_string()),
        )
    }

    /// Process a return. Only staff may do this, never the borrower alone.
    pub fn return_item(
        &self,
        session: Option<&Session>,
        item_id: ItemId,
    ) -> DeskResult<(Reservation, TransactionRecord)> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ProcessReturn)
            .and_then(|staff| self.lending.return_item(staff.id, item_id));
        self.audited(AuditAction::Return, &actor, Some(item_id.to_string()), result)
    }

    pub fn list_reservations(&self, session: Option<&Session>) -> DeskResult<Vec<Reservation>> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ManageReservations)
            .and_then(|_| self.lending.reservations());
        self.audited_on_failure(AuditAction::ReservationsRead, &actor, result)
    }

    pub fn transition_reservation(
        &self,
        session: Option<&Session>,
        reservation_id: ReservationId,
        target: ReservationStatus,
    ) -> DeskResult<TransitionOutcome> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ManageReservations)
            .and_then(|staff| self.lending.transition(staff.id, reservation_id, target));
        self.audited_with(
            AuditAction::ReservationTransition,
            &actor,
            Some(reservation_id.to_string()),
            result,
            |_| Some(target.to_string()),
        )
    }

    // --- administration ---

    pub fn list_transactions(&self, session: Option<&Session>) -> DeskResult<Vec<TransactionRecord>> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ListTransactions)
            .and_then(|_| self.lending.transactions());
        self.audited(AuditAction::TransactionsRead, &actor, None, result)
    }

    /// The raw audit stream as it stood before this read
    pub fn audit_trail(&self, session: Option<&Session>) -> DeskResult<Vec<AuditEvent>> {
        let actor = actor_of(session);
        let result = self
            .authorize(session, Action::ReadAuditTrail)
            .map(|_| self.audit.events());
        self.audited_with(AuditAction::AuditRead, &actor, None, result, |events| {
            Some(format!("{} events", events.len()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::auth::ChallengeAnswer;
    use crate::modules::error::{ConflictError, PasswordPolicyError};
    use crate::modules::lending::TransactionKind;
    use crate::modules::storage::{LedgerChange, MemoryStore, StoreError};
    use crate::modules::utils::audit::MemoryAuditLog;
    use crate::modules::utils::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Barrier;

    struct Fixture {
        desk: LendingDesk,
        store: Arc<MemoryStore>,
        audit: Arc<MemoryAuditLog>,
        clock: Arc<ManualClock>,
    }

    fn request(email: &str, handle: &str, password: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            handle: Some(handle.to_string()),
            full_name: format!("{} Example", handle),
            password: password.to_string(),
            challenges: vec![
                ChallengeAnswer::new("q01", "", "Mrs Hendricks"),
                ChallengeAnswer::new("q05", "", "Lantern Row"),
            ],
        }
    }

    fn fixture() -> Fixture {
        let config = DeskConfig {
            hash_iterations: 1_000,
            ..DeskConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 8, 30, 0).unwrap()));
        let desk = LendingDesk::new(store.clone(), store.clone(), audit.clone(), clock.clone(), &config).unwrap();
        Fixture {
            desk,
            store,
            audit,
            clock,
        }
    }

    /// Admin, librarian and two members, each logged in
    fn staffed() -> (Fixture, Session, Session, Session, Session) {
        let f = fixture();
        f.desk
            .bootstrap_admin(request("root@example.com", "root", "Admin-Password1"))
            .unwrap();
        f.desk
            .create_account(request("lib@example.com", "librarian", "Shelf-Password1"))
            .unwrap();
        f.desk
            .create_account(request("alice@example.com", "alice", "Alice-Password1"))
            .unwrap();
        f.desk
            .create_account(request("bob@example.com", "bob", "Bobs-Password1"))
            .unwrap();

        let admin = f.desk.authenticate("root", "Admin-Password1").unwrap();
        f.desk
            .change_role(Some(&admin), "librarian", Role::Librarian)
            .unwrap();
        let librarian = f.desk.authenticate("lib@example.com", "Shelf-Password1").unwrap();
        let alice = f.desk.authenticate("alice", "Alice-Password1").unwrap();
        let bob = f.desk.authenticate("BOB@example.com", "Bobs-Password1").unwrap();
        (f, admin, librarian, alice, bob)
    }

    fn last_event(f: &Fixture) -> AuditEvent {
        f.audit.events().pop().unwrap()
    }

    fn failed_attempts(f: &Fixture, login: &str) -> u32 {
        f.store.find_by_login(login).unwrap().unwrap().failed_attempts
    }

    #[test]
    fn test_signup_always_member() {
        let f = fixture();
        let identity = f
            .desk
            .create_account(request("alice@example.com", "alice", "Alice-Password1"))
            .unwrap();
        assert_eq!(identity.role, Role::Member);

        let event = last_event(&f);
        assert_eq!(event.event, AuditAction::Signup);
        assert_eq!(event.outcome, AuditOutcome::Success);
    }

    #[test]
    fn test_bootstrap_admin_only_once() {
        let f = fixture();
        f.desk
            .bootstrap_admin(request("root@example.com", "root", "Admin-Password1"))
            .unwrap();
        assert!(matches!(
            f.desk
                .bootstrap_admin(request("other@example.com", "other", "Other-Password1")),
            Err(DeskError::Forbidden { .. })
        ));
        assert_eq!(last_event(&f).event, AuditAction::AccessDeny);
    }

    #[test]
    fn test_failed_signup_is_audited() {
        let f = fixture();
        let result = f
            .desk
            .create_account(request("weak@example.com", "weak", "password"));
        assert!(matches!(
            result,
            Err(DeskError::PasswordPolicy(PasswordPolicyError::TooWeak(_)))
        ));

        let event = last_event(&f);
        assert_eq!(event.event, AuditAction::Signup);
        assert_eq!(event.outcome, AuditOutcome::Failed);
        assert_eq!(event.detail.as_deref(), Some("password_too_weak"));
    }

    #[test]
    fn test_threshold_five_example() {
        let f = fixture();
        f.desk
            .create_account(request("alice@example.com", "alice", "Alice-Password1"))
            .unwrap();

        for _ in 0..4 {
            assert!(matches!(
                f.desk.authenticate("alice", "Wrong-Password9"),
                Err(DeskError::Authentication)
            ));
        }
        assert_eq!(failed_attempts(&f, "alice"), 4);

        f.desk.authenticate("alice", "Alice-Password1").unwrap();
        assert_eq!(failed_attempts(&f, "alice"), 0);

        for _ in 0..4 {
            assert!(matches!(
                f.desk.authenticate("alice", "Wrong-Password9"),
                Err(DeskError::Authentication)
            ));
        }
        assert!(matches!(
            f.desk.authenticate("alice", "Wrong-Password9"),
            Err(DeskError::AccountLocked { .. })
        ));

        let event = last_event(&f);
        assert_eq!(event.event, AuditAction::AccountLocked);
        assert_eq!(event.outcome, AuditOutcome::Denied);
    }

    #[test]
    fn test_lock_honored_until_expiry() {
        let f = fixture();
        f.desk
            .create_account(request("alice@example.com", "alice", "Alice-Password1"))
            .unwrap();
        for _ in 0..5 {
            let _ = f.desk.authenticate("alice", "Wrong-Password9");
        }

        // Correct password, still locked; the counter is not touched
        f.clock.advance(Duration::minutes(14));
        assert!(matches!(
            f.desk.authenticate("alice", "Alice-Password1"),
            Err(DeskError::AccountLocked { .. })
        ));
        assert_eq!(failed_attempts(&f, "alice"), 0);

        f.clock.advance(Duration::minutes(1) + Duration::seconds(1));
        let session = f.desk.authenticate("alice", "Alice-Password1").unwrap();
        assert_eq!(session.role, Role::Member);
    }

    #[test]
    fn test_unknown_login_and_wrong_password_look_alike() {
        let f = fixture();
        f.desk
            .create_account(request("alice@example.com", "alice", "Alice-Password1"))
            .unwrap();

        let unknown = f.desk.authenticate("nobody", "Alice-Password1").unwrap_err();
        let wrong = f.desk.authenticate("alice", "Wrong-Password9").unwrap_err();
        assert_eq!(unknown.public_message(), wrong.public_message());
    }

    #[test]
    fn test_session_reports_previous_success() {
        let f = fixture();
        f.desk
            .create_account(request("alice@example.com", "alice", "Alice-Password1"))
            .unwrap();

        let first = f.desk.authenticate("alice", "Alice-Password1").unwrap();
        assert!(first.last_success_at.is_none());

        f.clock.advance(Duration::hours(3));
        let second = f.desk.authenticate("alice", "Alice-Password1").unwrap();
        assert_eq!(second.last_success_at, Some(first.authenticated_at));
    }

    #[test]
    fn test_borrow_and_return_example() {
        let (f, admin, librarian, alice, bob) = staffed();
        let item = f.desk.create_item(Some(&librarian), "Dune", "Frank Herbert").unwrap();

        let (reservation, record) = f.desk.borrow(Some(&alice), item.id).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Borrowed);
        assert_eq!(record.kind(), TransactionKind::Borrow);

        assert!(matches!(
            f.desk.borrow(Some(&bob), item.id),
            Err(DeskError::Conflict(ConflictError::AlreadyLent))
        ));

        // The borrower alone cannot process the return
        assert!(matches!(
            f.desk.return_item(Some(&alice), item.id),
            Err(DeskError::Forbidden {
                action: Action::ProcessReturn
            })
        ));
        let denied = last_event(&f);
        assert_eq!(denied.event, AuditAction::AccessDeny);
        assert_eq!(denied.target.as_deref(), Some("process_return"));

        let (returned, record) = f.desk.return_item(Some(&librarian), item.id).unwrap();
        assert_eq!(returned.status, ReservationStatus::Returned);
        assert_eq!(record.kind(), TransactionKind::Return);
        assert_eq!(record.processed_by(), Some(librarian.identity_id));

        let catalog = f.desk.list_catalog(Some(&alice)).unwrap();
        assert!(!catalog[0].lent);

        let records = f.desk.list_transactions(Some(&admin)).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(
            f.desk.list_transactions(Some(&librarian)),
            Err(DeskError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_unauthenticated_callers_denied_and_audited() {
        let (f, _, librarian, _, _) = staffed();
        let item = f.desk.create_item(Some(&librarian), "Dune", "Frank Herbert").unwrap();

        assert!(matches!(f.desk.borrow(None, item.id), Err(DeskError::Unauthenticated)));
        let event = last_event(&f);
        assert_eq!(event.event, AuditAction::AccessDeny);
        assert_eq!(event.actor, "anonymous");
        assert_eq!(event.detail.as_deref(), Some("unauthenticated"));

        assert!(matches!(f.desk.list_catalog(None), Err(DeskError::Unauthenticated)));
    }

    #[test]
    fn test_members_cannot_manage_catalog() {
        let (f, _, _, alice, _) = staffed();
        let before = f.audit.events().len();

        assert!(matches!(
            f.desk.create_item(Some(&alice), "Dune", "Frank Herbert"),
            Err(DeskError::Forbidden { .. })
        ));
        assert!(matches!(
            f.desk.list_reservations(Some(&alice)),
            Err(DeskError::Forbidden { .. })
        ));
        assert!(matches!(f.desk.audit_trail(Some(&alice)), Err(DeskError::Forbidden { .. })));

        let events = f.audit.events();
        assert_eq!(events.len(), before + 3);
        assert!(events[before..]
            .iter()
            .all(|e| e.event == AuditAction::AccessDeny && e.outcome == AuditOutcome::Denied));
    }

    #[test]
    fn test_role_is_read_from_store() {
        let (f, admin, _, alice, _) = staffed();

        // Alice's session was issued while she was a member
        f.desk.change_role(Some(&admin), "alice", Role::Librarian).unwrap();
        assert!(f.desk.create_item(Some(&alice), "Dune", "Frank Herbert").is_ok());

        f.desk.change_role(Some(&admin), "alice", Role::Member).unwrap();
        assert!(matches!(
            f.desk.create_item(Some(&alice), "Emma", "Jane Austen"),
            Err(DeskError::Forbidden { .. })
        ));

        let change = f
            .audit
            .events()
            .into_iter()
            .filter(|e| e.event == AuditAction::RoleChange)
            .last()
            .unwrap();
        assert_eq!(change.detail.as_deref(), Some("librarian -> member"));
    }

    #[test]
    fn test_holds_through_the_desk() {
        let (f, _, librarian, alice, bob) = staffed();
        let item = f.desk.create_item(Some(&librarian), "Emma", "Jane Austen").unwrap();

        let hold = f.desk.place_hold(Some(&alice), item.id).unwrap();
        let other = f.desk.place_hold(Some(&bob), item.id).unwrap();

        assert!(matches!(
            f.desk.cancel_hold(Some(&bob), hold.id),
            Err(DeskError::Forbidden { .. })
        ));
        f.desk.cancel_hold(Some(&bob), other.id).unwrap();

        let outcome = f
            .desk
            .transition_reservation(Some(&librarian), hold.id, ReservationStatus::Borrowed)
            .unwrap();
        assert!(outcome.item.lent);

        let loans = f.desk.list_own_loans(Some(&alice)).unwrap();
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].1.id, item.id);
        assert!(f.desk.list_own_loans(Some(&bob)).unwrap().is_empty());

        assert!(matches!(
            f.desk.place_hold(Some(&bob), item.id),
            Err(DeskError::Conflict(ConflictError::AlreadyLent))
        ));
    }

    #[test]
    fn test_terminal_reservations_reject_transitions() {
        let (f, _, librarian, alice, _) = staffed();
        let item = f.desk.create_item(Some(&librarian), "Emma", "Jane Austen").unwrap();
        let (reservation, _) = f.desk.borrow(Some(&alice), item.id).unwrap();
        f.desk.return_item(Some(&librarian), item.id).unwrap();

        for target in [ReservationStatus::Borrowed, ReservationStatus::Cancelled, ReservationStatus::Returned] {
            assert!(matches!(
                f.desk.transition_reservation(Some(&librarian), reservation.id, target),
                Err(DeskError::Conflict(ConflictError::TerminalStateViolation { .. }))
            ));
            let event = last_event(&f);
            assert_eq!(event.event, AuditAction::ReservationTransition);
            assert_eq!(event.outcome, AuditOutcome::Failed);
        }
    }

    #[test]
    fn test_concurrent_borrow_through_desk() {
        let (f, _, librarian, alice, bob) = staffed();
        let item = f.desk.create_item(Some(&librarian), "Dune", "Frank Herbert").unwrap();
        let barrier = Barrier::new(2);
        let (desk, barrier) = (&f.desk, &barrier);

        let results: Vec<DeskResult<(Reservation, TransactionRecord)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = [&alice, &bob]
                .into_iter()
                .map(|session| {
                    scope.spawn(move || {
                        barrier.wait();
                        desk.borrow(Some(session), item.id)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(DeskError::Conflict(ConflictError::AlreadyLent)))));

        let active = f
            .desk
            .list_reservations(Some(&librarian))
            .unwrap()
            .into_iter()
            .filter(|r| r.item_id == item.id && r.is_active())
            .count();
        assert_eq!(active, 1);
    }

    #[test]
    fn test_reauth_then_change_password() {
        let (f, _, _, alice, _) = staffed();
        f.clock.advance(Duration::days(2));

        assert!(matches!(
            f.desk.change_password(Some(&alice), "Alice-Password2"),
            Err(DeskError::ReauthRequired)
        ));
        let denied = last_event(&f);
        assert_eq!(denied.event, AuditAction::PasswordChange);
        assert_eq!(denied.outcome, AuditOutcome::Denied);

        let question = f.desk.security_question(Some(&alice)).unwrap();
        let answer = match question.id.as_str() {
            "q01" => "mrs hendricks",
            _ => "lantern row",
        };
        f.desk
            .reauthenticate(Some(&alice), "Alice-Password1", &question.id, answer)
            .unwrap();
        f.desk.change_password(Some(&alice), "Alice-Password2").unwrap();

        assert!(f.desk.authenticate("alice", "Alice-Password2").is_ok());
        assert!(matches!(
            f.desk.authenticate("alice", "Alice-Password1"),
            Err(DeskError::Authentication)
        ));
    }

    #[test]
    fn test_audit_trail_for_admin() {
        let (f, admin, _, _, _) = staffed();
        let events = f.desk.audit_trail(Some(&admin)).unwrap();
        assert!(events.iter().any(|e| e.event == AuditAction::Signup));
        assert!(events.iter().any(|e| e.event == AuditAction::Login));
        assert_eq!(last_event(&f).event, AuditAction::AuditRead);
    }

    #[test]
    fn test_concurrent_bootstrap_creates_one_admin() {
        let f = fixture();
        let barrier = Barrier::new(4);
        let (desk, barrier) = (&f.desk, &barrier);

        let results: Vec<DeskResult<Identity>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["root", "boss", "chief", "owner"]
                .into_iter()
                .map(|handle| {
                    scope.spawn(move || {
                        barrier.wait();
                        desk.bootstrap_admin(request(
                            &format!("{}@example.com", handle),
                            handle,
                            "Admin-Password1",
                        ))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let admins = f
            .store
            .identities()
            .unwrap()
            .into_iter()
            .filter(|identity| identity.role == Role::Admin)
            .count();
        assert_eq!(admins, 1);
    }

    /// Ledger whose every call fails
    struct BrokenLedger;

    impl LendingPort for BrokenLedger {
        fn insert_item(&self, _item: CatalogItem) -> Result<(), StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn item(&self, _id: ItemId) -> Result<Option<CatalogItem>, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn items(&self) -> Result<Vec<CatalogItem>, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn reservation(&self, _id: ReservationId) -> Result<Option<Reservation>, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn reservations(&self) -> Result<Vec<Reservation>, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }

        fn commit(&self, _change: LedgerChange) -> Result<(), StoreError> {
            Err(StoreError::Backend("offline".to_string()))
        }
    }

    #[test]
    fn test_read_failures_are_not_access_denials() {
        let config = DeskConfig {
            hash_iterations: 1_000,
            ..DeskConfig::default()
        };
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 8, 30, 0).unwrap()));
        let desk = LendingDesk::new(store, Arc::new(BrokenLedger), audit.clone(), clock, &config).unwrap();

        desk.create_account(request("alice@example.com", "alice", "Alice-Password1"))
            .unwrap();
        let alice = desk.authenticate("alice", "Alice-Password1").unwrap();

        assert!(matches!(desk.list_catalog(Some(&alice)), Err(DeskError::Internal(_))));
        let event = audit.events().pop().unwrap();
        assert_eq!(event.event, AuditAction::CatalogRead);
        assert_eq!(event.outcome, AuditOutcome::Failed);
        assert_eq!(event.detail.as_deref(), Some("internal"));

        assert!(matches!(desk.list_own_loans(Some(&alice)), Err(DeskError::Internal(_))));
        assert_eq!(audit.events().pop().unwrap().event, AuditAction::LoansRead);

        assert!(!audit.events().iter().any(|e| e.event == AuditAction::AccessDeny));
    }
}
