use itertools::Itertools;
use log::{error, info};
use std::sync::Arc;

use super::model::{
    CatalogItem, ItemId, Reservation, ReservationId, ReservationStatus, TransactionRecord,
};
use crate::modules::access::Action;
use crate::modules::auth::IdentityId;
use crate::modules::error::{ConflictError, DeskError, DeskResult};
use crate::modules::storage::{ItemWrite, LedgerChange, LendingPort, ReservationWrite, StoreError};
use crate::modules::utils::clock::Clock;

const MAX_FIELD_LENGTH: usize = 200;

/// Result of a reservation status change
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub reservation: Reservation,
    pub item: CatalogItem,
    /// Set when the transition completed a borrow or a return
    pub record: Option<TransactionRecord>,
}

fn required_field(name: &str, value: &str) -> DeskResult<String> {
    let value = value.trim();
    if value.is_empty() || value.chars().count() > MAX_FIELD_LENGTH {
        return Err(DeskError::Validation(format!(
            "{} must be 1-{} characters",
            name, MAX_FIELD_LENGTH
        )));
    }
    Ok(value.to_string())
}

/// Owns catalog items and reservations, and is the only creator of transaction records.
///
/// Every state change is a single conditional [`LedgerChange`]; a lost race is
/// reported, never retried.
pub struct LendingStateMachine {
    ledger: Arc<dyn LendingPort>,
    clock: Arc<dyn Clock>,
}

impl LendingStateMachine {
    pub fn new(ledger: Arc<dyn LendingPort>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    pub fn create_item(&self, title: &str, author: &str) -> DeskResult<CatalogItem> {
        let title = required_field("title", title)?;
        let author = required_field("author", author)?;

        let item = CatalogItem::new(title, author, self.clock.now());
        self.ledger.insert_item(item.clone())?;
        info!("Catalog item {} created: {}", item.id, item.title);
        Ok(item)
    }

    pub fn item(&self, id: ItemId) -> DeskResult<CatalogItem> {
        self.ledger.item(id)?.ok_or(DeskError::NotFound("item"))
    }

    pub fn reservation(&self, id: ReservationId) -> DeskResult<Reservation> {
        self.ledger
            .reservation(id)?
            .ok_or(DeskError::NotFound("reservation"))
    }

    /// Whole catalog ordered by title, then author
    pub fn catalog(&self) -> DeskResult<Vec<CatalogItem>> {
        Ok(self
            .ledger
            .items()?
            .into_iter()
            .sorted_by(|a, b| {
                a.title
                    .to_lowercase()
                    .cmp(&b.title.to_lowercase())
                    .then_with(|| a.author.cmp(&b.author))
            })
            .collect())
    }

    pub fn reservations(&self) -> DeskResult<Vec<Reservation>> {
        Ok(self.ledger.reservations()?)
    }

    pub fn transactions(&self) -> DeskResult<Vec<TransactionRecord>> {
        Ok(self.ledger.transactions()?)
    }

    /// Pending holds and current loans of one identity, with their items
    pub fn active_for(&self, identity: IdentityId) -> DeskResult<Vec<(Reservation, CatalogItem)>> {
        self.ledger
            .reservations()?
            .into_iter()
            .filter(|reservation| reservation.reserved_by == identity && reservation.is_active())
            .map(|reservation| {
                let item = self.item(reservation.item_id)?;
                Ok((reservation, item))
            })
            .collect()
    }

    /// Record a pending hold on an item that is not lent
    pub fn place_hold(&self, identity: IdentityId, item_id: ItemId) -> DeskResult<Reservation> {
        let item = self.item(item_id)?;
        if item.lent {
            return Err(ConflictError::AlreadyLent.into());
        }

        let reservation = Reservation::new(item.id, identity, self.clock.now());
        self.ledger.commit(LedgerChange {
            item: None,
            reservation: ReservationWrite::Insert(reservation.clone()),
            record: None,
        })?;
        info!("Hold {} placed on item {}", reservation.id, item.id);
        Ok(reservation)
    }

    /// Self-service borrow: the reservation is created and moved to `borrowed`
    /// in the same write that marks the item lent.
    pub fn borrow(
        &self,
        borrower: IdentityId,
        item_id: ItemId,
    ) -> DeskResult<(Reservation, TransactionRecord)> {
        let item = self.item(item_id)?;
        if item.lent {
            return Err(ConflictError::AlreadyLent.into());
        }

        let now = self.clock.now();
        let reservation = Reservation::new(item.id, borrower, now).moved_to(
            ReservationStatus::Borrowed,
            borrower,
            now,
        );
        let record = TransactionRecord::borrow(&reservation, now);

        let change = LedgerChange {
            item: Some(ItemWrite {
                expected_version: item.version,
                item: item.lent_to(borrower),
            }),
            reservation: ReservationWrite::Insert(reservation.clone()),
            record: Some(record.clone()),
        };
        match self.ledger.commit(change) {
            Ok(()) => {
                info!("Item {} borrowed under reservation {}", item.id, reservation.id);
                Ok((reservation, record))
            }
            // Someone else lent the item between our read and our write
            Err(StoreError::VersionConflict(_)) => Err(ConflictError::AlreadyLent.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Process the return of a lent item on behalf of `staff`
    pub fn return_item(
        &self,
        staff: IdentityId,
        item_id: ItemId,
    ) -> DeskResult<(Reservation, TransactionRecord)> {
        let item = self.item(item_id)?;
        if !item.lent {
            return Err(ConflictError::NotLent.into());
        }

        let active = self
            .ledger
            .reservations()?
            .into_iter()
            .find(|r| r.item_id == item_id && r.status == ReservationStatus::Borrowed);
        let reservation = match active {
            Some(reservation) => reservation,
            None => {
                error!("Item {} is marked lent without a borrowed reservation", item_id);
                return Err(DeskError::Internal(format!(
                    "item {} lent without reservation",
                    item_id
                )));
            }
        };

        let outcome = self.transition(staff, reservation.id, ReservationStatus::Returned)?;
        match outcome.record {
            Some(record) => Ok((outcome.reservation, record)),
            None => Err(DeskError::Internal("return produced no record".to_string())),
        }
    }

    /// Pending hold withdrawn by the identity that placed it
    pub fn cancel_hold(&self, identity: IdentityId, reservation_id: ReservationId) -> DeskResult<TransitionOutcome> {
        let reservation = self.reservation(reservation_id)?;
        if reservation.reserved_by != identity {
            return Err(DeskError::Forbidden {
                action: Action::CancelOwnHold,
            });
        }
        self.transition(identity, reservation_id, ReservationStatus::Cancelled)
    }

    /// Move a reservation along the transition graph.
    ///
    /// `actor` is recorded in the reservation history and, for returns, as the
    /// processing staff on the transaction record.
    pub fn transition(
        &self,
        actor: IdentityId,
        reservation_id: ReservationId,
        target: ReservationStatus,
    ) -> DeskResult<TransitionOutcome> {
        let reservation = self.reservation(reservation_id)?;
        if reservation.status.is_terminal() {
            return Err(ConflictError::TerminalStateViolation {
                status: reservation.status,
            }
            .into());
        }
        if !reservation.status.can_move_to(target) {
            return Err(ConflictError::InvalidTransition {
                from: reservation.status,
                to: target,
            }
            .into());
        }

        let item = self.item(reservation.item_id)?;
        let now = self.clock.now();
        let moved = reservation.moved_to(target, actor, now);

        let (item_write, record) = match target {
            ReservationStatus::Borrowed => {
                if item.lent {
                    return Err(ConflictError::AlreadyLent.into());
                }
                let write = ItemWrite {
                    expected_version: item.version,
                    item: item.lent_to(reservation.reserved_by),
                };
                (Some(write), Some(TransactionRecord::borrow(&moved, now)))
            }
            ReservationStatus::Returned => {
                if !item.lent || item.holder != Some(reservation.reserved_by) {
                    return Err(ConflictError::NotLent.into());
                }
                let write = ItemWrite {
                    expected_version: item.version,
                    item: item.released(),
                };
                (Some(write), Some(TransactionRecord::returned(&moved, actor, now)))
            }
            // A pending hold never held the item, so the item stays as it is
            ReservationStatus::Cancelled | ReservationStatus::Pending => (None, None),
        };

        let next_item = item_write
            .as_ref()
            .map(|write| write.item.clone())
            .unwrap_or_else(|| item.clone());

        let change = LedgerChange {
            item: item_write,
            reservation: ReservationWrite::Update {
                expected_status: reservation.status,
                reservation: moved.clone(),
            },
            record: record.clone(),
        };

        match self.ledger.commit(change) {
            Ok(()) => {
                info!(
                    "Reservation {} moved {} -> {}",
                    reservation.id, reservation.status, target
                );
                Ok(TransitionOutcome {
                    reservation: moved,
                    item: next_item,
                    record,
                })
            }
            Err(StoreError::VersionConflict(_)) => Err(self.classify_conflict(reservation_id, target)),
            Err(e) => Err(e.into()),
        }
    }

    /// Explain a lost race from the state that won it
    fn classify_conflict(&self, reservation_id: ReservationId, target: ReservationStatus) -> DeskError {
        let fresh = match self.reservation(reservation_id) {
            Ok(fresh) => fresh,
            Err(e) => return e,
        };
        if fresh.status.is_terminal() {
            return ConflictError::TerminalStateViolation { status: fresh.status }.into();
        }
        if !fresh.status.can_move_to(target) {
            return ConflictError::InvalidTransition {
                from: fresh.status,
                to: target,
            }
            .into();
        }
        match target {
            ReservationStatus::Borrowed => ConflictError::AlreadyLent.into(),
            _ => ConflictError::NotLent.into(),
        }
    }
}
