use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::modules::auth::IdentityId;

macro_rules! record_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(value.trim()).map(Self)
            }
        }
    };
}

record_id!(ItemId);
record_id!(ReservationId);
record_id!(TransactionId);

/// A lendable book in the shared catalog
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: ItemId,
    pub title: String,
    pub author: String,
    pub lent: bool,
    pub holder: Option<IdentityId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl CatalogItem {
    pub fn new(title: String, author: String, now: DateTime<Utc>) -> Self {
        Self {
            id: ItemId::new(),
            title,
            author,
            lent: false,
            holder: None,
            created_at: now,
            version: 0,
        }
    }

    /// Copy of this item bound to `holder`
    pub fn lent_to(&self, holder: IdentityId) -> Self {
        Self {
            lent: true,
            holder: Some(holder),
            ..self.clone()
        }
    }

    /// Copy of this item back on the shelf
    pub fn released(&self) -> Self {
        Self {
            lent: false,
            holder: None,
            ..self.clone()
        }
    }
}

/// Lifecycle status of a reservation
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Borrowed,
    Returned,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Borrowed => "borrowed",
            ReservationStatus::Returned => "returned",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Returned | ReservationStatus::Cancelled)
    }

    /// The forward edges of the reservation graph
    pub fn can_move_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Borrowed)
                | (ReservationStatus::Pending, ReservationStatus::Cancelled)
                | (ReservationStatus::Borrowed, ReservationStatus::Returned)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "borrowed" => Ok(ReservationStatus::Borrowed),
            "returned" => Ok(ReservationStatus::Returned),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status '{}'", other)),
        }
    }
}

/// One status change in a reservation's history
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: ReservationStatus,
    pub at: DateTime<Utc>,
    pub by: IdentityId,
}

/// One identity's claim on one catalog item
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: ReservationId,
    pub item_id: ItemId,
    pub reserved_by: IdentityId,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub history: Vec<StatusChange>,
}

impl Reservation {
    pub fn new(item_id: ItemId, reserved_by: IdentityId, now: DateTime<Utc>) -> Self {
        Self {
            id: ReservationId::new(),
            item_id,
            reserved_by,
            status: ReservationStatus::Pending,
            created_at: now,
            status_changed_at: now,
            history: vec![StatusChange {
                status: ReservationStatus::Pending,
                at: now,
                by: reserved_by,
            }],
        }
    }

    /// Copy of this reservation moved to `status`; the caller checks the edge
    pub fn moved_to(&self, status: ReservationStatus, by: IdentityId, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.status_changed_at = now;
        next.history.push(StatusChange { status, at: now, by });
        next
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Kind of completed lending action
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Borrow,
    Return,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Borrow => f.write_str("borrow"),
            TransactionKind::Return => f.write_str("return"),
        }
    }
}

/// Immutable record of a completed borrow or return
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    id: TransactionId,
    kind: TransactionKind,
    item_id: ItemId,
    reservation_id: ReservationId,
    identity_id: IdentityId,
    processed_by: Option<IdentityId>,
    at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn borrow(reservation: &Reservation, at: DateTime<Utc>) -> Self {
        Self {
            id: TransactionId::new(),
            kind: TransactionKind::Borrow,
            item_id: reservation.item_id,
            reservation_id: reservation.id,
            identity_id: reservation.reserved_by,
            processed_by: None,
            at,
        }
    }

    pub fn returned(reservation: &Reservation, staff: IdentityId, at: DateTime<Utc>) -> Self {
        Self {
            id: TransactionId::new(),
            kind: TransactionKind::Return,
            item_id: reservation.item_id,
            reservation_id: reservation.id,
            identity_id: reservation.reserved_by,
            processed_by: Some(staff),
            at,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn reservation_id(&self) -> ReservationId {
        self.reservation_id
    }

    /// The borrowing identity
    pub fn identity_id(&self) -> IdentityId {
        self.identity_id
    }

    /// Staff identity that processed a return
    pub fn processed_by(&self) -> Option<IdentityId> {
        self.processed_by
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }
}
