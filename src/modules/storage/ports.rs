//! Narrow read/write ports the desk components persist through.
//!
//! Every write that guards an invariant is conditional: it names the state it
//! expects to replace and fails with [`StoreError::VersionConflict`] when that
//! state has moved on.

use thiserror::Error;

use crate::modules::auth::{Identity, IdentityId};
use crate::modules::lending::{
    CatalogItem, ItemId, Reservation, ReservationId, ReservationStatus, TransactionRecord,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A conditional write found the record in a different state
    #[error("conditional write rejected for {0}")]
    VersionConflict(&'static str),
    /// A unique key is already taken
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    /// The record to update does not exist
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Storage for account identities
pub trait IdentityPort: Send + Sync {
    /// Insert a new identity; fails with `Duplicate` when email or handle is taken
    fn insert_identity(&self, identity: Identity) -> Result<(), StoreError>;

    /// Insert `identity` only while no admin exists.
    ///
    /// Fails with `VersionConflict("admin")` once one does.
    fn insert_first_admin(&self, identity: Identity) -> Result<(), StoreError>;

    fn identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    /// Find by normalized email or normalized handle
    fn find_by_login(&self, login_normalized: &str) -> Result<Option<Identity>, StoreError>;

    /// Replace the stored identity if its version is still `expected_version`.
    ///
    /// Returns the stored value, with its version bumped.
    fn replace_identity(
        &self,
        expected_version: u64,
        identity: Identity,
    ) -> Result<Identity, StoreError>;

    fn identities(&self) -> Result<Vec<Identity>, StoreError>;
}

/// Item replacement guarded by the item's version
#[derive(Debug, Clone)]
pub struct ItemWrite {
    pub expected_version: u64,
    pub item: CatalogItem,
}

/// Reservation insert, or replacement guarded by its prior status
#[derive(Debug, Clone)]
pub enum ReservationWrite {
    Insert(Reservation),
    Update {
        expected_status: ReservationStatus,
        reservation: Reservation,
    },
}

/// A batch of lending writes applied all-or-nothing
#[derive(Debug, Clone)]
pub struct LedgerChange {
    pub item: Option<ItemWrite>,
    pub reservation: ReservationWrite,
    pub record: Option<TransactionRecord>,
}

/// Storage for catalog items, reservations and transaction records
pub trait LendingPort: Send + Sync {
    fn insert_item(&self, item: CatalogItem) -> Result<(), StoreError>;

    fn item(&self, id: ItemId) -> Result<Option<CatalogItem>, StoreError>;

    fn items(&self) -> Result<Vec<CatalogItem>, StoreError>;

    fn reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    fn reservations(&self) -> Result<Vec<Reservation>, StoreError>;

    fn transactions(&self) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Apply every write in `change` or none of them
    fn commit(&self, change: LedgerChange) -> Result<(), StoreError>;
}
