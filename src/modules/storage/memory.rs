use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::ports::{IdentityPort, LedgerChange, LendingPort, ReservationWrite, StoreError};
use crate::modules::auth::{Identity, IdentityId, Role};
use crate::modules::lending::{CatalogItem, ItemId, Reservation, ReservationId, TransactionRecord};
use crate::modules::utils::audit::AuditEvent;

/// Serializable copy of everything a store holds
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub identities: Vec<Identity>,
    pub items: Vec<CatalogItem>,
    pub reservations: Vec<Reservation>,
    pub transactions: Vec<TransactionRecord>,
    #[serde(default)]
    pub audit_events: Vec<AuditEvent>,
}

#[derive(Default)]
struct Ledger {
    items: HashMap<ItemId, CatalogItem>,
    reservations: HashMap<ReservationId, Reservation>,
    transactions: Vec<TransactionRecord>,
}

/// Thread-safe in-process store implementing both persistence ports.
///
/// Each port keeps its tables behind one mutex, so a conditional write checks
/// and applies its preconditions while holding the lock.
#[derive(Default)]
pub struct MemoryStore {
    identities: Mutex<HashMap<IdentityId, Identity>>,
    ledger: Mutex<Ledger>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
}

fn login_taken(existing: &Identity, candidate: &Identity) -> bool {
    let handle_clash = |handle: &Option<String>| {
        handle.is_some()
            && (*handle == existing.handle_normalized
                || handle.as_deref() == Some(existing.email_normalized.as_str()))
    };
    existing.email_normalized == candidate.email_normalized
        || existing.handle_normalized.as_deref() == Some(candidate.email_normalized.as_str())
        || handle_clash(&candidate.handle_normalized)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let identities = snapshot
            .identities
            .into_iter()
            .map(|identity| (identity.id, identity))
            .collect();
        let ledger = Ledger {
            items: snapshot.items.into_iter().map(|item| (item.id, item)).collect(),
            reservations: snapshot
                .reservations
                .into_iter()
                .map(|reservation| (reservation.id, reservation))
                .collect(),
            transactions: snapshot.transactions,
        };
        Self {
            identities: Mutex::new(identities),
            ledger: Mutex::new(ledger),
        }
    }

    /// Copy out the current contents; audit events are filled in by the caller
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let mut identities: Vec<Identity> = lock(&self.identities)?.values().cloned().collect();
        identities.sort_by_key(|identity| identity.created_at);

        let ledger = lock(&self.ledger)?;
        let mut items: Vec<CatalogItem> = ledger.items.values().cloned().collect();
        items.sort_by_key(|item| item.created_at);
        let mut reservations: Vec<Reservation> = ledger.reservations.values().cloned().collect();
        reservations.sort_by_key(|reservation| reservation.created_at);

        Ok(StoreSnapshot {
            identities,
            items,
            reservations,
            transactions: ledger.transactions.clone(),
            audit_events: Vec::new(),
        })
    }
}

fn insert_unique(identities: &mut HashMap<IdentityId, Identity>, identity: Identity) -> Result<(), StoreError> {
    if identities.contains_key(&identity.id)
        || identities.values().any(|existing| login_taken(existing, &identity))
    {
        return Err(StoreError::Duplicate("identity"));
    }
    identities.insert(identity.id, identity);
    Ok(())
}

impl IdentityPort for MemoryStore {
    fn insert_identity(&self, identity: Identity) -> Result<(), StoreError> {
        insert_unique(&mut *lock(&self.identities)?, identity)
    }

    fn insert_first_admin(&self, identity: Identity) -> Result<(), StoreError> {
        let mut identities = lock(&self.identities)?;
        if identities.values().any(|existing| existing.role == Role::Admin) {
            return Err(StoreError::VersionConflict("admin"));
        }
        insert_unique(&mut identities, identity)
    }

    fn identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        Ok(lock(&self.identities)?.get(&id).cloned())
    }

    fn find_by_login(&self, login_normalized: &str) -> Result<Option<Identity>, StoreError> {
        let identities = lock(&self.identities)?;
        let found = identities.values().find(|identity| {
            identity.email_normalized == login_normalized
                || identity.handle_normalized.as_deref() == Some(login_normalized)
        });
        Ok(found.cloned())
    }

    fn replace_identity(
        &self,
        expected_version: u64,
        mut identity: Identity,
    ) -> Result<Identity, StoreError> {
        let mut identities = lock(&self.identities)?;
        let current = identities
            .get(&identity.id)
            .ok_or(StoreError::Missing("identity"))?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict("identity"));
        }
        identity.version = expected_version + 1;
        identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        let mut all: Vec<Identity> = lock(&self.identities)?.values().cloned().collect();
        all.sort_by_key(|identity| identity.created_at);
        Ok(all)
    }
}

impl LendingPort for MemoryStore {
    fn insert_item(&self, item: CatalogItem) -> Result<(), StoreError> {
        let mut ledger = lock(&self.ledger)?;
        if ledger.items.contains_key(&item.id) {
            return Err(StoreError::Duplicate("item"));
        }
        ledger.items.insert(item.id, item);
        Ok(())
    }

    fn item(&self, id: ItemId) -> Result<Option<CatalogItem>, StoreError> {
        Ok(lock(&self.ledger)?.items.get(&id).cloned())
    }

    fn items(&self) -> Result<Vec<CatalogItem>, StoreError> {
        Ok(lock(&self.ledger)?.items.values().cloned().collect())
    }

    fn reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(lock(&self.ledger)?.reservations.get(&id).cloned())
    }

    fn reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let mut all: Vec<Reservation> =
            lock(&self.ledger)?.reservations.values().cloned().collect();
        all.sort_by_key(|reservation| reservation.created_at);
        Ok(all)
    }

    fn transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(lock(&self.ledger)?.transactions.clone())
    }

    fn commit(&self, change: LedgerChange) -> Result<(), StoreError> {
        let mut ledger = lock(&self.ledger)?;

        // Check every precondition before touching anything
        if let Some(write) = &change.item {
            let current = ledger
                .items
                .get(&write.item.id)
                .ok_or(StoreError::Missing("item"))?;
            if current.version != write.expected_version {
                return Err(StoreError::VersionConflict("item"));
            }
        }
        match &change.reservation {
            ReservationWrite::Insert(reservation) => {
                if ledger.reservations.contains_key(&reservation.id) {
                    return Err(StoreError::Duplicate("reservation"));
                }
                if !ledger.items.contains_key(&reservation.item_id) {
                    return Err(StoreError::Missing("item"));
                }
            }
            ReservationWrite::Update {
                expected_status,
                reservation,
            } => {
                let current = ledger
                    .reservations
                    .get(&reservation.id)
                    .ok_or(StoreError::Missing("reservation"))?;
                if current.status != *expected_status {
                    return Err(StoreError::VersionConflict("reservation"));
                }
            }
        }

        if let Some(write) = change.item {
            let mut item = write.item;
            item.version = write.expected_version + 1;
            ledger.items.insert(item.id, item);
        }
        let reservation = match change.reservation {
            ReservationWrite::Insert(reservation) => reservation,
            ReservationWrite::Update { reservation, .. } => reservation,
        };
        ledger.reservations.insert(reservation.id, reservation);
        if let Some(record) = change.record {
            ledger.transactions.push(record);
        }
        Ok(())
    }
}
