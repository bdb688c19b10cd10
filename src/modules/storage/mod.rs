pub mod memory;
pub mod ports;
pub mod snapshot;

pub use memory::{MemoryStore, StoreSnapshot};
pub use ports::{IdentityPort, ItemWrite, LedgerChange, LendingPort, ReservationWrite, StoreError};
pub use snapshot::{SnapshotError, SnapshotFile, SnapshotLock};
