pub mod engine;
pub mod model;

pub use engine::{LendingStateMachine, TransitionOutcome};
pub use model::{
    CatalogItem, ItemId, Reservation, ReservationId, ReservationStatus, StatusChange,
    TransactionId, TransactionKind, TransactionRecord,
};
