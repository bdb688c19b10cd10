// First, declare the modules folder itself
mod modules;

// Re-export everything from modules for easier access
pub use modules::{access, auth, config, desk, encryption, error, lending, storage, utils};

// Re-export commonly used types
pub use modules::auth::{Identity, Role, Session};
pub use modules::config::DeskConfig;
pub use modules::desk::LendingDesk;
pub use modules::error::{DeskError, DeskResult};
pub use modules::lending::{CatalogItem, Reservation, ReservationStatus, TransactionRecord};
pub use modules::storage::MemoryStore;

// Constants
pub const LOG_FILE: &str = "lending-desk.log";
pub const STORE_FILE: &str = "lending-desk.dat";
pub const CHALLENGE_QUESTION_COUNT: usize = 2;

// Type aliases
pub type HmacSha256 = hmac::Hmac<sha2::Sha256>;
