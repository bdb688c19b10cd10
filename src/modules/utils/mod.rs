pub mod audit;
pub mod clock;
pub mod io;
pub mod logging;
pub mod time;

pub use audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, MemoryAuditLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::{format_sensitive, initialize_logging};
