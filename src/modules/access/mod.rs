pub mod gate;

pub use gate::{Action, Decision, RoleGate};
