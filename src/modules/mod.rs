// Declare all modules
pub mod access;
pub mod auth;
pub mod config;
pub mod desk;
pub mod encryption;
pub mod error;
pub mod lending;
pub mod storage;
pub mod utils;

// No re-exports here as they're handled in lib.rs
