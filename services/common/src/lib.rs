//! Shared identifiers, constants and error types for the repo ledger services

pub mod constants;
pub mod errors;
pub mod types;

pub use constants::*;
pub use errors::*;
pub use types::*;
