//! Identifiers, enums, limits and validation rules shared by every LinkUp
//! crate.

pub mod constants;
pub mod error;
pub mod types;
pub mod validation;

pub use error::ValidationError;
pub use types::*;
