pub mod types;
pub mod validate;

pub use types::*;
pub use validate::{InvariantViolation, validate_ir};
