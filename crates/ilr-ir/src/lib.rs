//! Symbolic machine model for lifting compiled methods.
//!
//! Values are immutable entries in an arena; the [`MachineState`] binds
//! registers and frame slots to them. The [`Action`] catalog is the
//! architecture-independent output of a lift.

mod action;
mod state;
mod value;

pub use action::*;
pub use state::*;
pub use value::*;

use thiserror::Error;

/// Errors raised by machine state operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("stack underflow: released {requested} entries with {available} pushed")]
    StackUnderflow { requested: usize, available: usize },
}

/// Result type for machine state operations.
pub type Result<T> = std::result::Result<T, IrError>;
