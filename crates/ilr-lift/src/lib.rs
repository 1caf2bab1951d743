//! Instruction selectors and the per-method lifting walk.
//!
//! [`lift_method`] walks one method's decoded instructions in address order.
//! Each instruction is offered to the architecture's [`InstructionSelector`],
//! whose ordered [`Rule`] tables recognize runtime idioms and append actions
//! to the [`MethodAnalysisSession`].

mod arm64;
mod config;
mod context;
mod patterns;
mod selector;
mod session;
mod walk;
mod x86;

pub use arm64::Arm64Selector;
pub use config::*;
pub use context::LiftContext;
pub use selector::*;
pub use session::*;
pub use walk::*;
pub use x86::X86Selector;

use ilr_ir::IrError;
use thiserror::Error;

/// Why a method became unanalyzable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaintReason {
    #[error(transparent)]
    Stack(#[from] IrError),

    #[error("no `this` for instance call to {0}")]
    MissingThis(String),

    #[error("instruction limit of {0} reached")]
    InstructionLimit(usize),
}

/// A method-wide lift failure; actions produced before it are kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("tainted at {address:#x}: {reason}")]
pub struct Taint {
    pub address: u64,
    pub reason: TaintReason,
}

impl Taint {
    #[must_use]
    pub fn new(address: u64, reason: impl Into<TaintReason>) -> Self {
        Self {
            address,
            reason: reason.into(),
        }
    }
}

/// Result type for lifting an instruction.
pub type Result<T> = std::result::Result<T, Taint>;
