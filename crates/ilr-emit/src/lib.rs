//! Output for lifted methods.
//!
//! Both emitters read a finished [`ilr_lift::MethodAnalysisSession`] and never
//! change it: [`render_pseudocode`] produces a readable listing and [`lower`]
//! produces a stub bytecode body.

mod bytecode;
mod config;
mod pseudocode;

pub use bytecode::*;
pub use config::*;
pub use pseudocode::*;

use thiserror::Error;

/// Emission errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    /// The action was lifted but has no bytecode form.
    #[error("{action} at {address:#x} is not representable: {reason}")]
    NotRepresentable {
        address: u64,
        action: &'static str,
        reason: String,
    },
}

/// Result type for emission.
pub type Result<T> = std::result::Result<T, EmitError>;

#[cfg(test)]
mod fixture;
