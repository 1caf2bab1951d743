//! Metadata model and resolution bridge.
//!
//! Describes the managed type universe recovered by the (external) loader and
//! resolves the raw addresses, offsets and slots found in compiled code back to
//! types, methods and fields.

mod bridge;
mod chain;
mod keys;
mod layout;
mod source;
mod types;
mod usage;

pub use bridge::*;
pub use chain::*;
pub use keys::*;
pub use layout::*;
pub use source::*;
pub use types::*;
pub use usage::*;

use thiserror::Error;

/// Errors raised while building metadata tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("unknown type id {0:?}")]
    UnknownType(TypeId),

    #[error("segment at {0:#x} overlaps an existing segment")]
    OverlappingSegment(u64),
}

/// Result type for metadata operations.
pub type Result<T> = std::result::Result<T, MetaError>;
