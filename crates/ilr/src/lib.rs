//! ILR - lifter for AOT-compiled managed code
//!
//! Turns the native instructions of an AOT-compiled managed method back into
//! managed-level actions: field accesses, calls, allocations, arithmetic and
//! branches, with the structure of the method body recovered as regions.
//!
//! # Example
//!
//! ```ignore
//! use ilr::{Arch, Lifter, TextListing};
//!
//! let lifter = Lifter::new(bridge, Arch::Arm64);
//! let report = lifter.lift_batch(&lifter.compiled_methods(), &listings);
//! for session in report.sessions() {
//!     println!("{}", lifter.pseudocode(session, &EmitConfig::default()));
//! }
//! ```

// Re-export from sub-crates
pub use ilr_cfg::{Region, RegionKind, RegionWarning};
pub use ilr_emit::{EmitConfig, EmitError, IlOp, LoweredBody, Token, lower, render_pseudocode};
pub use ilr_ir::{Action, ActionId, ActionKind, Source, Value, ValueId};
pub use ilr_isa::{Arch, Instruction, IsaError, parse_listing};
pub use ilr_lift::{LiftConfig, LiftStatus, MethodAnalysisSession, Parameter, Taint, TaintReason};
pub use ilr_meta::{
    BridgeConfig, InMemoryMetadata, InterfaceSlotPolicy, KeyFunction, KeyFunctions, MetadataBridge, MetadataSource,
    MethodId, MethodRef, TypeId, TypeRef,
};

mod disasm;
mod error;
mod lifter;
pub mod metrics;

pub use disasm::*;
pub use error::*;
pub use lifter::*;
