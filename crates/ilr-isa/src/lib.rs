//! Instruction set model for the lifter.
//!
//! This crate is the leaf of the workspace: it knows how to name registers,
//! describe operands and decoded instructions, and which registers carry
//! arguments under each supported calling convention. It does not decode
//! machine code itself; decoded instructions come from an external
//! disassembler, either as structured operands or as Intel/ARM assembly text.

mod arch;
mod convention;
mod instruction;
mod mnemonic;
mod operand;
mod parse;
mod register;

pub use arch::*;
pub use convention::*;
pub use instruction::*;
pub use mnemonic::*;
pub use operand::*;
pub use parse::*;
pub use register::*;

use thiserror::Error;

/// Errors raised while building instructions from disassembler output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsaError {
    #[error("unknown register `{name}` for {arch}")]
    UnknownRegister { arch: Arch, name: String },
    #[error("malformed operand `{0}`")]
    MalformedOperand(String),
    #[error("malformed immediate `{0}`")]
    MalformedImmediate(String),
    #[error("too many operands ({0})")]
    TooManyOperands(usize),
}

pub type Result<T> = std::result::Result<T, IsaError>;
