use ilr_meta::MethodId;
use thiserror::Error;

/// Batch-level errors: a method that could not be lifted at all.
///
/// A tainted method is not an error; it is reported through its session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("method {0:?} has no compiled body")]
    NoMethodBody(MethodId),
    #[error("disassembly failed at {address:#x}: {message}")]
    Disassembly { address: u64, message: String },
    #[error("ISA error: {0}")]
    Isa(#[from] ilr_isa::IsaError),
    #[error("emit error: {0}")]
    Emit(#[from] ilr_emit::EmitError),
}

pub type Result<T> = std::result::Result<T, Error>;
