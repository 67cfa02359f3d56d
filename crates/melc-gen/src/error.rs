//! Code generation errors.
//!
//! Verification and target failures are internal (the frontend should never
//! hand the lowerer a module that fails them); structural equality over
//! aggregate payloads is the one user-visible error that can first surface
//! here, when the operand type only became known through inference.

use inkwell::builder::BuilderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CodeGenError>;

#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("llvm builder failure: {0}")]
    Builder(#[from] BuilderError),

    #[error("internal error: generated IR failed verification: {0}")]
    Verification(String),

    #[error("internal error: function {0} failed verification")]
    FunctionVerification(String),

    #[error("target machine initialization failed: {0}")]
    Target(String),

    #[error("could not write output: {0}")]
    Output(String),

    #[error(
        "structural equality on {0} is not defined: \
         its constructors contain array or function fields"
    )]
    StructuralEqOnAggregateFields(String),

    #[error("internal error: name {0} has no binding during lowering")]
    UnboundName(String),

    #[error("internal error: type was not fully resolved before lowering")]
    UnresolvedType,
}
