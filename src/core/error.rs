// This module defines error types for the kestrel back end using the thiserror
// crate for idiomatic Rust error handling. CompileError is the main error enum
// covering back-end programmer errors (unexpected opcodes, unimplemented type
// combinations, impossible locations), resource-style failures (no scratch
// register available for the parallel move resolver, too many pending moves),
// and encoding failures (near-branch displacement out of range, CPU feature
// required by a chosen lowering but absent). Each variant carries relevant
// context for debugging. The module also provides CompileResult<T> as a
// convenience alias. A failed compilation never aborts the host process; the
// outer pipeline logs the error and marks the method non-compilable so it is
// executed by the interpreter instead.

//! Error types for the kestrel back end.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for code generation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Unsupported instruction kind: {kind}")]
    UnsupportedInstruction { kind: &'static str },

    #[error("Unimplemented {operation} for type {ty}")]
    UnimplementedTypeCombination {
        operation: &'static str,
        ty: String,
    },

    #[error("Invalid location for {context}: {reason}")]
    InvalidLocation {
        context: &'static str,
        reason: String,
    },

    #[error("Near branch displacement {displacement} out of 8-bit range")]
    NearBranchOutOfRange { displacement: i32 },

    #[error("No scratch register available in bank {bank}")]
    NoScratchRegister { bank: &'static str },

    #[error("CPU feature {feature} required but unavailable")]
    FeatureUnavailable { feature: &'static str },

    #[error("Too many parallel moves: {count}")]
    TooManyMoves { count: usize },

    #[error("Register allocation failed: {reason}")]
    RegisterAllocation { reason: String },

    #[error("Pass pipeline error: {reason}")]
    Pipeline { reason: String },

    #[error("Code generation failed: {reason}")]
    CodeGeneration { reason: String },
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
