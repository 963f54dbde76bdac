//! Crate-root runtime error type.
//!
//! Mirrors the reference VM's `vm::VmError`: a flat thiserror enum for the
//! errors the register file and the public engine surface can raise.
//! Subsystem-local errors (translation failures, codegen failures, OS alloc
//! failures) have their own enums in their own modules; this type is only
//! for the boundary a caller outside the JIT actually touches.

use thiserror::Error;

/// Errors raised by the register file and other always-on runtime surfaces.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum VmError {
    /// A register frame allocation would exceed the register file's capacity.
    #[error("register stack overflow: requested frame of {requested} on top of {top} (max {max})")]
    StackOverflow {
        /// Registers requested for the new frame.
        requested: usize,
        /// Current stack top before the request.
        top: usize,
        /// Configured maximum register file size.
        max: usize,
    },

    /// A register index or frame base address was out of bounds.
    #[error("register index {index} out of bounds (top={top})")]
    RuntimeError {
        /// The offending index.
        index: usize,
        /// The register file's current top.
        top: usize,
    },

    /// An opcode byte did not decode to a known instruction.
    #[error("invalid opcode 0x{0:02X}")]
    InvalidOpcode(u8),
}

/// Result type used across the crate's non-translator, non-codegen surfaces.
pub type VmResult<T> = Result<T, VmError>;
