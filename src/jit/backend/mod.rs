//! Native code emitters: a backend-agnostic trait plus three
//! implementations — direct x86-64, direct AArch64 via a helper-call ABI,
//! and a helper-stub fallback that interprets IR directly.
//!
//! The trait shape is grounded on the reference `jit::backend::traits::
//! CodegenBackend` (`compile_function` → `CompiledCode`, a `target_info`
//! accessor, a `CodegenError` enum), trimmed down: this crate has no
//! relocation/symbol-resolver stage because there is no second JIT-compiled
//! function to call into yet, only runtime helpers and the interpreter.

pub mod aarch64;
pub mod helper_stub;
pub mod x86_64;

use thiserror::Error;

use super::ir::IRProgram;

/// Target architecture a [`NativeBackend`] emits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    /// Direct instruction emission with the fixed register convention.
    X86_64,
    /// Direct instruction emission through the `native_linear_*` helper-call ABI.
    AArch64,
    /// Architecture-independent: tail-calls into [`helper_stub::execute_block`].
    HelperStub,
}

/// Failures raised while generating native code from an [`IRProgram`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// This backend does not know how to emit this IR opcode.
    #[error("unsupported IR instruction at bytecode offset {bytecode_offset}")]
    UnsupportedInstruction {
        /// Offset of the offending instruction, for diagnostics.
        bytecode_offset: u32,
    },
    /// Assembling the instruction stream itself failed (buffer growth, label
    /// resolution, or similar internal emitter invariant).
    #[error("assembly error: {0}")]
    AssemblyError(String),
}

/// Machine code produced by a backend, not yet installed into executable
/// memory.
#[derive(Debug, Clone)]
pub struct CompiledCode {
    /// Raw instruction bytes.
    pub code: Vec<u8>,
    /// Byte offset of the callable entry point within `code`.
    pub entry_offset: usize,
}

/// A backend turns one linear [`IRProgram`] into native (or stub) code.
pub trait NativeBackend {
    /// Name used in diagnostics (`"x86_64"`, `"aarch64"`, `"helper_stub"`).
    fn name(&self) -> &str;

    /// Target this backend emits for.
    fn target(&self) -> TargetArch;

    /// Compiles one IR program, or reports the first unsupported instruction.
    fn compile(&self, program: &IRProgram<'_>) -> Result<CompiledCode, CodegenError>;
}

/// Picks the direct backend for the host architecture, or the helper-stub
/// backend when `force_helper_stub` is set (`ORUS_JIT_FORCE_HELPER_STUB`)
/// or the host architecture has no direct emitter.
pub fn select_backend(force_helper_stub: bool) -> Box<dyn NativeBackend> {
    if force_helper_stub {
        return Box::new(helper_stub::HelperStubBackend);
    }
    #[cfg(target_arch = "x86_64")]
    {
        Box::new(x86_64::X86_64Backend)
    }
    #[cfg(target_arch = "aarch64")]
    {
        Box::new(aarch64::AArch64Backend)
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        Box::new(helper_stub::HelperStubBackend)
    }
}
