//! The `tier_up` protocol: decide whether to compile a hot loop,
//! translate it, emit native (or helper-stub) code, and install the result
//! in the [`JitCache`].
//!
//! Grounded on the reference runtime's `jit::engine::JitEngine::compile_function`
//! pipeline (translate → codegen → install, with a narrow set of recoverable
//! failure branches each mapped to a concrete fallback) but reshaped around
//! a per-loop blocklist and a distinction between permanent
//! ("unsupported construct") and transient ("ran out of memory this time")
//! translation failures.

use super::backend::{select_backend, CodegenError, NativeBackend, TargetArch};
use super::cache::{CacheKey, JitCache};
use super::ir::{IRProgram, NativeBlock, RolloutStage};
use super::memory::ExecutableMemory;
use super::translate::{translate, FailureLog, TranslateStatus};
use crate::chunk::Chunk;
use crate::diagnostics::Diagnostics;
use crate::profiling::HotPathSample;

/// Outcome of one [`tier_up`] call, detailed enough for the engine façade to
/// update its own counters (`jit_compilation_count`, blocklist observability)
/// without duplicating the decision logic.
#[derive(Debug)]
pub enum TierUpOutcome {
    /// JIT is globally disabled, or this `(function, loop)` is already
    /// blocklisted — no work was attempted.
    Skipped,
    /// An entry for this key was already installed; nothing to do.
    AlreadyCached { key: CacheKey, generation: u64 },
    /// Translation and codegen both succeeded and a fresh entry is installed.
    Compiled {
        key: CacheKey,
        generation: u64,
        debug_name: &'static str,
    },
    /// Translation failed with a permanent ("never supported at this stage")
    /// status; the loop is now blocklisted and any prior entry invalidated.
    Blocklisted { key: CacheKey, status: TranslateStatus },
    /// Translation failed with a transient status (`InvalidInput` /
    /// `OutOfMemory`); the loop is *not* blocklisted, but
    /// a synthetic `[Return]` entry is still installed so the profiler does
    /// not requeue the same sample forever.
    SyntheticInstalled {
        key: CacheKey,
        generation: u64,
        status: TranslateStatus,
    },
    /// Executable memory allocation failed; falls back to the interpreter,
    /// not blocklisted (`OSAllocError`).
    AllocFailed { key: CacheKey, missing_entitlement: bool },
}

fn backend_debug_name(name: &str) -> &'static str {
    match name {
        "x86_64" => "orus_jit_x86_64",
        "aarch64" => "orus_jit_aarch64",
        _ => "orus_jit_helper_stub",
    }
}

/// Ties profiling, the translator, the native backends, the executable
/// memory manager, and the entry cache together into the `tier_up`
/// protocol. Holds only the cache and the global enable switch — everything
/// else (config, failure log, diagnostics) is threaded through per call so
/// the controller has no hidden state beyond what the cache itself needs.
pub struct TierController {
    pub(crate) cache: JitCache,
    jit_enabled: bool,
    compilation_count: u64,
}

impl Default for TierController {
    fn default() -> Self {
        Self::new()
    }
}

impl TierController {
    /// Creates a controller with JIT compilation enabled and an empty cache.
    pub fn new() -> Self {
        Self {
            cache: JitCache::new(),
            jit_enabled: true,
            compilation_count: 0,
        }
    }

    /// The entry cache backing this controller.
    pub fn cache(&self) -> &JitCache {
        &self.cache
    }

    /// Globally enables or disables JIT compilation. Disabling does not
    /// evict already-installed entries; it only stops new ones from being
    /// compiled.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.jit_enabled = enabled;
    }

    /// Total number of successful `translate` + `compile` pairs, matching
    /// `vm.jit_compilation_count` in scenario 1. Synthetic single-`Return`
    /// installs also count, since they are still a real
    /// install of a real (if trivial) compiled entry.
    pub fn compilation_count(&self) -> u64 {
        self.compilation_count
    }

    /// Runs the `tier_up` protocol for one profiler sample.
    pub fn tier_up(
        &mut self,
        sample: HotPathSample,
        chunk: &Chunk,
        function_start: u32,
        stage: RolloutStage,
        force_helper_stub: bool,
        failure_log: &mut FailureLog,
        diagnostics: &mut Diagnostics,
    ) -> TierUpOutcome {
        let key = CacheKey {
            function_id: sample.function_id,
            loop_id: sample.loop_id,
        };

        if !self.jit_enabled || self.cache.is_blocklisted(key) {
            return TierUpOutcome::Skipped;
        }

        if let Some((_, generation)) = self.cache.lookup(key) {
            return TierUpOutcome::AlreadyCached { key, generation };
        }

        match translate(
            chunk,
            sample.function_id as u16,
            sample.loop_id as u16,
            sample.loop_start_offset,
            function_start,
            stage,
        ) {
            Ok((program, _summary)) => self.emit_and_install(key, program, force_helper_stub),
            Err((status, record)) => {
                failure_log.push(record);
                diagnostics.record_failure(&record);
                if status.is_blocklisting() {
                    self.cache.blocklist(key, blocklist_reason(status));
                    self.cache.invalidate(key, false);
                    TierUpOutcome::Blocklisted { key, status }
                } else {
                    self.install_synthetic_return(key, chunk, sample, status, force_helper_stub)
                }
            }
        }
    }

    fn install_synthetic_return(
        &mut self,
        key: CacheKey,
        chunk: &Chunk,
        sample: HotPathSample,
        status: TranslateStatus,
        force_helper_stub: bool,
    ) -> TierUpOutcome {
        use super::ir::{IRInstr, IROpcode, Operands, ValueKind};

        let mut program = IRProgram::new(
            chunk,
            sample.function_id as u16,
            sample.loop_id as u16,
            sample.loop_start_offset,
        );
        program.push(IRInstr {
            opcode: IROpcode::Return,
            value_kind: ValueKind::Boxed,
            bytecode_offset: sample.loop_start_offset,
            operands: Operands::Return { value: None },
        });

        match self.emit_and_install(key, program, force_helper_stub) {
            TierUpOutcome::Compiled { key, generation, .. } => {
                TierUpOutcome::SyntheticInstalled { key, generation, status }
            }
            other => other,
        }
    }

    fn emit_and_install(
        &mut self,
        key: CacheKey,
        program: IRProgram<'_>,
        force_helper_stub: bool,
    ) -> TierUpOutcome {
        let backend = select_backend(force_helper_stub);
        let compiled = match backend.compile(&program) {
            Ok(compiled) => {
                self.compilation_count += 1;
                (compiled, backend.name().to_string())
            }
            Err(CodegenError::UnsupportedInstruction { .. }) if backend.target() != TargetArch::HelperStub => {
                // Direct emitter can't cover this IR shape; the helper stub
                // always can, since it's the correctness catch-all.
                let fallback = super::backend::helper_stub::HelperStubBackend;
                match fallback.compile(&program) {
                    Ok(compiled) => {
                        self.compilation_count += 1;
                        (compiled, "helper_stub".to_string())
                    }
                    Err(_) => {
                        return self.install_no_op_stub(key, &program);
                    }
                }
            }
            Err(_) => return self.install_no_op_stub(key, &program),
        };

        let native_block = NativeBlock::from(&program);
        match ExecutableMemory::install(&compiled.0.code) {
            Ok(mem) => {
                let debug_name = backend_debug_name(&compiled.1);
                let generation = self.cache.install(key, mem, compiled.0.entry_offset, debug_name, native_block);
                TierUpOutcome::Compiled { key, generation, debug_name }
            }
            Err(err) => {
                let missing_entitlement = err.looks_like_missing_entitlement();
                TierUpOutcome::AllocFailed { key, missing_entitlement }
            }
        }
    }

    fn install_no_op_stub(&mut self, key: CacheKey, program: &IRProgram<'_>) -> TierUpOutcome {
        let native_block = NativeBlock::from(program);
        match ExecutableMemory::install(&[]) {
            Ok(mem) => {
                let generation = self.cache.install(key, mem, 0, "orus_jit_entry_stub", native_block);
                TierUpOutcome::Compiled { key, generation, debug_name: "orus_jit_entry_stub" }
            }
            Err(err) => TierUpOutcome::AllocFailed {
                key,
                missing_entitlement: err.looks_like_missing_entitlement(),
            },
        }
    }

    /// Drops every cached entry and blocklist record (`flush_entries`):
    /// VM shutdown or wholesale bytecode regeneration.
    pub fn flush_entries(&mut self) {
        self.cache.flush();
    }
}

fn blocklist_reason(status: TranslateStatus) -> &'static str {
    match status {
        TranslateStatus::InvalidInput => "invalid_input",
        TranslateStatus::OutOfMemory => "out_of_memory",
        TranslateStatus::UnsupportedValueKind => "unsupported_value_kind",
        TranslateStatus::UnsupportedConstantKind => "unsupported_constant_kind",
        TranslateStatus::UnhandledOpcode => "unhandled_opcode",
        TranslateStatus::UnsupportedLoopShape => "unsupported_loop_shape",
        TranslateStatus::RolloutDisabled => "rollout_disabled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkBuilder, Opcode};
    use crate::value::Value;

    fn counted_loop_chunk() -> Chunk {
        let mut b = ChunkBuilder::new();
        let zero = b.add_constant(Value::I32(0));
        let limit = b.add_constant(Value::I32(1_000_000));
        b.op(Opcode::LoadI32Const).u8(0).u16(zero);
        b.op(Opcode::LoadI32Const).u8(1).u16(limit);
        b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
        b.op(Opcode::ReturnVoid);
        b.finish()
    }

    fn sample() -> HotPathSample {
        HotPathSample {
            function_id: 0,
            loop_id: 0,
            loop_start_offset: 0,
        }
    }

    #[test]
    fn tier_up_compiles_and_caches_a_supported_loop() {
        let chunk = counted_loop_chunk();
        let mut controller = TierController::new();
        let mut log = FailureLog::new(16);
        let mut diag = Diagnostics::new(false);
        let outcome = controller.tier_up(
            sample(),
            &chunk,
            0,
            RolloutStage::I32Only,
            true,
            &mut log,
            &mut diag,
        );
        assert!(matches!(outcome, TierUpOutcome::Compiled { .. }));
        assert_eq!(controller.compilation_count, 1);

        let outcome2 = controller.tier_up(
            sample(),
            &chunk,
            0,
            RolloutStage::I32Only,
            true,
            &mut log,
            &mut diag,
        );
        assert!(matches!(outcome2, TierUpOutcome::AlreadyCached { .. }));
    }

    #[test]
    fn tier_up_blocklists_rollout_disabled_loops() {
        let mut b = ChunkBuilder::new();
        let zero = b.add_constant(Value::I64(0));
        let limit = b.add_constant(Value::I64(1_000_000));
        b.op(Opcode::LoadI64Const).u8(0).u16(zero);
        b.op(Opcode::LoadI64Const).u8(1).u16(limit);
        b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();

        let mut controller = TierController::new();
        let mut log = FailureLog::new(16);
        let mut diag = Diagnostics::new(false);
        let outcome = controller.tier_up(
            sample(),
            &chunk,
            0,
            RolloutStage::I32Only,
            true,
            &mut log,
            &mut diag,
        );
        assert!(matches!(
            outcome,
            TierUpOutcome::Blocklisted { status: TranslateStatus::RolloutDisabled, .. }
        ));
        assert!(controller.cache.is_blocklisted(CacheKey { function_id: 0, loop_id: 0 }));

        let outcome2 = controller.tier_up(
            sample(),
            &chunk,
            0,
            RolloutStage::I32Only,
            true,
            &mut log,
            &mut diag,
        );
        assert!(matches!(outcome2, TierUpOutcome::Skipped));
    }

    #[test]
    fn tier_up_installs_synthetic_return_on_invalid_input_without_blocklisting() {
        let mut b = ChunkBuilder::new();
        b.op(Opcode::LoadConst).u8(0); // truncated: missing the u16 index
        let chunk = b.finish();

        let mut controller = TierController::new();
        let mut log = FailureLog::new(16);
        let mut diag = Diagnostics::new(false);
        let outcome = controller.tier_up(
            sample(),
            &chunk,
            0,
            RolloutStage::I32Only,
            true,
            &mut log,
            &mut diag,
        );
        assert!(matches!(
            outcome,
            TierUpOutcome::SyntheticInstalled { status: TranslateStatus::InvalidInput, .. }
        ));
        assert!(!controller.cache.is_blocklisted(CacheKey { function_id: 0, loop_id: 0 }));
        assert_eq!(log.total_failures(), 1);
    }

    #[test]
    fn disabled_controller_skips_every_sample() {
        let chunk = counted_loop_chunk();
        let mut controller = TierController::new();
        controller.set_enabled(false);
        let mut log = FailureLog::new(16);
        let mut diag = Diagnostics::new(false);
        let outcome = controller.tier_up(
            sample(),
            &chunk,
            0,
            RolloutStage::I32Only,
            true,
            &mut log,
            &mut diag,
        );
        assert!(matches!(outcome, TierUpOutcome::Skipped));
        assert_eq!(controller.compilation_count, 0);
    }
}
