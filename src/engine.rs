//! Minimal façade wiring the profiling subsystem, the bytecode→IR translator,
//! the native backends and the JIT entry cache together.
//!
//! Grounded on the reference crate's `jit::JitEngine`: one struct owning a
//! function table, the profiling context, and the entry cache, and exposing
//! the handful of call-ins an embedding interpreter would make. The
//! interpreter itself — bytecode dispatch, call frames, the GC — is out of
//! scope, so `record_loop_iteration`, `record_call`, and
//! `step_safepoint` stand in for it: they are exactly the points at which a
//! real interpreter would hand control to this crate.

use std::path::Path;

use crate::chunk::Chunk;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::jit::backend::helper_stub::{execute_block, BlockContext, BlockOutcome};
use crate::jit::cache::CacheKey;
use crate::jit::controller::{TierController, TierUpOutcome};
use crate::jit::deopt::{self, DeoptStats};
use crate::jit::translate::FailureLog;
use crate::profiling::{escape_json_string, HotPathSample, ProfilingContext, ProfilingFlags};
use crate::value::{RegisterFile, TypedRegisterBank};

/// Execution tier a registered function is currently running at (`Function.tier`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Interpreted, no live compiled entry for any of its loops.
    Baseline,
    /// At least one loop has a live compiled entry installed.
    Specialized,
}

/// One registered function (Function). This crate models a function as
/// one chunk plus cache entries keyed by `(function_id, loop_id)`, rather
/// than a second physical `specialized_chunk`, since the native tier here
/// replaces loop bodies in place of whole functions — there is nothing for a
/// second chunk to hold that the cache doesn't already own.
#[derive(Debug, Clone)]
pub struct FunctionRecord {
    /// Byte offset of the function's entry point within its chunk.
    pub start: u32,
    /// Declared parameter count.
    pub arity: u8,
    /// Current tier.
    pub tier: Tier,
    /// Hits accumulated toward the next tier-up threshold (`currentHits`).
    pub current_hits: u64,
    /// Times a compiled entry for one of this function's loops has completed (`specializationHits`).
    pub specialization_hits: u64,
    /// Human-readable name for diagnostics and profiling export.
    pub debug_name: Option<String>,
}

/// Outcome of entering a `(function, loop)` through [`Engine::enter_compiled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No compiled entry exists for this key; the caller must keep interpreting.
    NotCompiled,
    /// The compiled block ran to completion (reached `Return`).
    Returned,
    /// A type guard failed; the entry was blocklisted and scheduled for
    /// deferred release. The caller resumes interpretation at the offset.
    Deopted {
        /// Bytecode offset the interpreter should resume at.
        resume_offset: u32,
    },
    /// Control left the compiled region through an ordinary jump. Not a
    /// failure: the entry stays installed and is re-entered next time.
    JumpExit {
        /// Bytecode offset the interpreter should resume at.
        resume_offset: u32,
    },
}

/// Ties profiling, translation, codegen, the entry cache and deopt together
/// into the minimal surface an embedding interpreter needs.
///
/// Owns exactly one function table, one [`ProfilingContext`], one
/// [`TierController`] (which itself owns the [`crate::jit::JitCache`]), and
/// reads the current rollout stage from its [`EngineConfig`].
pub struct Engine {
    config: EngineConfig,
    functions: Vec<FunctionRecord>,
    chunks: Vec<Chunk>,
    profiling: ProfilingContext,
    controller: TierController,
    failure_log: FailureLog,
    diagnostics: Diagnostics,
    deopt_stats: DeoptStats,
    clock: Clock,
}

impl Engine {
    /// Creates an engine from `config`, with hot-path and function-call
    /// profiling enabled by default — without them `record_loop_iteration`
    /// and `record_call` could never observe a tier-up trigger at all.
    pub fn new(config: EngineConfig) -> Self {
        let mut profiling = ProfilingContext::new(config.hot_threshold, 1);
        profiling.enable(ProfilingFlags::HOT_PATHS.union(ProfilingFlags::FUNCTION_CALLS));
        Self {
            profiling,
            controller: TierController::new(),
            failure_log: FailureLog::new(config.failure_log_capacity),
            diagnostics: Diagnostics::new(config.debug_jit),
            deopt_stats: DeoptStats::default(),
            clock: Clock::start(),
            functions: Vec::new(),
            chunks: Vec::new(),
            config,
        }
    }

    /// Enables additional profiling categories beyond the defaults (`enable`).
    pub fn enable_profiling(&mut self, flags: ProfilingFlags) {
        self.profiling.enable(flags);
    }

    /// Registers a function's chunk, returning its `function_id`. The chunk
    /// outlives every cache entry translated from it for as long as this
    /// engine is alive.
    pub fn register_function(&mut self, chunk: Chunk, arity: u8, debug_name: Option<String>) -> u32 {
        let function_id = self.chunks.len() as u32;
        self.chunks.push(chunk);
        self.functions.push(FunctionRecord {
            start: 0,
            arity,
            tier: Tier::Baseline,
            current_hits: 0,
            specialization_hits: 0,
            debug_name,
        });
        function_id
    }

    /// Borrows the chunk registered for `function_id`.
    pub fn chunk(&self, function_id: u32) -> &Chunk {
        &self.chunks[function_id as usize]
    }

    /// Borrows the function-table record for `function_id`.
    pub fn function(&self, function_id: u32) -> &FunctionRecord {
        &self.functions[function_id as usize]
    }

    /// Records one per-opcode instruction step (`record_instruction`).
    pub fn record_instruction(&mut self, opcode: u8, cycles: u64) {
        self.profiling.record_instruction(opcode, cycles);
    }

    /// Records one entry into the loop `(function_id, loop_id)` at
    /// `loop_start_offset`, the point a real interpreter reaches every time
    /// it hits that loop's back-edge. Returns the tier-up outcome the first
    /// time this crossing takes the hot-path sample over `T_hot`; `None` on
    /// every other call.
    pub fn record_loop_iteration(&mut self, function_id: u32, loop_id: u32, loop_start_offset: u32) -> Option<TierUpOutcome> {
        let sample = self.profiling.record_hot_path(function_id, loop_id, loop_start_offset, 1)?;
        self.profiling.reset_hot_path(function_id, loop_id, loop_start_offset);
        Some(self.tier_up(sample))
    }

    /// Records one call into `function_id` (`function_stats`) and folds it
    /// into that function's running hit count.
    pub fn record_call(&mut self, function_id: u32) {
        self.profiling.record_function_hit(function_id as u64);
        if let Some(f) = self.functions.get_mut(function_id as usize) {
            f.current_hits += 1;
        }
    }

    /// Drives the safepoint contract: releases every cache entry whose
    /// invalidation was deferred because it was requested from inside its
    /// own execution. A real interpreter calls this at every `Safepoint` IR
    /// op and at every VM-level safepoint that follows a compiled entry.
    pub fn step_safepoint(&mut self) {
        deopt::resolve_pending_invalidations(&mut self.controller.cache);
    }

    fn tier_up(&mut self, sample: HotPathSample) -> TierUpOutcome {
        let function_start = self
            .functions
            .get(sample.function_id as usize)
            .map(|f| f.start)
            .unwrap_or(0);
        let chunk = &self.chunks[sample.function_id as usize];
        let outcome = self.controller.tier_up(
            sample,
            chunk,
            function_start,
            self.config.rollout_stage,
            self.config.force_helper_stub,
            &mut self.failure_log,
            &mut self.diagnostics,
        );
        if matches!(outcome, TierUpOutcome::Compiled { .. } | TierUpOutcome::SyntheticInstalled { .. }) {
            if let Some(f) = self.functions.get_mut(sample.function_id as usize) {
                f.tier = Tier::Specialized;
            }
        }
        outcome
    }

    /// Enters the compiled entry for `(function_id, loop_id)`, if any, and
    /// runs it to completion, a type bailout, or a jump exit. This is the
    /// crate's only execution path for compiled code: both direct-emitter
    /// entries and helper-stub entries retain their [`NativeBlock`][crate::jit::ir::NativeBlock]
    /// IR alongside the raw machine code (JITEntry), and an embedding
    /// interpreter with the real linked safepoint/builtin helpers would jump
    /// into `entry.code` directly — this façade has no such runtime to link
    /// against, so it always replays the retained IR through
    /// [`execute_block`], which is defined to behave identically.
    pub fn enter_compiled(
        &mut self,
        function_id: u32,
        loop_id: u32,
        registers: &mut RegisterFile,
        typed: &mut TypedRegisterBank,
        output: &mut Vec<String>,
    ) -> StepOutcome {
        let key = CacheKey { function_id, loop_id };
        let Some((_debug_name, native_block)) = self.controller.cache.entry_info(key) else {
            return StepOutcome::NotCompiled;
        };
        let generation = self.controller.cache.lookup(key).map(|(_, g)| g).unwrap_or(0);
        let chunk = &self.chunks[function_id as usize];
        let mut ctx = BlockContext { registers, typed, clock: &self.clock, output };
        match execute_block(&mut ctx, &native_block.instructions, chunk) {
            BlockOutcome::Returned => {
                if let Some(f) = self.functions.get_mut(function_id as usize) {
                    f.specialization_hits += 1;
                }
                StepOutcome::Returned
            }
            BlockOutcome::TypeBailout { bytecode_offset, .. } => {
                let outcome = deopt::handle_type_bailout(&mut self.controller.cache, key, generation, bytecode_offset, &mut self.deopt_stats);
                if let Some(f) = self.functions.get_mut(function_id as usize) {
                    f.tier = Tier::Baseline;
                }
                StepOutcome::Deopted { resume_offset: outcome.resume.bytecode_offset }
            }
            BlockOutcome::JumpExit { bytecode_offset } => {
                let resume = deopt::resume_after_jump_exit(bytecode_offset);
                StepOutcome::JumpExit { resume_offset: resume.bytecode_offset }
            }
        }
    }

    /// Total successful tier-up installs (`vm.jit_compilation_count`, scenario 1).
    pub fn jit_compilation_count(&self) -> u64 {
        self.controller.compilation_count
    }

    /// Whether `(function_id, loop_id)` is permanently blocklisted (`vm.jit_loop_blocklist[L]`).
    pub fn is_loop_blocklisted(&self, function_id: u32, loop_id: u32) -> bool {
        self.controller.cache.is_blocklisted(CacheKey { function_id, loop_id })
    }

    /// Total native type-guard deopts (`vm.jit_native_type_deopts`, scenario 3).
    pub fn jit_native_type_deopts(&self) -> u64 {
        self.deopt_stats.native_type_deopts
    }

    /// The translation failure log (`vm.jit_translation_failures`, scenario 5).
    pub fn failure_log(&self) -> &FailureLog {
        &self.failure_log
    }

    /// Globally enables or disables JIT compilation.
    pub fn set_jit_enabled(&mut self, enabled: bool) {
        self.controller.set_enabled(enabled);
    }

    /// Drops every cached entry and blocklist record (`flush_entries`).
    pub fn flush_entries(&mut self) {
        self.controller.flush_entries();
    }

    /// Serializes the profiling-export JSON object — the counters from
    /// [`ProfilingContext::export_json`] plus `specializations[]`, one entry
    /// per registered function — and writes it to `path`.
    pub fn export_profiling_json(&self, path: &Path) -> std::io::Result<()> {
        let mut out = self.profiling.export_json();
        out.pop(); // trailing '}'
        out.push(',');
        out.push_str("\"specializations\":[");
        for (index, f) in self.functions.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            let key = CacheKey { function_id: index as u32, loop_id: 0 };
            let name = f.debug_name.clone().unwrap_or_default();
            let tier = match f.tier {
                Tier::Baseline => "baseline",
                Tier::Specialized => "specialized",
            };
            out.push('{');
            out.push_str(&format!("\"index\":{index},"));
            out.push_str(&format!("\"name\":\"{}\",", escape_json_string(&name)));
            out.push_str(&format!("\"tier\":\"{tier}\","));
            out.push_str(&format!("\"currentHits\":{},", f.current_hits));
            out.push_str(&format!("\"specializationHits\":{},", f.specialization_hits));
            out.push_str(&format!("\"threshold\":{},", self.config.hot_threshold));
            out.push_str(&format!("\"eligible\":{},", !self.controller.cache.is_blocklisted(key)));
            out.push_str(&format!("\"active\":{}", self.controller.cache.lookup(key).is_some()));
            out.push('}');
        }
        out.push_str("]}");
        std::fs::write(path, out)
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

    #[test]
    fn register_function_assigns_sequential_ids() {
        let mut config = EngineConfig::default();
        config.force_helper_stub = true;
        let mut engine = Engine::new(config);
        let a = engine.register_function(Chunk::new(), 0, Some("a".into()));
        let b = engine.register_function(Chunk::new(), 1, Some("b".into()));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(engine.function(b).arity, 1);
    }

    #[test]
    fn tight_loop_tiers_up_and_then_runs_natively() {
        let mut config = EngineConfig::default();
        config.hot_threshold = 3;
        config.force_helper_stub = true;
        let mut engine = Engine::new(config);
        let func = engine.register_function(counted_loop_chunk(), 0, Some("counted".into()));

        let mut outcome = None;
        for _ in 0..4 {
            outcome = engine.record_loop_iteration(func, 0, 0);
        }
        assert!(matches!(outcome, Some(TierUpOutcome::Compiled { .. })));
        assert_eq!(engine.jit_compilation_count(), 1);
        assert!(!engine.is_loop_blocklisted(func, 0));

        let mut registers = RegisterFile::new();
        registers.alloc_frame(256).unwrap();
        let mut typed = TypedRegisterBank::new();
        let mut output = Vec::new();
        let step = engine.enter_compiled(func, 0, &mut registers, &mut typed, &mut output);
        assert_eq!(step, StepOutcome::Returned);
        assert_eq!(typed.load_i32_typed_hot(0), 1_000_000);
    }

    #[test]
    fn profiling_export_includes_one_specialization_per_function() {
        let mut config = EngineConfig::default();
        config.force_helper_stub = true;
        let mut engine = Engine::new(config);
        engine.register_function(Chunk::new(), 0, Some("only".into()));
        engine.enable_profiling(ProfilingFlags::INSTRUCTIONS);
        engine.record_instruction(0x10, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        engine.export_profiling_json(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"specializations\":[{"));
        assert!(contents.contains("\"name\":\"only\""));
        assert!(contents.ends_with("}]}"));
    }
}
