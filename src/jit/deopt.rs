//! Deoptimization bailout and the safepoint contract.
//!
//! Grounded on the reference VM's `vm::deopt::trigger_deopt` (blocklist the
//! offending unit, queue a release, resume the interpreter at a recorded
//! offset) but narrowed to this crate's single trigger: a typed-register
//! guard failing inside a compiled block. The GC/profiler safepoint call
//! itself (`GC_SAFEPOINT`/`PROF_SAFEPOINT`) is out of scope — only the
//! contract a caller must honor around it is specified here.

use super::cache::{CacheKey, JitCache};

/// What caused a deferred invalidation to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationTrigger {
    /// A type guard failed inside a compiled block.
    TypeGuardFailure,
    /// The underlying bytecode changed (recompilation/hot-reload), making
    /// every compiled entry stale.
    BytecodeMutated,
    /// Requested directly by the embedder (e.g. rollout stage bump).
    Explicit,
}

/// Where execution resumes after a bailout: the bytecode offset recorded in
/// the IR's terminator, or the loop header for loop-back bailouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// Bytecode offset the interpreter should continue from.
    pub bytecode_offset: u32,
}

/// Everything the bailout helper needs to report back to its caller once a
/// type guard has failed inside a compiled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeoptOutcome {
    /// The `(function, loop)` key that was blocklisted.
    pub key: CacheKey,
    /// The generation the entry was installed at, for diagnostics.
    pub generation: u64,
    /// What triggered this deopt.
    pub trigger: InvalidationTrigger,
    /// Where the interpreter resumes.
    pub resume: ResumePoint,
}

/// Running deopt counters the engine façade exposes (`vm.jit_native_type_deopts`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DeoptStats {
    /// Times a native type guard has failed and triggered a bailout.
    pub native_type_deopts: u64,
}

/// Runs the type-bailout sequence: increments the deopt counter,
/// permanently blocklists `key` (a type violation is never going to resolve
/// itself at the current rollout stage), and schedules the entry for
/// deferred invalidation since the call is happening from *inside* that
/// entry's own execution — release must wait until the next safepoint.
pub fn handle_type_bailout(
    cache: &JitCache,
    key: CacheKey,
    generation: u64,
    bytecode_offset: u32,
    stats: &mut DeoptStats,
) -> DeoptOutcome {
    stats.native_type_deopts += 1;
    cache.blocklist(key, "type_guard_failure");
    cache.invalidate(key, true);
    DeoptOutcome {
        key,
        generation,
        trigger: InvalidationTrigger::TypeGuardFailure,
        resume: ResumePoint { bytecode_offset },
    }
}

/// Handles control leaving the compiled region through an ordinary jump
/// (not the recognized loop-back, not a type failure): this is not a
/// failure at all, just the translator's "linear, don't follow branches"
/// design surfacing at runtime. No blocklist, no invalidation — the entry
/// stays installed and will be re-entered on the next loop iteration.
pub fn resume_after_jump_exit(bytecode_offset: u32) -> ResumePoint {
    ResumePoint { bytecode_offset }
}

/// Resolves every entry whose invalidation was deferred by
/// [`handle_type_bailout`] (or any other deferred call). Must be driven from
/// a point where no JIT frame for the resolved entries is still on the
/// stack — the VM-level safepoint that immediately follows the entry.
pub fn resolve_pending_invalidations(cache: &JitCache) {
    cache.resolve_pending();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::ir::NativeBlock;
    use crate::jit::memory::ExecutableMemory;

    fn key() -> CacheKey {
        CacheKey { function_id: 1, loop_id: 0 }
    }

    #[test]
    fn type_bailout_blocklists_and_defers_release() {
        let cache = JitCache::new();
        let code = ExecutableMemory::install(&[0xC3]).unwrap();
        let generation = cache.install(key(), code, 0, "orus_jit_x86_64", NativeBlock::default());

        let mut stats = DeoptStats::default();
        let outcome = handle_type_bailout(&cache, key(), generation, 42, &mut stats);

        assert_eq!(stats.native_type_deopts, 1);
        assert!(cache.is_blocklisted(key()));
        assert!(cache.lookup(key()).is_none(), "entry hidden once pending_invalidate is set");
        assert_eq!(outcome.resume.bytecode_offset, 42);
        assert_eq!(outcome.trigger, InvalidationTrigger::TypeGuardFailure);

        resolve_pending_invalidations(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn repeated_bailouts_accumulate_the_counter() {
        let cache = JitCache::new();
        let mut stats = DeoptStats::default();
        for _ in 0..3 {
            handle_type_bailout(&cache, key(), 1, 0, &mut stats);
        }
        assert_eq!(stats.native_type_deopts, 3);
    }

    #[test]
    fn jump_exit_resume_point_is_the_recorded_offset() {
        let resume = resume_after_jump_exit(128);
        assert_eq!(resume.bytecode_offset, 128);
    }
}
