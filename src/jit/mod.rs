//! JIT subsystem: IR model, translator, native backends, executable memory,
//! entry cache, tier controller and deoptimization.

/// The IR instruction set the translator emits and the backends consume.
pub mod ir;

/// Bytecode → IR translation.
pub mod translate;

/// Native code emitters: x86-64 direct, AArch64 direct, helper-stub fallback.
pub mod backend;

/// Executable memory allocation, protection transitions, icache flush.
pub mod memory;

/// JIT entry cache keyed by `(function_id, loop_id)`.
pub mod cache;

/// The `tier_up` protocol tying profiling, translation, codegen and the cache together.
pub mod controller;

/// Deoptimization bailout and the safepoint contract.
pub mod deopt;

pub use cache::{CacheKey, JitCache, JitEntry};
pub use controller::{TierController, TierUpOutcome};
pub use ir::RolloutStage;
