//! Orus tiered execution engine
//!
//! This crate provides the execution core of the Orus language: a
//! register-based bytecode interpreter model, a profiling subsystem, a
//! bytecode-to-IR translator, native code emitters for x86-64 and AArch64,
//! and the JIT entry cache that ties tier-up and deoptimization together.
//!
//! The front-end (lexer/parser/type inference), the bytecode emitter, the
//! garbage collector, and builtins live outside this crate; this crate only
//! depends on their interfaces (a [`Chunk`] it can decode, a
//! [`Value`][value::Value] it can box/unbox, and a safepoint it can call
//! into).
//!
//! # Example
//!
//! ```rust,ignore
//! use orus_engine::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::from_env());
//! let func = engine.register_function(chunk, arity, debug_name);
//! engine.record_loop_iteration(func, loop_offset);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]

/// Runtime value model and typed register banks.
pub mod value;

/// Chunk and opcode stream: the immutable-after-emit code the translator consumes.
pub mod chunk;

/// Per-module error taxonomy, kept apart per subsystem rather than unified.
pub mod error;

/// Monotonic clock used by `TIME_STAMP` and the profiling timers.
pub mod clock;

/// Process-wide profiling subsystem: counters, hotness scoring, JSON export.
pub mod profiling;

/// JIT subsystem: IR model, translator, native backends, memory manager, entry cache, deopt.
pub mod jit;

/// Plain-struct engine configuration and environment overrides.
pub mod config;

/// Conditional stderr diagnostics, no logging framework.
pub mod diagnostics;

/// The minimal façade wiring the above together for end-to-end use.
pub mod engine;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::VmError;
pub use value::Value;
