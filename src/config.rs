//! Plain-struct engine configuration and environment overrides.
//!
//! Grounded on the reference compiler's config plumbing: a small `Copy`-ish
//! struct with a `Default` impl and an `from_env()` constructor, rather than
//! a `clap`/`figment` layered config system — this crate is embedded, not a
//! standalone binary, so the caller owns argument parsing.

use std::env;

use crate::jit::ir::RolloutStage;

/// Tunables the tier controller, translator and cache all read from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Which value kinds the translator is currently allowed to lift.
    pub rollout_stage: RolloutStage,
    /// Call/loop-iteration count at which a function or loop tiers up (`T_hot`).
    pub hot_threshold: u32,
    /// Number of non-control IR ops between forced safepoints.
    pub safepoint_interval: u32,
    /// Ring-buffer capacity of the translation failure log.
    pub failure_log_capacity: usize,
    /// Forces every tier-up through the helper-stub emitter, bypassing the
    /// direct x86-64/AArch64 backends entirely (`ORUS_JIT_FORCE_HELPER_STUB`).
    pub force_helper_stub: bool,
    /// Emits one stderr line per distinct translation failure.
    pub debug_jit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rollout_stage: RolloutStage::I32Only,
            hot_threshold: 1000,
            safepoint_interval: 12,
            failure_log_capacity: 256,
            force_helper_stub: false,
            debug_jit: false,
        }
    }
}

impl EngineConfig {
    /// Builds a config from `Default`, then applies two environment
    /// overrides: `ORUS_JIT_FORCE_HELPER_STUB` and `ORUS_JIT_DEBUG`. Any
    /// non-empty value counts as "set".
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if env_flag_set("ORUS_JIT_FORCE_HELPER_STUB") {
            config.force_helper_stub = true;
        }
        if env_flag_set("ORUS_JIT_DEBUG") {
            config.debug_jit = true;
        }
        config
    }
}

fn env_flag_set(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => !value.is_empty() && value != "0",
        Err(_) => false,
    }
}
