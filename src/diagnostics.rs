//! Conditional stderr diagnostics, no logging framework.
//!
//! The reference workspace has no `log`/`tracing` dependency anywhere; every
//! subsystem that wants visibility writes straight to `stderr` behind a flag.
//! This module follows that convention: under a debug flag, each translation
//! failure is emitted once to stderr with its structured record.

use std::collections::HashSet;

use crate::jit::translate::TranslationFailureRecord;

/// Emits translation failures to stderr, once per distinct `(function, loop,
/// opcode, status)` tuple, gated by [`crate::config::EngineConfig::debug_jit`].
#[derive(Debug, Default)]
pub struct Diagnostics {
    enabled: bool,
    seen: HashSet<(u16, u16, u8, &'static str)>,
}

impl Diagnostics {
    /// Creates a handle; `enabled` should come from `EngineConfig::debug_jit`.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            seen: HashSet::default(),
        }
    }

    /// Records a translation failure, printing it the first time this exact
    /// `(function, loop, opcode, status)` combination occurs.
    pub fn record_failure(&mut self, record: &TranslationFailureRecord) {
        if !self.enabled {
            return;
        }
        let status_name = status_name(record.status);
        let key = (record.function_index, record.loop_index, record.opcode, status_name);
        if self.seen.insert(key) {
            eprintln!(
                "orus-jit: translate failed fn={} loop={} opcode=0x{:02X} offset={} kind={:?} status={}",
                record.function_index,
                record.loop_index,
                record.opcode,
                record.bytecode_offset,
                record.value_kind,
                status_name,
            );
        }
    }
}

fn status_name(status: crate::jit::translate::TranslateStatus) -> &'static str {
    use crate::jit::translate::TranslateStatus::*;
    match status {
        InvalidInput => "invalid_input",
        OutOfMemory => "out_of_memory",
        UnsupportedValueKind => "unsupported_value_kind",
        UnsupportedConstantKind => "unsupported_constant_kind",
        UnhandledOpcode => "unhandled_opcode",
        UnsupportedLoopShape => "unsupported_loop_shape",
        RolloutDisabled => "rollout_disabled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::ir::ValueKind;
    use crate::jit::translate::TranslateStatus;

    fn record(status: TranslateStatus) -> TranslationFailureRecord {
        TranslationFailureRecord {
            status,
            opcode: 0x55,
            value_kind: ValueKind::I32,
            bytecode_offset: 10,
            function_index: 1,
            loop_index: 0,
        }
    }

    #[test]
    fn disabled_diagnostics_never_tracks_anything() {
        let mut diag = Diagnostics::new(false);
        diag.record_failure(&record(TranslateStatus::RolloutDisabled));
        assert!(diag.seen.is_empty());
    }

    #[test]
    fn repeated_identical_failures_are_deduplicated() {
        let mut diag = Diagnostics::new(true);
        diag.record_failure(&record(TranslateStatus::RolloutDisabled));
        diag.record_failure(&record(TranslateStatus::RolloutDisabled));
        assert_eq!(diag.seen.len(), 1);
    }
}
