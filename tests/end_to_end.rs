//! End-to-end scenarios wiring the whole engine together: these need a
//! fully constructed [`Engine`], not an isolated module, so they live here
//! instead of alongside the unit tests.

use orus_engine::jit::translate::TranslateStatus;
use orus_engine::jit::{RolloutStage, TierUpOutcome};
use orus_engine::value::{RegisterFile, TypedRegisterBank};
use orus_engine::{chunk::{Chunk, ChunkBuilder, Opcode}, value::Value};
use orus_engine::{Engine, EngineConfig};
use orus_engine::engine::StepOutcome;

fn i32_counted_loop() -> Chunk {
    let mut b = ChunkBuilder::new();
    let zero = b.add_constant(Value::I32(0));
    let limit = b.add_constant(Value::I32(1_000_000));
    b.op(Opcode::LoadI32Const).u8(0).u16(zero);
    b.op(Opcode::LoadI32Const).u8(1).u16(limit);
    b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
    b.op(Opcode::ReturnVoid);
    b.finish()
}

fn i64_counted_loop() -> Chunk {
    let mut b = ChunkBuilder::new();
    let zero = b.add_constant(Value::I64(0));
    let limit = b.add_constant(Value::I64(1_000_000));
    b.op(Opcode::LoadI64Const).u8(0).u16(zero);
    b.op(Opcode::LoadI64Const).u8(1).u16(limit);
    b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
    b.op(Opcode::ReturnVoid);
    b.finish()
}

/// scenario 1: a tight counted loop tiers up once and then runs entirely
/// through the compiled entry.
#[test]
fn scenario_tight_counted_loop_tiers_up_once_and_runs_natively() {
    let mut config = EngineConfig::default();
    config.hot_threshold = 1000;
    config.rollout_stage = RolloutStage::I32Only;
    let mut engine = Engine::new(config);
    let func = engine.register_function(i32_counted_loop(), 0, Some("counted".into()));

    let mut outcome = None;
    for _ in 0..1001 {
        if let Some(o) = engine.record_loop_iteration(func, 0, 0) {
            outcome = Some(o);
        }
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

/// scenario 2: the same loop shape over an `i64` counter is rejected at
/// `RolloutStage::I32Only`, blocklisted, and never re-attempted.
#[test]
fn scenario_rollout_gate_blocklists_i64_loop_at_i32_only_stage() {
    let mut config = EngineConfig::default();
    config.hot_threshold = 3;
    config.rollout_stage = RolloutStage::I32Only;
    let mut engine = Engine::new(config);
    let func = engine.register_function(i64_counted_loop(), 0, Some("counted_i64".into()));

    let mut outcome = None;
    for _ in 0..4 {
        if let Some(o) = engine.record_loop_iteration(func, 0, 0) {
            outcome = Some(o);
        }
    }
    assert!(matches!(outcome, Some(TierUpOutcome::Blocklisted { .. })));
    assert!(engine.is_loop_blocklisted(func, 0));
    assert_eq!(engine.jit_compilation_count(), 0);

    // further entries into the same loop must not re-attempt tier-up.
    for _ in 0..10 {
        engine.record_loop_iteration(func, 0, 0);
    }
    assert_eq!(engine.jit_compilation_count(), 0);
}

/// scenario 3: a typed-register guard failing inside a compiled block
/// bails out, counts a deopt, blocklists the entry, and releases it at the
/// next safepoint.
#[test]
fn scenario_type_guard_failure_triggers_deopt_and_deferred_release() {
    let mut config = EngineConfig::default();
    config.hot_threshold = 1;
    config.force_helper_stub = true;
    let mut engine = Engine::new(config);

    let mut b = ChunkBuilder::new();
    let one = b.add_constant(Value::I32(1));
    b.op(Opcode::LoadI32Const).u8(0).u16(one);
    b.op(Opcode::LoadI32Const).u8(1).u16(one);
    // Tier-up starts translation right at the arithmetic op, so the compiled
    // block never re-establishes r0/r1's typed tags itself — whatever the
    // caller left in the typed bank is what the guard sees.
    let add_offset = b.position() as u32;
    b.op(Opcode::AddI32Typed).u8(2).u8(0).u8(1);
    b.op(Opcode::ReturnVoid);
    let chunk = b.finish();
    let func = engine.register_function(chunk, 0, Some("typed_add".into()));

    for _ in 0..2 {
        engine.record_loop_iteration(func, 0, add_offset);
    }
    assert_eq!(engine.jit_compilation_count(), 1);

    let mut registers = RegisterFile::new();
    registers.alloc_frame(256).unwrap();
    let mut typed = TypedRegisterBank::new();
    typed.store_i32_typed_hot(0, 1);
    // r1 was last written through the boxed path as an F64 — its shadow
    // type disagrees with what ADD_I32_TYPED requires.
    typed.store_f64_typed_hot(1, 2.0);
    let mut output = Vec::new();

    let step = engine.enter_compiled(func, 0, &mut registers, &mut typed, &mut output);
    assert!(matches!(step, StepOutcome::Deopted { .. }));
    assert_eq!(engine.jit_native_type_deopts(), 1);
    assert!(engine.is_loop_blocklisted(func, 0));

    engine.step_safepoint();
    assert_eq!(
        engine.enter_compiled(func, 0, &mut registers, &mut typed, &mut output),
        StepOutcome::NotCompiled,
        "entry must be released by the following safepoint"
    );
}

/// scenario 4: forcing the helper-stub backend still compiles the loop,
/// but its installed entry is tagged `orus_jit_helper_stub` and every
/// iteration round-trips through [`orus_engine::jit::backend::helper_stub::execute_block`].
#[test]
fn scenario_forced_helper_stub_fallback_still_compiles_and_runs() {
    let mut config = EngineConfig::default();
    config.hot_threshold = 3;
    config.force_helper_stub = true;
    let mut engine = Engine::new(config);
    let func = engine.register_function(i32_counted_loop(), 0, Some("counted".into()));

    let mut outcome = None;
    for _ in 0..4 {
        if let Some(o) = engine.record_loop_iteration(func, 0, 0) {
            outcome = Some(o);
        }
    }
    match outcome {
        Some(TierUpOutcome::Compiled { debug_name, .. }) => {
            assert_eq!(debug_name, "orus_jit_helper_stub");
        }
        other => panic!("expected a compiled helper-stub entry, got {other:?}"),
    }
    assert_eq!(engine.jit_compilation_count(), 1);

    let mut registers = RegisterFile::new();
    registers.alloc_frame(256).unwrap();
    let mut typed = TypedRegisterBank::new();
    let mut output = Vec::new();
    assert_eq!(
        engine.enter_compiled(func, 0, &mut registers, &mut typed, &mut output),
        StepOutcome::Returned
    );
}

/// scenario 5: a truncated `LOAD_CONST` operand fails translation with
/// `InvalidInput` at the truncated offset, and is NOT blocklisted.
#[test]
fn scenario_invalid_bytecode_fails_without_blocklisting() {
    let mut config = EngineConfig::default();
    config.hot_threshold = 0;
    let mut engine = Engine::new(config);

    let mut b = ChunkBuilder::new();
    b.op(Opcode::LoadConst).u8(0); // truncated: missing the u16 index
    let chunk = b.finish();
    let func = engine.register_function(chunk, 0, Some("truncated".into()));

    let outcome = engine.record_loop_iteration(func, 0, 0);
    assert!(matches!(
        outcome,
        Some(TierUpOutcome::SyntheticInstalled { status: TranslateStatus::InvalidInput, .. })
    ));
    assert!(!engine.is_loop_blocklisted(func, 0), "invalid input must not be blocklisted");
    assert_eq!(engine.failure_log().total_failures(), 1);
}

/// scenario 6: after 10,000 instructions across 3 distinct opcodes and
/// one hot loop, the exported profiling JSON round-trips through
/// `serde_json::Value` with the documented shape.
#[test]
fn scenario_profiling_export_round_trips() {
    let mut config = EngineConfig::default();
    config.hot_threshold = 50;
    let mut engine = Engine::new(config);
    let func = engine.register_function(i32_counted_loop(), 0, Some("hot".into()));

    engine.enable_profiling(
        orus_engine::profiling::ProfilingFlags::INSTRUCTIONS
            .union(orus_engine::profiling::ProfilingFlags::HOT_PATHS),
    );

    let opcodes = [Opcode::LoadI32Const as u8, Opcode::IncCmpJmp as u8, Opcode::ReturnVoid as u8];
    for i in 0..10_000u64 {
        engine.record_instruction(opcodes[(i % 3) as usize], 1);
    }
    for _ in 0..60 {
        engine.record_loop_iteration(func, 0, 0);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profile.json");
    engine.export_profiling_json(&path).unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(parsed["totalInstructions"], 10_000);
    assert_eq!(parsed["instructions"].as_array().unwrap().len(), 3);
    let hot_paths = parsed["hotPaths"].as_array().unwrap();
    assert_eq!(hot_paths.len(), 1);
    assert_eq!(hot_paths[0]["isHot"], true);
    assert_eq!(parsed["specializations"].as_array().unwrap().len(), 1);

    let reserialized = serde_json::to_string(&parsed).unwrap();
    let reparsed: serde_json::Value = serde_json::from_str(&reserialized).unwrap();
    assert_eq!(parsed, reparsed);
}
