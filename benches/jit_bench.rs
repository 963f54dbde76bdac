//! Tier-up and native-execution throughput, measured against the same
//! interpreted-vs-compiled comparison the reference engine's own
//! `jit_bench` example draws, but wired through `criterion` rather than a
//! hand-rolled timing loop, matching how the rest of the workspace benches
//! (see the parser crate's `lexer` bench) are structured.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use orus_engine::chunk::{Chunk, ChunkBuilder, Opcode};
use orus_engine::engine::StepOutcome;
use orus_engine::jit::RolloutStage;
use orus_engine::value::{RegisterFile, TypedRegisterBank, Value};
use orus_engine::{Engine, EngineConfig};

fn i32_counted_loop(iterations: i32) -> Chunk {
    let mut b = ChunkBuilder::new();
    let zero = b.add_constant(Value::I32(0));
    let limit = b.add_constant(Value::I32(iterations));
    b.op(Opcode::LoadI32Const).u8(0).u16(zero);
    b.op(Opcode::LoadI32Const).u8(1).u16(limit);
    b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
    b.op(Opcode::ReturnVoid);
    b.finish()
}

fn tier_up_to_steady_state(config: EngineConfig) -> (Engine, u32) {
    let mut engine = Engine::new(config);
    let func = engine.register_function(i32_counted_loop(1_000_000), 0, Some("counted".into()));
    for _ in 0..(config.hot_threshold as u64 + 1) {
        engine.record_loop_iteration(func, 0, 0);
    }
    (engine, func)
}

fn bench_tier_up(c: &mut Criterion) {
    let mut group = c.benchmark_group("tier_up");
    group.bench_function("native_backend", |b| {
        b.iter(|| {
            let mut config = EngineConfig::default();
            config.hot_threshold = 1000;
            config.rollout_stage = RolloutStage::I32Only;
            let (engine, func) = tier_up_to_steady_state(config);
            black_box((engine.jit_compilation_count(), func));
        });
    });
    group.bench_function("helper_stub_backend", |b| {
        b.iter(|| {
            let mut config = EngineConfig::default();
            config.hot_threshold = 1000;
            config.rollout_stage = RolloutStage::I32Only;
            config.force_helper_stub = true;
            let (engine, func) = tier_up_to_steady_state(config);
            black_box((engine.jit_compilation_count(), func));
        });
    });
    group.finish();
}

fn bench_compiled_entry_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("compiled_entry");
    for &force_helper_stub in &[false, true] {
        let label = if force_helper_stub { "helper_stub" } else { "native" };
        group.bench_function(label, |b| {
            let mut config = EngineConfig::default();
            config.hot_threshold = 1;
            config.force_helper_stub = force_helper_stub;
            let (mut engine, func) = tier_up_to_steady_state(config);

            b.iter(|| {
                let mut registers = RegisterFile::new();
                registers.alloc_frame(256).expect("frame fits within default capacity");
                let mut typed = TypedRegisterBank::new();
                let mut output = Vec::new();
                let outcome =
                    engine.enter_compiled(func, 0, &mut registers, &mut typed, &mut output);
                black_box(outcome);
                assert_eq!(outcome, StepOutcome::Returned);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tier_up, bench_compiled_entry_execution);
criterion_main!(benches);
