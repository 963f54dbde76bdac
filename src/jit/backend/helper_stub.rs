//! Helper-stub backend: the portable correctness fallback.
//!
//! The direct x86-64 and AArch64 backends both report
//! [`CodegenError::UnsupportedInstruction`] the moment they hit an IR op
//! outside their narrow whitelist. This backend never does — it is the one
//! guaranteed to "compile" any [`IRProgram`], because installing it doesn't
//! mean emitting architecture-specific bytes at all. It means two things:
//!
//! - [`HelperStubBackend::compile`] produces a fixed, never-executed
//!   trampoline marker, purely so a helper-stub [`super::CompiledCode`]
//!   behaves identically to a direct one for every cache bookkeeping purpose
//!   (size, generation, installation).
//! - [`execute_block`] is the thing that actually runs the block: a complete
//!   interpreter over `IRInstr` that performs the same type-guarded
//!   reads/writes and the same bailout semantics a direct emitter's machine
//!   code would, grounded on how the translator (`jit::translate`) itself
//!   reasons about register kinds rather than on any one backend's encoding.

use std::rc::Rc;

use crate::chunk::Chunk;
use crate::clock::Clock;
use crate::value::{RegType, RegisterFile, TypedRegisterBank, Value};

use super::super::ir::{ArithOp, CompareOp, IROpcode, IRInstr, Operands, Step, ValueKind};
use super::{CodegenError, CompiledCode, NativeBackend, TargetArch};

use super::super::ir::IRProgram;

/// Fixed placeholder the trampoline "compiles" to. Never executed as raw
/// bytes — see [`execute_block`] for how a helper-stub entry actually runs.
pub const TRAMPOLINE_MARKER: u8 = 0xF4;

/// The portable fallback backend.
pub struct HelperStubBackend;

impl NativeBackend for HelperStubBackend {
    fn name(&self) -> &str {
        "helper_stub"
    }

    fn target(&self) -> TargetArch {
        TargetArch::HelperStub
    }

    fn compile(&self, _program: &IRProgram<'_>) -> Result<CompiledCode, CodegenError> {
        Ok(CompiledCode {
            code: vec![TRAMPOLINE_MARKER],
            entry_offset: 0,
        })
    }
}

/// Outcome of running a compiled block to completion or to a bailout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockOutcome {
    /// `Return` was reached; the block ran to completion.
    Returned,
    /// A type guard failed reading or writing this register — caller must
    /// deoptimize (blocklist the loop, schedule a deferred cache
    /// invalidation, resume interpretation at `bytecode_offset`).
    TypeBailout { register: u8, bytecode_offset: u32 },
    /// Control would leave the compiled region via an ordinary jump (not the
    /// recognized loop-back). The caller resumes interpretation at this
    /// bytecode offset.
    JumpExit { bytecode_offset: u32 },
}

/// Execution context [`execute_block`] operates against: the boxed register
/// file, the typed shadow bank mirroring it, the clock for `TimeStamp`, and
/// an output sink standing in for the out-of-scope builtin I/O surface.
pub struct BlockContext<'a> {
    /// Boxed registers.
    pub registers: &'a mut RegisterFile,
    /// Typed shadow registers plus their type tags.
    pub typed: &'a mut TypedRegisterBank,
    /// Monotonic clock backing `TIME_STAMP`.
    pub clock: &'a Clock,
    /// Lines written by `Print`, in order — a stand-in for the real VM's
    /// stdout/builtin surface, which is out of scope here.
    pub output: &'a mut Vec<String>,
}

fn expected_reg_type(kind: ValueKind) -> Option<RegType> {
    match kind {
        ValueKind::I32 => Some(RegType::I32),
        ValueKind::I64 => Some(RegType::I64),
        ValueKind::U32 => Some(RegType::U32),
        ValueKind::U64 => Some(RegType::U64),
        ValueKind::F64 => Some(RegType::F64),
        ValueKind::Bool => Some(RegType::I32), // bools are packed into i32_regs
        ValueKind::String | ValueKind::Boxed => None,
    }
}

fn guard(
    typed: &TypedRegisterBank,
    r: u8,
    kind: ValueKind,
    offset: u32,
) -> Result<(), BlockOutcome> {
    if let Some(expected) = expected_reg_type(kind) {
        if typed.reg_type(r as usize) != expected {
            return Err(BlockOutcome::TypeBailout {
                register: r,
                bytecode_offset: offset,
            });
        }
    }
    Ok(())
}

fn read_typed_int(typed: &TypedRegisterBank, kind: ValueKind, r: u8) -> i64 {
    match kind {
        ValueKind::I32 | ValueKind::Bool => typed.load_i32_typed_hot(r as usize) as i64,
        ValueKind::I64 => typed.load_i64_typed_hot(r as usize),
        ValueKind::U32 => typed.load_u32_typed_hot(r as usize) as i64,
        ValueKind::U64 => typed.load_u64_typed_hot(r as usize) as i64,
        _ => 0,
    }
}

fn write_typed_int(typed: &mut TypedRegisterBank, kind: ValueKind, r: u8, v: i64) {
    match kind {
        ValueKind::I32 | ValueKind::Bool => typed.store_i32_typed_hot(r as usize, v as i32),
        ValueKind::I64 => typed.store_i64_typed_hot(r as usize, v),
        ValueKind::U32 => typed.store_u32_typed_hot(r as usize, v as u32),
        ValueKind::U64 => typed.store_u64_typed_hot(r as usize, v as u64),
        _ => {}
    }
}

fn read_typed_f64(typed: &TypedRegisterBank, r: u8) -> f64 {
    typed.load_f64_typed_hot(r as usize)
}

fn mirror_int_to_boxed(ctx: &mut BlockContext<'_>, kind: ValueKind, r: u8, v: i64) {
    let boxed = match kind {
        ValueKind::I32 => Value::I32(v as i32),
        ValueKind::I64 => Value::I64(v),
        ValueKind::U32 => Value::U32(v as u32),
        ValueKind::U64 => Value::U64(v as u64),
        ValueKind::Bool => Value::Bool(v != 0),
        _ => return,
    };
    let _ = ctx.registers.set(r as usize, boxed);
}

fn format_value(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::I32(n) => n.to_string(),
        Value::I64(n) => n.to_string(),
        Value::U32(n) => n.to_string(),
        Value::U64(n) => n.to_string(),
        Value::F64(n) | Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::EnumInstance(e) => format!("enum#{}", e.tag),
        Value::Error(msg) => msg.to_string(),
        Value::RangeIterator(_) | Value::ArrayIterator(_) => "<iterator>".to_string(),
        Value::Function(idx) => format!("<function {idx}>"),
        Value::Closure(c) => format!("<closure {}>", c.function_index),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::I32(x), Value::I32(y)) => x == y,
        (Value::I64(x), Value::I64(y)) => x == y,
        (Value::U32(x), Value::U32(y)) => x == y,
        (Value::U64(x), Value::U64(y)) => x == y,
        (Value::F64(x), Value::F64(y)) | (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        _ => format_value(a) == format_value(b),
    }
}

/// Interprets `instructions` against `ctx`, looping on the fused-loop
/// construct and the recognized loop-back self-branch, until `Return` is
/// reached, a type guard fails, or control would leave the compiled region.
///
/// `chunk` resolves string constants referenced by `LoadConst`; it is not
/// stored alongside the block (see [`super::super::ir::NativeBlock`]) since
/// the owning function's chunk already outlives every entry compiled from it.
pub fn execute_block(ctx: &mut BlockContext<'_>, instructions: &[IRInstr], chunk: &Chunk) -> BlockOutcome {
    let mut ip = 0usize;
    loop {
        let Some(instr) = instructions.get(ip) else {
            return BlockOutcome::Returned;
        };
        let offset = instr.bytecode_offset;
        let kind = instr.value_kind;

        match &instr.opcode {
            IROpcode::LoadConst => {
                if let Operands::LoadConst { dst, bits, constant_index } = &instr.operands {
                    match kind {
                        ValueKind::String => {
                            let Some(value) = chunk.constant(*constant_index) else {
                                return BlockOutcome::TypeBailout {
                                    register: *dst,
                                    bytecode_offset: offset,
                                };
                            };
                            let _ = ctx.registers.set(*dst as usize, value.clone());
                            ctx.typed.invalidate(*dst as usize);
                        }
                        ValueKind::F64 => {
                            let v = f64::from_bits(*bits);
                            ctx.typed.store_f64_typed_hot(*dst as usize, v);
                            let _ = ctx.registers.set(*dst as usize, Value::F64(v));
                        }
                        _ => {
                            write_typed_int(ctx.typed, kind, *dst, *bits as i64);
                            mirror_int_to_boxed(ctx, kind, *dst, *bits as i64);
                        }
                    }
                }
            }
            IROpcode::Move => {
                if let Operands::Move { dst, src } = &instr.operands {
                    if kind == ValueKind::Boxed {
                        if let Ok(v) = ctx.registers.get(*src as usize).cloned() {
                            let _ = ctx.registers.set(*dst as usize, v);
                        }
                        ctx.typed.invalidate(*dst as usize);
                    } else if kind == ValueKind::F64 {
                        if let Err(e) = guard(ctx.typed, *src, kind, offset) {
                            return e;
                        }
                        let v = read_typed_f64(ctx.typed, *src);
                        ctx.typed.store_f64_typed_hot(*dst as usize, v);
                        let _ = ctx.registers.set(*dst as usize, Value::F64(v));
                    } else {
                        if let Err(e) = guard(ctx.typed, *src, kind, offset) {
                            return e;
                        }
                        let v = read_typed_int(ctx.typed, kind, *src);
                        write_typed_int(ctx.typed, kind, *dst, v);
                        mirror_int_to_boxed(ctx, kind, *dst, v);
                    }
                }
            }
            IROpcode::Arithmetic(op) => {
                if let Operands::Binary { dst, lhs, rhs } = &instr.operands {
                    if kind == ValueKind::F64 {
                        if let Err(e) = guard(ctx.typed, *lhs, kind, offset) {
                            return e;
                        }
                        if let Err(e) = guard(ctx.typed, *rhs, kind, offset) {
                            return e;
                        }
                        let a = read_typed_f64(ctx.typed, *lhs);
                        let b = read_typed_f64(ctx.typed, *rhs);
                        let r = match op {
                            ArithOp::Add => a + b,
                            ArithOp::Sub => a - b,
                            ArithOp::Mul => a * b,
                            ArithOp::Div => a / b,
                            ArithOp::Mod => a % b,
                        };
                        ctx.typed.store_f64_typed_hot(*dst as usize, r);
                        let _ = ctx.registers.set(*dst as usize, Value::F64(r));
                    } else {
                        if let Err(e) = guard(ctx.typed, *lhs, kind, offset) {
                            return e;
                        }
                        if let Err(e) = guard(ctx.typed, *rhs, kind, offset) {
                            return e;
                        }
                        let a = read_typed_int(ctx.typed, kind, *lhs);
                        let b = read_typed_int(ctx.typed, kind, *rhs);
                        let r = match op {
                            ArithOp::Add => a.wrapping_add(b),
                            ArithOp::Sub => a.wrapping_sub(b),
                            ArithOp::Mul => a.wrapping_mul(b),
                            ArithOp::Div => {
                                if b == 0 {
                                    return BlockOutcome::TypeBailout {
                                        register: *rhs,
                                        bytecode_offset: offset,
                                    };
                                }
                                a.wrapping_div(b)
                            }
                            ArithOp::Mod => {
                                if b == 0 {
                                    return BlockOutcome::TypeBailout {
                                        register: *rhs,
                                        bytecode_offset: offset,
                                    };
                                }
                                a.wrapping_rem(b)
                            }
                        };
                        write_typed_int(ctx.typed, kind, *dst, r);
                        mirror_int_to_boxed(ctx, kind, *dst, r);
                    }
                }
            }
            IROpcode::Compare(op) => {
                if let Operands::Binary { dst, lhs, rhs } = &instr.operands {
                    let result = if kind == ValueKind::F64 {
                        if let Err(e) = guard(ctx.typed, *lhs, kind, offset) {
                            return e;
                        }
                        if let Err(e) = guard(ctx.typed, *rhs, kind, offset) {
                            return e;
                        }
                        let a = read_typed_f64(ctx.typed, *lhs);
                        let b = read_typed_f64(ctx.typed, *rhs);
                        compare(*op, a.partial_cmp(&b))
                    } else {
                        if let Err(e) = guard(ctx.typed, *lhs, kind, offset) {
                            return e;
                        }
                        if let Err(e) = guard(ctx.typed, *rhs, kind, offset) {
                            return e;
                        }
                        let a = read_typed_int(ctx.typed, kind, *lhs);
                        let b = read_typed_int(ctx.typed, kind, *rhs);
                        compare(*op, a.partial_cmp(&b))
                    };
                    ctx.typed.store_i32_typed_hot(*dst as usize, result as i32);
                    let _ = ctx.registers.set(*dst as usize, Value::Bool(result));
                }
            }
            IROpcode::ConvertI32ToI64 | IROpcode::ConvertU32ToU64 | IROpcode::ConvertU32ToI32 => {
                if let Operands::Unary { dst, src } = &instr.operands {
                    let (src_kind, dst_kind) = match instr.opcode {
                        IROpcode::ConvertI32ToI64 => (ValueKind::I32, ValueKind::I64),
                        IROpcode::ConvertU32ToU64 => (ValueKind::U32, ValueKind::U64),
                        _ => (ValueKind::U32, ValueKind::I32),
                    };
                    if let Err(e) = guard(ctx.typed, *src, src_kind, offset) {
                        return e;
                    }
                    let v = read_typed_int(ctx.typed, src_kind, *src);
                    write_typed_int(ctx.typed, dst_kind, *dst, v);
                    mirror_int_to_boxed(ctx, dst_kind, *dst, v);
                }
            }
            IROpcode::ToString => {
                if let Operands::Unary { dst, src } = &instr.operands {
                    let text = match ctx.registers.get(*src as usize) {
                        Ok(v) => format_value(v),
                        Err(_) => String::new(),
                    };
                    let _ = ctx.registers.set(*dst as usize, Value::String(Rc::from(text.as_str())));
                    ctx.typed.invalidate(*dst as usize);
                }
            }
            IROpcode::ConcatString => {
                if let Operands::Binary { dst, lhs, rhs } = &instr.operands {
                    let a = ctx.registers.get(*lhs as usize).ok().cloned();
                    let b = ctx.registers.get(*rhs as usize).ok().cloned();
                    let (Some(Value::String(a)), Some(Value::String(b))) = (a, b) else {
                        return BlockOutcome::TypeBailout {
                            register: *lhs,
                            bytecode_offset: offset,
                        };
                    };
                    let mut joined = String::with_capacity(a.len() + b.len());
                    joined.push_str(&a);
                    joined.push_str(&b);
                    let _ = ctx.registers.set(*dst as usize, Value::String(Rc::from(joined.as_str())));
                    ctx.typed.invalidate(*dst as usize);
                }
            }
            IROpcode::Range => {
                if let Operands::Range { dst, args, argc } = &instr.operands {
                    let read_i64 = |r: u8, ctx: &BlockContext<'_>| -> i64 {
                        match ctx.registers.get(r as usize) {
                            Ok(Value::I32(n)) => *n as i64,
                            Ok(Value::I64(n)) => *n,
                            Ok(Value::U32(n)) => *n as i64,
                            Ok(Value::U64(n)) => *n as i64,
                            _ => 0,
                        }
                    };
                    let (start, end, step) = match argc {
                        1 => (0, read_i64(args[0], ctx), 1),
                        2 => (read_i64(args[0], ctx), read_i64(args[1], ctx), 1),
                        _ => (
                            read_i64(args[0], ctx),
                            read_i64(args[1], ctx),
                            read_i64(args[2], ctx),
                        ),
                    };
                    let iter = crate::value::RangeIterator {
                        current: start,
                        end,
                        step,
                    };
                    let _ = ctx.registers.set(*dst as usize, Value::RangeIterator(iter));
                    ctx.typed.invalidate(*dst as usize);
                }
            }
            IROpcode::GetIter => {
                if let Operands::GetIter { dst, src } = &instr.operands {
                    let produced = match ctx.registers.get(*src as usize) {
                        Ok(Value::RangeIterator(it)) => Some(Value::RangeIterator(*it)),
                        Ok(Value::Array(items)) => Some(Value::ArrayIterator(crate::value::ArrayIterator {
                            array: items.clone(),
                            index: 0,
                        })),
                        _ => None,
                    };
                    let _ = ctx.registers.set(*dst as usize, produced.unwrap_or(Value::Nil));
                    ctx.typed.invalidate(*dst as usize);
                }
            }
            IROpcode::IterNext => {
                if let Operands::IterNext { value, iter, has_value } = &instr.operands {
                    let current = ctx.registers.get(*iter as usize).ok().cloned();
                    let (produced, has_more) = match current {
                        Some(Value::RangeIterator(mut it)) => {
                            let next = it.next();
                            let _ = ctx.registers.set(*iter as usize, Value::RangeIterator(it));
                            match next {
                                Some(n) => (Value::I64(n), true),
                                None => (Value::Nil, false),
                            }
                        }
                        Some(Value::ArrayIterator(mut it)) => {
                            let next = it.next();
                            let has_more = next.is_some();
                            let _ = ctx.registers.set(*iter as usize, Value::ArrayIterator(it));
                            (next.unwrap_or(Value::Nil), has_more)
                        }
                        _ => (Value::Nil, false),
                    };
                    let _ = ctx.registers.set(*value as usize, produced);
                    ctx.typed.invalidate(*value as usize);
                    let _ = ctx.registers.set(*has_value as usize, Value::Bool(has_more));
                    ctx.typed.store_i32_typed_hot(*has_value as usize, has_more as i32);
                }
            }
            IROpcode::ArrayPush => {
                if let Operands::ArrayPush { array, value } = &instr.operands {
                    let pushed = ctx.registers.get(*value as usize).ok().cloned().unwrap_or(Value::Nil);
                    let current = ctx.registers.get(*array as usize).ok().cloned();
                    let mut items: Vec<Value> = match current {
                        Some(Value::Array(items)) => items.to_vec(),
                        _ => Vec::new(),
                    };
                    items.push(pushed);
                    let _ = ctx.registers.set(*array as usize, Value::Array(Rc::from(items)));
                }
            }
            IROpcode::Print => {
                if let Operands::Print { first, argc } = &instr.operands {
                    let count = argc.unwrap_or(1).max(1);
                    let mut parts = Vec::with_capacity(count as usize);
                    for i in 0..count {
                        let text = match ctx.registers.get(*first as usize + i as usize) {
                            Ok(v) => format_value(v),
                            Err(_) => String::new(),
                        };
                        parts.push(text);
                    }
                    ctx.output.push(parts.join(" "));
                }
            }
            IROpcode::AssertEq => {
                if let Operands::AssertEq { dst, actual, expected, .. } = &instr.operands {
                    let a = ctx.registers.get(*actual as usize).ok().cloned().unwrap_or(Value::Nil);
                    let b = ctx.registers.get(*expected as usize).ok().cloned().unwrap_or(Value::Nil);
                    let equal = values_equal(&a, &b);
                    if !equal {
                        ctx.output.push(format!(
                            "assertion failed: {} != {}",
                            format_value(&a),
                            format_value(&b)
                        ));
                    }
                    let _ = ctx.registers.set(*dst as usize, Value::Bool(equal));
                    ctx.typed.store_i32_typed_hot(*dst as usize, equal as i32);
                }
            }
            IROpcode::CallNative => {
                // Builtins are specified only by the calling convention they
                // expose to the native tier; no native function table exists
                // in this crate, so the call always produces `Nil`.
                if let Operands::CallNative { dst, .. } = &instr.operands {
                    let _ = ctx.registers.set(*dst as usize, Value::Nil);
                    ctx.typed.invalidate(*dst as usize);
                }
            }
            IROpcode::TimeStamp => {
                if let Operands::TimeStamp { dst } = &instr.operands {
                    let now = ctx.clock.now_seconds();
                    ctx.typed.store_f64_typed_hot(*dst as usize, now);
                    let _ = ctx.registers.set(*dst as usize, Value::F64(now));
                }
            }
            IROpcode::FusedLoop => {
                if let Operands::FusedLoop { counter, limit, step, kind: fkind, .. } = &instr.operands {
                    if let Err(e) = guard(ctx.typed, *counter, *fkind, offset) {
                        return e;
                    }
                    if let Err(e) = guard(ctx.typed, *limit, *fkind, offset) {
                        return e;
                    }
                    loop {
                        let c = read_typed_int(ctx.typed, *fkind, *counter);
                        let l = read_typed_int(ctx.typed, *fkind, *limit);
                        let next = match step {
                            Step::Increment => c.wrapping_add(1),
                            Step::Decrement => c.wrapping_sub(1),
                        };
                        write_typed_int(ctx.typed, *fkind, *counter, next);
                        mirror_int_to_boxed(ctx, *fkind, *counter, next);
                        let keep_going = match step {
                            Step::Increment => next < l,
                            Step::Decrement => next > l,
                        };
                        if !keep_going {
                            break;
                        }
                    }
                }
            }
            IROpcode::LoopBack => {
                ip = 0;
                continue;
            }
            IROpcode::JumpShort | IROpcode::JumpBackShort | IROpcode::JumpIfNotShort => {
                return BlockOutcome::JumpExit { bytecode_offset: offset };
            }
            IROpcode::Safepoint => {}
            IROpcode::Return => return BlockOutcome::Returned,
        }

        ip += 1;
    }
}

fn compare(op: CompareOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    match (op, ordering) {
        (CompareOp::Lt, Some(Less)) => true,
        (CompareOp::Le, Some(Less)) | (CompareOp::Le, Some(Equal)) => true,
        (CompareOp::Gt, Some(Greater)) => true,
        (CompareOp::Ge, Some(Greater)) | (CompareOp::Ge, Some(Equal)) => true,
        (CompareOp::Eq, Some(Equal)) => true,
        (CompareOp::Ne, Some(Less)) | (CompareOp::Ne, Some(Greater)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkBuilder, Opcode};
    use crate::jit::ir::RolloutStage;
    use crate::jit::translate::translate;

    fn fresh_ctx() -> (RegisterFile, TypedRegisterBank, Clock, Vec<String>) {
        let mut registers = RegisterFile::new();
        registers.alloc_frame(256).unwrap();
        (registers, TypedRegisterBank::new(), Clock::start(), Vec::new())
    }

    #[test]
    fn fused_loop_runs_to_completion_inside_one_call() {
        let mut b = ChunkBuilder::new();
        let zero = b.add_constant(Value::I32(0));
        let limit = b.add_constant(Value::I32(1_000_000));
        b.op(Opcode::LoadI32Const).u8(0).u16(zero);
        b.op(Opcode::LoadI32Const).u8(1).u16(limit);
        b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();

        let (program, _) = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap();
        let (mut registers, mut typed, clock, mut output) = fresh_ctx();
        let mut ctx = BlockContext {
            registers: &mut registers,
            typed: &mut typed,
            clock: &clock,
            output: &mut output,
        };
        let outcome = execute_block(&mut ctx, &program.instructions, &chunk);
        assert_eq!(outcome, BlockOutcome::Returned);
        assert_eq!(typed.load_i32_typed_hot(0), 1_000_000);
    }

    #[test]
    fn type_mismatch_on_typed_arithmetic_bails_out() {
        let mut b = ChunkBuilder::new();
        let c = b.add_constant(Value::I32(1));
        b.op(Opcode::LoadI32Const).u8(0).u16(c);
        b.op(Opcode::LoadI32Const).u8(1).u16(c);
        b.op(Opcode::AddI32Typed).u8(2).u8(0).u8(1);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();

        let (program, _) = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap();
        let (mut registers, mut typed, clock, mut output) = fresh_ctx();
        // simulate a side path writing r1 through the boxed register file,
        // which must clear its typed shadow per the documented invariant.
        typed.store_i32_typed_hot(0, 1);
        typed.store_i32_typed_hot(1, 1);
        registers.set(1, Value::F64(2.5)).unwrap();
        typed.invalidate(1);

        let mut ctx = BlockContext {
            registers: &mut registers,
            typed: &mut typed,
            clock: &clock,
            output: &mut output,
        };
        let outcome = execute_block(&mut ctx, &program.instructions, &chunk);
        assert!(matches!(outcome, BlockOutcome::TypeBailout { register: 1, .. }));
    }

    #[test]
    fn print_writes_formatted_registers_to_the_output_sink() {
        let mut b = ChunkBuilder::new();
        let c = b.add_constant(Value::I32(42));
        b.op(Opcode::LoadI32Const).u8(0).u16(c);
        b.op(Opcode::PrintR).u8(0);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();

        let (program, _) = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap();
        let (mut registers, mut typed, clock, mut output) = fresh_ctx();
        let mut ctx = BlockContext {
            registers: &mut registers,
            typed: &mut typed,
            clock: &clock,
            output: &mut output,
        };
        execute_block(&mut ctx, &program.instructions, &chunk);
        assert_eq!(output, vec!["42".to_string()]);
    }
}
