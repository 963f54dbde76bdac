//! Bytecode → IR translator, the hardest subsystem in this crate.
//!
//! Structurally grounded on the reference JIT's `analysis/decoder.rs`
//! (bounds-checked operand readers returning a structured `DecodeError`,
//! an `Operands` tagged union, offset tracking) but big-endian throughout,
//! and walking linearly rather than building a CFG: the translator
//! never follows a branch target, it only ever appends an IR instruction for
//! it and keeps going at the next sequential offset.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::chunk::{Chunk, Opcode};
use crate::value::Value;

use super::ir::{
    ArithOp, CompareOp, IROpcode, IRInstr, IRProgram, Operands, RolloutStage, Step, ValueKind,
};

/// Every failure the translator can report (taxonomy, translator rows).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslateStatus {
    /// Truncated instruction or out-of-range index. Not blocklisting.
    #[error("invalid input")]
    InvalidInput,
    /// IR growth failed to allocate. Not blocklisting.
    #[error("out of memory")]
    OutOfMemory,
    /// An operand's value kind will never be supported at this stage.
    #[error("unsupported value kind")]
    UnsupportedValueKind,
    /// A constant's kind didn't match what the opcode declared.
    #[error("unsupported constant kind")]
    UnsupportedConstantKind,
    /// An opcode this translator will never handle.
    #[error("unhandled opcode")]
    UnhandledOpcode,
    /// A loop-back target other than the recognized loop header, or a
    /// 16-bit conditional jump with `disp > 255`.
    #[error("unsupported loop shape")]
    UnsupportedLoopShape,
    /// The kind is real but gated behind a later rollout stage.
    #[error("rollout disabled")]
    RolloutDisabled,
}

impl TranslateStatus {
    /// Whether this failure permanently blocklists the `(function, loop)` key
    /// (Failure handling / propagation policy). `InvalidInput` and
    /// `OutOfMemory` are the only non-blocklisting statuses.
    pub fn is_blocklisting(self) -> bool {
        !matches!(self, TranslateStatus::InvalidInput | TranslateStatus::OutOfMemory)
    }
}

/// A single entry in the translation failure log (TranslationFailureLog).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationFailureRecord {
    /// What went wrong.
    pub status: TranslateStatus,
    /// The opcode byte being translated when the failure was detected.
    pub opcode: u8,
    /// The value kind in play.
    pub value_kind: ValueKind,
    /// Byte offset within the chunk.
    pub bytecode_offset: u32,
    /// Function this translation attempt was for.
    pub function_index: u16,
    /// Loop this translation attempt was for.
    pub loop_index: u16,
}

/// Outcome of a successful translation: the last opcode/kind/offset seen,
/// carrying the last opcode, value kind, and byte offset seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslateSummary {
    /// Last opcode byte translated.
    pub last_opcode: u8,
    /// Last value kind in play.
    pub last_kind: ValueKind,
    /// Last bytecode offset translated.
    pub last_offset: u32,
}

/// Every 12 non-control IR instructions, a `Safepoint` is forced.
pub const SAFEPOINT_INTERVAL: usize = 12;

struct Cursor<'a> {
    chunk: &'a Chunk,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(chunk: &'a Chunk, start: usize) -> Self {
        Self { chunk, pos: start }
    }

    fn offset(&self) -> u32 {
        self.pos as u32
    }

    fn read_u8(&mut self) -> Result<u8, TranslateStatus> {
        let b = *self
            .chunk
            .code
            .get(self.pos)
            .ok_or(TranslateStatus::InvalidInput)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16, TranslateStatus> {
        let v = self.chunk.read_u16(self.pos).ok_or(TranslateStatus::InvalidInput)?;
        self.pos += 2;
        Ok(v)
    }

    fn read_i16(&mut self) -> Result<i16, TranslateStatus> {
        let v = self.chunk.read_i16(self.pos).ok_or(TranslateStatus::InvalidInput)?;
        self.pos += 2;
        Ok(v)
    }

    fn peek_opcode(&self) -> Result<Opcode, TranslateStatus> {
        let byte = *self
            .chunk
            .code
            .get(self.pos)
            .ok_or(TranslateStatus::InvalidInput)?;
        Opcode::from_u8(byte).ok_or(TranslateStatus::UnhandledOpcode)
    }
}

/// Per-call register-kind tracker (Inputs): initialized to `Boxed` for
/// every register, local to one translation attempt.
struct RegisterKinds {
    kinds: HashMap<u8, ValueKind>,
}

impl RegisterKinds {
    fn new() -> Self {
        Self {
            kinds: HashMap::default(),
        }
    }

    fn get(&self, r: u8) -> ValueKind {
        self.kinds.get(&r).copied().unwrap_or(ValueKind::Boxed)
    }

    fn set(&mut self, r: u8, kind: ValueKind) {
        self.kinds.insert(r, kind);
    }
}

/// Iterator kind tracked per register, for `GET_ITER_R`/`ITER_NEXT_R` (Iterator ops).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IteratorKind {
    None,
    Range,
    Generic,
}

struct IteratorKinds {
    kinds: HashMap<u8, IteratorKind>,
}

impl IteratorKinds {
    fn new() -> Self {
        Self {
            kinds: HashMap::default(),
        }
    }

    fn get(&self, r: u8) -> IteratorKind {
        self.kinds.get(&r).copied().unwrap_or(IteratorKind::None)
    }

    fn set(&mut self, r: u8, kind: IteratorKind) {
        self.kinds.insert(r, kind);
    }
}

/// Translate a linear block starting at `loop_start_offset` into an IR
/// program, per the algorithm outline.
///
/// `function_start` clamps an out-of-range starting offset, per Inputs.
pub fn translate<'a>(
    chunk: &'a Chunk,
    function_index: u16,
    loop_index: u16,
    loop_start_offset: u32,
    function_start: u32,
    stage: RolloutStage,
) -> Result<(IRProgram<'a>, TranslateSummary), (TranslateStatus, TranslationFailureRecord)> {
    let start = if (loop_start_offset as usize) < chunk.code.len() {
        loop_start_offset
    } else {
        function_start
    };

    let mask = stage.enabled_kind_mask();
    let mut program = IRProgram::new(chunk, function_index, loop_index, start);
    let mut cursor = Cursor::new(chunk, start as usize);
    let mut reg_kinds = RegisterKinds::new();
    let mut iter_kinds = IteratorKinds::new();
    let mut last_opcode = 0u8;
    let mut last_kind = ValueKind::Boxed;

    let fail = |status: TranslateStatus,
                opcode: u8,
                kind: ValueKind,
                offset: u32|
     -> (TranslateStatus, TranslationFailureRecord) {
        (
            status,
            TranslationFailureRecord {
                status,
                opcode,
                value_kind: kind,
                bytecode_offset: offset,
                function_index,
                loop_index,
            },
        )
    };

    loop {
        let instr_offset = cursor.offset();
        let opcode = match cursor.peek_opcode() {
            Ok(op) => op,
            Err(status) => {
                let byte = chunk.code.get(cursor.pos).copied().unwrap_or(0);
                return Err(fail(status, byte, ValueKind::Boxed, instr_offset));
            }
        };
        cursor.pos += 1;
        last_opcode = opcode as u8;

        macro_rules! require_kind {
            ($kind:expr, $offset:expr) => {{
                if !mask.allows($kind) {
                    return Err(fail(
                        TranslateStatus::RolloutDisabled,
                        last_opcode,
                        $kind,
                        $offset,
                    ));
                }
            }};
        }

        macro_rules! bail {
            ($status:expr, $kind:expr) => {
                return Err(fail($status, last_opcode, $kind, instr_offset))
            };
        }

        macro_rules! rd_u8 {
            () => {
                match cursor.read_u8() {
                    Ok(v) => v,
                    Err(status) => bail!(status, ValueKind::Boxed),
                }
            };
        }
        macro_rules! rd_u16 {
            () => {
                match cursor.read_u16() {
                    Ok(v) => v,
                    Err(status) => bail!(status, ValueKind::Boxed),
                }
            };
        }
        macro_rules! rd_i16 {
            () => {
                match cursor.read_i16() {
                    Ok(v) => v,
                    Err(status) => bail!(status, ValueKind::Boxed),
                }
            };
        }

        match opcode {
            Opcode::LoadI32Const
            | Opcode::LoadI64Const
            | Opcode::LoadU32Const
            | Opcode::LoadU64Const
            | Opcode::LoadF64Const
            | Opcode::LoadConst => {
                let dst = rd_u8!();
                let idx = rd_u16!();
                let (kind, bits) = match (opcode, chunk.constant(idx)) {
                    (Opcode::LoadI32Const, Some(Value::I32(v))) => (ValueKind::I32, *v as u32 as u64),
                    (Opcode::LoadI64Const, Some(Value::I64(v))) => (ValueKind::I64, *v as u64),
                    (Opcode::LoadU32Const, Some(Value::U32(v))) => (ValueKind::U32, *v as u64),
                    (Opcode::LoadU64Const, Some(Value::U64(v))) => (ValueKind::U64, *v),
                    (Opcode::LoadF64Const, Some(Value::F64(v))) => (ValueKind::F64, v.to_bits()),
                    (Opcode::LoadConst, Some(Value::String(_))) => (ValueKind::String, 0),
                    (_, None) => bail!(TranslateStatus::InvalidInput, ValueKind::Boxed),
                    _ => bail!(TranslateStatus::UnsupportedConstantKind, ValueKind::Boxed),
                };
                require_kind!(kind, instr_offset);
                reg_kinds.set(dst, kind);
                program.push(IRInstr {
                    opcode: IROpcode::LoadConst,
                    value_kind: kind,
                    bytecode_offset: instr_offset,
                    operands: Operands::LoadConst {
                        dst,
                        bits,
                        constant_index: idx,
                    },
                });
            }

            Opcode::MoveI32 | Opcode::MoveI64 | Opcode::MoveF64 => {
                let dst = rd_u8!();
                let src = rd_u8!();
                let kind = match opcode {
                    Opcode::MoveI32 => ValueKind::I32,
                    Opcode::MoveI64 => ValueKind::I64,
                    _ => ValueKind::F64,
                };
                require_kind!(kind, instr_offset);
                reg_kinds.set(dst, kind);
                program.push(IRInstr {
                    opcode: IROpcode::Move,
                    value_kind: kind,
                    bytecode_offset: instr_offset,
                    operands: Operands::Move { dst, src },
                });
            }

            Opcode::Move | Opcode::StoreFrame | Opcode::LoadFrame | Opcode::MoveFrame => {
                let dst = rd_u8!();
                let src = rd_u8!();
                let kind = reg_kinds.get(src);
                if kind != ValueKind::Boxed {
                    require_kind!(kind, instr_offset);
                }
                reg_kinds.set(dst, kind);
                if let Some(it) = Some(iter_kinds.get(src)).filter(|k| *k != IteratorKind::None) {
                    iter_kinds.set(dst, it);
                }
                program.push(IRInstr {
                    opcode: IROpcode::Move,
                    value_kind: kind,
                    bytecode_offset: instr_offset,
                    operands: Operands::Move { dst, src },
                });
            }

            Opcode::AddI32Typed
            | Opcode::SubI32Typed
            | Opcode::MulI32Typed
            | Opcode::AddI64Typed
            | Opcode::SubI64Typed
            | Opcode::MulI64Typed
            | Opcode::AddU32Typed
            | Opcode::SubU32Typed
            | Opcode::MulU32Typed
            | Opcode::AddU64Typed
            | Opcode::SubU64Typed
            | Opcode::MulU64Typed
            | Opcode::AddF64Typed
            | Opcode::SubF64Typed
            | Opcode::MulF64Typed
            | Opcode::DivI32Typed
            | Opcode::ModI32Typed
            | Opcode::DivF64Typed
            | Opcode::ModF64Typed => {
                let dst = rd_u8!();
                let lhs = rd_u8!();
                let rhs = rd_u8!();
                let (kind, arith) = arith_kind_and_op(opcode);
                require_kind!(kind, instr_offset);
                reg_kinds.set(dst, kind);
                program.push(IRInstr {
                    opcode: IROpcode::Arithmetic(arith),
                    value_kind: kind,
                    bytecode_offset: instr_offset,
                    operands: Operands::Binary { dst, lhs, rhs },
                });
            }

            Opcode::LtI32Typed
            | Opcode::LeI32Typed
            | Opcode::GtI32Typed
            | Opcode::GeI32Typed
            | Opcode::LtF64Typed
            | Opcode::LeF64Typed
            | Opcode::GtF64Typed
            | Opcode::GeF64Typed => {
                let dst = rd_u8!();
                let lhs = rd_u8!();
                let rhs = rd_u8!();
                let (operand_kind, cmp) = compare_kind_and_op(opcode);
                require_kind!(operand_kind, instr_offset);
                reg_kinds.set(dst, ValueKind::Bool);
                program.push(IRInstr {
                    opcode: IROpcode::Compare(cmp),
                    value_kind: ValueKind::Bool,
                    bytecode_offset: instr_offset,
                    operands: Operands::Binary { dst, lhs, rhs },
                });
            }

            Opcode::EqR | Opcode::NeR => {
                let dst = rd_u8!();
                let lhs = rd_u8!();
                let rhs = rd_u8!();
                let lhs_kind = reg_kinds.get(lhs);
                let rhs_kind = reg_kinds.get(rhs);
                let operand_kind = if lhs_kind == rhs_kind { lhs_kind } else { ValueKind::Boxed };
                if operand_kind != ValueKind::Boxed {
                    require_kind!(operand_kind, instr_offset);
                }
                reg_kinds.set(dst, ValueKind::Bool);
                let cmp = if matches!(opcode, Opcode::EqR) { CompareOp::Eq } else { CompareOp::Ne };
                program.push(IRInstr {
                    opcode: IROpcode::Compare(cmp),
                    value_kind: ValueKind::Bool,
                    bytecode_offset: instr_offset,
                    operands: Operands::Binary { dst, lhs, rhs },
                });
            }

            Opcode::JumpShort => {
                let disp = rd_u8!();
                program.push(IRInstr {
                    opcode: IROpcode::JumpShort,
                    value_kind: ValueKind::Boxed,
                    bytecode_offset: instr_offset,
                    operands: Operands::Jump { disp: disp as i32 },
                });
            }

            Opcode::JumpBackShort => {
                let back = rd_u8!();
                let target = (cursor.pos as i64) - (back as i64);
                if target >= 0 && target as u32 == start {
                    maybe_insert_safepoint(&mut program);
                    program.push(IRInstr {
                        opcode: IROpcode::LoopBack,
                        value_kind: ValueKind::Boxed,
                        bytecode_offset: instr_offset,
                        operands: Operands::LoopBack,
                    });
                    break;
                }
                bail!(TranslateStatus::UnsupportedLoopShape, ValueKind::Boxed);
            }

            Opcode::LoopShort => {
                let back = rd_u8!();
                let target = (cursor.pos as i64) - (back as i64);
                if target >= 0 && target as u32 == start {
                    maybe_insert_safepoint(&mut program);
                    program.push(IRInstr {
                        opcode: IROpcode::LoopBack,
                        value_kind: ValueKind::Boxed,
                        bytecode_offset: instr_offset,
                        operands: Operands::LoopBack,
                    });
                    break;
                }
                bail!(TranslateStatus::UnsupportedLoopShape, ValueKind::Boxed);
            }

            Opcode::JumpIfNotShort => {
                let pred = rd_u8!();
                let disp = rd_u8!();
                program.push(IRInstr {
                    opcode: IROpcode::JumpIfNotShort,
                    value_kind: ValueKind::Bool,
                    bytecode_offset: instr_offset,
                    operands: Operands::JumpIfNot {
                        pred,
                        disp: disp as i32,
                    },
                });
            }

            Opcode::JumpIfNotR => {
                let pred = rd_u8!();
                let disp = rd_u16!();
                // ambiguity: disp > 255 fails UnsupportedLoopShape with kind Bool, preserved verbatim.
                if disp > 255 {
                    bail!(TranslateStatus::UnsupportedLoopShape, ValueKind::Bool);
                }
                program.push(IRInstr {
                    opcode: IROpcode::JumpIfNotShort,
                    value_kind: ValueKind::Bool,
                    bytecode_offset: instr_offset,
                    operands: Operands::JumpIfNot {
                        pred,
                        disp: disp as i32,
                    },
                });
            }

            Opcode::BranchTyped => {
                let _ignored_a = rd_u8!();
                let _ignored_b = rd_u8!();
                let pred = rd_u8!();
                let disp = rd_u16!();
                if disp > 255 {
                    bail!(TranslateStatus::UnsupportedLoopShape, ValueKind::Bool);
                }
                program.push(IRInstr {
                    opcode: IROpcode::JumpIfNotShort,
                    value_kind: ValueKind::Bool,
                    bytecode_offset: instr_offset,
                    operands: Operands::JumpIfNot {
                        pred,
                        disp: disp as i32,
                    },
                });
            }

            Opcode::IncCmpJmp | Opcode::DecCmpJmp => {
                let counter = rd_u8!();
                let limit = rd_u8!();
                let disp = rd_i16!();
                let counter_kind = reg_kinds.get(counter);
                let limit_kind = reg_kinds.get(limit);
                let kind = match unify_integer_kind(counter_kind, limit_kind) {
                    Some(kind) => kind,
                    None => bail!(TranslateStatus::UnsupportedValueKind, ValueKind::Boxed),
                };
                require_kind!(kind, instr_offset);
                reg_kinds.set(counter, kind);
                let step = if matches!(opcode, Opcode::IncCmpJmp) {
                    Step::Increment
                } else {
                    Step::Decrement
                };
                program.push(IRInstr {
                    opcode: IROpcode::FusedLoop,
                    value_kind: kind,
                    bytecode_offset: instr_offset,
                    operands: Operands::FusedLoop {
                        counter,
                        limit,
                        disp: disp as i32,
                        step,
                        kind,
                    },
                });
            }

            Opcode::ReturnVoid => {
                program.push(IRInstr {
                    opcode: IROpcode::Return,
                    value_kind: ValueKind::Boxed,
                    bytecode_offset: instr_offset,
                    operands: Operands::Return { value: None },
                });
                break;
            }

            Opcode::ReturnR => {
                let reg = rd_u8!();
                program.push(IRInstr {
                    opcode: IROpcode::Return,
                    value_kind: reg_kinds.get(reg),
                    bytecode_offset: instr_offset,
                    operands: Operands::Return { value: Some(reg) },
                });
                break;
            }

            Opcode::RangeR => {
                let dst = rd_u8!();
                let argc = rd_u8!();
                if !(1..=3).contains(&argc) {
                    bail!(TranslateStatus::InvalidInput, ValueKind::Boxed);
                }
                let mut args = [0u8; 3];
                for slot in args.iter_mut().take(argc as usize) {
                    *slot = rd_u8!();
                }
                iter_kinds.set(dst, IteratorKind::Range);
                reg_kinds.set(dst, ValueKind::Boxed);
                program.push(IRInstr {
                    opcode: IROpcode::Range,
                    value_kind: ValueKind::Boxed,
                    bytecode_offset: instr_offset,
                    operands: Operands::Range { dst, args, argc },
                });
            }

            Opcode::GetIterR => {
                let dst = rd_u8!();
                let src = rd_u8!();
                let derived = match iter_kinds.get(src) {
                    IteratorKind::Range => IteratorKind::Range,
                    _ if is_integer_kind(reg_kinds.get(src)) => IteratorKind::Range,
                    _ => IteratorKind::Generic,
                };
                iter_kinds.set(dst, derived);
                program.push(IRInstr {
                    opcode: IROpcode::GetIter,
                    value_kind: ValueKind::Boxed,
                    bytecode_offset: instr_offset,
                    operands: Operands::GetIter { dst, src },
                });
            }

            Opcode::IterNextR => {
                let value = rd_u8!();
                let iter = rd_u8!();
                let has_value = rd_u8!();
                let value_kind = match iter_kinds.get(iter) {
                    IteratorKind::Range => ValueKind::I64,
                    _ => ValueKind::Boxed,
                };
                reg_kinds.set(value, value_kind);
                reg_kinds.set(has_value, ValueKind::Bool);
                program.push(IRInstr {
                    opcode: IROpcode::IterNext,
                    value_kind,
                    bytecode_offset: instr_offset,
                    operands: Operands::IterNext {
                        value,
                        iter,
                        has_value,
                    },
                });
            }

            Opcode::ArrayPushR => {
                let array = rd_u8!();
                let value = rd_u8!();
                program.push(IRInstr {
                    opcode: IROpcode::ArrayPush,
                    value_kind: reg_kinds.get(value),
                    bytecode_offset: instr_offset,
                    operands: Operands::ArrayPush { array, value },
                });
            }

            Opcode::PrintR => {
                let value = rd_u8!();
                program.push(IRInstr {
                    opcode: IROpcode::Print,
                    value_kind: reg_kinds.get(value),
                    bytecode_offset: instr_offset,
                    operands: Operands::Print {
                        first: value,
                        argc: None,
                    },
                });
            }

            Opcode::PrintMultiR => {
                let first = rd_u8!();
                let argc = rd_u8!();
                program.push(IRInstr {
                    opcode: IROpcode::Print,
                    value_kind: ValueKind::Boxed,
                    bytecode_offset: instr_offset,
                    operands: Operands::Print {
                        first,
                        argc: Some(argc),
                    },
                });
            }

            Opcode::AssertEqR => {
                let dst = rd_u8!();
                let label = rd_u16!();
                let actual = rd_u8!();
                let expected = rd_u8!();
                reg_kinds.set(dst, ValueKind::Bool);
                program.push(IRInstr {
                    opcode: IROpcode::AssertEq,
                    value_kind: ValueKind::Bool,
                    bytecode_offset: instr_offset,
                    operands: Operands::AssertEq {
                        dst,
                        label,
                        actual,
                        expected,
                    },
                });
            }

            Opcode::ConcatR => {
                let dst = rd_u8!();
                let lhs = rd_u8!();
                let rhs = rd_u8!();
                let lhs_kind = reg_kinds.get(lhs);
                let rhs_kind = reg_kinds.get(rhs);
                if lhs_kind != ValueKind::String && lhs_kind != ValueKind::Boxed {
                    bail!(TranslateStatus::UnsupportedValueKind, lhs_kind);
                }
                if rhs_kind != ValueKind::String && rhs_kind != ValueKind::Boxed {
                    bail!(TranslateStatus::UnsupportedValueKind, rhs_kind);
                }
                require_kind!(ValueKind::String, instr_offset);
                reg_kinds.set(dst, ValueKind::String);
                program.push(IRInstr {
                    opcode: IROpcode::ConcatString,
                    value_kind: ValueKind::String,
                    bytecode_offset: instr_offset,
                    operands: Operands::Binary { dst, lhs, rhs },
                });
            }

            Opcode::ToStringR => {
                let dst = rd_u8!();
                let src = rd_u8!();
                require_kind!(ValueKind::String, instr_offset);
                reg_kinds.set(dst, ValueKind::String);
                program.push(IRInstr {
                    opcode: IROpcode::ToString,
                    value_kind: ValueKind::String,
                    bytecode_offset: instr_offset,
                    operands: Operands::Unary { dst, src },
                });
            }

            Opcode::I32ToI64R | Opcode::U32ToU64R | Opcode::U32ToI32R => {
                let dst = rd_u8!();
                let src = rd_u8!();
                let _ignored = rd_u8!();
                let (ir_op, kind) = match opcode {
                    Opcode::I32ToI64R => (IROpcode::ConvertI32ToI64, ValueKind::I64),
                    Opcode::U32ToU64R => (IROpcode::ConvertU32ToU64, ValueKind::U64),
                    _ => (IROpcode::ConvertU32ToI32, ValueKind::I32),
                };
                require_kind!(kind, instr_offset);
                reg_kinds.set(dst, kind);
                program.push(IRInstr {
                    opcode: ir_op,
                    value_kind: kind,
                    bytecode_offset: instr_offset,
                    operands: Operands::Unary { dst, src },
                });
            }

            Opcode::TimeStamp => {
                let dst = rd_u8!();
                reg_kinds.set(dst, ValueKind::F64);
                program.push(IRInstr {
                    opcode: IROpcode::TimeStamp,
                    value_kind: ValueKind::F64,
                    bytecode_offset: instr_offset,
                    operands: Operands::TimeStamp { dst },
                });
            }

            Opcode::CallNativeR => {
                let native_idx = rd_u16!();
                let first_arg = rd_u8!();
                let argc = rd_u8!();
                let dst = rd_u8!();
                reg_kinds.set(dst, ValueKind::Boxed);
                program.push(IRInstr {
                    opcode: IROpcode::CallNative,
                    value_kind: ValueKind::Boxed,
                    bytecode_offset: instr_offset,
                    operands: Operands::CallNative {
                        native_idx,
                        first_arg,
                        argc,
                        dst,
                    },
                });
            }
        }

        maybe_insert_periodic_safepoint(&mut program);
        last_kind = program
            .instructions
            .last()
            .map(|i| i.value_kind)
            .unwrap_or(ValueKind::Boxed);

        if program.has_terminator() {
            break;
        }
    }

    if !program.has_terminator() {
        program.push(IRInstr {
            opcode: IROpcode::Return,
            value_kind: ValueKind::Boxed,
            bytecode_offset: cursor.offset(),
            operands: Operands::Return { value: None },
        });
    }

    program.loop_end_offset = cursor.offset();

    Ok((
        program,
        TranslateSummary {
            last_opcode,
            last_kind,
            last_offset: cursor.offset(),
        },
    ))
}

fn maybe_insert_safepoint(program: &mut IRProgram<'_>) {
    if program.non_control_since_last_safepoint() > 0 {
        program.push(IRInstr {
            opcode: IROpcode::Safepoint,
            value_kind: ValueKind::Boxed,
            bytecode_offset: program.loop_end_offset,
            operands: Operands::Safepoint,
        });
    }
}

fn maybe_insert_periodic_safepoint(program: &mut IRProgram<'_>) {
    if program.non_control_since_last_safepoint() >= SAFEPOINT_INTERVAL {
        program.push(IRInstr {
            opcode: IROpcode::Safepoint,
            value_kind: ValueKind::Boxed,
            bytecode_offset: program.loop_end_offset,
            operands: Operands::Safepoint,
        });
    }
}

fn is_integer_kind(kind: ValueKind) -> bool {
    matches!(kind, ValueKind::I32 | ValueKind::I64 | ValueKind::U32 | ValueKind::U64)
}

fn unify_integer_kind(a: ValueKind, b: ValueKind) -> Option<ValueKind> {
    match (a, b) {
        (x, ValueKind::Boxed) if is_integer_kind(x) => Some(x),
        (ValueKind::Boxed, y) if is_integer_kind(y) => Some(y),
        (x, y) if x == y && is_integer_kind(x) => Some(x),
        (ValueKind::Boxed, ValueKind::Boxed) => Some(ValueKind::I32),
        _ => None,
    }
}

fn arith_kind_and_op(op: Opcode) -> (ValueKind, ArithOp) {
    use Opcode::*;
    match op {
        AddI32Typed => (ValueKind::I32, ArithOp::Add),
        SubI32Typed => (ValueKind::I32, ArithOp::Sub),
        MulI32Typed => (ValueKind::I32, ArithOp::Mul),
        DivI32Typed => (ValueKind::I32, ArithOp::Div),
        ModI32Typed => (ValueKind::I32, ArithOp::Mod),
        AddI64Typed => (ValueKind::I64, ArithOp::Add),
        SubI64Typed => (ValueKind::I64, ArithOp::Sub),
        MulI64Typed => (ValueKind::I64, ArithOp::Mul),
        AddU32Typed => (ValueKind::U32, ArithOp::Add),
        SubU32Typed => (ValueKind::U32, ArithOp::Sub),
        MulU32Typed => (ValueKind::U32, ArithOp::Mul),
        AddU64Typed => (ValueKind::U64, ArithOp::Add),
        SubU64Typed => (ValueKind::U64, ArithOp::Sub),
        MulU64Typed => (ValueKind::U64, ArithOp::Mul),
        AddF64Typed => (ValueKind::F64, ArithOp::Add),
        SubF64Typed => (ValueKind::F64, ArithOp::Sub),
        MulF64Typed => (ValueKind::F64, ArithOp::Mul),
        DivF64Typed => (ValueKind::F64, ArithOp::Div),
        ModF64Typed => (ValueKind::F64, ArithOp::Mod),
        _ => unreachable!("not an arithmetic opcode"),
    }
}

fn compare_kind_and_op(op: Opcode) -> (ValueKind, CompareOp) {
    use Opcode::*;
    match op {
        LtI32Typed => (ValueKind::I32, CompareOp::Lt),
        LeI32Typed => (ValueKind::I32, CompareOp::Le),
        GtI32Typed => (ValueKind::I32, CompareOp::Gt),
        GeI32Typed => (ValueKind::I32, CompareOp::Ge),
        LtF64Typed => (ValueKind::F64, CompareOp::Lt),
        LeF64Typed => (ValueKind::F64, CompareOp::Le),
        GtF64Typed => (ValueKind::F64, CompareOp::Gt),
        GeF64Typed => (ValueKind::F64, CompareOp::Ge),
        _ => unreachable!("not a compare opcode"),
    }
}

/// Ring buffer of translation failures plus reason/kind histograms (/// TranslationFailureLog, "failure log round-trip"). Bounded by
/// `capacity`; the oldest record is dropped on overflow, but the running
/// totals and histograms never forget what they counted.
pub struct FailureLog {
    capacity: usize,
    records: VecDeque<TranslationFailureRecord>,
    total_failures: u64,
    reason_counts: HashMap<TranslateStatus, u64>,
    kind_counts: HashMap<ValueKind, u64>,
}

impl FailureLog {
    /// Creates an empty log holding at most `capacity` records at once.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity.min(1024)),
            total_failures: 0,
            reason_counts: HashMap::new(),
            kind_counts: HashMap::new(),
        }
    }

    /// Appends a failure, dropping the oldest record if the ring is full.
    /// The running totals and histograms count every failure ever pushed,
    /// not just the ones still in the ring.
    pub fn push(&mut self, record: TranslationFailureRecord) {
        self.total_failures += 1;
        *self.reason_counts.entry(record.status).or_insert(0) += 1;
        *self.kind_counts.entry(record.value_kind).or_insert(0) += 1;
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Total number of failures ever pushed, including ones since evicted
    /// from the ring.
    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    /// Records currently retained in the ring, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &TranslationFailureRecord> {
        self.records.iter()
    }

    /// How many failures of this status have ever been pushed.
    pub fn reason_count(&self, status: TranslateStatus) -> u64 {
        *self.reason_counts.get(&status).unwrap_or(&0)
    }

    /// How many failures carrying this value kind have ever been pushed.
    pub fn kind_count(&self, kind: ValueKind) -> u64 {
        *self.kind_counts.get(&kind).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkBuilder;

    fn counted_loop_chunk(disp: i16) -> Chunk {
        let mut b = ChunkBuilder::new();
        let zero = b.add_constant(Value::I32(0));
        let limit = b.add_constant(Value::I32(1_000_000));
        b.op(Opcode::LoadI32Const).u8(0).u16(zero);
        b.op(Opcode::LoadI32Const).u8(1).u16(limit);
        b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(disp);
        b.op(Opcode::ReturnVoid);
        b.finish()
    }

    #[test]
    fn tight_counted_loop_translates_with_fused_loop_and_loop_back() {
        let chunk = counted_loop_chunk(-6);
        let (program, summary) =
            translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).expect("translate ok");
        assert!(program
            .instructions
            .iter()
            .any(|i| i.opcode == IROpcode::FusedLoop));
        assert_eq!(program.instructions.last().unwrap().opcode, IROpcode::LoopBack);
        assert_eq!(summary.last_kind, ValueKind::Boxed);
    }

    #[test]
    fn rollout_gate_blocks_i64_counter_at_i32_only_stage() {
        let mut b = ChunkBuilder::new();
        let zero = b.add_constant(Value::I64(0));
        let limit = b.add_constant(Value::I64(1_000_000));
        b.op(Opcode::LoadI64Const).u8(0).u16(zero);
        b.op(Opcode::LoadI64Const).u8(1).u16(limit);
        b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();

        let err = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap_err();
        assert_eq!(err.0, TranslateStatus::RolloutDisabled);
        assert_eq!(err.1.value_kind, ValueKind::I64);
        assert!(err.0.is_blocklisting());
    }

    #[test]
    fn truncated_load_const_is_invalid_input_not_blocklisting() {
        let mut b = ChunkBuilder::new();
        b.op(Opcode::LoadConst).u8(0);
        // Missing the 2-byte constant index entirely.
        let chunk = b.finish();

        let err = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap_err();
        assert_eq!(err.0, TranslateStatus::InvalidInput);
        assert!(!err.0.is_blocklisting());
    }

    #[test]
    fn loop_back_to_wrong_offset_is_unsupported_loop_shape() {
        let mut b = ChunkBuilder::new();
        b.op(Opcode::LoadI32Const).u8(0).u16(0);
        // Nop-like self jump target is off by one from loop_start (offset 0): back=1 means target=cursor-1
        b.op(Opcode::JumpBackShort).u8(1);
        b.op(Opcode::ReturnVoid);
        let mut chunk = b.finish();
        chunk.constants.push(Value::I32(0));
        let err = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap_err();
        assert_eq!(err.0, TranslateStatus::UnsupportedLoopShape);
    }

    #[test]
    fn jump_if_not_r_with_large_displacement_fails_with_bool_kind() {
        let mut b = ChunkBuilder::new();
        b.op(Opcode::JumpIfNotR).u8(0).u16(1000);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();
        let err = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap_err();
        assert_eq!(err.0, TranslateStatus::UnsupportedLoopShape);
        assert_eq!(err.1.value_kind, ValueKind::Bool);
    }

    #[test]
    fn safepoint_is_inserted_every_twelve_non_control_ops() {
        let mut b = ChunkBuilder::new();
        let c = b.add_constant(Value::I32(1));
        for i in 0..20u8 {
            b.op(Opcode::LoadI32Const).u8(i % 4).u16(c);
        }
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();
        let (program, _) = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap();

        let mut run = 0usize;
        for instr in &program.instructions {
            if instr.opcode == IROpcode::Safepoint {
                assert!(run <= SAFEPOINT_INTERVAL);
                run = 0;
            } else if !instr.is_control() {
                run += 1;
            }
        }
    }

    #[test]
    fn concat_requires_string_operands() {
        let mut b = ChunkBuilder::new();
        let c = b.add_constant(Value::I32(1));
        b.op(Opcode::LoadI32Const).u8(0).u16(c);
        b.op(Opcode::ConcatR).u8(2).u8(0).u8(1);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();
        let err = translate(&chunk, 0, 0, 0, 0, RolloutStage::Strings).unwrap_err();
        assert_eq!(err.0, TranslateStatus::UnsupportedValueKind);
    }

    fn failure_record(status: TranslateStatus, offset: u32) -> TranslationFailureRecord {
        TranslationFailureRecord {
            status,
            opcode: 0,
            value_kind: ValueKind::I32,
            bytecode_offset: offset,
            function_index: 0,
            loop_index: 0,
        }
    }

    #[test]
    fn failure_log_evicts_oldest_past_capacity_but_keeps_true_totals() {
        let mut log = FailureLog::new(2);
        for i in 0..5u32 {
            log.push(failure_record(TranslateStatus::InvalidInput, i));
        }
        assert_eq!(log.total_failures, 5);
        assert_eq!(log.reason_count(TranslateStatus::InvalidInput), 5);
        let kept: Vec<u32> = log.records.iter().map(|r| r.bytecode_offset).collect();
        assert_eq!(kept, vec![3, 4]);
    }

    #[test]
    fn failure_log_histograms_split_by_status_and_kind() {
        let mut log = FailureLog::new(16);
        log.push(failure_record(TranslateStatus::RolloutDisabled, 0));
        log.push(failure_record(TranslateStatus::RolloutDisabled, 4));
        log.push(failure_record(TranslateStatus::UnhandledOpcode, 8));
        assert_eq!(log.reason_count(TranslateStatus::RolloutDisabled), 2);
        assert_eq!(log.reason_count(TranslateStatus::UnhandledOpcode), 1);
        assert_eq!(log.reason_count(TranslateStatus::InvalidInput), 0);
        assert_eq!(log.kind_count(ValueKind::I32), 3);
    }
}
