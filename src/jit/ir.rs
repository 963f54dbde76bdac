//! IR model (IR Program, IR Instruction, ValueKind, RolloutStage).
//!
//! Grounded on the reference JIT's SSA-ish `JitInstr`/`JitFunction` pair in
//! `jit/ir/{instr,types,builder}.rs`, but the Orus IR is linear rather than a
//! basic-block graph: the translator never follows a branch, so there
//! is exactly one block, one entry, one exit, and no phi nodes.

use crate::chunk::Chunk;

/// A value kind tracked per register during translation and carried by each
/// IR instruction (ValueKind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit unsigned integer.
    U64,
    /// 64-bit float.
    F64,
    /// Boolean.
    Bool,
    /// Heap string.
    String,
    /// Unknown/heterogeneous — always permitted by the rollout mask, always
    /// routed through the boxed register path.
    Boxed,
}

impl ValueKind {
    /// Bit position of this kind within a [`KindMask`].
    fn bit(self) -> u8 {
        match self {
            ValueKind::I32 => 0,
            ValueKind::I64 => 1,
            ValueKind::U32 => 2,
            ValueKind::U64 => 3,
            ValueKind::F64 => 4,
            ValueKind::Bool => 5,
            ValueKind::String => 6,
            ValueKind::Boxed => 7,
        }
    }
}



/// A bitset over [`ValueKind`], used as the rollout stage's `enabled_kind_mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KindMask(u8);

impl KindMask {
    /// An empty mask (nothing but `Boxed` is ever permitted regardless).
    pub const EMPTY: KindMask = KindMask(0);

    /// Build a mask from an explicit list of kinds.
    pub fn of(kinds: &[ValueKind]) -> Self {
        let mut mask = 0u8;
        for k in kinds {
            mask |= 1 << k.bit();
        }
        KindMask(mask)
    }

    /// Whether `kind` is permitted. `Boxed` is always permitted (Rollout enforcement).
    pub fn allows(self, kind: ValueKind) -> bool {
        kind == ValueKind::Boxed || (self.0 & (1 << kind.bit())) != 0
    }

    /// Union two masks.
    pub fn union(self, other: KindMask) -> KindMask {
        KindMask(self.0 | other.0)
    }
}

/// Ordered rollout stages gating which value kinds the translator may emit
/// non-`Boxed` IR for (RolloutStage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RolloutStage {
    /// Only `I32` (and always `Boxed`) is enabled.
    I32Only,
    /// `I32`, `I64`, `U32`, `U64`.
    WideInts,
    /// Adds `F64`.
    Floats,
    /// Adds `String`.
    Strings,
}

impl RolloutStage {
    /// The kind mask this stage enables, cumulative over earlier stages.
    pub fn enabled_kind_mask(self) -> KindMask {
        use ValueKind::*;
        match self {
            RolloutStage::I32Only => KindMask::of(&[I32, Bool]),
            RolloutStage::WideInts => KindMask::of(&[I32, I64, U32, U64, Bool]),
            RolloutStage::Floats => KindMask::of(&[I32, I64, U32, U64, F64, Bool]),
            RolloutStage::Strings => KindMask::of(&[I32, I64, U32, U64, F64, Bool, String]),
        }
    }
}

/// Step direction for a fused loop instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Counter increases; fused with a `<` compare.
    Increment,
    /// Counter decreases; fused with a `>` compare.
    Decrement,
}

/// Operand payload for each [`IROpcode`] (IR Instruction operands union).
#[derive(Debug, Clone, PartialEq)]
pub enum Operands {
    /// `dst`, constant payload bit-cast to `u64` (f64 bits, or a constant-pool index for strings).
    LoadConst { dst: u8, bits: u64, constant_index: u16 },
    /// `dst`, `src`.
    Move { dst: u8, src: u8 },
    /// `dst`, `lhs`, `rhs`.
    Binary { dst: u8, lhs: u8, rhs: u8 },
    /// `dst`, `src`.
    Unary { dst: u8, src: u8 },
    /// Raw displacement, not resolved within the IR.
    Jump { disp: i32 },
    /// Predicate register, raw displacement.
    JumpIfNot { pred: u8, disp: i32 },
    /// No operands; the only control edge that stays inside the compiled block.
    LoopBack,
    /// Fused counted-loop increment/compare/branch.
    FusedLoop {
        counter: u8,
        limit: u8,
        disp: i32,
        step: Step,
        kind: ValueKind,
    },
    /// `dst`, up to 3 argument registers, argument count.
    Range { dst: u8, args: [u8; 3], argc: u8 },
    /// `dst`, `src`.
    GetIter { dst: u8, src: u8 },
    /// value register, iterator register, has-value register.
    IterNext { value: u8, iter: u8, has_value: u8 },
    /// array register, value register.
    ArrayPush { array: u8, value: u8 },
    /// first argument register, argument count (`None` means single-value print).
    Print { first: u8, argc: Option<u8> },
    /// `dst`, label constant index, actual register, expected register.
    AssertEq { dst: u8, label: u16, actual: u8, expected: u8 },
    /// native function index, first argument register, argument count, destination.
    CallNative { native_idx: u16, first_arg: u8, argc: u8, dst: u8 },
    /// `dst`.
    TimeStamp { dst: u8 },
    /// Optional return value register.
    Return { value: Option<u8> },
    /// No operands.
    Safepoint,
}

/// IR opcode categories (IR Instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IROpcode {
    /// Load a typed or string constant.
    LoadConst,
    /// Move between registers, kind carried on the instruction.
    Move,
    /// Binary arithmetic: `+ - * / %`.
    Arithmetic(ArithOp),
    /// Binary comparison: `< <= > >= == !=`, result is always `Bool`.
    Compare(CompareOp),
    /// `i32 -> i64`.
    ConvertI32ToI64,
    /// `u32 -> u64`.
    ConvertU32ToU64,
    /// `u32 -> i32`.
    ConvertU32ToI32,
    /// Boxed-value stringification.
    ToString,
    /// String concatenation.
    ConcatString,
    /// Unconditional forward jump, out of the compiled block.
    JumpShort,
    /// Unconditional backward jump that is not the recognized loop-back.
    JumpBackShort,
    /// Conditional forward jump, out of the compiled block.
    JumpIfNotShort,
    /// The recognized loop self-branch; the only edge that stays compiled.
    LoopBack,
    /// Fused increment/decrement + compare + branch.
    FusedLoop,
    /// Produce a range iterator.
    Range,
    /// Derive/inherit an iterator from a source register.
    GetIter,
    /// Advance an iterator, producing `(value, has_value)`.
    IterNext,
    /// Append to an array (effectful, safepoint-bearing).
    ArrayPush,
    /// Print one or more registers (effectful, safepoint-bearing).
    Print,
    /// Runtime assertion (produces `Bool`).
    AssertEq,
    /// Call a builtin/native function (effectful, safepoint-bearing).
    CallNative,
    /// Read the monotonic clock.
    TimeStamp,
    /// GC/profiler cooperation point.
    Safepoint,
    /// Terminate the compiled block.
    Return,
}

/// Integer/float arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

/// Comparison operator; every [`IROpcode::Compare`] produces `ValueKind::Bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// One IR instruction: opcode, tracked value kind, source offset, operands.
#[derive(Debug, Clone, PartialEq)]
pub struct IRInstr {
    /// Which operation this is.
    pub opcode: IROpcode,
    /// The value kind in play (operand kind for most ops, result kind for compares/asserts).
    pub value_kind: ValueKind,
    /// Byte offset in the source chunk this instruction was translated from.
    pub bytecode_offset: u32,
    /// Opcode-specific operand payload.
    pub operands: Operands,
}

impl IRInstr {
    /// Whether this instruction is a control-flow op (affects the
    /// every-12-instructions safepoint cadence, which only counts
    /// *non-control* ops).
    pub fn is_control(&self) -> bool {
        matches!(
            self.opcode,
            IROpcode::JumpShort
                | IROpcode::JumpBackShort
                | IROpcode::JumpIfNotShort
                | IROpcode::LoopBack
                | IROpcode::FusedLoop
                | IROpcode::Return
                | IROpcode::Safepoint
        )
    }

    /// Whether this instruction may invoke a runtime helper that can in turn
    /// reach a safepoint (`CallNative`, `Print`, `IterNext`, and
    /// helper-stub ops are safepoint-bearing).
    pub fn is_safepoint_bearing(&self) -> bool {
        matches!(
            self.opcode,
            IROpcode::CallNative | IROpcode::Print | IROpcode::IterNext | IROpcode::Safepoint
        )
    }
}

/// An owned copy of a translated loop body, detached from the source
/// chunk's lifetime (NativeBlock).
///
/// The reference design keeps `NativeBlock` on a global linked list holding
/// its own `IRProgram`; the redesign note points out there is no reason for
/// that list to be global once the cache already indexes by `(func, loop)`.
/// This crate follows that note: a `NativeBlock` lives directly inside the
/// [`super::cache::JitEntry`] it backs. It only owns the instruction stream,
/// not the chunk — the chunk itself outlives every entry translated from it
/// for as long as the owning function is registered, so callers pass it back
/// in at replay time instead of duplicating it per entry.
#[derive(Debug, Clone)]
pub struct NativeBlock {
    /// Instructions copied out of the [`IRProgram`] that produced this entry.
    pub instructions: Vec<IRInstr>,
    /// Function this block belongs to.
    pub function_index: u16,
    /// Loop within the function this block belongs to.
    pub loop_index: u16,
    /// Byte offset of the recognized loop header.
    pub loop_start_offset: u32,
    /// Byte offset one past the last instruction translated.
    pub loop_end_offset: u32,
}

impl Default for NativeBlock {
    fn default() -> Self {
        Self {
            instructions: Vec::new(),
            function_index: 0,
            loop_index: 0,
            loop_start_offset: 0,
            loop_end_offset: 0,
        }
    }
}

impl<'a> From<&IRProgram<'a>> for NativeBlock {
    fn from(program: &IRProgram<'a>) -> Self {
        Self {
            instructions: program.instructions.clone(),
            function_index: program.function_index,
            loop_index: program.loop_index,
            loop_start_offset: program.loop_start_offset,
            loop_end_offset: program.loop_end_offset,
        }
    }
}

/// A linear, single-entry, single-exit IR program translated from a loop
/// body (IR Program).
#[derive(Debug, Clone)]
pub struct IRProgram<'a> {
    /// Instructions in emission order.
    pub instructions: Vec<IRInstr>,
    /// The chunk this program was translated from.
    pub source_chunk: &'a Chunk,
    /// Index of the function this loop belongs to.
    pub function_index: u16,
    /// Index of the loop within the function (as assigned by the profiler sample).
    pub loop_index: u16,
    /// Byte offset of the recognized loop header.
    pub loop_start_offset: u32,
    /// Byte offset one past the last instruction translated.
    pub loop_end_offset: u32,
}

impl<'a> IRProgram<'a> {
    /// Start an empty program rooted at `loop_start_offset`.
    pub fn new(
        source_chunk: &'a Chunk,
        function_index: u16,
        loop_index: u16,
        loop_start_offset: u32,
    ) -> Self {
        Self {
            instructions: Vec::new(),
            source_chunk,
            function_index,
            loop_index,
            loop_start_offset,
            loop_end_offset: loop_start_offset,
        }
    }

    /// Append an instruction.
    pub fn push(&mut self, instr: IRInstr) {
        self.instructions.push(instr);
    }

    /// Number of non-control instructions emitted since the last [`IROpcode::Safepoint`].
    pub fn non_control_since_last_safepoint(&self) -> usize {
        self.instructions
            .iter()
            .rev()
            .take_while(|i| i.opcode != IROpcode::Safepoint)
            .filter(|i| !i.is_control())
            .count()
    }

    /// Whether the program's last instruction is a terminator (`Return` or `LoopBack`).
    pub fn has_terminator(&self) -> bool {
        matches!(
            self.instructions.last().map(|i| i.opcode),
            Some(IROpcode::Return) | Some(IROpcode::LoopBack)
        )
    }
}
