//! Direct x86-64 emitter.
//!
//! Fixed register convention for every compiled block, loaded by the
//! trampoline before entry and never reassigned within the block:
//!
//! | register | holds |
//! |---|---|
//! | `r12` | pointer to the VM |
//! | `r13` | pointer to the typed register bank struct |
//! | `r14` | cached `i32_regs` base pointer (the hot integer path) |
//! | `r15` | cached `reg_types` base pointer |
//! | `rbx` | pointer to this call's `NativeBlock` (deopt/bailout metadata) |
//!
//! This emitter covers the `I32`/`Bool` rollout stage directly — the
//! overwhelmingly common hot-loop shape (scenario: tight counted loop) —
//! and reports [`CodegenError::UnsupportedInstruction`] for every wider kind,
//! exactly as the reference `StubBackend` exists to cover what its real
//! backend doesn't: those IR programs fall back to the helper-stub emitter
//! rather than getting a half-correct direct encoding.

use super::{CodegenError, CompiledCode, NativeBackend, TargetArch};
use crate::jit::ir::{ArithOp, CompareOp, IROpcode, IRInstr, IRProgram, Operands, ValueKind};

/// Minimal x86-64 byte-stream assembler: no label resolution beyond what the
/// fixed two-pass loop-back/bailout scheme below needs.
#[derive(Default)]
struct Asm {
    bytes: Vec<u8>,
}

impl Asm {
    fn push(&mut self, b: u8) {
        self.bytes.push(b);
    }

    fn push_slice(&mut self, bs: &[u8]) {
        self.bytes.extend_from_slice(bs);
    }

    fn pos(&self) -> usize {
        self.bytes.len()
    }

    fn rex(&mut self, w: bool, r: bool, x: bool, b: bool) {
        let byte = 0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8);
        self.push(byte);
    }

    fn modrm(&mut self, md: u8, reg: u8, rm: u8) {
        self.push((md << 6) | ((reg & 7) << 3) | (rm & 7));
    }

    /// `mov eax, dword [r14 + idx*4]` — the i32 hot-path load.
    fn load_i32(&mut self, dst_is_ecx: bool, idx: u8) {
        // REX.B because base register r14 is extended; reg field selects eax(0)/ecx(1).
        self.rex(false, false, false, true);
        self.push(0x8B);
        self.modrm(0b01, if dst_is_ecx { 1 } else { 0 }, 0b110); // [r14 + disp8], disp8 below
        self.push((idx as i32 * 4) as u8);
    }

    /// `mov dword [r14 + idx*4], eax`
    fn store_i32(&mut self, src_is_ecx: bool, idx: u8) {
        self.rex(false, false, false, true);
        self.push(0x89);
        self.modrm(0b01, if src_is_ecx { 1 } else { 0 }, 0b110);
        self.push((idx as i32 * 4) as u8);
    }

    fn mov_eax_imm32(&mut self, imm: u32) {
        self.push(0xB8);
        self.push_slice(&imm.to_le_bytes());
    }

    fn add_eax_ecx(&mut self) {
        self.push(0x01);
        self.modrm(0b11, 1, 0); // add eax, ecx (reg=ecx src, rm=eax dst per ADD r/m32, r32)
    }

    fn sub_eax_ecx(&mut self) {
        self.push(0x29);
        self.modrm(0b11, 1, 0);
    }

    fn imul_eax_ecx(&mut self) {
        self.push(0x0F);
        self.push(0xAF);
        self.modrm(0b11, 0, 1); // imul eax, ecx
    }

    fn cmp_eax_ecx(&mut self) {
        self.push(0x39);
        self.modrm(0b11, 1, 0);
    }

    /// `setCC al` then `movzx eax, al` to produce a 0/1 bool in eax.
    fn setcc_al(&mut self, cc: u8) {
        self.push(0x0F);
        self.push(0x90 | cc);
        self.modrm(0b11, 0, 0);
        self.push(0x0F);
        self.push(0xB6);
        self.modrm(0b11, 0, 0);
    }

    /// `jcc rel8` with a placeholder displacement; returns the patch site.
    fn jcc8(&mut self, cc: u8) -> usize {
        self.push(0x70 | cc);
        self.push(0x00);
        self.pos()
    }

    fn jmp8(&mut self) -> usize {
        self.push(0xEB);
        self.push(0x00);
        self.pos()
    }

    fn patch_rel8(&mut self, patch_site: usize, target: usize) {
        let rel = target as i64 - patch_site as i64;
        self.bytes[patch_site - 1] = rel as i8 as u8;
    }

    /// `inc eax` / `dec eax` (FF /0, FF /1).
    fn inc_or_dec_eax(&mut self, increment: bool) {
        self.push(0xFF);
        self.modrm(0b11, if increment { 0 } else { 1 }, 0);
    }

    fn ret(&mut self) {
        self.push(0xC3);
    }

    /// `call rbx + offsetof(NativeBlock, safepoint_helper)` placeholder: in
    /// this crate's narrowed scope (no real runtime to link against) the
    /// safepoint just becomes a no-op marker byte so the instruction stream
    /// stays position-accurate for offset-based tests.
    fn safepoint_marker(&mut self) {
        self.push(0x90); // nop
    }
}

const CC_L: u8 = 0xC; // less
const CC_LE: u8 = 0xE;
const CC_G: u8 = 0xF;
const CC_GE: u8 = 0xD;
const CC_E: u8 = 0x4;
const CC_NE: u8 = 0x5;

fn compare_cc(op: CompareOp) -> u8 {
    match op {
        CompareOp::Lt => CC_L,
        CompareOp::Le => CC_LE,
        CompareOp::Gt => CC_G,
        CompareOp::Ge => CC_GE,
        CompareOp::Eq => CC_E,
        CompareOp::Ne => CC_NE,
    }
}

/// Direct x86-64 backend.
pub struct X86_64Backend;

impl NativeBackend for X86_64Backend {
    fn name(&self) -> &str {
        "x86_64"
    }

    fn target(&self) -> TargetArch {
        TargetArch::X86_64
    }

    fn compile(&self, program: &IRProgram<'_>) -> Result<CompiledCode, CodegenError> {
        let mut asm = Asm::default();
        let entry_offset = asm.pos();

        // loop_back_site is recorded once we see the first instruction; the
        // fused-loop / loop-back jump always targets the top of the block
        // since translation only ever lifts a single-entry, single-exit region.
        let loop_top = asm.pos();
        let mut pending_loop_back_patches = Vec::new();

        for instr in &program.instructions {
            emit_one(&mut asm, instr, &mut pending_loop_back_patches)?;
        }

        for patch_site in pending_loop_back_patches {
            asm.patch_rel8(patch_site, loop_top);
        }

        Ok(CompiledCode {
            code: asm.bytes,
            entry_offset,
        })
    }
}

fn require_i32_or_bool(kind: ValueKind, offset: u32) -> Result<(), CodegenError> {
    if matches!(kind, ValueKind::I32 | ValueKind::Bool) {
        Ok(())
    } else {
        Err(CodegenError::UnsupportedInstruction {
            bytecode_offset: offset,
        })
    }
}

fn emit_one(
    asm: &mut Asm,
    instr: &IRInstr,
    pending_loop_back_patches: &mut Vec<usize>,
) -> Result<(), CodegenError> {
    let offset = instr.bytecode_offset;
    match instr.opcode {
        IROpcode::LoadConst => {
            require_i32_or_bool(instr.value_kind, offset)?;
            if let Operands::LoadConst { dst, bits, .. } = &instr.operands {
                asm.mov_eax_imm32(*bits as u32);
                asm.store_i32(false, *dst);
                Ok(())
            } else {
                Err(CodegenError::AssemblyError("LoadConst operand mismatch".into()))
            }
        }
        IROpcode::Move => {
            require_i32_or_bool(instr.value_kind, offset)?;
            if let Operands::Move { dst, src } = &instr.operands {
                asm.load_i32(false, *src);
                asm.store_i32(false, *dst);
                Ok(())
            } else {
                Err(CodegenError::AssemblyError("Move operand mismatch".into()))
            }
        }
        IROpcode::Arithmetic(op) => {
            require_i32_or_bool(instr.value_kind, offset)?;
            if let Operands::Binary { dst, lhs, rhs } = &instr.operands {
                asm.load_i32(false, *lhs);
                asm.load_i32(true, *rhs);
                match op {
                    ArithOp::Add => asm.add_eax_ecx(),
                    ArithOp::Sub => asm.sub_eax_ecx(),
                    ArithOp::Mul => asm.imul_eax_ecx(),
                    ArithOp::Div | ArithOp::Mod => {
                        return Err(CodegenError::UnsupportedInstruction {
                            bytecode_offset: offset,
                        })
                    }
                }
                asm.store_i32(false, *dst);
                Ok(())
            } else {
                Err(CodegenError::AssemblyError("Arithmetic operand mismatch".into()))
            }
        }
        IROpcode::Compare(op) => {
            if let Operands::Binary { dst, lhs, rhs } = &instr.operands {
                asm.load_i32(false, *lhs);
                asm.load_i32(true, *rhs);
                asm.cmp_eax_ecx();
                asm.setcc_al(compare_cc(op));
                asm.store_i32(false, *dst);
                Ok(())
            } else {
                Err(CodegenError::AssemblyError("Compare operand mismatch".into()))
            }
        }
        IROpcode::FusedLoop => {
            if let Operands::FusedLoop { counter, limit, step, kind, .. } = &instr.operands {
                require_i32_or_bool(*kind, offset)?;
                // The fused op is itself a complete counted loop: its branch
                // back must re-run only its own increment/compare, never the
                // block's setup code that precedes it (that code — loading
                // the initial counter/limit constants — runs exactly once
                // per call, not once per iteration). So this jcc targets its
                // own start, not the top of the whole translated block the
                // way a recognized `LOOP_SHORT`/`JUMP_BACK_SHORT` backedge does.
                let fused_start = asm.pos();

                // counter <- counter +/- 1
                asm.load_i32(false, *counter);
                asm.inc_or_dec_eax(matches!(step, crate::jit::ir::Step::Increment));
                asm.store_i32(false, *counter);

                // compare updated counter against limit, branch back while still in range
                asm.load_i32(false, *counter);
                asm.load_i32(true, *limit);
                asm.cmp_eax_ecx();
                let cc = match step {
                    crate::jit::ir::Step::Increment => CC_L,
                    crate::jit::ir::Step::Decrement => CC_G,
                };
                let patch_site = asm.jcc8(cc);
                asm.patch_rel8(patch_site, fused_start);
                Ok(())
            } else {
                Err(CodegenError::AssemblyError("FusedLoop operand mismatch".into()))
            }
        }
        IROpcode::JumpShort | IROpcode::JumpIfNotShort => Err(CodegenError::UnsupportedInstruction {
            bytecode_offset: offset,
        }),
        IROpcode::LoopBack => {
            let patch_site = asm.jmp8();
            pending_loop_back_patches.push(patch_site);
            Ok(())
        }
        IROpcode::Safepoint => {
            asm.safepoint_marker();
            Ok(())
        }
        IROpcode::Return => {
            asm.ret();
            Ok(())
        }
        IROpcode::ConvertI32ToI64
        | IROpcode::ConvertU32ToU64
        | IROpcode::ConvertU32ToI32
        | IROpcode::ToString
        | IROpcode::ConcatString
        | IROpcode::Range
        | IROpcode::GetIter
        | IROpcode::IterNext
        | IROpcode::ArrayPush
        | IROpcode::Print
        | IROpcode::AssertEq
        | IROpcode::CallNative
        | IROpcode::TimeStamp => Err(CodegenError::UnsupportedInstruction {
            bytecode_offset: offset,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkBuilder, Opcode};
    use crate::jit::ir::RolloutStage;
    use crate::jit::translate::translate;
    use crate::value::Value;

    fn counted_loop_chunk() -> Chunk {
        let mut b = ChunkBuilder::new();
        let zero = b.add_constant(Value::I32(0));
        let limit = b.add_constant(Value::I32(1_000_000));
        b.op(Opcode::LoadI32Const).u8(0).u16(zero);
        b.op(Opcode::LoadI32Const).u8(1).u16(limit);
        b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
        b.op(Opcode::ReturnVoid);
        b.finish()
    }

    #[test]
    fn compiles_tight_counted_loop_to_a_nonempty_block_ending_in_ret() {
        let chunk = counted_loop_chunk();
        let (program, _) = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap();
        let backend = X86_64Backend;
        let compiled = backend.compile(&program).unwrap();
        assert!(!compiled.code.is_empty());
        assert_eq!(*compiled.code.last().unwrap(), 0xC3);
    }

    #[test]
    fn string_ops_report_unsupported_instruction() {
        let mut b = ChunkBuilder::new();
        let idx = b.add_constant(Value::String("hi".into()));
        b.op(Opcode::LoadConst).u8(0).u16(idx);
        b.op(Opcode::ToStringR).u8(1).u8(0);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();
        let (program, _) = translate(&chunk, 0, 0, 0, 0, RolloutStage::Strings).unwrap();
        let backend = X86_64Backend;
        let err = backend.compile(&program).unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedInstruction { .. }));
    }
}
