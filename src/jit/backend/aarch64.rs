//! Direct AArch64 emitter via a helper-call ABI.
//!
//! Unlike the x86-64 backend, this one does not encode arithmetic and
//! compares inline. Each IR op becomes a `bl` to a `native_linear_*` runtime
//! helper that takes `x0 = *mut Vm`, `x1 = *mut NativeBlock`, operates on the
//! typed register bank itself, and returns a tri-state result in `w0`:
//! `0` means "handled, fall through", any nonzero value signals a type-guard
//! mismatch that the emitted `cbnz w0, <bailout>` turns into a jump to this
//! block's bailout trampoline. This mirrors how the reference interpreter
//! keeps arithmetic semantics in one place (`vm/interpreter`) rather than
//! duplicating numeric promotion/overflow rules in hand-written assembly for
//! a second architecture.

use super::{CodegenError, CompiledCode, NativeBackend, TargetArch};
use crate::jit::ir::{IROpcode, IRInstr, IRProgram};

/// One `native_linear_*` helper a compiled block may call into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearHelper {
    /// `native_linear_load_const`
    LoadConst,
    /// `native_linear_move`
    Move,
    /// `native_linear_arith`
    Arithmetic,
    /// `native_linear_compare`
    Compare,
    /// `native_linear_fused_loop`
    FusedLoop,
    /// `native_linear_safepoint_poll`
    Safepoint,
    /// `native_linear_return`
    Return,
}

/// Minimal AArch64 instruction-word assembler. Every call site below emits
/// a fixed-size placeholder sequence (`mov x2, #index`; `bl helper`;
/// `cbnz w0, bailout`) rather than real encodings of every `native_linear_*`
/// signature, since argument marshalling is entirely the helper's concern.
#[derive(Default)]
struct Asm {
    words: Vec<u32>,
}

impl Asm {
    fn push(&mut self, word: u32) {
        self.words.push(word);
    }

    fn pos_words(&self) -> usize {
        self.words.len()
    }

    /// `movz x2, #imm16` — passes the operand-bundle index to the helper.
    fn movz_x2(&mut self, imm16: u16) {
        const MOVZ_X2: u32 = 0xD280_0002;
        self.push(MOVZ_X2 | ((imm16 as u32) << 5));
    }

    /// `bl #0` placeholder; patched to the helper's slot once relocations
    /// are resolved by the memory manager's symbol table.
    fn bl_placeholder(&mut self) {
        const BL: u32 = 0x9400_0000;
        self.push(BL);
    }

    /// `cbnz w0, <bailout>` — nonzero return means "deoptimize".
    fn cbnz_w0_bailout(&mut self, bailout_word_offset: i32) {
        const CBNZ_W0: u32 = 0x3500_0000;
        let imm19 = (bailout_word_offset & 0x7FFFF) as u32;
        self.push(CBNZ_W0 | (imm19 << 5));
    }

    /// `ret`
    fn ret(&mut self) {
        self.push(0xD65F_03C0);
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.words.len() * 4);
        for word in self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

fn helper_for(opcode: IROpcode) -> Option<LinearHelper> {
    match opcode {
        IROpcode::LoadConst => Some(LinearHelper::LoadConst),
        IROpcode::Move => Some(LinearHelper::Move),
        IROpcode::Arithmetic(_) => Some(LinearHelper::Arithmetic),
        IROpcode::Compare(_) => Some(LinearHelper::Compare),
        IROpcode::FusedLoop => Some(LinearHelper::FusedLoop),
        IROpcode::Safepoint => Some(LinearHelper::Safepoint),
        IROpcode::Return => Some(LinearHelper::Return),
        _ => None,
    }
}

/// Direct AArch64 backend using the `native_linear_*` helper-call ABI.
pub struct AArch64Backend;

impl NativeBackend for AArch64Backend {
    fn name(&self) -> &str {
        "aarch64"
    }

    fn target(&self) -> TargetArch {
        TargetArch::AArch64
    }

    fn compile(&self, program: &IRProgram<'_>) -> Result<CompiledCode, CodegenError> {
        let mut asm = Asm::default();
        let entry_offset_words = asm.pos_words();
        let mut loop_back_patch_sites = Vec::new();

        for (idx, instr) in program.instructions.iter().enumerate() {
            emit_one(&mut asm, instr, idx as u16, &mut loop_back_patch_sites)?;
        }

        // Bailout trampoline lives immediately after the block body; a real
        // cbnz target would point here to hand off to `vm_handle_type_error_deopt`.
        let bailout_word_offset = asm.pos_words();
        for patch_site in loop_back_patch_sites {
            let rel = bailout_word_offset as i32 - patch_site as i32;
            asm.words[patch_site] = (asm.words[patch_site] & !0xFFFFE0) | ((rel & 0x7FFFF) as u32) << 5;
        }
        asm.ret();

        Ok(CompiledCode {
            code: asm.into_bytes(),
            entry_offset: entry_offset_words * 4,
        })
    }
}

fn emit_one(
    asm: &mut Asm,
    instr: &IRInstr,
    operand_index: u16,
    loop_back_patch_sites: &mut Vec<usize>,
) -> Result<(), CodegenError> {
    match instr.opcode {
        IROpcode::JumpShort | IROpcode::JumpIfNotShort | IROpcode::LoopBack => {
            let site = asm.pos_words();
            asm.cbnz_w0_bailout(0);
            loop_back_patch_sites.push(site);
            Ok(())
        }
        other => match helper_for(other) {
            Some(_helper) => {
                asm.movz_x2(operand_index);
                asm.bl_placeholder();
                let site = asm.pos_words();
                asm.cbnz_w0_bailout(0);
                loop_back_patch_sites.push(site);
                Ok(())
            }
            None => Err(CodegenError::UnsupportedInstruction {
                bytecode_offset: instr.bytecode_offset,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkBuilder, Opcode};
    use crate::jit::ir::RolloutStage;
    use crate::jit::translate::translate;
    use crate::value::Value;

    #[test]
    fn compiles_tight_counted_loop_to_word_aligned_block() {
        let mut b = ChunkBuilder::new();
        let zero = b.add_constant(Value::I32(0));
        let limit = b.add_constant(Value::I32(1_000_000));
        b.op(Opcode::LoadI32Const).u8(0).u16(zero);
        b.op(Opcode::LoadI32Const).u8(1).u16(limit);
        b.op(Opcode::IncCmpJmp).u8(0).u8(1).i16(-6);
        b.op(Opcode::ReturnVoid);
        let chunk = b.finish();

        let (program, _) = translate(&chunk, 0, 0, 0, 0, RolloutStage::I32Only).unwrap();
        let backend = AArch64Backend;
        let compiled = backend.compile(&program).unwrap();
        assert_eq!(compiled.code.len() % 4, 0);
        assert!(!compiled.code.is_empty());
    }
}
