//! x86-64 byte encoder (spec.md §4.9): walks a [`MachineFunction`] after
//! register allocation and appends raw machine code, relocation records, and
//! debug-line records to a [`super::holder::MachineCodeHolder`]. Ported from
//! `MachineCodeWriter`, method for method.

use std::collections::HashMap;

use crate::ir::value::GlobalRef;
use crate::isa::holder::{DebugInfo, MachineCodeHolder};
use crate::isa::machine::{
    MachineConstant, MachineFunction, MachineInst, MachineInstOpcode, MachineOperand, EPILOG_BLOCK,
    PROLOG_BLOCK,
};
use crate::isa::registers::RegisterName;

/// A RIP-relative disp32 operand that needs patching once the final code/data
/// (or, for a global, symbol) address is known. Set by [`CodeWriter::set_m`]
/// and consumed by [`CodeWriter::write_inst`] right after the disp32 bytes
/// are appended, so every instruction form that can take a `Constant` or
/// `Global` memory operand — not just the SSE load/store forms the original
/// special-cased — gets a correct relocation record.
enum PendingReloc {
    Constant(i32),
    Global(GlobalRef),
}

const FLAG_REX: u32 = 1;
const FLAG_REX_W: u32 = 2;
const FLAG_SIZE_OVERRIDE: u32 = 4;
/// No additional prefixes allowed. Never actually consulted by
/// [`CodeWriter::write_opcode`] in the original either; kept for call-site
/// fidelity even though it's inert.
const FLAG_NP: u32 = 8;

#[derive(Default)]
struct X64Instruction {
    modd: i32,
    modreg: i32,
    rm: i32,

    scale: i32,
    index: i32,
    base: i32,
    sib: bool,

    disp: i32,
    dispsize: i32,

    imm: u64,
    immsize: i32,
}

fn phys_reg(operand: MachineOperand) -> i32 {
    let MachineOperand::Reg(r) = operand else {
        unreachable!("phys_reg called on a non-register operand")
    };
    if r < RegisterName::Xmm0.index() as i32 {
        r
    } else {
        r - RegisterName::Xmm0.index() as i32
    }
}

/// Emits one function's code into `holder`, appending to its existing code
/// and data buffers, and returns the function's `[begin, end)` byte range.
pub fn codegen(holder: &mut MachineCodeHolder, func: &mut MachineFunction) -> (usize, usize) {
    let mut w = CodeWriter {
        holder,
        func_begin_address: 0,
        bb_offsets: HashMap::new(),
        local_bb_patches: Vec::new(),
        constants: func.constants.clone(),
        frame_base_offset: func.frame_base_offset,
        spill_base_offset: func.spill_base_offset,
        dynamic_stack_allocations: func.dynamic_stack_allocations,
        pending_reloc: None,
    };
    w.run(func)
}

struct CodeWriter<'a> {
    holder: &'a mut MachineCodeHolder,
    func_begin_address: usize,
    bb_offsets: HashMap<usize, usize>,
    local_bb_patches: Vec<(usize, usize)>,
    constants: Vec<MachineConstant>,
    frame_base_offset: i32,
    spill_base_offset: i32,
    dynamic_stack_allocations: bool,
    pending_reloc: Option<PendingReloc>,
}

impl<'a> CodeWriter<'a> {
    fn run(&mut self, func: &mut MachineFunction) -> (usize, usize) {
        self.func_begin_address = self.holder.code.len();

        self.basicblock(PROLOG_BLOCK, &mut func.prolog.code);
        for i in 0..func.basic_blocks.len() {
            let mut code = std::mem::take(&mut func.basic_blocks[i].code);
            self.basicblock(i, &mut code);
            func.basic_blocks[i].code = code;
        }
        self.basicblock(EPILOG_BLOCK, &mut func.epilog.code);

        for (pos, target) in self.local_bb_patches.drain(..) {
            let target_offset = self.bb_offsets[&target];
            let value = (target_offset as i64 - pos as i64 - 4) as i32;
            self.holder.code[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
        }

        (self.func_begin_address, self.holder.code.len())
    }

    fn basicblock(&mut self, bb_id: usize, code: &mut [MachineInst]) {
        self.bb_offsets.insert(bb_id, self.holder.code.len());
        for inst in code.iter_mut() {
            self.opcode(inst);
            inst.unwind_offset = (self.holder.code.len() - self.func_begin_address) as i32;
        }
    }

    fn opcode(&mut self, inst: &MachineInst) {
        use MachineInstOpcode::*;
        match inst.opcode {
            Nop => self.emit_zo(FLAG_NP, 0x90),
            Lea => self.lea(inst),

            Loadss => self.emit_sse_rm(0, &[0xf3, 0x0f, 0x10], inst, true),
            Loadsd => self.emit_sse_rm(0, &[0xf2, 0x0f, 0x10], inst, true),
            Load64 => self.emit_rm(FLAG_REX_W, &[0x8b], inst, true),
            Load32 => self.emit_rm(0, &[0x8b], inst, true),
            Load16 => self.emit_rm(FLAG_SIZE_OVERRIDE, &[0x8b], inst, true),
            Load8 => self.emit_rm(FLAG_REX, &[0x8a], inst, true),

            Storess => self.emit_sse_mr(0, &[0xf3, 0x0f, 0x11], inst, true),
            Storesd => self.emit_sse_mr(0, &[0xf2, 0x0f, 0x11], inst, true),
            Store64 => self.store(FLAG_REX_W, 32, 0x89, 0xc7, inst),
            Store32 => self.store(0, 32, 0x89, 0xc7, inst),
            Store16 => self.store(FLAG_SIZE_OVERRIDE, 16, 0x89, 0xc7, inst),
            Store8 => self.store(FLAG_REX, 8, 0x88, 0xc6, inst),

            Movss => self.emit_sse_rm(0, &[0xf3, 0x0f, 0x10], inst, false),
            Movsd => self.emit_sse_rm(0, &[0xf2, 0x0f, 0x10], inst, false),
            Mov64 => self.mov(FLAG_REX_W, 64, 0x8b, 0xb8, inst),
            Mov32 => self.mov(0, 32, 0x8b, 0xb8, inst),
            Mov16 => self.mov(FLAG_SIZE_OVERRIDE, 16, 0x8b, 0xb8, inst),
            Mov8 => self.mov(FLAG_REX, 8, 0x8a, 0xb0, inst),

            Movsx8_16 => self.emit_rm(FLAG_REX | FLAG_SIZE_OVERRIDE, &[0x0f, 0xbe], inst, false),
            Movsx8_32 => self.emit_rm(FLAG_REX, &[0x0f, 0xbe], inst, false),
            Movsx8_64 => self.emit_rm(FLAG_REX_W, &[0x0f, 0xbe], inst, false),
            Movsx16_32 => self.emit_rm(0, &[0x0f, 0xbf], inst, false),
            Movsx16_64 => self.emit_rm(FLAG_REX_W, &[0x0f, 0xbf], inst, false),
            Movsx32_64 => self.emit_rm(FLAG_REX_W, &[0x63], inst, false),
            Movzx8_16 => self.emit_rm(FLAG_REX | FLAG_SIZE_OVERRIDE, &[0x0f, 0xb6], inst, false),
            Movzx8_32 => self.emit_rm(FLAG_REX, &[0x0f, 0xb6], inst, false),
            Movzx8_64 => self.emit_rm(FLAG_REX_W, &[0x0f, 0xb6], inst, false),
            Movzx16_32 => self.emit_rm(0, &[0x0f, 0xb7], inst, false),
            Movzx16_64 => self.emit_rm(FLAG_REX_W, &[0x0f, 0xb7], inst, false),

            Addss => self.emit_sse_rm(0, &[0xf3, 0x0f, 0x58], inst, false),
            Addsd => self.emit_sse_rm(0, &[0xf2, 0x0f, 0x58], inst, false),
            Add64 => self.arith(FLAG_REX_W, 32, 0x03, 0x81, 0, inst),
            Add32 => self.arith(0, 32, 0x03, 0x81, 0, inst),
            Add16 => self.arith(FLAG_SIZE_OVERRIDE, 16, 0x03, 0x81, 0, inst),
            Add8 => self.arith(FLAG_REX, 8, 0x02, 0x80, 0, inst),

            Subss => self.emit_sse_rm(0, &[0xf3, 0x0f, 0x5c], inst, false),
            Subsd => self.emit_sse_rm(0, &[0xf2, 0x0f, 0x5c], inst, false),
            Sub64 => self.arith(FLAG_REX_W, 32, 0x2b, 0x81, 5, inst),
            Sub32 => self.arith(0, 32, 0x2b, 0x81, 5, inst),
            Sub16 => self.arith(FLAG_SIZE_OVERRIDE, 16, 0x2b, 0x81, 5, inst),
            Sub8 => self.arith(FLAG_REX, 8, 0x2a, 0x80, 5, inst),

            Not64 => self.emit_m(FLAG_REX_W, &[0xf7], 2, inst, false),
            Not32 => self.emit_m(0, &[0xf7], 2, inst, false),
            Not16 => self.emit_m(FLAG_SIZE_OVERRIDE, &[0xf7], 2, inst, false),
            Not8 => self.emit_m(FLAG_REX, &[0xf6], 2, inst, false),

            Neg64 => self.emit_m(FLAG_REX_W, &[0xf7], 3, inst, false),
            Neg32 => self.emit_m(0, &[0xf7], 3, inst, false),
            Neg16 => self.emit_m(FLAG_SIZE_OVERRIDE, &[0xf7], 3, inst, false),
            Neg8 => self.emit_m(FLAG_REX, &[0xf6], 3, inst, false),

            Shl64 => self.shift(FLAG_REX_W, 0xc1, 0xd3, 4, inst),
            Shl32 => self.shift(0, 0xc1, 0xd3, 4, inst),
            Shl16 => self.shift(FLAG_SIZE_OVERRIDE, 0xc1, 0xd3, 4, inst),
            Shl8 => self.shift(FLAG_REX, 0xc0, 0xd2, 4, inst),

            Shr64 => self.shift(FLAG_REX_W, 0xc1, 0xd3, 5, inst),
            Shr32 => self.shift(0, 0xc1, 0xd3, 5, inst),
            Shr16 => self.shift(FLAG_SIZE_OVERRIDE, 0xc1, 0xd3, 5, inst),
            Shr8 => self.shift(FLAG_REX, 0xc0, 0xd2, 5, inst),

            Sar64 => self.shift(FLAG_REX_W, 0xc1, 0xd3, 7, inst),
            Sar32 => self.shift(0, 0xc1, 0xd3, 7, inst),
            Sar16 => self.shift(FLAG_SIZE_OVERRIDE, 0xc1, 0xd3, 7, inst),
            Sar8 => self.shift(FLAG_REX, 0xc0, 0xd2, 7, inst),

            And64 => self.arith(FLAG_REX_W, 32, 0x23, 0x81, 4, inst),
            And32 => self.arith(0, 32, 0x23, 0x81, 4, inst),
            And16 => self.arith(FLAG_SIZE_OVERRIDE, 16, 0x23, 0x81, 4, inst),
            And8 => self.arith(FLAG_REX, 8, 0x22, 0x80, 4, inst),

            Or64 => self.arith(FLAG_REX_W, 32, 0x0b, 0x81, 1, inst),
            Or32 => self.arith(0, 32, 0x0b, 0x81, 1, inst),
            Or16 => self.arith(FLAG_SIZE_OVERRIDE, 16, 0x0b, 0x81, 1, inst),
            Or8 => self.arith(FLAG_REX, 8, 0x0a, 0x80, 1, inst),

            Xorpd => self.emit_sse_rm(FLAG_SIZE_OVERRIDE, &[0x0f, 0x57], inst, false),
            Xorps => self.emit_sse_rm(FLAG_NP, &[0x0f, 0x57], inst, false),
            Xor64 => self.arith(FLAG_REX_W, 32, 0x33, 0x81, 6, inst),
            Xor32 => self.arith(0, 32, 0x33, 0x81, 6, inst),
            Xor16 => self.arith(FLAG_SIZE_OVERRIDE, 16, 0x33, 0x81, 6, inst),
            Xor8 => self.arith(FLAG_REX, 8, 0x32, 0x80, 6, inst),

            Mulss => self.emit_sse_rm(0, &[0xf3, 0x0f, 0x59], inst, false),
            Mulsd => self.emit_sse_rm(0, &[0xf2, 0x0f, 0x59], inst, false),
            Imul64 => self.imul(FLAG_REX_W, 32, inst),
            Imul32 => self.imul(0, 32, inst),
            Imul16 => self.imul(FLAG_SIZE_OVERRIDE, 16, inst),
            // No immediate-multiply byte form: ax <- al * r/m8.
            Imul8 => self.emit_m(FLAG_REX, &[0xf6], 5, inst, false),

            Divss => self.emit_sse_rm(0, &[0xf3, 0x0f, 0x5e], inst, false),
            Divsd => self.emit_sse_rm(0, &[0xf2, 0x0f, 0x5e], inst, false),
            // No immediate divide; always operates on rax/rdx (or al/ax).
            Idiv64 => self.emit_m(FLAG_REX_W, &[0xf7], 7, inst, false),
            Idiv32 => self.emit_m(0, &[0xf7], 7, inst, false),
            Idiv16 => self.emit_m(FLAG_SIZE_OVERRIDE, &[0xf7], 7, inst, false),
            Idiv8 => self.emit_m(FLAG_REX, &[0xf6], 7, inst, false),
            Div64 => self.emit_m(FLAG_REX_W, &[0xf7], 6, inst, false),
            Div32 => self.emit_m(0, &[0xf7], 6, inst, false),
            Div16 => self.emit_m(FLAG_SIZE_OVERRIDE, &[0xf7], 6, inst, false),
            Div8 => self.emit_m(FLAG_REX, &[0xf6], 6, inst, false),

            Ucomisd => self.emit_sse_rm(FLAG_SIZE_OVERRIDE, &[0x0f, 0x2e], inst, false),
            Ucomiss => self.emit_sse_rm(FLAG_NP, &[0x0f, 0x2e], inst, false),
            Cmp64 => self.arith(FLAG_REX_W, 32, 0x3b, 0x81, 7, inst),
            Cmp32 => self.arith(0, 32, 0x3b, 0x81, 7, inst),
            Cmp16 => self.arith(FLAG_SIZE_OVERRIDE, 16, 0x3b, 0x81, 7, inst),
            Cmp8 => self.arith(FLAG_REX, 8, 0x3a, 0x80, 7, inst),

            Setl => self.emit_m(FLAG_REX, &[0x0f, 0x9c], 8, inst, false),
            Setb => self.emit_m(FLAG_REX, &[0x0f, 0x92], 8, inst, false),
            Seta => self.emit_m(FLAG_REX, &[0x0f, 0x97], 8, inst, false),
            Setg => self.emit_m(FLAG_REX, &[0x0f, 0x9f], 8, inst, false),
            Setle => self.emit_m(FLAG_REX, &[0x0f, 0x9e], 8, inst, false),
            Setbe => self.emit_m(FLAG_REX, &[0x0f, 0x96], 8, inst, false),
            Setae => self.emit_m(FLAG_REX, &[0x0f, 0x93], 8, inst, false),
            Setge => self.emit_m(FLAG_REX, &[0x0f, 0x9d], 8, inst, false),
            Sete => self.emit_m(FLAG_REX, &[0x0f, 0x94], 8, inst, false),
            Setne => self.emit_m(FLAG_REX, &[0x0f, 0x95], 8, inst, false),
            Setp => self.emit_m(FLAG_REX, &[0x0f, 0x9a], 8, inst, false),
            Setnp => self.emit_m(FLAG_REX, &[0x0f, 0x9b], 8, inst, false),

            Cvtsd2ss => self.emit_sse_rm(0, &[0xf2, 0x0f, 0x5a], inst, false),
            Cvtss2sd => self.emit_sse_rm(0, &[0xf3, 0x0f, 0x5a], inst, false),
            Cvttsd2si => self.emit_sse_rm(FLAG_REX_W, &[0xf2, 0x0f, 0x2c], inst, false),
            Cvttss2si => self.emit_sse_rm(FLAG_REX_W, &[0xf3, 0x0f, 0x2c], inst, false),
            Cvtsi2sd => self.emit_sse_rm(FLAG_REX_W, &[0xf2, 0x0f, 0x2a], inst, false),
            Cvtsi2ss => self.emit_sse_rm(FLAG_REX_W, &[0xf3, 0x0f, 0x2a], inst, false),

            Jmp => self.jcc(&[0xe9], inst),
            Je => self.jcc(&[0x0f, 0x84], inst),
            Jne => self.jcc(&[0x0f, 0x85], inst),

            Call => self.call(inst),
            Ret => self.emit_zo(0, 0xc3),
            Push => self.emit_o(0, 0x50, inst),
            Pop => self.emit_o(0, 0x58, inst),

            Movdqa => {
                if matches!(inst.operands[0], MachineOperand::Reg(_)) {
                    self.emit_sse_rm(FLAG_SIZE_OVERRIDE, &[0x0f, 0x6f], inst, true);
                } else {
                    self.emit_sse_mr(FLAG_SIZE_OVERRIDE, &[0x0f, 0x7f], inst, true);
                }
            }
        }
    }

    fn lea(&mut self, inst: &MachineInst) {
        let mut x = X64Instruction::default();
        self.set_r(&mut x, inst.operands[0]);

        if inst.operands.len() == 3 {
            let MachineOperand::Imm(disp) = inst.operands[2] else { unreachable!() };
            x.disp = disp as i32;
            x.dispsize = if x.disp > -127 && x.disp < 127 { 8 } else { 32 };
            let base_reg = phys_reg(inst.operands[1]);
            if base_reg == RegisterName::Rsp.index() as i32 || base_reg == RegisterName::R12.index() as i32 {
                x.modd = if x.dispsize == 8 { 1 } else { 2 };
                x.rm = 4;
                x.scale = 0;
                x.index = 4;
                x.base = base_reg;
                x.sib = true;
            } else {
                x.modd = if x.dispsize == 8 { 1 } else { 2 };
                x.rm = base_reg;
            }
        } else {
            self.set_m(&mut x, inst.operands[1], true);
        }

        self.write_inst(FLAG_REX_W, &[0x8d], &x, inst);
    }

    fn store(&mut self, flags: u32, immsize: i32, mr_opcode: u8, mi_opcode: u8, inst: &MachineInst) {
        if matches!(inst.operands[1], MachineOperand::Imm(_)) {
            self.emit_mi(flags, mi_opcode, 0, immsize, inst, true);
        } else {
            self.emit_mr(flags, mr_opcode, inst, true);
        }
    }

    fn mov(&mut self, flags: u32, immsize: i32, rm_opcode: u8, oi_opcode: u8, inst: &MachineInst) {
        if matches!(inst.operands[1], MachineOperand::Imm(_)) {
            self.emit_oi(flags, oi_opcode, immsize, inst);
        } else {
            self.emit_rm(flags, &[rm_opcode], inst, false);
        }
    }

    fn arith(&mut self, flags: u32, immsize: i32, rm_opcode: u8, mi_opcode: u8, modopcode: i32, inst: &MachineInst) {
        if matches!(inst.operands[1], MachineOperand::Imm(_)) {
            self.emit_mi(flags, mi_opcode, modopcode, immsize, inst, false);
        } else {
            self.emit_rm(flags, &[rm_opcode], inst, false);
        }
    }

    fn shift(&mut self, flags: u32, imm_opcode: u8, cl_opcode: u8, modopcode: i32, inst: &MachineInst) {
        if matches!(inst.operands[1], MachineOperand::Imm(_)) {
            self.emit_mi(flags, imm_opcode, modopcode, 8, inst, false);
        } else {
            // operands[1] must be cl
            self.emit_mc(flags, cl_opcode, modopcode, inst, false);
        }
    }

    fn imul(&mut self, flags: u32, immsize: i32, inst: &MachineInst) {
        if matches!(inst.operands[1], MachineOperand::Imm(_)) {
            self.emit_rmi(flags, 0x69, immsize, inst, false);
        } else {
            self.emit_rm(flags, &[0x0f, 0xaf], inst, false);
        }
    }

    fn jcc(&mut self, opcode: &[u8], inst: &MachineInst) {
        self.write_opcode(0, opcode, 0, 0, 0);
        self.write_imm(32, 0xffff_ffff);
        let MachineOperand::BasicBlock(target) = inst.operands[0] else { unreachable!() };
        let pos = self.holder.code.len() - 4;
        self.local_bb_patches.push((pos, target));
    }

    fn call(&mut self, inst: &MachineInst) {
        let regindex = RegisterName::Rax.index() as i32;

        match inst.operands[0] {
            MachineOperand::Func(f) => {
                let opcode = 0xb8 | (regindex & 7);
                self.write_opcode(FLAG_REX_W, &[opcode as u8], 0, 0, regindex >> 3);
                self.write_imm(64, u64::MAX);
                let pos = self.holder.code.len() - 8;
                self.holder.call_relocate_info.push((pos, f));
            }
            MachineOperand::Global(g) => {
                // Indirect call through a global function pointer: materialize
                // its address into rax via the same RIP-relative addressing
                // `set_m` gives any other global reference, then call it.
                let mut x = X64Instruction::default();
                self.set_r(&mut x, regindex);
                self.set_m(&mut x, MachineOperand::Global(g), true);
                self.write_inst(FLAG_REX_W, &[0x8b], &x, inst);
            }
            _ => unreachable!("call target must be a direct function or a global function pointer"),
        }

        self.write_opcode(0, &[0xff], 0, 0, regindex >> 3);
        self.write_modrm(3, 2, regindex);
    }

    fn emit_zo(&mut self, flags: u32, opcode: u8) {
        self.write_opcode(flags, &[opcode], 0, 0, 0);
    }

    fn emit_o(&mut self, flags: u32, opcode: u8, inst: &MachineInst) {
        let regindex = phys_reg(inst.operands[0]);
        let opcode = opcode | (regindex & 7) as u8;
        self.write_opcode(flags, &[opcode], 0, 0, regindex >> 3);
    }

    fn emit_oi(&mut self, flags: u32, opcode: u8, immsize: i32, inst: &MachineInst) {
        let regindex = phys_reg(inst.operands[0]);
        let opcode = opcode | (regindex & 7) as u8;
        self.write_opcode(flags, &[opcode], 0, 0, regindex >> 3);
        let MachineOperand::Imm(v) = inst.operands[1] else { unreachable!() };
        self.write_imm(immsize, v);
    }

    fn emit_mi(&mut self, flags: u32, opcode: u8, modopcode: i32, immsize: i32, inst: &MachineInst, memptr: bool) {
        let mut x = X64Instruction::default();
        self.set_r(&mut x, modopcode);
        self.set_m(&mut x, inst.operands[0], memptr);
        let MachineOperand::Imm(v) = inst.operands[1] else { unreachable!() };
        x.immsize = immsize;
        x.imm = v;
        self.write_inst(flags, &[opcode], &x, inst);
    }

    fn emit_mr(&mut self, flags: u32, opcode: u8, inst: &MachineInst, memptr: bool) {
        let mut x = X64Instruction::default();
        self.set_m(&mut x, inst.operands[0], memptr);
        self.set_r(&mut x, inst.operands[1]);
        self.write_inst(flags, &[opcode], &x, inst);
    }

    fn emit_m(&mut self, flags: u32, opcode: &[u8], modopcode: i32, inst: &MachineInst, memptr: bool) {
        let mut x = X64Instruction::default();
        self.set_r(&mut x, modopcode);
        self.set_m(&mut x, inst.operands[0], memptr);
        self.write_inst(flags, opcode, &x, inst);
    }

    fn emit_mc(&mut self, flags: u32, opcode: u8, modopcode: i32, inst: &MachineInst, memptr: bool) {
        // operands[1] must be cl
        let mut x = X64Instruction::default();
        self.set_r(&mut x, modopcode);
        self.set_m(&mut x, inst.operands[0], memptr);
        self.write_inst(flags, &[opcode], &x, inst);
    }

    fn emit_rm(&mut self, flags: u32, opcode: &[u8], inst: &MachineInst, memptr: bool) {
        let mut x = X64Instruction::default();
        self.set_r(&mut x, inst.operands[0]);
        self.set_m(&mut x, inst.operands[1], memptr);
        self.write_inst(flags, opcode, &x, inst);
    }

    fn emit_rmi(&mut self, flags: u32, opcode: u8, immsize: i32, inst: &MachineInst, memptr: bool) {
        let mut x = X64Instruction::default();
        self.set_r(&mut x, inst.operands[0]);
        self.set_m(&mut x, inst.operands[0], memptr);
        let MachineOperand::Imm(v) = inst.operands[1] else { unreachable!() };
        x.immsize = immsize;
        x.imm = v;
        self.write_inst(flags, &[opcode], &x, inst);
    }

    fn emit_sse_rm(&mut self, flags: u32, opcode: &[u8], inst: &MachineInst, memptr: bool) {
        let mut x = X64Instruction::default();
        self.set_r(&mut x, inst.operands[0]);
        self.set_m(&mut x, inst.operands[1], memptr);
        self.write_inst(flags, opcode, &x, inst);
    }

    fn emit_sse_mr(&mut self, flags: u32, opcode: &[u8], inst: &MachineInst, memptr: bool) {
        let mut x = X64Instruction::default();
        self.set_m(&mut x, inst.operands[0], memptr);
        self.set_r(&mut x, inst.operands[1]);
        self.write_inst(flags, opcode, &x, inst);
    }

    fn set_m(&mut self, x: &mut X64Instruction, operand: MachineOperand, memptr: bool) {
        match operand {
            MachineOperand::Reg(_) => {
                let reg = phys_reg(operand);
                if memptr {
                    if reg == RegisterName::Rsp.index() as i32 || reg == RegisterName::R12.index() as i32 {
                        x.rm = RegisterName::Rsp.index() as i32;
                        x.modd = 0;
                        x.scale = 0;
                        x.index = 4;
                        x.base = reg;
                        x.sib = true;
                    } else if reg == RegisterName::Rbp.index() as i32 || reg == RegisterName::R13.index() as i32 {
                        x.rm = reg;
                        x.modd = 1;
                        x.disp = 0;
                        x.dispsize = 8;
                    } else {
                        x.rm = reg;
                        x.modd = 0;
                    }
                } else {
                    x.rm = reg;
                    x.modd = 3;
                }
            }
            MachineOperand::FrameOffset(off) => {
                self.sib_relative_to_frame(x, self.frame_base_offset + off);
            }
            MachineOperand::SpillOffset(off) => {
                self.sib_relative_to_frame(x, self.spill_base_offset + off);
            }
            MachineOperand::StackOffset(off) => {
                x.disp = off;
                x.dispsize = if x.disp > -127 && x.disp < 127 { 8 } else { 32 };
                x.modd = if x.dispsize == 8 { 1 } else { 2 };
                x.rm = 4;
                x.scale = 0;
                x.index = 4;
                x.base = RegisterName::Rsp.index() as i32;
                x.sib = true;
            }
            MachineOperand::Constant(ci) => {
                x.disp = -1;
                x.dispsize = 32;
                x.modd = 0;
                x.rm = 5;
                self.pending_reloc = Some(PendingReloc::Constant(ci));
            }
            MachineOperand::Global(g) => {
                x.disp = -1;
                x.dispsize = 32;
                x.modd = 0;
                x.rm = 5;
                self.pending_reloc = Some(PendingReloc::Global(g));
            }
            MachineOperand::Imm(v) => {
                x.disp = v as i32;
                x.dispsize = 32;
                x.modd = 0;
                x.rm = 5;
            }
            MachineOperand::BasicBlock(_) | MachineOperand::Func(_) => {
                unreachable!("not a valid memory operand")
            }
        }
    }

    /// `frameOffset`/`spillOffset` operands always address the stack through
    /// a `[base + disp32]` SIB form; `base` is `rbp` once the function has
    /// any dynamic stack allocation (so `rsp` itself moves), `rsp` otherwise.
    fn sib_relative_to_frame(&self, x: &mut X64Instruction, disp: i32) {
        x.disp = disp;
        x.dispsize = if x.disp > -127 && x.disp < 127 { 8 } else { 32 };
        x.modd = if x.dispsize == 8 { 1 } else { 2 };
        x.rm = 4;
        x.scale = 0;
        x.index = 4;
        x.base = if self.dynamic_stack_allocations {
            RegisterName::Rbp.index() as i32
        } else {
            RegisterName::Rsp.index() as i32
        };
        x.sib = true;
    }

    fn set_r(&mut self, x: &mut X64Instruction, operand_or_modopcode: impl Into<RegOrOpcode>) {
        match operand_or_modopcode.into() {
            RegOrOpcode::Operand(MachineOperand::Reg(_)) => {}
            RegOrOpcode::Operand(op) => x.modreg = phys_reg(op),
            RegOrOpcode::Opcode(n) => x.modreg = n,
        }
    }

    fn write_inst(&mut self, flags: u32, opcode: &[u8], x: &X64Instruction, debug: &MachineInst) {
        if debug.line_number != -1 {
            self.holder.debug_info.push(DebugInfo {
                offset: self.holder.code.len(),
                file_index: debug.file_index,
                line_number: debug.line_number,
            });
        }

        self.write_opcode(flags, opcode, x.modreg >> 3, x.index >> 3, (x.rm | x.base) >> 3);
        self.write_modrm(x.modd, x.modreg, x.rm);
        if x.sib {
            self.write_sib(x.scale, x.index, x.base);
        }
        if x.dispsize > 0 {
            self.write_imm(x.dispsize, x.disp as i64 as u64);
        }
        if let Some(reloc) = self.pending_reloc.take() {
            let codepos = self.holder.code.len() - 4;
            match reloc {
                PendingReloc::Constant(ci) => {
                    let datapos = self.holder.data.len();
                    let constant = &self.constants[ci as usize];
                    self.holder.data.extend_from_slice(&constant.data[..constant.size]);
                    self.holder.data_relocate_info.push((codepos, datapos));
                }
                PendingReloc::Global(g) => {
                    self.holder.global_relocate_info.push((codepos, g));
                }
            }
        }
        if x.immsize > 0 {
            self.write_imm(x.immsize, x.imm);
        }
    }

    fn write_opcode(&mut self, flags: u32, opcode: &[u8], r: i32, xf: i32, b: i32) {
        if flags & FLAG_SIZE_OVERRIDE != 0 {
            self.holder.code.push(0x66);
        }

        let mut rest = opcode;
        if let [first, tail @ ..] = opcode {
            if *first == 0xf2 || *first == 0xf3 {
                self.holder.code.push(*first);
                rest = tail;
            }
        }

        let mut rex = 0i32;
        if flags & FLAG_REX_W != 0 {
            rex |= 1 << 3;
        }
        rex |= r << 2;
        rex |= xf << 1;
        rex |= b;

        if rex != 0 || flags & FLAG_REX != 0 {
            self.holder.code.push((0x40 | rex) as u8);
        }

        self.holder.code.extend_from_slice(rest);
    }

    fn write_modrm(&mut self, modd: i32, modreg: i32, rm: i32) {
        let modreg = modreg & 7;
        let rm = rm & 7;
        self.holder.code.push(((modd << 6) | (modreg << 3) | rm) as u8);
    }

    fn write_sib(&mut self, scale: i32, index: i32, base: i32) {
        let index = index & 7;
        let base = base & 7;
        self.holder.code.push(((scale << 6) | (index << 3) | base) as u8);
    }

    fn write_imm(&mut self, immsize: i32, value: u64) {
        let mut v = value;
        let mut remaining = immsize;
        while remaining > 0 {
            self.holder.code.push((v & 0xff) as u8);
            v >>= 8;
            remaining -= 8;
        }
    }
}

enum RegOrOpcode {
    Operand(MachineOperand),
    Opcode(i32),
}
impl From<MachineOperand> for RegOrOpcode {
    fn from(op: MachineOperand) -> RegOrOpcode {
        RegOrOpcode::Operand(op)
    }
}
impl From<i32> for RegOrOpcode {
    fn from(n: i32) -> RegOrOpcode {
        RegOrOpcode::Opcode(n)
    }
}
