//! Unwind info generation (spec.md §4.8): Windows `UNWIND_INFO`/`UNWIND_CODE`
//! and Unix `.eh_frame` CIE/FDE, both derived from the [`MachineUnwindHint`]
//! tags the register allocator left on the prolog instructions.

use crate::isa::machine::{MachineFunction, MachineInstOpcode, MachineOperand, MachineUnwindHint};
use crate::isa::registers::RegisterName;

const UWOP_PUSH_NONVOL: u32 = 0;
const UWOP_ALLOC_LARGE: u32 = 1;
const UWOP_ALLOC_SMALL: u32 = 2;
const UWOP_SET_FPREG: u32 = 3;
const UWOP_SAVE_XMM128: u32 = 8;
const UWOP_SAVE_XMM128_FAR: u32 = 9;

/// Build the `UNWIND_INFO` blob (as a stream of `u16` words, matching the
/// original's representation) for one function's prolog.
pub fn create_windows(func: &MachineFunction) -> Vec<u16> {
    let version: u16 = 1;
    let flags: u16 = 0;
    let mut frame_register: u16 = 0;
    let frame_offset: u16 = 0;

    let mut codes: Vec<u16> = Vec::new();
    let mut last_offset = 0i32;

    for inst in &func.prolog.code {
        match inst.unwind_hint {
            MachineUnwindHint::PushNonvolatile => {
                let opoffset = inst.unwind_offset as u32;
                let opinfo = match inst.operands[0] {
                    MachineOperand::Reg(r) => r as u32,
                    _ => unreachable!(),
                };
                codes.push((opoffset | (UWOP_PUSH_NONVOL << 8) | (opinfo << 12)) as u16);
            }
            MachineUnwindHint::StackAdjustment => {
                let stackadjust = match inst.operands[1] {
                    MachineOperand::Imm(v) => v as u32,
                    _ => unreachable!(),
                };
                let opoffset = inst.unwind_offset as u32;
                if stackadjust <= 128 {
                    let opinfo = stackadjust / 8 - 1;
                    codes.push((opoffset | (UWOP_ALLOC_SMALL << 8) | (opinfo << 12)) as u16);
                } else if stackadjust <= 512 * 1024 - 8 {
                    codes.push((stackadjust / 8) as u16);
                    codes.push((opoffset | (UWOP_ALLOC_LARGE << 8)) as u16);
                } else {
                    codes.push((stackadjust >> 16) as u16);
                    codes.push(stackadjust as u16);
                    codes.push((opoffset | (UWOP_ALLOC_LARGE << 8) | (1 << 12)) as u16);
                }
            }
            MachineUnwindHint::RegisterStackLocation => {
                const VEC_SIZE: i32 = 16;
                let stackoffset = match inst.operands[0] {
                    MachineOperand::FrameOffset(off) => off,
                    _ => unreachable!(),
                };
                let opinfo = match inst.operands[1] {
                    MachineOperand::Reg(r) => r as u32,
                    _ => unreachable!(),
                };
                let opoffset = inst.unwind_offset as u32;
                if stackoffset / VEC_SIZE < (1 << 16) {
                    codes.push((stackoffset / VEC_SIZE) as u16);
                    codes.push((opoffset | (UWOP_SAVE_XMM128 << 8) | (opinfo << 12)) as u16);
                } else {
                    codes.push((stackoffset >> 16) as u16);
                    codes.push(stackoffset as u16);
                    codes.push((opoffset | (UWOP_SAVE_XMM128_FAR << 8) | (opinfo << 12)) as u16);
                }
            }
            MachineUnwindHint::SaveFrameRegister => {
                frame_register = match inst.operands[0] {
                    MachineOperand::Reg(r) => r as u16,
                    _ => unreachable!(),
                };
                let opoffset = inst.unwind_offset as u32;
                codes.push((opoffset | (UWOP_SET_FPREG << 8)) as u16);
            }
            MachineUnwindHint::None => {}
        }

        if inst.opcode != MachineInstOpcode::Jmp {
            last_offset = inst.unwind_offset;
        }
    }

    let size_of_prolog = last_offset as u16;
    let count_of_codes = codes.len() as u16;

    let mut info = Vec::with_capacity(2 + codes.len() + 1);
    info.push(version | (flags << 3) | (size_of_prolog << 8));
    info.push(count_of_codes | (frame_register << 8) | (frame_offset << 12));

    for &code in codes.iter().rev() {
        info.push(code);
    }
    if codes.len() % 2 == 1 {
        info.push(0);
    }

    info
}

fn dwarf_reg_id(reg: RegisterName) -> i32 {
    use RegisterName::*;
    match reg {
        Rax => 0,
        Rdx => 1,
        Rcx => 2,
        Rbx => 3,
        Rsi => 4,
        Rdi => 5,
        Rbp => 6,
        Rsp => 7,
        R8 => 8,
        R9 => 9,
        R10 => 10,
        R11 => 11,
        R12 => 12,
        R13 => 13,
        R14 => 14,
        R15 => 15,
        _ => unreachable!("xmm registers are never pushed/saved as GP CFI entries"),
    }
}

const DWARF_REG_RA: i32 = 16;
const DWARF_REG_XMM0: i32 = 17;

fn write_u64(stream: &mut Vec<u8>, v: u64) {
    stream.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(stream: &mut Vec<u8>, v: u32) {
    stream.extend_from_slice(&v.to_le_bytes());
}

fn write_u16(stream: &mut Vec<u8>, v: u16) {
    stream.extend_from_slice(&v.to_le_bytes());
}

fn write_u8(stream: &mut Vec<u8>, v: u8) {
    stream.push(v);
}

fn write_uleb128(stream: &mut Vec<u8>, mut v: u32) {
    loop {
        if v < 128 {
            write_u8(stream, v as u8);
            break;
        } else {
            write_u8(stream, ((v & 0x7f) | 0x80) as u8);
            v >>= 7;
        }
    }
}

fn write_sleb128(stream: &mut Vec<u8>, v: i32) {
    if v >= 0 {
        write_uleb128(stream, v as u32);
    } else {
        let mut v = v;
        loop {
            if v > -128 {
                write_u8(stream, (v & 0x7f) as u8);
                break;
            } else {
                write_u8(stream, v as u8);
                v >>= 7;
            }
        }
    }
}

fn write_padding(stream: &mut Vec<u8>) {
    let padding = stream.len() % 8;
    if padding != 0 {
        for _ in 0..(8 - padding) {
            write_u8(stream, 0);
        }
    }
}

fn write_length(stream: &mut [u8], pos: usize, v: u32) {
    stream[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_define_cfa(stream: &mut Vec<u8>, dwarf_reg_id: i32, stack_offset: i32) {
    write_u8(stream, 0x0c); // DW_CFA_def_cfa
    write_uleb128(stream, dwarf_reg_id as u32);
    write_uleb128(stream, stack_offset as u32);
}

fn write_define_stack_offset(stream: &mut Vec<u8>, stack_offset: i32) {
    write_u8(stream, 0x0e); // DW_CFA_def_cfa_offset
    write_uleb128(stream, stack_offset as u32);
}

fn write_register_stack_location(stream: &mut Vec<u8>, dwarf_reg_id: i32, stack_location: i32) {
    write_u8(stream, (2 << 6) | dwarf_reg_id as u8); // DW_CFA_offset
    write_uleb128(stream, stack_location as u32);
}

fn write_advance_loc(stream: &mut Vec<u8>, offset: i64, last_offset: &mut i64) {
    let delta = (offset - *last_offset) as u64;
    if delta < (1 << 6) {
        write_u8(stream, (1 << 6) | delta as u8); // DW_CFA_advance_loc
    } else if delta < (1 << 8) {
        write_u8(stream, 2); // DW_CFA_advance_loc1
        write_u8(stream, delta as u8);
    } else if delta < (1 << 16) {
        write_u8(stream, 3); // DW_CFA_advance_loc2
        write_u16(stream, delta as u16);
    } else {
        write_u8(stream, 4); // DW_CFA_advance_loc3 (delta truncated to u32, matching the original)
        write_u32(stream, delta as u32);
    }
    *last_offset = offset;
}

fn write_cie(stream: &mut Vec<u8>, cie_instructions: &[u8], return_address_reg: u8) {
    let length_pos = stream.len();
    write_u32(stream, 0); // length placeholder
    write_u32(stream, 0); // CIE ID

    write_u8(stream, 1); // CIE version
    write_u8(stream, b'z');
    write_u8(stream, b'R'); // fde encoding
    write_u8(stream, 0);
    write_uleb128(stream, 1);
    write_sleb128(stream, -1);
    write_uleb128(stream, return_address_reg as u32);

    write_uleb128(stream, 1); // augmentation data length
    write_u8(stream, 0); // DW_EH_PE_absptr

    stream.extend_from_slice(cie_instructions);

    write_padding(stream);
    let len = (stream.len() - length_pos - 4) as u32;
    write_length(stream, length_pos, len);
}

/// Writes one FDE and returns the stream offset of its (placeholder) `func
/// start` field, so the code holder can patch in the function's final
/// absolute start address and length once it is known.
fn write_fde(stream: &mut Vec<u8>, fde_instructions: &[u8], cie_location: u32) -> u32 {
    let length_pos = stream.len();
    write_u32(stream, 0); // length placeholder
    let offset_to_cie = (stream.len() as u32).wrapping_sub(cie_location);
    write_u32(stream, offset_to_cie);

    let function_start = stream.len() as u32;
    write_u64(stream, 0); // func start placeholder
    write_u64(stream, 0); // func size placeholder

    write_uleb128(stream, 0); // augmentation data length

    stream.extend_from_slice(fde_instructions);

    write_padding(stream);
    let len = (stream.len() - length_pos - 4) as u32;
    write_length(stream, length_pos, len);

    function_start
}

/// Build the `.eh_frame` CIE+FDE for one function's prolog. Returns the byte
/// stream and the stream offset at which the FDE's 8-byte function-start
/// field begins (the code holder patches in the absolute address once the
/// function's final position is known).
pub fn create_unix(func: &MachineFunction) -> (Vec<u8>, u32) {
    let mut cie_instructions = Vec::new();
    let mut fde_instructions = Vec::new();

    let return_address_reg = DWARF_REG_RA as u8;
    let mut stack_offset = 8i32; // CFA = rsp + 8 (the call return address slot)

    write_define_cfa(&mut cie_instructions, dwarf_reg_id(RegisterName::Rsp), stack_offset);
    write_register_stack_location(&mut cie_instructions, return_address_reg as i32, stack_offset);

    let mut last_offset = 0i64;
    for inst in &func.prolog.code {
        match inst.unwind_hint {
            MachineUnwindHint::PushNonvolatile => {
                stack_offset += 8;
                write_advance_loc(&mut fde_instructions, inst.unwind_offset as i64, &mut last_offset);
                write_define_stack_offset(&mut fde_instructions, stack_offset);
                let reg = match inst.operands[0] {
                    MachineOperand::Reg(r) => RegisterName::from_index(r),
                    _ => unreachable!(),
                };
                write_register_stack_location(&mut fde_instructions, dwarf_reg_id(reg), stack_offset);
            }
            MachineUnwindHint::StackAdjustment => {
                let stackadjust = match inst.operands[1] {
                    MachineOperand::Imm(v) => v as i32,
                    _ => unreachable!(),
                };
                stack_offset += stackadjust;
                write_advance_loc(&mut fde_instructions, inst.unwind_offset as i64, &mut last_offset);
                write_define_stack_offset(&mut fde_instructions, stack_offset);
            }
            MachineUnwindHint::RegisterStackLocation => {
                const VEC_SIZE: i32 = 16;
                let vec_offset = match inst.operands[0] {
                    MachineOperand::FrameOffset(off) => off,
                    _ => unreachable!(),
                };
                let xmm_index = match inst.operands[1] {
                    MachineOperand::Reg(r) => r - RegisterName::Xmm0.index() as i32,
                    _ => unreachable!(),
                };
                write_advance_loc(&mut fde_instructions, inst.unwind_offset as i64, &mut last_offset);
                write_register_stack_location(
                    &mut fde_instructions,
                    DWARF_REG_XMM0 + xmm_index,
                    stack_offset - vec_offset,
                );
            }
            MachineUnwindHint::SaveFrameRegister | MachineUnwindHint::None => {}
        }
    }

    let mut stream = Vec::new();
    write_cie(&mut stream, &cie_instructions, return_address_reg);
    let function_start = write_fde(&mut stream, &fde_instructions, 0);
    write_u32(&mut stream, 0); // terminating zero-length marker

    (stream, function_start)
}
