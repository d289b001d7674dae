//! Linear-scan register allocation with a most-recently-used spill policy
//! (spec.md §4.7).
//!
//! `allocate` walks an already-selected [`MachineFunction`] block by block,
//! assigning every virtual register operand a physical register or a stack
//! slot: every register operand is resolved on sight (`use_register`), a
//! per-block liveness pre-pass lets a virtual register be killed the instant
//! its last in-block reference is consumed, calls force every volatile
//! register to spill first, and conditional branches force a full
//! write-back so every successor observes the same machine state regardless
//! of which predecessor reached it. Ported from `RegisterAllocator::run` and
//! its private helpers, method for method.

use std::collections::HashSet;

use crate::ir::context::IRContext;
use crate::ir::value::FuncRef;
use crate::isa::machine::{
    MachineFunction, MachineInst, MachineInstOpcode, MachineOperand, MachineRegClass,
    MachineUnwindHint, EPILOG_BLOCK,
};
use crate::isa::registers::{RegisterName, VREG_START};

/// One pending live reference to a virtual register within a single basic
/// block. `refcount` counts repeated uses inside that block; `next` chains
/// to the reference for the following block that still uses it. Ported
/// from `RARegisterLiveReference`'s intrusive linked list.
struct LiveReference {
    bb: usize,
    refcount: u32,
    next: Option<Box<LiveReference>>,
}

impl LiveReference {
    fn new(bb: usize) -> LiveReference {
        LiveReference {
            bb,
            refcount: 1,
            next: None,
        }
    }
}

/// Per-register bookkeeping, indexed in parallel with
/// `MachineFunction::registers`: entries below `VREG_START` track what a
/// physical register currently holds, entries from `VREG_START` on track
/// where a virtual register currently lives.
struct RegisterInfo {
    cls: MachineRegClass,
    /// Physical-register entry: the virtual register resident here, or -1.
    vreg: i32,
    /// Virtual-register entry: the physical register it's resident in, or
    /// -1 if currently spilled/unassigned.
    physreg: i32,
    stack_location: MachineOperand,
    modified: bool,
    stackvar: bool,
    name: Option<String>,
    live_references: Option<Box<LiveReference>>,
}

impl RegisterInfo {
    fn new(cls: MachineRegClass) -> RegisterInfo {
        RegisterInfo {
            cls,
            vreg: -1,
            physreg: -1,
            stack_location: MachineOperand::SpillOffset(-1),
            modified: false,
            stackvar: false,
            name: None,
            live_references: None,
        }
    }
}

/// A register class's most-recently-used order: the back is the most
/// recently used physical register of this class, the front the least.
/// The original keeps a `std::list` plus a per-register stored iterator for
/// O(1) reordering; register counts here are small enough (at most 16 per
/// class) that a `Vec` with linear search is simpler and just as fast.
#[derive(Default)]
struct RegClassMru {
    order: Vec<i32>,
}

impl RegClassMru {
    fn remove(&mut self, pregindex: i32) {
        if let Some(pos) = self.order.iter().position(|&r| r == pregindex) {
            self.order.remove(pos);
        }
    }

    fn push_back(&mut self, pregindex: i32) {
        self.order.push(pregindex);
    }

    fn push_front(&mut self, pregindex: i32) {
        self.order.insert(0, pregindex);
    }

    fn least_recently_used(&self) -> i32 {
        self.order[0]
    }
}

fn is_div_opcode(op: MachineInstOpcode) -> bool {
    use MachineInstOpcode::*;
    matches!(op, Idiv64 | Idiv32 | Idiv16 | Idiv8 | Div64 | Div32 | Div16 | Div8)
}

/// `updateModifiedStatus`'s opcode exclusion list: these write their first
/// operand without it counting as a "modification" the allocator must ever
/// write back (a pure store, a comparison, a control-flow instruction, a
/// push/pop, or a divide whose outputs are handled explicitly by
/// `div_binary`/`select_call` elsewhere).
fn skips_modified_update(op: MachineInstOpcode) -> bool {
    use MachineInstOpcode::*;
    matches!(
        op,
        Nop | Storess
            | Storesd
            | Store64
            | Store32
            | Store16
            | Store8
            | Idiv64
            | Idiv32
            | Idiv16
            | Idiv8
            | Div64
            | Div32
            | Div16
            | Div8
            | Ucomisd
            | Ucomiss
            | Cmp64
            | Cmp32
            | Cmp16
            | Cmp8
            | Jmp
            | Je
            | Jne
            | Call
            | Ret
            | Push
            | Pop
    )
}

fn mov_op_for(cls: MachineRegClass) -> MachineInstOpcode {
    if cls == MachineRegClass::Xmm {
        MachineInstOpcode::Movsd
    } else {
        MachineInstOpcode::Mov64
    }
}

fn load_op_for(cls: MachineRegClass) -> MachineInstOpcode {
    if cls == MachineRegClass::Xmm {
        MachineInstOpcode::Loadsd
    } else {
        MachineInstOpcode::Load64
    }
}

fn store_op_for(cls: MachineRegClass) -> MachineInstOpcode {
    if cls == MachineRegClass::Xmm {
        MachineInstOpcode::Storesd
    } else {
        MachineInstOpcode::Store64
    }
}

fn reg_op(index: i32) -> MachineOperand {
    MachineOperand::Reg(index)
}

/// Allocate physical registers and stack slots for `mfunc`, emitting spill
/// and reload code, the call-site volatile-register save sequence, prolog
/// and epilog, in place.
pub fn allocate(ctx: &IRContext, func_ref: FuncRef, mfunc: &mut MachineFunction) {
    let func = ctx.function(func_ref);
    let num_args = ctx.func_type_data(func.func_type).params.len();
    let mut ra = RegisterAllocator::new(mfunc, num_args);
    ra.run();
}

struct RegisterAllocator<'a> {
    func: &'a mut MachineFunction,
    num_args: usize,
    reginfo: Vec<RegisterInfo>,
    /// Indexed by `MachineRegClass::Gp as usize` / `MachineRegClass::Xmm as
    /// usize`.
    regclass: [RegClassMru; 2],
    next_spill_offset: i32,
    free_spill_offsets: Vec<i32>,
    volatile_regs: Vec<RegisterName>,
    used_regs: HashSet<RegisterName>,
    emitted_instructions: Vec<MachineInst>,
}

impl<'a> RegisterAllocator<'a> {
    fn new(func: &'a mut MachineFunction, num_args: usize) -> RegisterAllocator<'a> {
        RegisterAllocator {
            func,
            num_args,
            reginfo: Vec::new(),
            regclass: [RegClassMru::default(), RegClassMru::default()],
            next_spill_offset: 0,
            free_spill_offsets: Vec::new(),
            volatile_regs: Vec::new(),
            used_regs: HashSet::new(),
            emitted_instructions: Vec::new(),
        }
    }

    fn run(&mut self) {
        self.create_register_info();
        self.run_live_analysis();

        #[cfg(target_os = "windows")]
        self.setup_args_win64();
        #[cfg(not(target_os = "windows"))]
        self.setup_args_unix64();

        self.alloc_stack_vars();

        for i in 0..self.func.basic_blocks.len() {
            let code = std::mem::take(&mut self.func.basic_blocks[i].code);
            for mut inst in code {
                for j in 0..inst.operands.len() {
                    if let MachineOperand::Reg(_) = inst.operands[j] {
                        self.use_register(&mut inst.operands[j]);
                    }
                }

                for operand in &inst.operands {
                    if let MachineOperand::Reg(pregindex) = *operand {
                        let vregindex = self.reginfo[pregindex as usize].vreg;
                        if vregindex != -1 {
                            let kill = match &self.reginfo[vregindex as usize].live_references {
                                Some(live) => live.bb == i && live.next.is_none(),
                                None => false,
                            };
                            if kill {
                                let live = self.reginfo[vregindex as usize]
                                    .live_references
                                    .as_mut()
                                    .unwrap();
                                live.refcount -= 1;
                                if live.refcount == 0 {
                                    self.kill_virt_register(vregindex);
                                }
                            }
                        }
                    }
                }

                if is_div_opcode(inst.opcode) {
                    self.used_regs.insert(RegisterName::Rax);
                    self.used_regs.insert(RegisterName::Rdx);
                }

                self.update_modified_status(&inst);

                if inst.opcode == MachineInstOpcode::Call {
                    for regname in self.volatile_regs.clone() {
                        let pregindex = regname.index() as i32;
                        let vregindex = self.reginfo[pregindex as usize].vreg;
                        if vregindex != -1 {
                            self.assign_virt_to_stack_slot(vregindex);
                            self.set_as_least_recently_used(pregindex);
                        }
                    }

                    // Avoid a redundant `mov rax,rax` / `mov xmm0,xmm0` on
                    // the very next instruction.
                    self.set_as_most_recently_used(RegisterName::Rax.index() as i32);
                    self.set_as_most_recently_used(RegisterName::Xmm0.index() as i32);
                }

                if inst.opcode == MachineInstOpcode::Je || inst.opcode == MachineInstOpcode::Jne {
                    self.assign_all_to_stack();
                } else if inst.opcode == MachineInstOpcode::Jmp {
                    if matches!(inst.operands[0], MachineOperand::BasicBlock(b) if b == EPILOG_BLOCK) {
                        self.set_all_to_stack();
                    } else {
                        self.assign_all_to_stack();
                    }
                }

                if inst.opcode == MachineInstOpcode::Jmp
                    && i + 1 < self.func.basic_blocks.len()
                    && matches!(inst.operands[0], MachineOperand::BasicBlock(b) if b == i + 1)
                {
                    continue;
                }

                self.emitted_instructions.push(inst);
            }

            self.func.basic_blocks[i].code = std::mem::take(&mut self.emitted_instructions);
        }

        for reg in &self.volatile_regs {
            self.used_regs.remove(reg);
        }
        self.used_regs.remove(&RegisterName::Rsp);
        if self.func.dynamic_stack_allocations {
            self.used_regs.insert(RegisterName::Rbp);
        }

        let mut used: Vec<RegisterName> = self.used_regs.iter().copied().collect();
        used.sort_by_key(|r| r.index());

        let xmm0_index = RegisterName::Xmm0.index();
        let saved_regs: Vec<RegisterName> = used.iter().copied().filter(|r| r.index() < xmm0_index).collect();
        let saved_xmm_regs: Vec<RegisterName> = used.iter().copied().filter(|r| r.index() >= xmm0_index).collect();

        // [funcargs] [retaddr] <framebase> [save/spill area] <spillbase> [dsa/alloca area] [callargs] <rsp>

        let call_return_addr = 8i32;
        let push_stack_adjustment = saved_regs.len() as i32 * 8;
        let mut spill_area_size = saved_xmm_regs.len() as i32 * 16 + self.next_spill_offset;
        let callargs_size = (self.func.max_call_args_size + 15) / 16 * 16;

        if saved_regs.len() % 2 == 0 {
            // xmm saves must land on a 16-byte boundary.
            spill_area_size += 8;
        }

        // rsp is 16-byte aligned plus 8 bytes (the call return address) on
        // entry to the prolog; the alloca/dynamic area must be 16-byte
        // aligned, so the return address, pushes, and spill area together
        // must land on a 16-byte boundary.
        let alloca_start = (call_return_addr + push_stack_adjustment + spill_area_size + 15) / 16 * 16;
        spill_area_size = alloca_start - push_stack_adjustment - call_return_addr;

        let frame_size = push_stack_adjustment + spill_area_size + callargs_size;
        let frame_stack_adjustment = frame_size - push_stack_adjustment;

        self.func.frame_base_offset = frame_size;
        self.func.spill_base_offset = callargs_size;

        let dsa = self.func.dynamic_stack_allocations;
        self.emit_prolog(&saved_regs, &saved_xmm_regs, frame_stack_adjustment, dsa);
        self.emit_epilog(&saved_regs, &saved_xmm_regs, frame_stack_adjustment, dsa);
    }

    fn update_modified_status(&mut self, inst: &MachineInst) {
        if inst.operands.is_empty() {
            return;
        }
        let pregindex = match inst.operands[0] {
            MachineOperand::Reg(r) => r,
            _ => return,
        };
        if skips_modified_update(inst.opcode) {
            return;
        }
        let vregindex = self.reginfo[pregindex as usize].vreg;
        if vregindex != -1 {
            self.reginfo[vregindex as usize].modified = true;
        }
    }

    fn emit_prolog(
        &mut self,
        saved_regs: &[RegisterName],
        saved_xmm_regs: &[RegisterName],
        stack_adjustment: i32,
        dsa: bool,
    ) {
        for &physreg in saved_regs {
            let mut inst = MachineInst::new(MachineInstOpcode::Push);
            inst.operands.push(reg_op(physreg.index() as i32));
            inst.unwind_hint = MachineUnwindHint::PushNonvolatile;
            self.func.prolog.code.push(inst);
        }

        if stack_adjustment > 0 {
            let mut inst = MachineInst::new(MachineInstOpcode::Sub64);
            inst.operands.push(reg_op(RegisterName::Rsp.index() as i32));
            inst.operands.push(MachineOperand::Imm(stack_adjustment as u64));
            inst.unwind_hint = MachineUnwindHint::StackAdjustment;
            self.func.prolog.code.push(inst);
        }

        let mut xmm_start_offset = -(saved_regs.len() as i32) * 8;
        if saved_regs.len() % 2 == 0 {
            xmm_start_offset -= 8;
        }

        for (i, &physreg) in saved_xmm_regs.iter().enumerate() {
            let i = i as i32 + 1;
            let mut inst = MachineInst::new(MachineInstOpcode::Movdqa);
            inst.operands.push(MachineOperand::FrameOffset(xmm_start_offset - i * 16));
            inst.operands.push(reg_op(physreg.index() as i32));
            inst.unwind_hint = MachineUnwindHint::RegisterStackLocation;
            self.func.prolog.code.push(inst);
        }

        if dsa {
            let mut inst = MachineInst::new(MachineInstOpcode::Mov64);
            inst.operands.push(reg_op(RegisterName::Rbp.index() as i32));
            inst.operands.push(reg_op(RegisterName::Rsp.index() as i32));
            inst.unwind_hint = MachineUnwindHint::SaveFrameRegister;
            self.func.prolog.code.push(inst);
        }
    }

    fn emit_epilog(
        &mut self,
        saved_regs: &[RegisterName],
        saved_xmm_regs: &[RegisterName],
        stack_adjustment: i32,
        dsa: bool,
    ) {
        if dsa {
            let mut inst = MachineInst::new(MachineInstOpcode::Mov64);
            inst.operands.push(reg_op(RegisterName::Rsp.index() as i32));
            inst.operands.push(reg_op(RegisterName::Rbp.index() as i32));
            self.func.epilog.code.push(inst);
        }

        let mut xmm_start_offset = -(saved_regs.len() as i32) * 8;
        if saved_regs.len() % 2 == 0 {
            xmm_start_offset -= 8;
        }

        for (i, &physreg) in saved_xmm_regs.iter().enumerate() {
            let i = i as i32 + 1;
            let mut inst = MachineInst::new(MachineInstOpcode::Movdqa);
            inst.operands.push(reg_op(physreg.index() as i32));
            inst.operands.push(MachineOperand::FrameOffset(xmm_start_offset - i * 16));
            self.func.epilog.code.push(inst);
        }

        if stack_adjustment > 0 {
            let mut inst = MachineInst::new(MachineInstOpcode::Add64);
            inst.operands.push(reg_op(RegisterName::Rsp.index() as i32));
            inst.operands.push(MachineOperand::Imm(stack_adjustment as u64));
            self.func.epilog.code.push(inst);
        }

        for &physreg in saved_regs.iter().rev() {
            let mut inst = MachineInst::new(MachineInstOpcode::Pop);
            inst.operands.push(reg_op(physreg.index() as i32));
            self.func.epilog.code.push(inst);
        }

        self.func.epilog.code.push(MachineInst::new(MachineInstOpcode::Ret));
    }

    fn create_register_info(&mut self) {
        self.reginfo = self
            .func
            .registers
            .iter()
            .map(|&cls| RegisterInfo::new(cls))
            .collect();

        for i in 0..VREG_START {
            if self.reginfo[i].cls != MachineRegClass::Reserved {
                let cls_index = self.reginfo[i].cls as usize;
                self.regclass[cls_index].push_back(i as i32);
            }
        }
    }

    fn alloc_stack_vars(&mut self) {
        for stackvar in self.func.stackvars.clone() {
            let vreg = &mut self.reginfo[stackvar.register_index as usize];
            vreg.stack_location = MachineOperand::SpillOffset(self.next_spill_offset);
            vreg.stackvar = true;
            vreg.name = Some(stackvar.name.clone());
            self.next_spill_offset += stackvar.size as i32;
        }
    }

    fn set_all_to_stack(&mut self) {
        for i in 0..self.reginfo.len() {
            if self.reginfo[i].physreg != -1 {
                let physreg = self.reginfo[i].physreg;
                self.reginfo[physreg as usize].vreg = -1;
                self.reginfo[i].physreg = -1;
            }
        }
    }

    fn assign_all_to_stack(&mut self) {
        for vregindex in VREG_START..self.reginfo.len() {
            self.assign_virt_to_stack_slot(vregindex as i32);
        }
    }

    fn use_register(&mut self, operand: &mut MachineOperand) {
        let regindex = match *operand {
            MachineOperand::Reg(r) => r,
            _ => return,
        };

        if (regindex as usize) < VREG_START {
            let pregindex = regindex;
            let vregindex = self.reginfo[pregindex as usize].vreg;
            if vregindex != -1 {
                self.assign_virt_to_stack_slot(vregindex);
            }
            self.set_as_most_recently_used(pregindex);
        } else {
            let vregindex = regindex;
            if self.reginfo[vregindex as usize].physreg == -1 {
                let cls = self.reginfo[vregindex as usize].cls;
                let pregindex = self.get_least_recently_used(cls);
                self.assign_virt_to_phys(vregindex, pregindex);
            }
            let physreg = self.reginfo[vregindex as usize].physreg;
            self.set_as_most_recently_used(physreg);
            *operand = MachineOperand::Reg(physreg);
        }
    }

    fn kill_virt_register(&mut self, vregindex: i32) {
        let physreg = self.reginfo[vregindex as usize].physreg;
        if physreg != -1 {
            self.reginfo[physreg as usize].vreg = -1;
            self.reginfo[vregindex as usize].physreg = -1;
            self.set_as_least_recently_used(physreg);
        }

        if let MachineOperand::SpillOffset(off) = self.reginfo[vregindex as usize].stack_location {
            if off != -1 {
                self.free_spill_offsets.push(off);
            }
        }
    }

    /// `assignVirt2Phys`: make `vregindex` resident in `pregindex`, spilling
    /// whatever's currently there and emitting whatever reload/rematerialize
    /// instruction is needed to bring `vregindex` back to life.
    fn assign_virt_to_phys(&mut self, vregindex: i32, pregindex: i32) {
        if self.reginfo[pregindex as usize].vreg == vregindex {
            return;
        }

        let occupant = self.reginfo[pregindex as usize].vreg;
        if occupant != -1 {
            self.assign_virt_to_stack_slot(occupant);
        }

        self.used_regs.insert(RegisterName::from_index(pregindex));

        let vreg_physreg = self.reginfo[vregindex as usize].physreg;
        let vreg_spill = match self.reginfo[vregindex as usize].stack_location {
            MachineOperand::SpillOffset(off) => off,
            _ => -1,
        };

        if vreg_physreg == -1 && vreg_spill == -1 {
            // First time this vreg is materialized: no prior value exists
            // anywhere, so just claim the register.
            self.reginfo[vregindex as usize].physreg = pregindex;
            self.reginfo[pregindex as usize].vreg = vregindex;
        } else if self.reginfo[vregindex as usize].stackvar {
            let dest = reg_op(pregindex);
            let src = self.reginfo[vregindex as usize].stack_location;
            let mut inst = MachineInst::new(MachineInstOpcode::Lea);
            inst.operands.push(dest);
            inst.operands.push(src);
            inst.comment = format!("ptr {}", self.vreg_name(vregindex));
            self.emitted_instructions.push(inst);

            self.reginfo[pregindex as usize].vreg = vregindex;
            self.reginfo[vregindex as usize].physreg = pregindex;
        } else if vreg_physreg == -1 {
            let dest = reg_op(pregindex);
            let src = self.reginfo[vregindex as usize].stack_location;
            let cls = self.reginfo[vregindex as usize].cls;
            let mut inst = MachineInst::new(load_op_for(cls));
            inst.operands.push(dest);
            inst.operands.push(src);
            inst.comment = format!("load {}", self.vreg_name(vregindex));
            self.emitted_instructions.push(inst);

            self.reginfo[pregindex as usize].vreg = vregindex;
            self.reginfo[vregindex as usize].physreg = pregindex;
        } else {
            let dest = reg_op(pregindex);
            let src = reg_op(vreg_physreg);
            let cls = self.reginfo[vregindex as usize].cls;
            let mut inst = MachineInst::new(mov_op_for(cls));
            inst.operands.push(dest);
            inst.operands.push(src);
            inst.comment = format!("move {}", self.vreg_name(vregindex));
            self.emitted_instructions.push(inst);

            self.reginfo[vreg_physreg as usize].vreg = -1;
            self.reginfo[pregindex as usize].vreg = vregindex;
            self.reginfo[vregindex as usize].physreg = pregindex;
        }
    }

    /// `assignVirt2StackSlot`: evict `vregindex` from whatever physical
    /// register it occupies, writing it back to its spill slot if it was
    /// modified since the last time it was spilled.
    fn assign_virt_to_stack_slot(&mut self, vregindex: i32) {
        let physreg = self.reginfo[vregindex as usize].physreg;
        if physreg == -1 {
            return;
        }

        if self.reginfo[vregindex as usize].modified {
            let existing_offset = match self.reginfo[vregindex as usize].stack_location {
                MachineOperand::SpillOffset(off) => off,
                _ => -1,
            };
            if existing_offset == -1 {
                let offset = if let Some(off) = self.free_spill_offsets.pop() {
                    off
                } else {
                    let off = self.next_spill_offset;
                    self.next_spill_offset += 8;
                    off
                };
                self.reginfo[vregindex as usize].stack_location = MachineOperand::SpillOffset(offset);
            }

            let dest = self.reginfo[vregindex as usize].stack_location;
            let src = reg_op(physreg);
            let cls = self.reginfo[vregindex as usize].cls;
            let mut inst = MachineInst::new(store_op_for(cls));
            inst.operands.push(dest);
            inst.operands.push(src);
            inst.comment = format!("save {}", self.vreg_name(vregindex));
            self.emitted_instructions.push(inst);

            self.reginfo[vregindex as usize].modified = false;
        }

        self.reginfo[physreg as usize].vreg = -1;
        self.reginfo[vregindex as usize].physreg = -1;
    }

    fn set_as_most_recently_used(&mut self, pregindex: i32) {
        if self.reginfo[pregindex as usize].cls != MachineRegClass::Reserved {
            let cls_index = self.reginfo[pregindex as usize].cls as usize;
            self.regclass[cls_index].remove(pregindex);
            self.regclass[cls_index].push_back(pregindex);
        }
    }

    fn set_as_least_recently_used(&mut self, pregindex: i32) {
        if self.reginfo[pregindex as usize].cls != MachineRegClass::Reserved {
            let cls_index = self.reginfo[pregindex as usize].cls as usize;
            self.regclass[cls_index].remove(pregindex);
            self.regclass[cls_index].push_front(pregindex);
        }
    }

    fn get_least_recently_used(&self, cls: MachineRegClass) -> i32 {
        self.regclass[cls as usize].least_recently_used()
    }

    fn run_live_analysis(&mut self) {
        for i in 0..self.func.basic_blocks.len() {
            for inst in self.func.basic_blocks[i].code.clone() {
                for operand in &inst.operands {
                    if let MachineOperand::Reg(r) = *operand {
                        self.add_live_reference(r as usize, i);
                    }
                }
            }
        }
    }

    fn add_live_reference(&mut self, vregindex: usize, bb: usize) {
        let vreg = &mut self.reginfo[vregindex];
        match &mut vreg.live_references {
            Some(head) => {
                let mut node = head.as_mut();
                loop {
                    if node.bb == bb {
                        node.refcount += 1;
                        return;
                    }
                    if node.next.is_none() {
                        node.next = Some(Box::new(LiveReference::new(bb)));
                        return;
                    }
                    node = node.next.as_mut().unwrap();
                }
            }
            None => {
                vreg.live_references = Some(Box::new(LiveReference::new(bb)));
            }
        }
    }

    #[cfg(target_os = "windows")]
    fn setup_args_win64(&mut self) {
        const REGISTER_ARGS: [RegisterName; 4] =
            [RegisterName::Rcx, RegisterName::Rdx, RegisterName::R8, RegisterName::R9];
        const NUM_REGISTER_ARGS: usize = 4;

        let mut frame_offset = 8i32;

        for i in 0..self.num_args {
            let vregindex = VREG_START + i;

            self.reginfo[vregindex].stack_location = MachineOperand::FrameOffset(frame_offset);
            frame_offset += 8;

            if i < NUM_REGISTER_ARGS {
                let pregindex = if self.reginfo[vregindex].cls == MachineRegClass::Gp {
                    REGISTER_ARGS[i].index() as i32
                } else {
                    RegisterName::Xmm0.index() as i32 + i as i32
                };

                self.reginfo[vregindex].modified = true;
                self.reginfo[vregindex].physreg = pregindex;
                self.reginfo[pregindex as usize].vreg = vregindex as i32;

                self.set_as_most_recently_used(pregindex);
            }
        }

        self.volatile_regs = vec![
            RegisterName::Rax,
            RegisterName::Rcx,
            RegisterName::Rdx,
            RegisterName::R8,
            RegisterName::R9,
            RegisterName::R10,
            RegisterName::R11,
            RegisterName::Xmm0,
            RegisterName::Xmm1,
            RegisterName::Xmm2,
            RegisterName::Xmm3,
            RegisterName::Xmm4,
            RegisterName::Xmm5,
        ];
    }

    #[cfg(not(target_os = "windows"))]
    fn setup_args_unix64(&mut self) {
        const REGISTER_ARGS: [RegisterName; 6] = [
            RegisterName::Rdi,
            RegisterName::Rsi,
            RegisterName::Rdx,
            RegisterName::Rcx,
            RegisterName::R8,
            RegisterName::R9,
        ];
        const NUM_REGISTER_ARGS: usize = 6;
        const NUM_XMM_REGISTER_ARGS: usize = 8;
        let mut next_register_arg = 0usize;
        let mut next_xmm_register_arg = 0usize;

        let mut frame_offset = 8i32;

        for i in 0..self.num_args {
            let vregindex = VREG_START + i;

            if self.reginfo[vregindex].cls == MachineRegClass::Gp {
                if next_register_arg < NUM_REGISTER_ARGS {
                    let pregindex = REGISTER_ARGS[next_register_arg].index() as i32;
                    next_register_arg += 1;
                    self.reginfo[vregindex].physreg = pregindex;
                    self.reginfo[pregindex as usize].vreg = vregindex as i32;
                    self.set_as_most_recently_used(pregindex);
                } else {
                    self.reginfo[vregindex].stack_location = MachineOperand::FrameOffset(frame_offset);
                    frame_offset += 8;
                }
            } else if next_xmm_register_arg < NUM_XMM_REGISTER_ARGS {
                let pregindex = RegisterName::Xmm0.index() as i32 + next_xmm_register_arg as i32;
                next_xmm_register_arg += 1;
                self.reginfo[vregindex].physreg = pregindex;
                self.reginfo[pregindex as usize].vreg = vregindex as i32;
                self.set_as_most_recently_used(pregindex);
            } else {
                self.reginfo[vregindex].stack_location = MachineOperand::FrameOffset(frame_offset);
                frame_offset += 8;
            }
        }

        self.volatile_regs = vec![
            RegisterName::Rax,
            RegisterName::Rcx,
            RegisterName::Rdx,
            RegisterName::Rdi,
            RegisterName::Rsi,
            RegisterName::Xmm0,
            RegisterName::Xmm1,
            RegisterName::Xmm2,
            RegisterName::Xmm3,
            RegisterName::Xmm4,
            RegisterName::Xmm5,
            RegisterName::Xmm6,
            RegisterName::Xmm7,
            RegisterName::Xmm8,
            RegisterName::Xmm9,
            RegisterName::Xmm10,
            RegisterName::Xmm11,
            RegisterName::Xmm12,
            RegisterName::Xmm13,
            RegisterName::Xmm14,
            RegisterName::Xmm15,
        ];
    }

    fn vreg_name(&self, vregindex: i32) -> String {
        match &self.reginfo[vregindex as usize].name {
            Some(name) => name.clone(),
            None => format!("vreg{vregindex}"),
        }
    }
}
