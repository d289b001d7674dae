//! Instruction selection: IR to machine instructions (spec.md §4.6).
//!
//! `codegen` walks one [`IRFunction`] in a reachability-ordered layout and
//! produces a [`MachineFunction`] still addressed through virtual
//! registers. Each `InstData` variant lowers through its own size-indexed
//! opcode table, following `MachineInstSelection::inst` method-for-method;
//! the shared shapes (`simpleBinaryInst`, `shiftBinaryInst`, `divBinaryInst`,
//! `simpleCompareInst`) are ported as the private helpers below with the
//! same names.

use std::collections::HashMap;

use crate::ir::context::IRContext;
use crate::ir::entities::{Block, Inst};
use crate::ir::function::IRFunction;
use crate::ir::instruction::{BinOp, CastOp, CmpOp, InstData, UnOp};
use crate::ir::types::Type;
use crate::ir::validator::operand_type;
use crate::ir::value::{FuncRef, Operand};
use crate::isa::abi::{self, CallAbi};
use crate::isa::machine::{
    MachineBasicBlock, MachineConstant, MachineFunction, MachineInst, MachineInstOpcode,
    MachineOperand, MachineRegClass, MachineStackAlloc,
};
use crate::isa::registers::{RegisterName, PHYSICAL_REGISTER_COUNT, VREG_START};

/// `getDataSizeType`: buckets a type into the index used by every
/// size-indexed opcode table in this module: `{double, float, 64, 32, 16,
/// 8}`.
fn data_size_type(ty: &Type) -> usize {
    match ty {
        Type::Int32 => 3,
        Type::Float => 1,
        Type::Double => 0,
        Type::Int16 => 4,
        Type::Int8 | Type::Int1 => 5,
        _ => 2, // Int64, Pointer, Function
    }
}

fn reg_class_for(ty: &Type) -> MachineRegClass {
    if data_size_type(ty) < 2 {
        MachineRegClass::Xmm
    } else {
        MachineRegClass::Gp
    }
}

/// DFS block order following `br`/`condbr` targets from the entry block,
/// dropping anything never reached (spec.md §4.6; ported from
/// `IRFunction::sortBasicBlocks`, applied against a local copy of the block
/// list rather than mutating `func` since a function is only ever selected
/// once per JIT build).
fn sort_reachable_blocks(func: &IRFunction) -> Vec<Block> {
    let order = func.block_order();
    if order.is_empty() {
        return Vec::new();
    }

    let mut seen = std::collections::HashSet::new();
    let mut sorted = Vec::with_capacity(order.len());
    let mut stack = vec![order[0]];

    while let Some(block) = stack.pop() {
        if !seen.insert(block) {
            continue;
        }
        sorted.push(block);

        if let Some(&last) = func.block(block).insts.last() {
            match &func.inst(last).data {
                InstData::CondBr {
                    if_true, if_false, ..
                } => {
                    stack.push(*if_false);
                    stack.push(*if_true);
                }
                InstData::Br { target } => stack.push(*target),
                _ => {}
            }
        }
    }

    sorted
}

fn lowered_value_type(data: &InstData) -> Type {
    match data {
        InstData::Cast { to, .. } => to.clone(),
        InstData::Binary { .. } => Type::Int64,
        other => unreachable!("GEP lowering only ever emits Cast/Binary, got {:?}", other),
    }
}

/// Selector state for one function. Most fields mirror
/// `MachineInstSelection`'s member variables directly.
pub struct Selector<'a> {
    ctx: &'a IRContext,
    func: &'a IRFunction,
    pub(crate) mfunc: MachineFunction,
    /// Index of the basic block currently being selected into.
    bb: usize,
    /// The IR block `bb` corresponds to; used by `emit_phi` to find the
    /// predecessor-specific incoming value.
    irbb: Block,
    bb_map: HashMap<Block, usize>,
    /// `IR value -> MachineOperand`. Shared by real instruction results
    /// (`Operand::Inst`/`Operand::Arg`) and, transiently, by one GEP's own
    /// `Operand::Lowered` sub-results — safe to share because a GEP only
    /// ever references its own `Lowered` indices while it itself is being
    /// selected, never afterward (see `crate::ir::gep`).
    inst_register: HashMap<Operand, MachineOperand>,
    /// Result types of the `Lowered` sub-instructions of whichever GEP is
    /// currently being selected, in order; empty outside GEP selection.
    lowered_types: Vec<Type>,
    debug_comment: String,
    debug_file_index: i32,
    debug_line_number: i32,
    abi: Box<dyn CallAbi>,
}

/// Run instruction selection over `func_ref` and return the resulting
/// machine function.
pub fn codegen(ctx: &IRContext, func_ref: FuncRef) -> MachineFunction {
    let func = ctx.function(func_ref);
    let blocks = sort_reachable_blocks(func);

    let mut mfunc = MachineFunction::new(func.name.clone());
    for cls in [
        MachineRegClass::Gp,       // rax
        MachineRegClass::Gp,       // rcx
        MachineRegClass::Gp,       // rdx
        MachineRegClass::Gp,       // rbx
        MachineRegClass::Reserved, // rsp
        MachineRegClass::Gp,       // rbp
        MachineRegClass::Gp,       // rsi
        MachineRegClass::Gp,       // rdi
        MachineRegClass::Gp,       // r8
        MachineRegClass::Gp,       // r9
        MachineRegClass::Gp,       // r10
        MachineRegClass::Gp,       // r11
        MachineRegClass::Gp,       // r12
        MachineRegClass::Gp,       // r13
        MachineRegClass::Gp,       // r14
        MachineRegClass::Gp,       // r15
    ] {
        mfunc.registers.push(cls);
    }
    for _ in 0..16 {
        mfunc.registers.push(MachineRegClass::Xmm); // xmm0..xmm15
    }
    debug_assert_eq!(mfunc.registers.len(), PHYSICAL_REGISTER_COUNT);
    mfunc.registers.resize(VREG_START, MachineRegClass::Reserved);

    let mut sel = Selector {
        ctx,
        func,
        mfunc,
        bb: 0,
        irbb: blocks[0],
        bb_map: HashMap::new(),
        inst_register: HashMap::new(),
        lowered_types: Vec::new(),
        debug_comment: String::new(),
        debug_file_index: -1,
        debug_line_number: -1,
        abi: abi::native_abi(),
    };

    sel.find_max_call_args_size(&blocks);

    let param_tys = ctx.func_type_data(func.func_type).params.clone();
    for (i, ty) in param_tys.iter().enumerate() {
        sel.new_reg(Operand::Arg(i as u32), ty);
    }

    for &block in &blocks {
        let idx = sel.mfunc.basic_blocks.len();
        sel.mfunc.basic_blocks.push(MachineBasicBlock::default());
        sel.bb_map.insert(block, idx);
    }

    for &inst in &func.stack_vars.clone() {
        if let InstData::Alloca {
            elem_ty,
            array_size,
            name,
        } = func.inst(inst).data.clone()
        {
            let array_size = match array_size {
                Operand::ConstInt(r) => ctx.const_int_data(r).value,
                _ => 1,
            };
            let mut size = elem_ty.alloc_size(ctx) as u64 * array_size;
            size = (size + 15) / 16 * 16;

            let dst = sel.new_reg(Operand::Inst(inst), &Type::Pointer(Box::new(elem_ty)));
            let register_index = match dst {
                MachineOperand::Reg(r) => r,
                _ => unreachable!(),
            };
            sel.mfunc.stackvars.push(MachineStackAlloc {
                register_index,
                size,
                name,
            });
        }
    }

    for &block in &blocks {
        for &inst in &func.block(block).insts {
            match &func.inst(inst).data {
                InstData::Phi { .. } => {
                    let ty = func.inst_type(inst).clone();
                    sel.new_reg(Operand::Inst(inst), &ty);
                }
                _ => break,
            }
        }
    }

    for &block in &blocks {
        sel.bb = sel.bb_map[&block];
        sel.irbb = block;
        for &inst in &func.block(block).insts.clone() {
            let node = func.inst(inst);
            sel.debug_comment = node.comment.clone();
            sel.debug_file_index = node.file_index;
            sel.debug_line_number = node.line_number;
            let data = node.data.clone();
            let ty = node.ty.clone();
            sel.select(Operand::Inst(inst), &data, &ty);
        }
    }

    sel.mfunc
}

impl<'a> Selector<'a> {
    fn current_bb_mut(&mut self) -> &mut MachineBasicBlock {
        &mut self.mfunc.basic_blocks[self.bb]
    }

    fn add_debug_info(&self, inst: &mut MachineInst) {
        inst.comment = self.debug_comment.clone();
        inst.file_index = self.debug_file_index;
        inst.line_number = self.debug_line_number;
    }

    fn emit(&mut self, opcode: MachineInstOpcode, operands: Vec<MachineOperand>) {
        let mut inst = MachineInst::new(opcode);
        self.add_debug_info(&mut inst);
        inst.operands = operands;
        self.current_bb_mut().code.push(inst);
    }

    fn emit_bb_target(&mut self, opcode: MachineInstOpcode, target: Block) {
        let mbb = self.bb_map[&target];
        self.emit(opcode, vec![MachineOperand::BasicBlock(mbb)]);
    }

    fn is_constant_int(&self, op: Operand) -> bool {
        matches!(op, Operand::ConstInt(_))
    }

    fn is_constant_fp(&self, op: Operand) -> bool {
        matches!(op, Operand::ConstFP(_))
    }

    fn is_global(&self, op: Operand) -> bool {
        matches!(op, Operand::Global(_))
    }

    fn const_int_value(&self, op: Operand) -> u64 {
        match op {
            Operand::ConstInt(r) => self.ctx.const_int_data(r).value,
            _ => 0,
        }
    }

    fn const_fp_value(&self, op: Operand) -> f64 {
        match op {
            Operand::ConstFP(r) => self.ctx.const_fp_data(r).value,
            _ => 0.0,
        }
    }

    fn operand_type(&self, op: Operand) -> Type {
        operand_type(self.ctx, self.func, &self.lowered_types, op)
    }

    fn operand_data_size_type(&self, op: Operand) -> usize {
        data_size_type(&self.operand_type(op))
    }

    /// `newReg`: allocate a fresh virtual register for `key`'s result,
    /// recording it for later lookups, and return it.
    fn new_reg(&mut self, key: Operand, ty: &Type) -> MachineOperand {
        let op = self.create_virt_reg(reg_class_for(ty));
        self.inst_register.insert(key, op);
        op
    }

    fn create_virt_reg(&mut self, cls: MachineRegClass) -> MachineOperand {
        let index = self.mfunc.registers.len() as i32;
        self.mfunc.registers.push(cls);
        MachineOperand::Reg(index)
    }

    fn new_temp_reg(&mut self, cls: MachineRegClass) -> MachineOperand {
        self.create_virt_reg(cls)
    }

    fn new_phys_reg(&self, name: RegisterName) -> MachineOperand {
        MachineOperand::Reg(name.index() as i32)
    }

    fn new_imm(&self, value: u64) -> MachineOperand {
        MachineOperand::Imm(value)
    }

    fn new_constant(&mut self, bytes: &[u8]) -> MachineOperand {
        let index = self.mfunc.push_constant(MachineConstant::new(bytes));
        MachineOperand::Constant(index)
    }

    /// Resolve an already-selected value by its key: a real instruction
    /// result, a function argument, or (only while a GEP's `lowered` list is
    /// being processed) one of its own `Lowered` entries. Panics if `key`
    /// was never registered — every real operand is selected before it is
    /// used, so this only fires on malformed IR.
    fn resolve_register(&self, key: Operand) -> MachineOperand {
        *self
            .inst_register
            .get(&key)
            .unwrap_or_else(|| panic!("operand {:?} selected before use", key))
    }

    /// `pushValueOperand`: resolve any operand into the `MachineOperand`
    /// that should be plugged straight into an instruction, materializing
    /// constants/globals as the target instruction expects.
    fn value_operand(&mut self, op: Operand, dsz: usize) -> MachineOperand {
        if self.is_constant_fp(op) {
            let value = self.const_fp_value(op);
            if dsz == 0 {
                self.new_constant(&value.to_le_bytes())
            } else {
                self.new_constant(&(value as f32).to_le_bytes())
            }
        } else if self.is_constant_int(op) {
            self.new_imm(self.const_int_value(op))
        } else if self.is_global(op) {
            match op {
                Operand::Global(g) => MachineOperand::Global(g),
                _ => unreachable!(),
            }
        } else {
            self.resolve_register(op)
        }
    }

    fn needs_64bit_imm(&self, op: Operand, dsz: usize, threshold: i64) -> bool {
        dsz == 2 && self.is_constant_int(op) && {
            let v = self.const_int_value(op) as i64;
            v < -threshold || v > threshold
        }
    }

    // ---- top-level dispatch ---------------------------------------------

    /// Select one instruction, registering its result (if any) under `key`.
    /// Used both for real block instructions (`key = Operand::Inst(..)`)
    /// and, recursively, for a GEP's own lowered sub-instructions
    /// (`key = Operand::Lowered(..)`).
    fn select(&mut self, key: Operand, data: &InstData, ty: &Type) {
        match data {
            InstData::Load { ptr } => self.select_load(key, *ptr, ty),
            InstData::Store { value, ptr } => self.select_store(*value, *ptr),
            InstData::Binary { op, lhs, rhs } => self.select_binary(key, *op, *lhs, *rhs, ty),
            InstData::Unary { op, operand } => self.select_unary(key, *op, *operand, ty),
            InstData::Cmp { op, lhs, rhs } => self.select_cmp(key, *op, *lhs, *rhs),
            InstData::Cast { op, value, to } => self.select_cast(key, *op, *value, to),
            InstData::Call { func, args } => self.select_call(key, *func, args, ty),
            InstData::Gep {
                ptr, lowered, ..
            } => self.select_gep(key, *ptr, lowered),
            InstData::Br { target } => self.select_br(*target),
            InstData::CondBr {
                cond,
                if_true,
                if_false,
            } => self.select_condbr(*cond, *if_true, *if_false),
            InstData::Ret { value } => self.select_ret(*value),
            InstData::RetVoid => self.select_retvoid(),
            InstData::Alloca {
                elem_ty,
                array_size,
                ..
            } => self.select_alloca(key, elem_ty, *array_size),
            InstData::Phi { .. } => {
                // Handled up-front in `codegen` (register preallocation) and
                // at each predecessor's terminator (`emit_phi`).
            }
        }
    }

    // ---- memory -----------------------------------------------------------

    fn select_load(&mut self, key: Operand, ptr: Operand, ty: &Type) {
        const LOAD_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Loadsd,
            MachineInstOpcode::Loadss,
            MachineInstOpcode::Load64,
            MachineInstOpcode::Load32,
            MachineInstOpcode::Load16,
            MachineInstOpcode::Load8,
        ];

        let dsz = data_size_type(ty);

        if self.is_constant_int(ptr) {
            let src = self.new_temp_reg(MachineRegClass::Gp);
            let imm = self.value_operand(ptr, 2);
            self.emit(MachineInstOpcode::Mov64, vec![src, imm]);
            let dst = self.new_reg(key, ty);
            self.emit(LOAD_OPS[dsz], vec![dst, src]);
        } else {
            let dst = self.new_reg(key, ty);
            let src = self.value_operand(ptr, dsz);
            self.emit(LOAD_OPS[dsz], vec![dst, src]);
        }
    }

    fn select_store(&mut self, value: Operand, ptr: Operand) {
        const LOAD_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Loadsd,
            MachineInstOpcode::Loadss,
            MachineInstOpcode::Load64,
            MachineInstOpcode::Load32,
            MachineInstOpcode::Load16,
            MachineInstOpcode::Load8,
        ];
        const MOV_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Movsd,
            MachineInstOpcode::Movss,
            MachineInstOpcode::Mov64,
            MachineInstOpcode::Mov32,
            MachineInstOpcode::Mov16,
            MachineInstOpcode::Mov8,
        ];
        const STORE_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Storesd,
            MachineInstOpcode::Storess,
            MachineInstOpcode::Store64,
            MachineInstOpcode::Store32,
            MachineInstOpcode::Store16,
            MachineInstOpcode::Store8,
        ];

        // The pointer side deliberately does not go through `value_operand`
        // for its non-constant-int branch: matching the original, a bare
        // `Global` destination pointer here falls through to a raw register
        // lookup rather than being materialized, which would under-resolve
        // to register 0 rather than panic. Dragonbook's own IR construction
        // never builds a `store` straight into a `Global` operand (always
        // through a GEP/bitcast first), so this path is inert in practice.
        let dstreg = if self.is_constant_int(ptr) {
            let t = self.new_temp_reg(MachineRegClass::Gp);
            let imm = self.value_operand(ptr, 2);
            self.emit(MachineInstOpcode::Mov64, vec![t, imm]);
            t
        } else {
            self.inst_register
                .get(&ptr)
                .copied()
                .unwrap_or(MachineOperand::Reg(0))
        };

        let dsz = data_size_type(
            self.operand_type(ptr)
                .pointer_element()
                .expect("store pointer must be a pointer"),
        );

        let needs_64bit_imm = self.needs_64bit_imm(value, dsz, 0x7fffffff);
        let is_mem_to_mem = self.is_constant_fp(value) || self.is_global(value);

        if is_mem_to_mem {
            let cls = if dsz < 2 {
                MachineRegClass::Xmm
            } else {
                MachineRegClass::Gp
            };
            let src = self.new_temp_reg(cls);
            let v = self.value_operand(value, dsz);
            self.emit(LOAD_OPS[dsz], vec![src, v]);
            self.emit(STORE_OPS[dsz], vec![dstreg, src]);
        } else if needs_64bit_imm {
            let src = self.new_temp_reg(MachineRegClass::Gp);
            let v = self.value_operand(value, dsz);
            self.emit(MOV_OPS[dsz], vec![src, v]);
            self.emit(STORE_OPS[dsz], vec![dstreg, src]);
        } else {
            let v = self.value_operand(value, dsz);
            self.emit(STORE_OPS[dsz], vec![dstreg, v]);
        }
    }

    // ---- binary/unary arithmetic -------------------------------------------

    fn select_binary(&mut self, key: Operand, op: BinOp, lhs: Operand, rhs: Operand, ty: &Type) {
        use MachineInstOpcode::*;
        const NOP: MachineInstOpcode = Nop;
        match op {
            BinOp::Add => self.simple_binary(key, lhs, rhs, ty, [NOP, NOP, Add64, Add32, Add16, Add8]),
            BinOp::Sub => self.simple_binary(key, lhs, rhs, ty, [NOP, NOP, Sub64, Sub32, Sub16, Sub8]),
            BinOp::FAdd => self.simple_binary(key, lhs, rhs, ty, [Addsd, Addss, NOP, NOP, NOP, NOP]),
            BinOp::FSub => self.simple_binary(key, lhs, rhs, ty, [Subsd, Subss, NOP, NOP, NOP, NOP]),
            BinOp::And => self.simple_binary(key, lhs, rhs, ty, [NOP, NOP, And64, And32, And16, And8]),
            BinOp::Or => self.simple_binary(key, lhs, rhs, ty, [NOP, NOP, Or64, Or32, Or16, Or8]),
            BinOp::Xor => self.simple_binary(key, lhs, rhs, ty, [NOP, NOP, Xor64, Xor32, Xor16, Xor8]),
            BinOp::FMul => self.simple_binary(key, lhs, rhs, ty, [Mulsd, Mulss, NOP, NOP, NOP, NOP]),
            BinOp::FDiv => self.simple_binary(key, lhs, rhs, ty, [Divsd, Divss, NOP, NOP, NOP, NOP]),
            BinOp::Mul => {
                let dsz = data_size_type(ty);
                if dsz == 5 {
                    // 8-bit multiply can only happen in the ax register.
                    let dst = self.new_reg(key, ty);
                    let rax = self.new_phys_reg(RegisterName::Rax);
                    let l = self.value_operand(lhs, dsz);
                    self.emit(Mov8, vec![rax, l]);
                    let r = self.value_operand(rhs, dsz);
                    self.emit(Imul8, vec![r]);
                    let rax = self.new_phys_reg(RegisterName::Rax);
                    self.emit(Mov8, vec![dst, rax]);
                } else {
                    self.simple_binary(key, lhs, rhs, ty, [NOP, NOP, Imul64, Imul32, Imul16, Imul8]);
                }
            }
            BinOp::Shl => self.shift_binary(key, lhs, rhs, ty, [NOP, NOP, Shl64, Shl32, Shl16, Shl8]),
            BinOp::LShr => self.shift_binary(key, lhs, rhs, ty, [NOP, NOP, Shr64, Shr32, Shr16, Shr8]),
            BinOp::AShr => self.shift_binary(key, lhs, rhs, ty, [NOP, NOP, Sar64, Sar32, Sar16, Sar8]),
            BinOp::SDiv => self.div_binary(key, lhs, rhs, ty, [NOP, NOP, Idiv64, Idiv32, Idiv16, Idiv8], false, false),
            BinOp::UDiv => self.div_binary(key, lhs, rhs, ty, [NOP, NOP, Div64, Div32, Div16, Div8], false, true),
            BinOp::SRem => self.div_binary(key, lhs, rhs, ty, [NOP, NOP, Idiv64, Idiv32, Idiv16, Idiv8], true, false),
            BinOp::URem => self.div_binary(key, lhs, rhs, ty, [NOP, NOP, Div64, Div32, Div16, Div8], true, true),
        }
    }

    /// `simpleBinaryInst`.
    fn simple_binary(
        &mut self,
        key: Operand,
        lhs: Operand,
        rhs: Operand,
        ty: &Type,
        ops: [MachineInstOpcode; 6],
    ) {
        const MOV_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Movsd,
            MachineInstOpcode::Movss,
            MachineInstOpcode::Mov64,
            MachineInstOpcode::Mov32,
            MachineInstOpcode::Mov16,
            MachineInstOpcode::Mov8,
        ];

        let dsz = data_size_type(ty);
        let dst = self.new_reg(key, ty);
        let l = self.value_operand(lhs, dsz);
        self.emit(MOV_OPS[dsz], vec![dst, l]);

        if self.needs_64bit_imm(rhs, dsz, 0x7fffffff) {
            let immreg = self.new_temp_reg(MachineRegClass::Gp);
            let r = self.value_operand(rhs, dsz);
            self.emit(MOV_OPS[dsz], vec![immreg, r]);
            self.emit(ops[dsz], vec![dst, immreg]);
        } else {
            let r = self.value_operand(rhs, dsz);
            self.emit(ops[dsz], vec![dst, r]);
        }
    }

    /// `shiftBinaryInst`.
    fn shift_binary(
        &mut self,
        key: Operand,
        lhs: Operand,
        rhs: Operand,
        ty: &Type,
        ops: [MachineInstOpcode; 6],
    ) {
        const MOV_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Movsd,
            MachineInstOpcode::Movss,
            MachineInstOpcode::Mov64,
            MachineInstOpcode::Mov32,
            MachineInstOpcode::Mov16,
            MachineInstOpcode::Mov8,
        ];

        let dsz = data_size_type(ty);
        let dst = self.new_reg(key, ty);

        if rhs.is_constant() {
            let l = self.value_operand(lhs, dsz);
            self.emit(MOV_OPS[dsz], vec![dst, l]);
            let r = self.value_operand(rhs, dsz);
            self.emit(ops[dsz], vec![dst, r]);
        } else {
            let rcx = self.new_phys_reg(RegisterName::Rcx);
            let r = self.value_operand(rhs, dsz);
            self.emit(MOV_OPS[dsz], vec![rcx, r]);
            let l = self.value_operand(lhs, dsz);
            self.emit(MOV_OPS[dsz], vec![dst, l]);
            let rcx = self.new_phys_reg(RegisterName::Rcx);
            self.emit(ops[dsz], vec![dst, rcx]);
        }
    }

    /// `divBinaryInst`.
    fn div_binary(
        &mut self,
        key: Operand,
        lhs: Operand,
        rhs: Operand,
        ty: &Type,
        ops: [MachineInstOpcode; 6],
        remainder: bool,
        zeroext: bool,
    ) {
        use MachineInstOpcode::*;
        const MOV_OPS: [MachineInstOpcode; 6] = [Movsd, Movss, Mov64, Mov32, Mov16, Mov8];
        const SAR_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Sar64, Sar32, Sar16, Sar8];
        const XOR_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Xor64, Xor32, Xor16, Xor8];
        const SHIFT_COUNT: [u64; 6] = [0, 0, 63, 31, 15, 7];

        let dsz = data_size_type(ty);
        let dst = self.new_reg(key, ty);

        let rax = self.new_phys_reg(RegisterName::Rax);
        let l = self.value_operand(lhs, dsz);
        self.emit(MOV_OPS[dsz], vec![rax, l]);

        if dsz != 5 {
            if zeroext {
                let rdx = self.new_phys_reg(RegisterName::Rdx);
                self.emit(XOR_OPS[dsz], vec![rdx, rdx]);
            } else {
                let rdx = self.new_phys_reg(RegisterName::Rdx);
                let rax = self.new_phys_reg(RegisterName::Rax);
                self.emit(MOV_OPS[dsz], vec![rdx, rax]);
                let rdx = self.new_phys_reg(RegisterName::Rdx);
                let count = self.new_imm(SHIFT_COUNT[dsz]);
                self.emit(SAR_OPS[dsz], vec![rdx, count]);
            }
        } else {
            let rax = self.new_phys_reg(RegisterName::Rax);
            let op = if zeroext { Movzx8_16 } else { Movsx8_16 };
            self.emit(op, vec![rax, rax]);
        }

        if self.is_constant_int(rhs) || self.is_global(rhs) {
            let r = self.value_operand(rhs, dsz);
            self.emit(MOV_OPS[dsz], vec![dst, r]);
            self.emit(ops[dsz], vec![dst]);
        } else {
            let r = self.value_operand(rhs, dsz);
            self.emit(ops[dsz], vec![r]);
        }

        if dsz != 5 || !remainder {
            let src = self.new_phys_reg(if remainder {
                RegisterName::Rdx
            } else {
                RegisterName::Rax
            });
            self.emit(MOV_OPS[dsz], vec![dst, src]);
        } else {
            // For 8-bit the remainder is in `ah`.
            let rax = self.new_phys_reg(RegisterName::Rax);
            let eight = self.new_imm(8);
            self.emit(Shr16, vec![rax, eight]);
            let rax = self.new_phys_reg(RegisterName::Rax);
            self.emit(Mov8, vec![dst, rax]);
        }
    }

    fn select_unary(&mut self, key: Operand, op: UnOp, operand: Operand, ty: &Type) {
        use MachineInstOpcode::*;
        let dsz = data_size_type(ty);
        match op {
            UnOp::Not => {
                const MOV_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Mov64, Mov32, Mov16, Mov8];
                const NOT_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Not64, Not32, Not16, Not8];
                let dst = self.new_reg(key, ty);
                let v = self.value_operand(operand, dsz);
                self.emit(MOV_OPS[dsz], vec![dst, v]);
                self.emit(NOT_OPS[dsz], vec![dst]);
            }
            UnOp::Neg => {
                const MOV_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Mov64, Mov32, Mov16, Mov8];
                const NEG_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Neg64, Neg32, Neg16, Neg8];
                let dst = self.new_reg(key, ty);
                let v = self.value_operand(operand, dsz);
                self.emit(MOV_OPS[dsz], vec![dst, v]);
                self.emit(NEG_OPS[dsz], vec![dst]);
            }
            UnOp::FNeg => {
                const XOR_OPS: [MachineInstOpcode; 6] = [Xorpd, Xorps, Nop, Nop, Nop, Nop];
                const SUB_OPS: [MachineInstOpcode; 6] = [Subsd, Subss, Nop, Nop, Nop, Nop];
                let dst = self.new_reg(key, ty);
                self.emit(XOR_OPS[dsz], vec![dst, dst]);
                let v = self.value_operand(operand, dsz);
                self.emit(SUB_OPS[dsz], vec![dst, v]);
            }
        }
    }

    // ---- comparisons --------------------------------------------------------

    fn select_cmp(&mut self, key: Operand, op: CmpOp, lhs: Operand, rhs: Operand) {
        use MachineInstOpcode::*;
        match op {
            CmpOp::ICmpSLT => self.simple_compare(key, lhs, rhs, Setl, None, None),
            CmpOp::ICmpULT => self.simple_compare(key, lhs, rhs, Setb, None, None),
            CmpOp::FCmpULT => self.simple_compare(key, lhs, rhs, Setb, Some(Setnp), Some(And8)),
            CmpOp::ICmpSGT => self.simple_compare(key, lhs, rhs, Setg, None, None),
            CmpOp::ICmpUGT => self.simple_compare(key, lhs, rhs, Seta, None, None),
            CmpOp::FCmpUGT => self.simple_compare(key, lhs, rhs, Seta, Some(Setnp), Some(And8)),
            CmpOp::ICmpSLE => self.simple_compare(key, lhs, rhs, Setle, None, None),
            CmpOp::ICmpULE => self.simple_compare(key, lhs, rhs, Setbe, None, None),
            CmpOp::FCmpULE => self.simple_compare(key, lhs, rhs, Setbe, Some(Setnp), Some(And8)),
            CmpOp::ICmpSGE => self.simple_compare(key, lhs, rhs, Setge, None, None),
            CmpOp::ICmpUGE => self.simple_compare(key, lhs, rhs, Setae, None, None),
            CmpOp::FCmpUGE => self.simple_compare(key, lhs, rhs, Setae, Some(Setnp), Some(And8)),
            CmpOp::ICmpEQ => self.simple_compare(key, lhs, rhs, Sete, None, None),
            CmpOp::FCmpUEQ => self.simple_compare(key, lhs, rhs, Sete, Some(Setnp), Some(And8)),
            CmpOp::ICmpNE => self.simple_compare(key, lhs, rhs, Setne, None, None),
            CmpOp::FCmpUNE => self.simple_compare(key, lhs, rhs, Setne, Some(Setp), Some(Or8)),
        }
    }

    /// `simpleCompareInst`. `op_set2`/`op_set3` are only `Some` for the
    /// unordered float predicates, which additionally fold in whether the
    /// comparison was unordered (NaN on either side) per spec.md §8's
    /// `fcmp_une_float(NaN, 0.0) == true` scenario.
    fn simple_compare(
        &mut self,
        key: Operand,
        lhs: Operand,
        rhs: Operand,
        op_set: MachineInstOpcode,
        op_set2: Option<MachineInstOpcode>,
        op_set3: Option<MachineInstOpcode>,
    ) {
        const MOV_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Movsd,
            MachineInstOpcode::Movss,
            MachineInstOpcode::Mov64,
            MachineInstOpcode::Mov32,
            MachineInstOpcode::Mov16,
            MachineInstOpcode::Mov8,
        ];
        const CMP_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Ucomisd,
            MachineInstOpcode::Ucomiss,
            MachineInstOpcode::Cmp64,
            MachineInstOpcode::Cmp32,
            MachineInstOpcode::Cmp16,
            MachineInstOpcode::Cmp8,
        ];

        let dsz = self.operand_data_size_type(lhs);

        let src1 = if self.is_constant(lhs) {
            let cls = if dsz < 2 {
                MachineRegClass::Xmm
            } else {
                MachineRegClass::Gp
            };
            let t = self.new_temp_reg(cls);
            let l = self.value_operand(lhs, dsz);
            self.emit(MOV_OPS[dsz], vec![t, l]);
            t
        } else {
            self.resolve_register(lhs)
        };

        // 8-bit compare result register.
        let dst = self.new_reg(key, &Type::Int1);

        if self.needs_64bit_imm(rhs, dsz, 0x7fffffff) {
            let immreg = self.new_temp_reg(MachineRegClass::Gp);
            let r = self.value_operand(rhs, dsz);
            self.emit(MOV_OPS[dsz], vec![immreg, r]);
            self.emit(CMP_OPS[dsz], vec![src1, immreg]);
        } else {
            let r = self.value_operand(rhs, dsz);
            self.emit(CMP_OPS[dsz], vec![src1, r]);
        }

        match (op_set2, op_set3) {
            (None, _) => self.emit(op_set, vec![dst]),
            (Some(op_set2), Some(op_set3)) => {
                let temp = self.new_temp_reg(MachineRegClass::Gp);
                self.emit(op_set, vec![temp]);
                self.emit(op_set2, vec![dst]);
                self.emit(op_set3, vec![dst, temp]);
            }
            _ => unreachable!("op_set3 is always Some whenever op_set2 is"),
        }
    }

    fn is_constant(&self, op: Operand) -> bool {
        op.is_constant()
    }

    // ---- casts --------------------------------------------------------------

    fn select_cast(&mut self, key: Operand, op: CastOp, value: Operand, to: &Type) {
        use MachineInstOpcode::*;
        match op {
            CastOp::Trunc => {
                const MOV_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Mov64, Mov32, Mov16, Mov8];
                let dsz = data_size_type(to);
                let dst = self.new_reg(key, to);
                let v = self.value_operand(value, dsz);
                self.emit(MOV_OPS[dsz], vec![dst, v]);
            }
            CastOp::ZExt => {
                #[rustfmt::skip]
                const MOVX_OPS: [MachineInstOpcode; 36] = [
                    Nop, Nop, Nop,   Nop,   Nop,        Nop,
                    Nop, Nop, Nop,   Nop,   Nop,        Nop,
                    Nop, Nop, Mov64, Nop,   Nop,        Nop,
                    Nop, Nop, Mov32, Mov32, Nop,        Nop,
                    Nop, Nop, Movzx16_64, Movzx16_32, Mov16, Nop,
                    Nop, Nop, Movzx8_64,  Movzx8_32,  Movzx8_16, Mov8,
                ];
                let dst_dsz = data_size_type(to);
                let src_dsz = self.operand_data_size_type(value);
                let dst = self.new_reg(key, to);

                if dst_dsz == 2 && src_dsz == 3 {
                    self.emit(Xor64, vec![dst, dst]);
                }
                let v = self.value_operand(value, src_dsz);
                self.emit(MOVX_OPS[src_dsz * 6 + dst_dsz], vec![dst, v]);
            }
            CastOp::SExt => {
                #[rustfmt::skip]
                const MOVX_OPS: [MachineInstOpcode; 36] = [
                    Nop, Nop, Nop,   Nop,   Nop,        Nop,
                    Nop, Nop, Nop,   Nop,   Nop,        Nop,
                    Nop, Nop, Mov64, Nop,   Nop,        Nop,
                    Nop, Nop, Movsx32_64, Mov32, Nop,        Nop,
                    Nop, Nop, Movsx16_64, Movsx16_32, Mov16, Nop,
                    Nop, Nop, Movsx8_64,  Movsx8_32,  Movsx8_16, Mov8,
                ];
                let dst_dsz = data_size_type(to);
                let src_dsz = self.operand_data_size_type(value);
                let dst = self.new_reg(key, to);
                let v = self.value_operand(value, src_dsz);
                self.emit(MOVX_OPS[src_dsz * 6 + dst_dsz], vec![dst, v]);
            }
            CastOp::FPTrunc => {
                let dst = self.new_reg(key, to);
                let op = if self.is_constant_fp(value) { Movss } else { Cvtsd2ss };
                let v = self.value_operand(value, 1);
                self.emit(op, vec![dst, v]);
            }
            CastOp::FPExt => {
                let dst = self.new_reg(key, to);
                let op = if self.is_constant_fp(value) { Movsd } else { Cvtss2sd };
                let v = self.value_operand(value, 0);
                self.emit(op, vec![dst, v]);
            }
            CastOp::FPToUI => {
                const MOV_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Mov64, Mov32, Mov16, Mov8];
                const CVT_OPS: [MachineInstOpcode; 6] = [Cvttsd2si, Cvttsd2si, Nop, Nop, Nop, Nop];
                if self.is_constant_fp(value) {
                    let dst_dsz = data_size_type(to);
                    let dst = self.new_reg(key, to);
                    let imm = self.new_imm(self.const_fp_value(value) as u64);
                    self.emit(MOV_OPS[dst_dsz], vec![dst, imm]);
                } else {
                    let src_dsz = self.operand_data_size_type(value);
                    let dst = self.new_reg(key, to);
                    let v = self.value_operand(value, src_dsz);
                    self.emit(CVT_OPS[src_dsz], vec![dst, v]);
                }
            }
            CastOp::FPToSI => {
                const MOV_OPS: [MachineInstOpcode; 6] = [Nop, Nop, Mov64, Mov32, Mov16, Mov8];
                const CVT_OPS: [MachineInstOpcode; 6] = [Cvttsd2si, Cvttss2si, Nop, Nop, Nop, Nop];
                if self.is_constant_fp(value) {
                    let dst_dsz = data_size_type(to);
                    let dst = self.new_reg(key, to);
                    let imm = self.new_imm(self.const_fp_value(value) as i64 as u64);
                    self.emit(MOV_OPS[dst_dsz], vec![dst, imm]);
                } else {
                    let src_dsz = self.operand_data_size_type(value);
                    let dst = self.new_reg(key, to);
                    let v = self.value_operand(value, src_dsz);
                    self.emit(CVT_OPS[src_dsz], vec![dst, v]);
                }
            }
            CastOp::UIToFP => {
                const MOV_OPS: [MachineInstOpcode; 6] = [Movsd, Movss, Mov64, Mov32, Mov16, Mov8];
                const CVT_OPS: [MachineInstOpcode; 6] = [Cvtsi2sd, Cvtsi2sd, Nop, Nop, Nop, Nop];
                let dst_dsz = data_size_type(to);
                let src_dsz = self.operand_data_size_type(value);

                if self.is_constant_int(value) {
                    let dst = self.new_reg(key, to);
                    let v = self.const_int_value(value);
                    let c = if dst_dsz == 0 {
                        self.new_constant(&(v as f64).to_le_bytes())
                    } else {
                        self.new_constant(&(v as f32).to_le_bytes())
                    };
                    self.emit(MOV_OPS[dst_dsz], vec![dst, c]);
                } else if src_dsz != 2 {
                    let tmp = self.new_temp_reg(MachineRegClass::Gp);
                    let dst = self.new_reg(key, to);
                    self.emit(Xor64, vec![tmp, tmp]);
                    let v = self.value_operand(value, src_dsz);
                    self.emit(MOV_OPS[src_dsz], vec![tmp, v]);
                    self.emit(CVT_OPS[dst_dsz], vec![dst, tmp]);
                } else {
                    let dst = self.new_reg(key, to);
                    let v = self.value_operand(value, dst_dsz);
                    self.emit(CVT_OPS[dst_dsz], vec![dst, v]);
                }
            }
            CastOp::SIToFP => {
                const MOV_OPS: [MachineInstOpcode; 6] = [Movsd, Movss, Mov64, Mov32, Mov16, Mov8];
                const CVT_OPS: [MachineInstOpcode; 6] = [Cvtsi2sd, Cvtsi2ss, Nop, Nop, Nop, Nop];
                const BITS: [i64; 6] = [64, 32, 64, 32, 16, 8];
                let dst_dsz = data_size_type(to);
                let src_dsz = self.operand_data_size_type(value);

                if self.is_constant_int(value) {
                    let dst = self.new_reg(key, to);
                    let v = self.const_int_value(value) as i64;
                    let c = if dst_dsz == 0 {
                        self.new_constant(&(v as f64).to_le_bytes())
                    } else {
                        self.new_constant(&(v as f32).to_le_bytes())
                    };
                    self.emit(MOV_OPS[dst_dsz], vec![dst, c]);
                } else if src_dsz != dst_dsz + 2 {
                    let bitcount = BITS[dst_dsz] - BITS[src_dsz];
                    let count = self.new_imm(bitcount as u64);
                    let tmp = self.new_temp_reg(MachineRegClass::Gp);
                    let dst = self.new_reg(key, to);
                    let v = self.value_operand(value, src_dsz);
                    self.emit(MOV_OPS[src_dsz], vec![tmp, v]);
                    let shl = if dst_dsz == 0 { Shl64 } else { Shl32 };
                    self.emit(shl, vec![tmp, count]);
                    let count = self.new_imm(bitcount as u64);
                    let sar = if dst_dsz == 0 { Sar64 } else { Sar32 };
                    self.emit(sar, vec![tmp, count]);
                    self.emit(CVT_OPS[dst_dsz], vec![dst, tmp]);
                } else {
                    let dst = self.new_reg(key, to);
                    let v = self.value_operand(value, dst_dsz);
                    self.emit(CVT_OPS[dst_dsz], vec![dst, v]);
                }
            }
            CastOp::BitCast => {
                if self.is_constant(value) {
                    const MOV_OPS: [MachineInstOpcode; 6] = [Movsd, Movss, Mov64, Mov32, Mov16, Mov8];
                    let dsz = self.operand_data_size_type(value);
                    let dst = self.new_reg(key, to);
                    let v = self.value_operand(value, dsz);
                    self.emit(MOV_OPS[dsz], vec![dst, v]);
                } else {
                    // Zero-cost alias: reuse whatever register already holds
                    // the source value.
                    let src = self.resolve_register(value);
                    self.inst_register.insert(key, src);
                }
            }
        }
    }

    // ---- GEP ----------------------------------------------------------------

    fn select_gep(&mut self, key: Operand, ptr: Operand, lowered: &[InstData]) {
        if lowered.is_empty() {
            let dsz = self.operand_data_size_type(ptr);
            let dst = self.new_reg(key, &Type::Pointer(Box::new(Type::Void)));
            let v = self.value_operand(ptr, dsz);
            self.emit(MachineInstOpcode::Mov64, vec![dst, v]);
            return;
        }

        let saved_types = std::mem::take(&mut self.lowered_types);
        for (idx, data) in lowered.iter().enumerate() {
            let ty = lowered_value_type(data);
            self.select(Operand::Lowered(idx as u32), data, &ty);
            self.lowered_types.push(ty);
        }
        self.lowered_types = saved_types;

        let last = Operand::Lowered((lowered.len() - 1) as u32);
        let result = self.resolve_register(last);
        self.inst_register.insert(key, result);
    }

    // ---- control flow ---------------------------------------------------

    fn select_br(&mut self, target: Block) {
        self.emit_phi(target);
        self.emit_bb_target(MachineInstOpcode::Jmp, target);
    }

    fn select_condbr(&mut self, cond: Operand, if_true: Block, if_false: Block) {
        if self.is_constant(cond) {
            let taken = if self.const_int_value(cond) != 0 {
                if_true
            } else {
                if_false
            };
            self.emit_phi(taken);
            self.emit_bb_target(MachineInstOpcode::Jmp, taken);
        } else {
            self.emit_phi(if_true);
            self.emit_phi(if_false);
            // The `3` here is the `dataSizeType` the original hardcodes for
            // this compare; it only ever matters for the isConstantFP
            // branch of value resolution, which a condition (always `i1`)
            // never takes, so the exact bucket is inert.
            let c = self.value_operand(cond, 3);
            let one = self.new_imm(1);
            self.emit(MachineInstOpcode::Cmp8, vec![c, one]);
            self.emit_bb_target(MachineInstOpcode::Jne, if_false);
            self.emit_bb_target(MachineInstOpcode::Jmp, if_true);
        }
    }

    fn select_ret(&mut self, value: Operand) {
        const MOV_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Movsd,
            MachineInstOpcode::Movss,
            MachineInstOpcode::Mov64,
            MachineInstOpcode::Mov32,
            MachineInstOpcode::Mov16,
            MachineInstOpcode::Mov8,
        ];
        let ret_ty = self.ctx.func_type_data(self.func.func_type).ret.clone();
        let dsz = data_size_type(&ret_ty);
        let dst = self.new_phys_reg(if dsz < 2 {
            RegisterName::Xmm0
        } else {
            RegisterName::Rax
        });
        let v = self.value_operand(value, dsz);
        self.emit(MOV_OPS[dsz], vec![dst, v]);
        self.emit(MachineInstOpcode::Jmp, vec![MachineOperand::BasicBlock(crate::isa::machine::EPILOG_BLOCK)]);
    }

    fn select_retvoid(&mut self) {
        self.emit(MachineInstOpcode::Jmp, vec![MachineOperand::BasicBlock(crate::isa::machine::EPILOG_BLOCK)]);
    }

    fn select_alloca(&mut self, key: Operand, elem_ty: &Type, array_size: Operand) {
        let array_size = match array_size {
            Operand::ConstInt(r) => self.ctx.const_int_data(r).value,
            _ => 1,
        };
        let mut size = elem_ty.alloc_size(self.ctx) as u64 * array_size;
        size = (size + 15) / 16 * 16;

        let rsp = self.new_phys_reg(RegisterName::Rsp);
        let size_imm = self.new_imm(size);
        self.emit(MachineInstOpcode::Sub64, vec![rsp, size_imm]);

        let dst = self.new_reg(key, &Type::Pointer(Box::new(elem_ty.clone())));
        let src = self.new_phys_reg(RegisterName::Rsp);

        if self.mfunc.max_call_args_size == 0 {
            self.emit(MachineInstOpcode::Mov64, vec![dst, src]);
        } else {
            let offset = self.new_imm(self.mfunc.max_call_args_size as u64);
            self.emit(MachineInstOpcode::Lea, vec![dst, src, offset]);
        }

        self.mfunc.dynamic_stack_allocations = true;
        self.mfunc.registers[RegisterName::Rbp.index()] = MachineRegClass::Reserved;
    }

    /// `emitPhi`: forward this block's live-out values into every leading
    /// `Phi` of `target` whose incoming list names the block currently
    /// being selected.
    fn emit_phi(&mut self, target: Block) {
        const MOV_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Movsd,
            MachineInstOpcode::Movss,
            MachineInstOpcode::Mov64,
            MachineInstOpcode::Mov32,
            MachineInstOpcode::Mov16,
            MachineInstOpcode::Mov8,
        ];

        let irbb = self.irbb;
        for &inst in &self.func.block(target).insts.clone() {
            let (incoming, ty) = match &self.func.inst(inst).data {
                InstData::Phi { incoming } => (incoming.clone(), self.func.inst_type(inst).clone()),
                _ => break,
            };
            let dsz = data_size_type(&ty);
            if let Some((_, value)) = incoming.iter().find(|(from, _)| *from == irbb) {
                let dst = self.resolve_register(Operand::Inst(inst));
                let v = self.value_operand(*value, dsz);
                self.emit(MOV_OPS[dsz], vec![dst, v]);
            }
        }
    }

    // ---- calls --------------------------------------------------------------

    fn find_max_call_args_size(&mut self, blocks: &[Block]) {
        let mut call_args_size = 4i32;
        for &block in blocks {
            for &inst in &self.func.block(block).insts {
                if let InstData::Call { args, .. } = &self.func.inst(inst).data {
                    call_args_size = call_args_size.max(args.len() as i32);
                }
            }
        }
        self.mfunc.max_call_args_size = call_args_size * 8;
    }

    fn select_call(&mut self, key: Operand, func: Operand, args: &[Operand], ret_ty: &Type) {
        let abi = std::mem::replace(&mut self.abi, abi::native_abi());
        abi.lower_call(self, key, func, args, ret_ty);
        self.abi = abi;
    }

    pub(crate) fn is_xmm_arg(&self, arg: Operand) -> bool {
        self.operand_data_size_type(arg) < 2
    }

    /// Store a call argument into the outgoing stack-argument area, as
    /// Win64 does for every argument past the fourth.
    pub(crate) fn store_call_arg_to_stack(&mut self, arg: Operand, offset: i32, imm_threshold: i64) {
        const LOAD_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Loadsd,
            MachineInstOpcode::Loadss,
            MachineInstOpcode::Load64,
            MachineInstOpcode::Load32,
            MachineInstOpcode::Load16,
            MachineInstOpcode::Load8,
        ];
        const STORE_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Storesd,
            MachineInstOpcode::Storess,
            MachineInstOpcode::Store64,
            MachineInstOpcode::Store32,
            MachineInstOpcode::Store16,
            MachineInstOpcode::Store8,
        ];
        const MOV_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Movsd,
            MachineInstOpcode::Movss,
            MachineInstOpcode::Mov64,
            MachineInstOpcode::Mov32,
            MachineInstOpcode::Mov16,
            MachineInstOpcode::Mov8,
        ];

        let is_mem_src = self.is_constant_fp(arg) || self.is_global(arg);
        let dsz = self.operand_data_size_type(arg);
        let dst = MachineOperand::StackOffset(offset);

        if is_mem_src {
            let tmp = self.new_phys_reg(if dsz < 2 {
                RegisterName::Xmm0
            } else {
                RegisterName::Rax
            });
            let v = self.value_operand(arg, dsz);
            self.emit(LOAD_OPS[dsz], vec![tmp, v]);
            let tmp = self.new_phys_reg(if dsz < 2 {
                RegisterName::Xmm0
            } else {
                RegisterName::Rax
            });
            self.emit(STORE_OPS[dsz], vec![dst, tmp]);
        } else if self.needs_64bit_imm(arg, dsz, imm_threshold) {
            let tmp = self.new_phys_reg(RegisterName::Rax);
            let v = self.value_operand(arg, dsz);
            self.emit(MOV_OPS[dsz], vec![tmp, v]);
            let tmp = self.new_phys_reg(RegisterName::Rax);
            self.emit(STORE_OPS[dsz], vec![dst, tmp]);
        } else {
            let v = self.value_operand(arg, dsz);
            self.emit(STORE_OPS[dsz], vec![dst, v]);
        }
    }

    pub(crate) fn move_call_arg_into(&mut self, arg: Operand, dst: MachineOperand) {
        const LOAD_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Loadsd,
            MachineInstOpcode::Loadss,
            MachineInstOpcode::Load64,
            MachineInstOpcode::Load32,
            MachineInstOpcode::Load16,
            MachineInstOpcode::Load8,
        ];
        const MOV_OPS: [MachineInstOpcode; 6] = [
            MachineInstOpcode::Movsd,
            MachineInstOpcode::Movss,
            MachineInstOpcode::Mov64,
            MachineInstOpcode::Mov32,
            MachineInstOpcode::Mov16,
            MachineInstOpcode::Mov8,
        ];
        let is_mem_src = self.is_constant_fp(arg) || self.is_global(arg);
        let dsz = self.operand_data_size_type(arg);
        let op = if is_mem_src { LOAD_OPS[dsz] } else { MOV_OPS[dsz] };
        let v = self.value_operand(arg, dsz);
        self.emit(op, vec![dst, v]);
    }

    pub(crate) fn emit_call_and_capture_return(&mut self, key: Operand, func: Operand, ret_ty: &Type) {
        let target = match func {
            Operand::FuncValue(fref) => MachineOperand::Func(fref),
            _ => {
                let rax = self.new_phys_reg(RegisterName::Rax);
                let v = self.resolve_register(func);
                self.emit(MachineInstOpcode::Mov64, vec![rax, v]);
                rax
            }
        };
        self.emit(MachineInstOpcode::Call, vec![target]);

        if *ret_ty != Type::Void {
            const MOV_OPS: [MachineInstOpcode; 6] = [
                MachineInstOpcode::Movsd,
                MachineInstOpcode::Movss,
                MachineInstOpcode::Mov64,
                MachineInstOpcode::Mov32,
                MachineInstOpcode::Mov16,
                MachineInstOpcode::Mov8,
            ];
            let dsz = data_size_type(ret_ty);
            let src = self.new_phys_reg(if dsz < 2 {
                RegisterName::Xmm0
            } else {
                RegisterName::Rax
            });
            let dst = self.new_reg(key, ret_ty);
            self.emit(MOV_OPS[dsz], vec![dst, src]);
        }
    }
}
