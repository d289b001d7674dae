//! Imperative instruction construction (spec.md §4.3).
//!
//! `IRBuilder` holds the current insertion block; each `create_*` method
//! builds the instruction's `InstData`, asks [`super::validator`] to type
//! and validate it, appends it to the block and returns a typed handle —
//! mirroring `IRBuilder::add` in the original, but returning `Result`
//! instead of throwing.

use crate::error::{IrError, IrResult};
use crate::ir::context::IRContext;
use crate::ir::entities::{Block, Inst};
use crate::ir::gep;
use crate::ir::instruction::{BinOp, CastOp, CmpOp, InstData, UnOp};
use crate::ir::types::Type;
use crate::ir::validator::validate_and_type;
use crate::ir::value::{FuncRef, Operand};

/// Constructs instructions into one function at a time.
pub struct IRBuilder {
    func: Option<FuncRef>,
    block: Option<Block>,
}

macro_rules! cast_ctor {
    ($name:ident, $op:expr) => {
        pub fn $name(&self, ctx: &mut IRContext, value: Operand, to: Type) -> IrResult<Inst> {
            self.add(ctx, InstData::Cast { op: $op, value, to }, "")
        }
    };
}

macro_rules! bin_ctor {
    ($name:ident, $op:expr) => {
        pub fn $name(&self, ctx: &mut IRContext, lhs: Operand, rhs: Operand) -> IrResult<Inst> {
            self.add(ctx, InstData::Binary { op: $op, lhs, rhs }, "")
        }
    };
}

macro_rules! un_ctor {
    ($name:ident, $op:expr) => {
        pub fn $name(&self, ctx: &mut IRContext, operand: Operand) -> IrResult<Inst> {
            self.add(ctx, InstData::Unary { op: $op, operand }, "")
        }
    };
}

macro_rules! cmp_ctor {
    ($name:ident, $op:expr) => {
        pub fn $name(&self, ctx: &mut IRContext, lhs: Operand, rhs: Operand) -> IrResult<Inst> {
            self.add(ctx, InstData::Cmp { op: $op, lhs, rhs }, "")
        }
    };
}

impl IRBuilder {
    pub fn new() -> IRBuilder {
        IRBuilder {
            func: None,
            block: None,
        }
    }

    /// Direct instructions into `block`, which must belong to `func`.
    pub fn set_insert_point(&mut self, func: FuncRef, block: Block) {
        self.func = Some(func);
        self.block = Some(block);
    }

    pub fn clear_insertion_point(&mut self) {
        self.func = None;
        self.block = None;
    }

    pub fn insert_block(&self) -> Option<Block> {
        self.block
    }

    fn current(&self) -> IrResult<(FuncRef, Block)> {
        match (self.func, self.block) {
            (Some(f), Some(b)) => Ok((f, b)),
            _ => Err(IrError::NoInsertionPoint),
        }
    }

    fn add(
        &self,
        ctx: &mut IRContext,
        data: InstData,
        comment: impl Into<String>,
    ) -> IrResult<Inst> {
        let (func_ref, block) = self.current()?;
        let ty = {
            let func = ctx.function(func_ref);
            validate_and_type(ctx, func, &[], &data)?
        };
        let func = ctx.function_mut(func_ref);
        Ok(func.push_inst(block, data, ty, comment.into(), -1, 0))
    }

    pub fn create_load(&self, ctx: &mut IRContext, ptr: Operand) -> IrResult<Inst> {
        self.add(ctx, InstData::Load { ptr }, "")
    }

    pub fn create_store(
        &self,
        ctx: &mut IRContext,
        value: Operand,
        ptr: Operand,
    ) -> IrResult<Inst> {
        self.add(ctx, InstData::Store { value, ptr }, "")
    }

    pub fn create_alloca(
        &self,
        ctx: &mut IRContext,
        elem_ty: Type,
        array_size: Operand,
        name: impl Into<String>,
    ) -> IrResult<Inst> {
        let name = name.into();
        self.add(
            ctx,
            InstData::Alloca {
                elem_ty,
                array_size,
                name: name.clone(),
            },
            name,
        )
    }

    pub fn create_phi(
        &self,
        ctx: &mut IRContext,
        incoming: Vec<(Block, Operand)>,
    ) -> IrResult<Inst> {
        self.add(ctx, InstData::Phi { incoming }, "")
    }

    pub fn create_call(
        &self,
        ctx: &mut IRContext,
        func: Operand,
        args: Vec<Operand>,
    ) -> IrResult<Inst> {
        self.add(ctx, InstData::Call { func, args }, "")
    }

    pub fn create_gep(
        &self,
        ctx: &mut IRContext,
        ptr: Operand,
        indices: Vec<Operand>,
    ) -> IrResult<Inst> {
        let (func_ref, block) = self.current()?;
        let (data, ty) = {
            let func = ctx.function(func_ref);
            gep::build(ctx, func, ptr, indices)?
        };
        let func = ctx.function_mut(func_ref);
        Ok(func.push_inst(block, data, ty, String::new(), -1, 0))
    }

    pub fn create_const_gep1_32(&self, ctx: &mut IRContext, ptr: Operand, a: i32) -> IrResult<Inst> {
        let c = ctx.const_int(Type::Int32, a as u32 as u64);
        self.create_gep(ctx, ptr, vec![Operand::ConstInt(c)])
    }

    pub fn create_const_gep2_32(
        &self,
        ctx: &mut IRContext,
        ptr: Operand,
        a: i32,
        b: i32,
    ) -> IrResult<Inst> {
        let c1 = ctx.const_int(Type::Int32, a as u32 as u64);
        let c2 = ctx.const_int(Type::Int32, b as u32 as u64);
        self.create_gep(ctx, ptr, vec![Operand::ConstInt(c1), Operand::ConstInt(c2)])
    }

    cast_ctor!(create_trunc, CastOp::Trunc);
    cast_ctor!(create_zext, CastOp::ZExt);
    cast_ctor!(create_sext, CastOp::SExt);
    cast_ctor!(create_fptrunc, CastOp::FPTrunc);
    cast_ctor!(create_fpext, CastOp::FPExt);
    cast_ctor!(create_fptoui, CastOp::FPToUI);
    cast_ctor!(create_fptosi, CastOp::FPToSI);
    cast_ctor!(create_uitofp, CastOp::UIToFP);
    cast_ctor!(create_sitofp, CastOp::SIToFP);
    cast_ctor!(create_bitcast, CastOp::BitCast);

    bin_ctor!(create_add, BinOp::Add);
    bin_ctor!(create_sub, BinOp::Sub);
    bin_ctor!(create_fadd, BinOp::FAdd);
    bin_ctor!(create_fsub, BinOp::FSub);
    bin_ctor!(create_mul, BinOp::Mul);
    bin_ctor!(create_fmul, BinOp::FMul);
    bin_ctor!(create_sdiv, BinOp::SDiv);
    bin_ctor!(create_udiv, BinOp::UDiv);
    bin_ctor!(create_fdiv, BinOp::FDiv);
    bin_ctor!(create_srem, BinOp::SRem);
    bin_ctor!(create_urem, BinOp::URem);
    bin_ctor!(create_shl, BinOp::Shl);
    bin_ctor!(create_lshr, BinOp::LShr);
    bin_ctor!(create_ashr, BinOp::AShr);
    bin_ctor!(create_and, BinOp::And);
    bin_ctor!(create_or, BinOp::Or);
    bin_ctor!(create_xor, BinOp::Xor);

    un_ctor!(create_not, UnOp::Not);
    un_ctor!(create_neg, UnOp::Neg);
    un_ctor!(create_fneg, UnOp::FNeg);

    cmp_ctor!(create_icmp_slt, CmpOp::ICmpSLT);
    cmp_ctor!(create_icmp_ult, CmpOp::ICmpULT);
    cmp_ctor!(create_fcmp_ult, CmpOp::FCmpULT);
    cmp_ctor!(create_icmp_sgt, CmpOp::ICmpSGT);
    cmp_ctor!(create_icmp_ugt, CmpOp::ICmpUGT);
    cmp_ctor!(create_fcmp_ugt, CmpOp::FCmpUGT);
    cmp_ctor!(create_icmp_sle, CmpOp::ICmpSLE);
    cmp_ctor!(create_icmp_ule, CmpOp::ICmpULE);
    cmp_ctor!(create_fcmp_ule, CmpOp::FCmpULE);
    cmp_ctor!(create_icmp_sge, CmpOp::ICmpSGE);
    cmp_ctor!(create_icmp_uge, CmpOp::ICmpUGE);
    cmp_ctor!(create_fcmp_uge, CmpOp::FCmpUGE);
    cmp_ctor!(create_icmp_eq, CmpOp::ICmpEQ);
    cmp_ctor!(create_fcmp_ueq, CmpOp::FCmpUEQ);
    cmp_ctor!(create_icmp_ne, CmpOp::ICmpNE);
    cmp_ctor!(create_fcmp_une, CmpOp::FCmpUNE);

    pub fn create_br(&self, ctx: &mut IRContext, target: Block) -> IrResult<Inst> {
        self.add(ctx, InstData::Br { target }, "")
    }

    pub fn create_cond_br(
        &self,
        ctx: &mut IRContext,
        cond: Operand,
        if_true: Block,
        if_false: Block,
    ) -> IrResult<Inst> {
        self.add(
            ctx,
            InstData::CondBr {
                cond,
                if_true,
                if_false,
            },
            "",
        )
    }

    pub fn create_ret(&self, ctx: &mut IRContext, value: Operand) -> IrResult<Inst> {
        self.add(ctx, InstData::Ret { value }, "")
    }

    pub fn create_ret_void(&self, ctx: &mut IRContext) -> IrResult<Inst> {
        self.add(ctx, InstData::RetVoid, "")
    }
}

impl Default for IRBuilder {
    fn default() -> Self {
        IRBuilder::new()
    }
}
