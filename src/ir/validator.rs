//! Type-checks an instruction at construction time (spec.md §4.4).
//!
//! `validate_and_type` is called by [`super::builder::IRBuilder`] before an
//! instruction is appended to its block; a rejected construction never
//! enters the function body. It both validates and computes the
//! instruction's result type in one pass, the way `IRInstValidator::inst`
//! doubled as the original's only place that inspected operand types.

use crate::error::{IrError, IrResult};
use crate::ir::context::IRContext;
use crate::ir::function::IRFunction;
use crate::ir::instruction::{BinOp, CastOp, CmpOp, InstData, UnOp};
use crate::ir::types::Type;
use crate::ir::value::Operand;

/// Resolve the type of any operand relative to the function currently being
/// built. `lowered_types` supplies the result types of a `Gep`'s own
/// `lowered` sub-instructions, in order, while that `Gep` is under
/// construction; it is empty everywhere else.
pub fn operand_type(
    ctx: &IRContext,
    func: &IRFunction,
    lowered_types: &[Type],
    operand: Operand,
) -> Type {
    match operand {
        Operand::ConstInt(r) => ctx.const_int_data(r).ty.clone(),
        Operand::ConstFP(r) => ctx.const_fp_data(r).ty.clone(),
        Operand::ConstStruct(r) => ctx.const_struct_data(r).ty.clone(),
        Operand::Global(r) => ctx.get_pointer_to(&ctx.global_data(r).ty),
        Operand::FuncValue(r) => {
            let ftype = ctx.function(r).func_type;
            ctx.get_pointer_to(&Type::Function(ftype))
        }
        Operand::Arg(i) => ctx.func_type_data(func.func_type).params[i as usize].clone(),
        Operand::Inst(i) => func.inst_type(i).clone(),
        Operand::Lowered(i) => lowered_types[i as usize].clone(),
    }
}

/// Rank used for `Trunc`/`ZExt`/`SExt` width comparisons: matches the
/// original's `ValueType` ordering for the integer-or-pointer family.
fn int_rank(ty: &Type) -> Option<u8> {
    match ty {
        Type::Int1 => Some(1),
        Type::Int8 => Some(2),
        Type::Int16 => Some(3),
        Type::Int32 => Some(4),
        Type::Int64 => Some(5),
        Type::Pointer(_) => Some(6),
        _ => None,
    }
}

fn float_rank(ty: &Type) -> Option<u8> {
    match ty {
        Type::Float => Some(0),
        Type::Double => Some(1),
        _ => None,
    }
}

fn check_int(ty: &Type) -> IrResult<u8> {
    int_rank(ty).ok_or(IrError::OperandTypeMismatch)
}

fn check_float(ty: &Type) -> IrResult<u8> {
    float_rank(ty).ok_or(IrError::OperandTypeMismatch)
}

fn check_same(a: &Type, b: &Type) -> IrResult<()> {
    if a == b {
        Ok(())
    } else {
        Err(IrError::OperandTypeMismatch)
    }
}

/// Validate `data` (whose operands resolve via `ctx`/`func`/`lowered_types`)
/// and return its result type.
pub fn validate_and_type(
    ctx: &IRContext,
    func: &IRFunction,
    lowered_types: &[Type],
    data: &InstData,
) -> IrResult<Type> {
    let ty_of = |op: Operand| operand_type(ctx, func, lowered_types, op);

    match data {
        InstData::Load { ptr } => {
            let pty = ty_of(*ptr);
            match pty.pointer_element() {
                Some(elem) => Ok(elem.clone()),
                None => Err(IrError::NotAPointer),
            }
        }
        InstData::Store { value, ptr } => {
            let pty = ty_of(*ptr);
            let vty = ty_of(*value);
            match pty.pointer_element() {
                Some(elem) if *elem == vty => Ok(Type::Void),
                Some(_) => Err(IrError::StoreTypeMismatch),
                None => Err(IrError::NotAPointer),
            }
        }
        InstData::Binary { op, lhs, rhs } => {
            let lty = ty_of(*lhs);
            let rty = ty_of(*rhs);
            match op {
                BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv => {
                    check_float(&lty)?;
                    check_same(&lty, &rty)?;
                }
                _ => {
                    check_int(&lty)?;
                    check_same(&lty, &rty)?;
                }
            }
            Ok(lty)
        }
        InstData::Unary { op, operand } => {
            let oty = ty_of(*operand);
            match op {
                UnOp::FNeg => {
                    check_float(&oty)?;
                }
                _ => {
                    check_int(&oty)?;
                }
            }
            Ok(oty)
        }
        InstData::Cmp { op, lhs, rhs } => {
            let lty = ty_of(*lhs);
            let rty = ty_of(*rhs);
            if op.is_integer() {
                check_int(&lty)?;
            } else {
                check_float(&lty)?;
            }
            check_same(&lty, &rty)?;
            Ok(Type::Int1)
        }
        InstData::Cast { op, value, to } => {
            let from = ty_of(*value);
            match op {
                CastOp::Trunc => {
                    let v1 = check_int(&from)?;
                    let v2 = check_int(to)?;
                    if v1 < v2 {
                        return Err(IrError::InvalidCast(
                            "truncation target must not be wider than the source",
                        ));
                    }
                }
                CastOp::ZExt | CastOp::SExt => {
                    let v1 = check_int(&from)?;
                    let v2 = check_int(to)?;
                    if v1 > v2 {
                        return Err(IrError::InvalidCast(
                            "extension target must not be narrower than the source",
                        ));
                    }
                }
                CastOp::FPTrunc => {
                    let v1 = check_float(&from)?;
                    let v2 = check_float(to)?;
                    if v1 < v2 {
                        return Err(IrError::InvalidCast(
                            "float truncation target must not be wider than the source",
                        ));
                    }
                }
                CastOp::FPExt => {
                    let v1 = check_float(&from)?;
                    let v2 = check_float(to)?;
                    if v1 > v2 {
                        return Err(IrError::InvalidCast(
                            "float extension target must not be narrower than the source",
                        ));
                    }
                }
                CastOp::FPToUI | CastOp::FPToSI => {
                    check_float(&from)?;
                    check_int(to)?;
                }
                CastOp::UIToFP | CastOp::SIToFP => {
                    check_int(&from)?;
                    check_float(to)?;
                }
                CastOp::BitCast => {}
            }
            Ok(to.clone())
        }
        InstData::Call { func: callee, args } => {
            let callee_ty = ty_of(*callee);
            let sig = ctx
                .callee_signature(&callee_ty)
                .map_err(|_| IrError::NotCallable)?;
            if sig.params.len() != args.len() {
                return Err(IrError::CallArgMismatch("argument count does not match"));
            }
            for (param_ty, arg) in sig.params.iter().zip(args.iter()) {
                if *param_ty != ty_of(*arg) {
                    return Err(IrError::CallArgMismatch("argument type does not match"));
                }
            }
            Ok(sig.ret.clone())
        }
        InstData::Gep { ptr, lowered, .. } => {
            let pty = ty_of(*ptr);
            if !pty.is_pointer() {
                return Err(IrError::NotAPointer);
            }
            // Recurse into the lowered sub-instructions so a malformed GEP
            // (should one ever be hand-assembled rather than built through
            // `IRBuilder::create_gep`) is still caught here, mirroring the
            // original validator visiting `node->instructions`.
            let mut sub_types = Vec::with_capacity(lowered.len());
            for sub in lowered {
                let t = validate_and_type(ctx, func, &sub_types, sub)?;
                sub_types.push(t);
            }
            // The final result type is computed by GEP lowering itself
            // (see `crate::ir::gep`) and passed in via the enclosing
            // `InstNode::ty`, not recomputed here.
            Ok(Type::Void)
        }
        InstData::Br { .. } => Ok(Type::Void),
        InstData::CondBr { cond, .. } => {
            let cty = ty_of(*cond);
            if cty != Type::Int1 {
                return Err(IrError::CondBrNotI1);
            }
            Ok(Type::Void)
        }
        InstData::Ret { .. } => Ok(Type::Void),
        InstData::RetVoid => Ok(Type::Void),
        InstData::Alloca {
            elem_ty,
            array_size,
            ..
        } => {
            if !matches!(array_size, Operand::ConstInt(_)) {
                return Err(IrError::AllocaSizeNotConstant);
            }
            Ok(Type::Pointer(Box::new(elem_ty.clone())))
        }
        InstData::Phi { incoming } => {
            let mut it = incoming.iter();
            let first = match it.next() {
                Some((_, v)) => ty_of(*v),
                None => return Ok(Type::Void),
            };
            for (_, v) in it {
                check_same(&first, &ty_of(*v))?;
            }
            Ok(first)
        }
    }
}
