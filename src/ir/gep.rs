//! `getelementptr` lowering (spec.md §4.3/§4.9).
//!
//! Walks the index list carrying a "current type", folding constant offsets
//! into a running byte offset and deferring dynamic indices; then expands
//! the whole thing into explicit `bitcast`/`add`/`mul` sub-instructions
//! addressed by [`Operand::Lowered`], stored on the `Gep` node itself rather
//! than appended to the block (the Open Question spec.md §9 resolves by
//! keeping this exact layout: downstream passes must recurse into
//! `InstData::Gep::lowered` explicitly to see them).

use crate::error::{IrError, IrResult};
use crate::ir::context::IRContext;
use crate::ir::function::IRFunction;
use crate::ir::instruction::{BinOp, CastOp, GepValueOffset, InstData};
use crate::ir::types::Type;
use crate::ir::validator::operand_type;
use crate::ir::value::Operand;

struct PendingOffset {
    index: Operand,
    scale: i64,
}

/// Compute the `(result_type, offset, value_offsets)` triple for a GEP over
/// `ptr` with `indices`, per spec.md §4.3's walk.
fn walk(
    ctx: &IRContext,
    func: &IRFunction,
    ptr: Operand,
    indices: &[Operand],
) -> IrResult<(Type, i64, Vec<PendingOffset>)> {
    let mut cur_type = operand_type(ctx, func, &[], ptr);
    let mut offset: i64 = 0;
    let mut value_offsets = Vec::new();

    for &index in indices {
        match cur_type {
            Type::Pointer(elem) => {
                let scale = elem.alloc_size(ctx) as i64;
                if let Operand::ConstInt(r) = index {
                    let value = ctx.const_int_data(r).value as i64;
                    offset += scale * value;
                } else {
                    value_offsets.push(PendingOffset { index, scale });
                }
                cur_type = *elem;
            }
            Type::Struct(sref) => {
                let cindex = match index {
                    Operand::ConstInt(r) => ctx.const_int_data(r).value as usize,
                    _ => return Err(IrError::GepStructIndexNotConstant),
                };
                let data = ctx.struct_data(sref);
                for field in data.fields.iter().take(cindex) {
                    offset += crate::ir::types::round_up8(field.alloc_size(ctx)) as i64;
                }
                cur_type = data
                    .fields
                    .get(cindex)
                    .cloned()
                    .ok_or(IrError::InvalidGep)?;
            }
            _ => return Err(IrError::InvalidGep),
        }
    }

    Ok((cur_type, offset, value_offsets))
}

/// Build a fully-lowered `Gep` instruction. Returns the instruction data
/// (ready to push into the current block) and its result type
/// (`Pointer(cur_type)`).
pub fn build(
    ctx: &mut IRContext,
    func: &IRFunction,
    ptr: Operand,
    indices: Vec<Operand>,
) -> IrResult<(InstData, Type)> {
    let ptr_ty = operand_type(ctx, func, &[], ptr);
    if !ptr_ty.is_pointer() {
        return Err(IrError::NotAPointer);
    }

    let (cur_type, offset, value_offsets) = walk(ctx, func, ptr, &indices)?;
    let result_ty = Type::Pointer(Box::new(cur_type));

    let mut lowered: Vec<InstData> = Vec::new();
    let mut lowered_types: Vec<Type> = Vec::new();
    let int64 = Type::Int64;

    // Push `data` (of type `ty`) and return an operand naming its result.
    macro_rules! push {
        ($data:expr, $ty:expr) => {{
            let idx = lowered.len() as u32;
            lowered.push($data);
            lowered_types.push($ty);
            Operand::Lowered(idx)
        }};
    }

    let needs_lowering = offset != 0 || !value_offsets.is_empty();
    let mut value_offset_data = Vec::with_capacity(value_offsets.len());

    if needs_lowering {
        let mut result = push!(
            InstData::Cast {
                op: CastOp::BitCast,
                value: ptr,
                to: int64.clone(),
            },
            int64.clone()
        );

        if offset != 0 {
            let offset_const = ctx.const_int(int64.clone(), offset as u64);
            result = push!(
                InstData::Binary {
                    op: BinOp::Add,
                    lhs: result,
                    rhs: Operand::ConstInt(offset_const),
                },
                int64.clone()
            );
        }

        for pending in value_offsets {
            let mut index = pending.index;
            let index_ty = operand_type(ctx, func, &lowered_types, index);
            if index_ty != int64 {
                index = push!(
                    InstData::Cast {
                        op: CastOp::SExt,
                        value: pending.index,
                        to: int64.clone(),
                    },
                    int64.clone()
                );
            }
            if pending.scale != 1 {
                let scale_const = ctx.const_int(int64.clone(), pending.scale as u64);
                index = push!(
                    InstData::Binary {
                        op: BinOp::Mul,
                        lhs: index,
                        rhs: Operand::ConstInt(scale_const),
                    },
                    int64.clone()
                );
            }
            value_offset_data.push(GepValueOffset {
                index,
                scale: pending.scale,
            });
            result = push!(
                InstData::Binary {
                    op: BinOp::Add,
                    lhs: result,
                    rhs: index,
                },
                int64.clone()
            );
        }

        push!(
            InstData::Cast {
                op: CastOp::BitCast,
                value: result,
                to: result_ty.clone(),
            },
            result_ty.clone()
        );
    }

    Ok((
        InstData::Gep {
            ptr,
            indices,
            offset,
            value_offsets: value_offset_data,
            lowered,
        },
        result_ty,
    ))
}
