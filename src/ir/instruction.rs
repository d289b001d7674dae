//! The instruction set (spec.md §3's "IRInst variants", component C).
//!
//! `InstData` is a closed sum type standing in for the base-class-plus-
//! downcast hierarchy spec.md describes (`IRInstUnary`/`IRInstBinary`/...);
//! the exhaustive `match` the selector and validator perform over it plays
//! the role spec.md's `IRInstVisitor` played, without needing a visitor
//! trait or runtime type probing (spec.md §9 redesign note #1, and the
//! resolution of Open Question #2: `Phi` is just another match arm here,
//! there is no dispatch table it could be missing from).

use crate::ir::entities::{Block, Inst};
use crate::ir::types::Type;
use crate::ir::value::Operand;

/// Binary integer/float opcodes that only differ in their mnemonic and the
/// table the selector picks it from (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    FAdd,
    FSub,
    Mul,
    FMul,
    SDiv,
    UDiv,
    FDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

/// Unary opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not,
    Neg,
    FNeg,
}

/// Every comparison kind. `U*` float comparisons are "unordered" compares:
/// they are true whenever the IEEE `U` predicate holds, including when
/// either operand is NaN for `UNE`, matching spec.md §8's
/// `fcmp_une_float(NaN, 0.0) == true` scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    ICmpSLT,
    ICmpULT,
    FCmpULT,
    ICmpSGT,
    ICmpUGT,
    FCmpUGT,
    ICmpSLE,
    ICmpULE,
    FCmpULE,
    ICmpSGE,
    ICmpUGE,
    FCmpUGE,
    ICmpEQ,
    FCmpUEQ,
    ICmpNE,
    FCmpUNE,
}

impl CmpOp {
    /// `true` for the six `ICmp*` integer comparisons.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            CmpOp::ICmpSLT
                | CmpOp::ICmpULT
                | CmpOp::ICmpSGT
                | CmpOp::ICmpUGT
                | CmpOp::ICmpSLE
                | CmpOp::ICmpULE
                | CmpOp::ICmpSGE
                | CmpOp::ICmpUGE
                | CmpOp::ICmpEQ
                | CmpOp::ICmpNE
        )
    }
}

/// Cast opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FPToUI,
    FPToSI,
    UIToFP,
    SIToFP,
    BitCast,
}

/// One GEP index step, pre-computed by [`crate::ir::gep::lower`] into either
/// a folded constant byte offset or a dynamic index paired with its scale.
#[derive(Debug, Clone, Copy)]
pub struct GepValueOffset {
    pub index: Operand,
    pub scale: i64,
}

/// The body of a single instruction. Stored in [`super::function::InstNode`]
/// alongside its cached result type and debug metadata.
#[derive(Debug, Clone)]
pub enum InstData {
    /// `load ptr`.
    Load { ptr: Operand },
    /// `store value, ptr`.
    Store { value: Operand, ptr: Operand },
    /// A binary arithmetic/bitwise instruction.
    Binary {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// A unary arithmetic/bitwise instruction.
    Unary { op: UnOp, operand: Operand },
    /// An integer or floating-point comparison; the result type is always
    /// `Int1`.
    Cmp {
        op: CmpOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// A numeric cast.
    Cast {
        op: CastOp,
        value: Operand,
        to: Type,
    },
    /// `call func(args...)`.
    Call { func: Operand, args: Vec<Operand> },
    /// `getelementptr ptr, indices...`, pre-lowered at construction time
    /// (spec.md §4.3/§4.9): `lowered` holds the integer-arithmetic
    /// sub-instructions that compute the address but are *not* appended to
    /// the enclosing block — passes must recurse into this field to see
    /// them, exactly as spec.md §9 Open Question #3 describes.
    Gep {
        ptr: Operand,
        indices: Vec<Operand>,
        offset: i64,
        value_offsets: Vec<GepValueOffset>,
        lowered: Vec<InstData>,
    },
    /// Unconditional branch.
    Br { target: Block },
    /// Conditional branch; `cond` must have type `Int1`.
    CondBr {
        cond: Operand,
        if_true: Block,
        if_false: Block,
    },
    /// Return a value.
    Ret { value: Operand },
    /// Return from a `void`-returning function.
    RetVoid,
    /// A function-scope stack allocation. `array_size` must be a
    /// `ConstantInt` (spec.md §4.4).
    Alloca {
        elem_ty: Type,
        array_size: Operand,
        name: String,
    },
    /// A join-point value. Only effective within a single block today — see
    /// [`crate::pass::stack2reg`] for the documented limitation spec.md §9
    /// flags as an open question.
    Phi { incoming: Vec<(Block, Operand)> },
}

impl InstData {
    /// `true` if this instruction ends a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstData::Br { .. }
                | InstData::CondBr { .. }
                | InstData::Ret { .. }
                | InstData::RetVoid
        )
    }

    /// Visit every direct value operand (not `Gep::lowered`, which callers
    /// recurse into explicitly because it is not part of the normal operand
    /// list — see spec.md §9 Open Question #3).
    pub fn for_each_operand(&self, mut f: impl FnMut(Operand)) {
        match self {
            InstData::Load { ptr } => f(*ptr),
            InstData::Store { value, ptr } => {
                f(*value);
                f(*ptr);
            }
            InstData::Binary { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            InstData::Unary { operand, .. } => f(*operand),
            InstData::Cmp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            InstData::Cast { value, .. } => f(*value),
            InstData::Call { func, args } => {
                f(*func);
                for a in args {
                    f(*a);
                }
            }
            InstData::Gep { ptr, indices, .. } => {
                f(*ptr);
                for i in indices {
                    f(*i);
                }
            }
            InstData::Br { .. } => {}
            InstData::CondBr { cond, .. } => f(*cond),
            InstData::Ret { value } => f(*value),
            InstData::RetVoid => {}
            InstData::Alloca { array_size, .. } => f(*array_size),
            InstData::Phi { incoming } => {
                for (_, v) in incoming {
                    f(*v);
                }
            }
        }
    }

    /// Like [`Self::for_each_operand`] but allows rewriting each operand in
    /// place — used by [`crate::pass::stack2reg`] to forward loaded values.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            InstData::Load { ptr } => f(ptr),
            InstData::Store { value, ptr } => {
                f(value);
                f(ptr);
            }
            InstData::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstData::Unary { operand, .. } => f(operand),
            InstData::Cmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstData::Cast { value, .. } => f(value),
            InstData::Call { func, args } => {
                f(func);
                for a in args {
                    f(a);
                }
            }
            InstData::Gep { ptr, indices, .. } => {
                f(ptr);
                for i in indices {
                    f(i);
                }
            }
            InstData::Br { .. } => {}
            InstData::CondBr { cond, .. } => f(cond),
            InstData::Ret { value } => f(value),
            InstData::RetVoid => {}
            InstData::Alloca { array_size, .. } => f(array_size),
            InstData::Phi { incoming } => {
                for (_, v) in incoming {
                    f(v);
                }
            }
        }
    }
}

/// The optional unwind significance of a prolog instruction (spec.md §3,
/// used only on `MachineInst`; re-exported here because both IR-level and
/// machine-level code need the `Block`/`Inst` entity types above).
pub use crate::ir::entities::Inst as InstRef;
