//! Function-local entity references.
//!
//! An SSA value in dragonbook's IR is always the result of the instruction
//! that defines it (the `IRInst : IRValue` relationship in spec.md's data
//! model), so `Inst` doubles as dragonbook's "value" reference the way
//! `cranelift_codegen::ir::Value` stands in for an instruction result.
//! `Block` is an opaque reference to a basic block. Both are 32-bit indices
//! into `PrimaryMap`s owned by the `IRFunction` they belong to, following
//! `cranelift_codegen::ir::entities`.

use cranelift_entity::entity_impl;

/// A reference to an instruction within one function. Since every
/// instruction that yields a value yields exactly one, this also serves as
/// the function-local SSA value reference.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A reference to a basic block within one function.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");
