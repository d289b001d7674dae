//! A single function's IR body: its basic blocks and instructions.
//!
//! Mirrors `cranelift_codegen::ir::Function` in spirit — storage lives in
//! `PrimaryMap`s keyed by the entity refs from [`super::entities`], and
//! block order (and, within a block, instruction order) is tracked
//! separately from the maps themselves, the way cranelift's `Layout`
//! separates order from the `DataFlowGraph`'s storage.

use cranelift_entity::PrimaryMap;

use crate::ir::entities::{Block, Inst};
use crate::ir::instruction::InstData;
use crate::ir::types::Type;
use crate::ir::value::FuncTypeRef;

/// One instruction together with its cached result type and source
/// debug metadata (spec.md §3: every `IRInst` carries a `comment`, the
/// index of the file it came from, and a line number).
#[derive(Debug, Clone)]
pub struct InstNode {
    pub data: InstData,
    pub ty: Type,
    pub comment: String,
    pub file_index: i32,
    pub line_number: i32,
}

/// A basic block: an ordered list of instructions, the last of which must
/// be a terminator once the function is finished building (spec.md §4.4).
#[derive(Debug, Clone, Default)]
pub struct BasicBlockData {
    pub name: String,
    pub insts: Vec<Inst>,
}

/// A function body.
pub struct IRFunction {
    pub name: String,
    pub func_type: FuncTypeRef,
    insts: PrimaryMap<Inst, InstNode>,
    blocks: PrimaryMap<Block, BasicBlockData>,
    /// Block layout order; `blocks` itself carries no ordering.
    block_order: Vec<Block>,
    /// `Alloca` instructions belonging to this function, in creation order
    /// — the set [`crate::pass::stack2reg`] considers promoting.
    pub stack_vars: Vec<Inst>,
    /// Source file names referenced by this function's debug metadata,
    /// indexed by `InstNode::file_index`.
    pub file_names: Vec<String>,
    /// Set by [`crate::pass::stack2reg::run`]: `true` if every stack
    /// variable in this function was eliminated. `false` either because
    /// promotion hasn't run yet or because some variable's value crossed a
    /// block boundary and phase 3 (phi wiring) does not yet rebuild that
    /// join — see spec.md §9's stack-to-register open question.
    pub fully_promoted: bool,
}

impl IRFunction {
    pub fn new(name: impl Into<String>, func_type: FuncTypeRef) -> IRFunction {
        IRFunction {
            name: name.into(),
            func_type,
            insts: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            block_order: Vec::new(),
            stack_vars: Vec::new(),
            file_names: Vec::new(),
            fully_promoted: false,
        }
    }

    /// Append a new, empty basic block to the function's layout.
    pub fn create_block(&mut self, name: impl Into<String>) -> Block {
        let block = self.blocks.push(BasicBlockData {
            name: name.into(),
            insts: Vec::new(),
        });
        self.block_order.push(block);
        block
    }

    /// Blocks in layout order.
    pub fn block_order(&self) -> &[Block] {
        &self.block_order
    }

    pub fn block(&self, block: Block) -> &BasicBlockData {
        &self.blocks[block]
    }

    pub fn block_mut(&mut self, block: Block) -> &mut BasicBlockData {
        &mut self.blocks[block]
    }

    /// Append `data` to the end of `block` and return its new `Inst` ref.
    pub fn push_inst(
        &mut self,
        block: Block,
        data: InstData,
        ty: Type,
        comment: String,
        file_index: i32,
        line_number: i32,
    ) -> Inst {
        let is_alloca = matches!(data, InstData::Alloca { .. });
        let inst = self.insts.push(InstNode {
            data,
            ty,
            comment,
            file_index,
            line_number,
        });
        self.blocks[block].insts.push(inst);
        if is_alloca {
            self.stack_vars.push(inst);
        }
        inst
    }

    pub fn inst(&self, inst: Inst) -> &InstNode {
        &self.insts[inst]
    }

    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstNode {
        &mut self.insts[inst]
    }

    pub fn inst_type(&self, inst: Inst) -> &Type {
        &self.insts[inst].ty
    }

    /// `true` if `block` currently ends in a terminator instruction.
    pub fn is_block_terminated(&self, block: Block) -> bool {
        self.blocks[block]
            .insts
            .last()
            .map(|&i| self.insts[i].data.is_terminator())
            .unwrap_or(false)
    }

    /// Remove `inst` from `block`'s instruction list (and from `stack_vars`
    /// if it was an `Alloca`) without removing it from the underlying
    /// `PrimaryMap` — used by the stack-to-register pass to elide a load,
    /// store or alloca it has folded away. The `Inst` ref itself becomes
    /// dead and must not be referenced again.
    pub fn remove_inst(&mut self, block: Block, inst: Inst) {
        self.blocks[block].insts.retain(|&i| i != inst);
        self.stack_vars.retain(|&i| i != inst);
    }

    /// Intern `file_name` into this function's file table and return its
    /// index, reusing an existing entry if already present.
    pub fn file_index(&mut self, file_name: &str) -> i32 {
        if let Some(pos) = self.file_names.iter().position(|f| f == file_name) {
            return pos as i32;
        }
        self.file_names.push(file_name.to_string());
        (self.file_names.len() - 1) as i32
    }
}
