//! dragonbook: a compact x86-64 JIT compiler — typed SSA IR, instruction
//! selection, linear-scan register allocation, and executable-memory code
//! generation (see spec.md for the full design).
//!
//! The public surface is intentionally thin: build IR against an
//! [`IRContext`] with an [`IRBuilder`], optionally run
//! [`pass::stack2reg::run`] to promote stack-allocated locals into virtual
//! registers, then hand the context to a [`JITRuntime`] to compile and link
//! it into executable memory.

mod arena;
mod error;
pub mod ir;
pub mod isa;
pub mod jit;
pub mod pass;
pub mod settings;

pub use error::{IrError, IrResult, JitError, JitResult};
pub use ir::{
    BinOp, Block, CastOp, CmpOp, IRBuilder, IRContext, IRFunction, Inst, InstData, Operand, Type, UnOp,
};
pub use jit::{JITRuntime, JitStackFrame};
pub use settings::{Abi, JitSettings};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
