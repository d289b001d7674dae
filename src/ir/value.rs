//! SSA values: constants, globals, function arguments and instruction
//! results (spec.md §3, component C).
//!
//! Constants, globals and functions are interned once per [`IRContext`] and
//! outlive any single function; arguments and instruction results are
//! function-local and referenced through [`super::entities::Inst`]. All of
//! them are reachable through the single [`Operand`] type an instruction
//! uses for its operand slots, mirroring `IRValue` being the common base
//! class spec.md describes — except here the variants are closed, so no
//! downcasting is ever needed (spec.md §9 redesign note #1).

use crate::arena::Id;
use crate::ir::entities::Inst;
use crate::ir::function::IRFunction;
use crate::ir::types::Type;

/// An interned `(type, bit pattern)` integer constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstIntData {
    pub ty: Type,
    pub value: u64,
}

/// An interned `(type, raw bit pattern)` floating-point constant. Keying on
/// the raw bits (not on `f64` equality) means a constant whose value is NaN
/// is still addressable as spec.md §3 requires.
#[derive(Debug, Clone)]
pub struct ConstFPData {
    pub ty: Type,
    pub value: f64,
}

/// A struct literal constant, interned by structural equality over its
/// field values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstStructData {
    pub ty: Type,
    pub fields: Vec<Operand>,
}

/// A module-level global variable.
pub struct GlobalData {
    pub ty: Type,
    pub initializer: Option<Operand>,
    pub name: String,
    /// Byte offset into `JITRuntime`'s `globals` buffer, assigned when the
    /// owning context is added to a runtime. `-1` before that happens.
    pub globals_offset: std::cell::Cell<i64>,
}

/// Handle to an interned integer constant.
pub type ConstIntRef = Id<ConstIntData>;
/// Handle to an interned floating-point constant.
pub type ConstFPRef = Id<ConstFPData>;
/// Handle to an interned struct-literal constant.
pub type ConstStructRef = Id<ConstStructData>;
/// Handle to a global variable.
pub type GlobalRef = Id<GlobalData>;
/// Handle to a function, itself usable as a constant pointer-to-function
/// value (spec.md §3: "is itself a constant with pointer-to-function
/// semantics").
pub type FuncRef = Id<IRFunction>;

/// Anything usable as an instruction operand.
///
/// `ConstInt`/`ConstFP`/`ConstStruct`/`Global`/`FuncValue` are interned
/// per-[`IRContext`] and outlive any one function; `Arg`/`Inst` only make
/// sense relative to the function currently being built or selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// An interned integer constant.
    ConstInt(ConstIntRef),
    /// An interned floating-point constant.
    ConstFP(ConstFPRef),
    /// An interned struct literal.
    ConstStruct(ConstStructRef),
    /// A global variable's address.
    Global(GlobalRef),
    /// A function used as a constant pointer-to-function value.
    FuncValue(FuncRef),
    /// The `index`-th parameter of the function currently being built.
    Arg(u32),
    /// The result of a previously-built instruction in the same function.
    Inst(Inst),
    /// The result of the `index`-th sub-instruction inside a `Gep`'s own
    /// `lowered` list (spec.md §4.3/§4.9) — these never join the enclosing
    /// function's instruction list, so they cannot be addressed by `Inst`.
    Lowered(u32),
}

impl Operand {
    /// `true` if this operand denotes a compile-time constant (as opposed
    /// to `Arg`/`Inst`, which are only known at selection/execution time).
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Operand::ConstInt(_)
                | Operand::ConstFP(_)
                | Operand::ConstStruct(_)
                | Operand::FuncValue(_)
        )
    }
}

// `f64`'s `Eq`/`Hash` are derived from the raw bit pattern so that distinct
// NaN payloads intern distinctly but a NaN constant is always addressable,
// matching spec.md §3 exactly.
impl PartialEq for ConstFPData {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.value.to_bits() == other.value.to_bits()
    }
}
impl Eq for ConstFPData {}
impl std::hash::Hash for ConstFPData {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
        self.value.to_bits().hash(state);
    }
}
