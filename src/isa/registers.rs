//! The fixed x86-64 physical register file (spec.md §4.6/§4.7).
//!
//! `RegisterName` enumerates every physical register `select`/`regalloc`
//! address directly; everything from [`VREG_START`] on is a virtual
//! register index into [`super::machine::MachineFunction::registers`].

/// One physical x86-64 register, or the first virtual-register index.
///
/// The discriminant values match `RegisterName` in the original exactly:
/// `select`/`regalloc` rely on `as usize`/`as i32` casts to use this as a
/// direct index into `MachineFunction::registers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RegisterName {
    Rax = 0,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
    Xmm8,
    Xmm9,
    Xmm10,
    Xmm11,
    Xmm12,
    Xmm13,
    Xmm14,
    Xmm15,
}

impl RegisterName {
    pub fn index(self) -> usize {
        self as i32 as usize
    }

    /// `Xmm0` offset by `n` registers (used to place call arguments into
    /// successive `xmm0..xmm3`/`xmm0..xmm7` slots).
    pub fn xmm(n: i32) -> RegisterName {
        assert!((0..16).contains(&n));
        RegisterName::from_index(RegisterName::Xmm0 as i32 + n)
    }

    /// The physical register whose discriminant is `index` (0..=31).
    pub fn from_index(index: i32) -> RegisterName {
        assert!((0..PHYSICAL_REGISTER_COUNT as i32).contains(&index));
        // SAFETY: `RegisterName` is `#[repr(i32)]` with discriminants 0..=31
        // and no gaps, and `index` was just checked to fall in that range.
        unsafe { std::mem::transmute(index) }
    }
}

/// Count of fixed physical register slots `codegen` always pre-populates
/// (16 GP + rsp + rbp already counted + 16 xmm == 32), matching the
/// original's 32 `registers.push_back` calls before it resizes up to
/// [`VREG_START`].
pub const PHYSICAL_REGISTER_COUNT: usize = 32;

/// Index at which virtual registers begin. Indices `PHYSICAL_REGISTER_COUNT`
/// (32) through `VREG_START - 1` (127) are unused padding, matching the
/// original's `registers.resize((size_t)RegisterName::vregstart)` gap.
pub const VREG_START: usize = 128;
