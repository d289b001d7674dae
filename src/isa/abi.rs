//! Platform calling conventions (spec.md §4.6, §9 redesign note: "two ABI
//! modules exposing a common trait rather than conditional compilation
//! inside a single module").
//!
//! The original branches `#ifdef WIN32` straight inside `inst(IRInstCall*)`.
//! Here `Selector::select_call` instead asks a `CallAbi` trait object to
//! place arguments and emit the `call`; [`Win64Abi`] and [`SystemVAbi`] hold
//! no state, so either can be picked at `Selector` construction time (today,
//! by `cfg(target_os = "windows")`; nothing stops a caller from forcing one
//! explicitly, e.g. for cross-compilation tests).

use crate::ir::types::Type;
use crate::ir::value::Operand;
use crate::isa::machine::MachineOperand;
use crate::isa::registers::RegisterName;
use crate::isa::select::Selector;

/// Places call arguments per one platform's calling convention and emits the
/// `call` itself plus the return-value move, if any. `key` is where the
/// call's own result (if `ret_ty` isn't `Void`) gets registered.
pub trait CallAbi {
    fn lower_call(
        &self,
        sel: &mut Selector,
        key: Operand,
        func: Operand,
        args: &[Operand],
        ret_ty: &Type,
    );
}

/// First four arguments always go to `rcx,rdx,r8,r9`/`xmm0..xmm3` (selected
/// by class, not by how many of each kind have been seen); any argument
/// from the 5th on *only* goes to the stack, never to a register.
pub struct Win64Abi;

/// Win64's 32-bit-immediate threshold for materializing a 64-bit constant
/// argument through a temp register before storing/moving it.
const WIN64_IMM_THRESHOLD: i64 = 0x7fffffff;

impl CallAbi for Win64Abi {
    fn lower_call(
        &self,
        sel: &mut Selector,
        key: Operand,
        func: Operand,
        args: &[Operand],
        ret_ty: &Type,
    ) {
        const REGVARS: [RegisterName; 4] =
            [RegisterName::Rcx, RegisterName::Rdx, RegisterName::R8, RegisterName::R9];

        for (i, &arg) in args.iter().enumerate().skip(4) {
            sel.store_call_arg_to_stack(arg, (i * 8) as i32, WIN64_IMM_THRESHOLD);
        }

        for (i, &arg) in args.iter().take(4).enumerate() {
            let dst = if sel.is_xmm_arg(arg) {
                MachineOperand::Reg(RegisterName::xmm(i as i32).index() as i32)
            } else {
                MachineOperand::Reg(REGVARS[i].index() as i32)
            };
            sel.move_call_arg_into(arg, dst);
        }

        sel.emit_call_and_capture_return(key, func, ret_ty);
    }
}

/// System V AMD64: up to 6 integer/pointer args in `rdi,rsi,rdx,rcx,r8,r9`
/// and up to 8 float args in `xmm0..xmm7`, counted independently per class;
/// anything beyond either limit spills to the stack. Every argument is
/// stored to its `i*8` stack slot regardless of register eligibility
/// (matching `MachineInstSelection::callUnix64`'s literal first pass, which
/// checks `!isRegisterPass` but not `!isRegisterArg`), then register-eligible
/// arguments are *also* placed in their register during the second pass —
/// a harmless duplication for register-eligible args, since nothing ever
/// reads their now-stale stack slot, preserved here rather than "fixed" to
/// the mutually-exclusive placement a reader might expect.
pub struct SystemVAbi;

/// System V's wider (~48-bit) immediate threshold, distinct from Win64's
/// 32-bit one; this asymmetry is real in the original and preserved as-is.
const SYSV_IMM_THRESHOLD: i64 = 0x7fffffffffff;

impl CallAbi for SystemVAbi {
    fn lower_call(
        &self,
        sel: &mut Selector,
        key: Operand,
        func: Operand,
        args: &[Operand],
        ret_ty: &Type,
    ) {
        const REGVARS: [RegisterName; 6] = [
            RegisterName::Rdi,
            RegisterName::Rsi,
            RegisterName::Rdx,
            RegisterName::Rcx,
            RegisterName::R8,
            RegisterName::R9,
        ];
        const NUM_REGISTER_ARGS: usize = 6;
        const NUM_XMM_REGISTER_ARGS: usize = 8;

        for (i, &arg) in args.iter().enumerate() {
            sel.store_call_arg_to_stack(arg, (i * 8) as i32, SYSV_IMM_THRESHOLD);
        }

        let mut next_register_arg = 0usize;
        let mut next_xmm_register_arg = 0usize;
        for &arg in args {
            let is_xmm = sel.is_xmm_arg(arg);
            let is_register_arg = if is_xmm {
                next_xmm_register_arg < NUM_XMM_REGISTER_ARGS
            } else {
                next_register_arg < NUM_REGISTER_ARGS
            };
            if is_register_arg {
                let dst = if is_xmm {
                    let reg =
                        MachineOperand::Reg(RegisterName::xmm(next_xmm_register_arg as i32).index() as i32);
                    next_xmm_register_arg += 1;
                    reg
                } else {
                    let reg = MachineOperand::Reg(REGVARS[next_register_arg].index() as i32);
                    next_register_arg += 1;
                    reg
                };
                sel.move_call_arg_into(arg, dst);
            }
        }

        sel.emit_call_and_capture_return(key, func, ret_ty);
    }
}

#[cfg(target_os = "windows")]
pub fn native_abi() -> Box<dyn CallAbi> {
    Box::new(Win64Abi)
}

#[cfg(not(target_os = "windows"))]
pub fn native_abi() -> Box<dyn CallAbi> {
    Box::new(SystemVAbi)
}
