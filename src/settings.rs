//! Small configuration surface threaded through `IRContext`/`JITRuntime`
//! construction, in the spirit of `cranelift_codegen::settings::Flags`.

use target_lexicon::{OperatingSystem, Triple};

/// The calling convention / unwind format pair a function is compiled for.
///
/// spec.md §1 and §4.6 call for exactly two: System V AMD64 (used on
/// Linux/macOS/BSD) and Microsoft x64 (used on Windows). There is
/// deliberately no third option (spec.md non-goal: "supporting more than one
/// machine target" — these two ABIs are two calling conventions for the
/// single x86-64 target, not two targets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    /// `rdi, rsi, rdx, rcx, r8, r9` for the first six integer args,
    /// `xmm0..=xmm7` for the first eight float args, DWARF `.eh_frame`
    /// unwind info.
    SystemV,
    /// `rcx, rdx, r8, r9` for the first four args (shared slot for int and
    /// float, but floats go through the matching `xmmN`), a 32-byte home
    /// area, PE `RUNTIME_FUNCTION`/`UNWIND_INFO` unwind tables.
    Windows64,
}

impl Abi {
    /// Resolve the ABI implied by the host triple.
    pub fn host() -> Abi {
        match Triple::host().operating_system {
            OperatingSystem::Windows => Abi::Windows64,
            _ => Abi::SystemV,
        }
    }
}

/// Tunables for IR construction and code generation.
///
/// `JitSettings::default()` always resolves `target` to the host ABI; tests
/// that need to exercise the non-host calling convention's lowering rules
/// set `target` explicitly, the way `cranelift-codegen` tests pick an ISA
/// with `isa::lookup(triple!("..."))` rather than relying on `#[cfg]`.
#[derive(Debug, Clone)]
pub struct JitSettings {
    /// Run `IRStackToRegisterPass` before instruction selection.
    pub promote_stack_slots: bool,
    /// ABI to lower calls for. `None` means "use the host's ABI".
    pub target: Option<Abi>,
}

impl Default for JitSettings {
    fn default() -> Self {
        JitSettings {
            promote_stack_slots: true,
            target: None,
        }
    }
}

impl JitSettings {
    /// The effective ABI after resolving `target` against the host.
    pub fn abi(&self) -> Abi {
        self.target.unwrap_or_else(Abi::host)
    }
}
