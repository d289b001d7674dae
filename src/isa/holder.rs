//! Aggregates the compiled code, constant data, and unwind info for every
//! function added to a JIT module, and resolves every forward reference
//! once final destination addresses are known (spec.md §4.10). Ported from
//! `MachineCodeHolder`.

use std::collections::HashMap;

use crate::ir::context::IRContext;
use crate::ir::value::{FuncRef, GlobalRef};
use crate::isa::machine::MachineFunction;
use crate::isa::{encode, regalloc, select, unwind};

/// One source-line record, `offset` being a byte offset into the holder's
/// code buffer.
#[derive(Debug, Clone)]
pub struct DebugInfo {
    pub offset: usize,
    pub file_index: i32,
    pub line_number: i32,
}

/// One function's position in the holder's code/unwind buffers, or — for a
/// function registered via [`MachineCodeHolder::add_external_function`] — the
/// raw pointer it was bound to instead.
#[derive(Debug, Clone, Default)]
pub struct FunctionEntry {
    pub external: Option<usize>,

    pub begin_address: usize,
    pub end_address: usize,

    pub begin_unwind_data: usize,
    pub end_unwind_data: usize,
    pub unix_unwind_function_start: u32,
}

/// Accumulates compiled machine code, constant data, and unwind info across
/// every function of a module, deferring only the fixups that genuinely
/// depend on the final JIT memory addresses: direct calls (the callee may be
/// emitted later), RIP-relative constant/global loads, and (on Unix) the
/// absolute function bounds patched into each FDE.
///
/// Branch targets within one function are resolved immediately by
/// [`encode::codegen`] instead — unlike a call target, a `jmp`'s destination
/// block is always known by the time that function's own code finishes
/// encoding, so there is no reason to carry it all the way to [`relocate`].
#[derive(Default)]
pub struct MachineCodeHolder {
    pub(crate) debug_info: Vec<DebugInfo>,
    pub file_info: Vec<String>,
    pub(crate) code: Vec<u8>,
    pub(crate) data: Vec<u8>,
    unwind_data: Vec<u8>,

    function_table: Vec<FunctionEntry>,
    func_to_table_index: HashMap<FuncRef, usize>,

    pub(crate) data_relocate_info: Vec<(usize, usize)>,
    pub(crate) call_relocate_info: Vec<(usize, FuncRef)>,
    pub(crate) global_relocate_info: Vec<(usize, GlobalRef)>,
}

impl MachineCodeHolder {
    pub fn new() -> MachineCodeHolder {
        MachineCodeHolder::default()
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn unwind_data_size(&self) -> usize {
        self.unwind_data.len()
    }

    pub fn function_table(&self) -> &[FunctionEntry] {
        &self.function_table
    }

    pub fn debug_info(&self) -> &[DebugInfo] {
        &self.debug_info
    }

    /// The function table slot `func_ref` was assigned, if it has been
    /// added to this holder (by either `add_function` or
    /// `add_external_function`) yet.
    pub fn table_index(&self, func_ref: FuncRef) -> Option<usize> {
        self.func_to_table_index.get(&func_ref).copied()
    }

    /// Select, allocate, and encode `func_ref`'s body, recording its unwind
    /// info alongside it. A no-op if the function has no blocks yet (an
    /// external declaration with no definition).
    pub fn add_function(&mut self, ctx: &IRContext, func_ref: FuncRef) {
        if ctx.function(func_ref).block_order().is_empty() {
            return;
        }

        let mut mfunc: MachineFunction = select::codegen(ctx, func_ref);
        regalloc::allocate(ctx, func_ref, &mut mfunc);

        self.file_info = ctx.function(func_ref).file_names.clone();

        let (begin_address, end_address) = encode::codegen(self, &mut mfunc);

        let mut entry = FunctionEntry {
            begin_address,
            end_address,
            ..Default::default()
        };

        #[cfg(target_os = "windows")]
        {
            let data = unwind::create_windows(&mfunc);
            entry.begin_unwind_data = self.unwind_data.len();
            for word in &data {
                self.unwind_data.extend_from_slice(&word.to_le_bytes());
            }
            entry.end_unwind_data = self.unwind_data.len();
        }
        #[cfg(not(target_os = "windows"))]
        {
            let (data, function_start) = unwind::create_unix(&mfunc);
            entry.begin_unwind_data = self.unwind_data.len();
            entry.unix_unwind_function_start = function_start;
            self.unwind_data.extend_from_slice(&data);
            entry.end_unwind_data = self.unwind_data.len();
        }

        self.func_to_table_index.insert(func_ref, self.function_table.len());
        self.function_table.push(entry);
    }

    /// Register `func_ref` as resolving to a pre-existing native function
    /// (a host callback, a libc import) instead of JIT-compiled code.
    pub fn add_external_function(&mut self, func_ref: FuncRef, external: *const u8) {
        let entry = FunctionEntry {
            external: Some(external as usize),
            ..Default::default()
        };
        self.func_to_table_index.insert(func_ref, self.function_table.len());
        self.function_table.push(entry);
    }

    /// Copy the accumulated code, data, and unwind info into their final
    /// executable/readable destinations and patch every deferred reference.
    /// `global_address` resolves a global's final runtime address; it is
    /// consulted only for the relocations actually produced by `Global`
    /// operands.
    ///
    /// # Safety
    /// `code_dst`, `data_dst`, and `unwind_dst` must each be valid for
    /// `code_size()`/`data_size()`/`unwind_data_size()` writable bytes.
    pub unsafe fn relocate(
        &self,
        code_dst: *mut u8,
        data_dst: *mut u8,
        unwind_dst: *mut u8,
        global_address: impl Fn(GlobalRef) -> usize,
    ) {
        unsafe {
            std::ptr::copy_nonoverlapping(self.code.as_ptr(), code_dst, self.code.len());
            std::ptr::copy_nonoverlapping(self.data.as_ptr(), data_dst, self.data.len());
            std::ptr::copy_nonoverlapping(self.unwind_data.as_ptr(), unwind_dst, self.unwind_data.len());

            #[cfg(not(target_os = "windows"))]
            for entry in &self.function_table {
                if entry.begin_unwind_data != entry.end_unwind_data {
                    let fde_func = unwind_dst.add(entry.begin_unwind_data + entry.unix_unwind_function_start as usize)
                        as *mut u64;
                    fde_func.write_unaligned(code_dst.add(entry.begin_address) as u64);
                    fde_func.add(1).write_unaligned((entry.end_address - entry.begin_address) as u64);
                }
            }

            for &(codepos, datapos) in &self.data_relocate_info {
                let ripoffset = (data_dst.add(datapos) as isize) - (code_dst.add(codepos + 4) as isize);
                code_dst.add(codepos).cast::<i32>().write_unaligned(ripoffset as i32);
            }

            for &(pos, func_ref) in &self.call_relocate_info {
                let table_index = self.func_to_table_index[&func_ref];
                let entry = &self.function_table[table_index];
                let value = match entry.external {
                    Some(external) => external as u64,
                    None => code_dst.add(entry.begin_address) as u64,
                };
                code_dst.add(pos).cast::<u64>().write_unaligned(value);
            }

            for &(codepos, global_ref) in &self.global_relocate_info {
                let address = global_address(global_ref);
                let ripoffset = (address as isize) - (code_dst.add(codepos + 4) as isize);
                code_dst.add(codepos).cast::<i32>().write_unaligned(ripoffset as i32);
            }
        }
    }
}
