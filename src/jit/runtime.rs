//! Owns executable memory, the function/global symbol tables, and the OS
//! unwind registrations for every `IRContext` handed to it (spec.md §4.11).
//! Ported from `JITRuntime`.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::error::{JitError, JitResult};
use crate::ir::context::IRContext;
use crate::ir::types::round_up8;
use crate::ir::value::Operand;
use crate::isa::holder::MachineCodeHolder;
use crate::jit::memory::MemoryManager;

fn round_up16(n: usize) -> usize {
    (n + 15) / 16 * 16
}

/// One resolved frame from [`JITRuntime::capture_stack_trace`]. Mirrors
/// `JITStackFrame`; `is_empty` matches its `operator bool` (a frame that
/// resolved to nothing everywhere is elided by the caller rather than kept).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitStackFrame {
    pub printable_name: String,
    pub file_name: String,
    pub line_number: i32,
}

impl JitStackFrame {
    fn is_empty(&self) -> bool {
        self.printable_name.is_empty() && self.file_name.is_empty() && self.line_number == -1
    }
}

impl Default for JitStackFrame {
    fn default() -> Self {
        JitStackFrame {
            printable_name: String::new(),
            file_name: String::new(),
            line_number: -1,
        }
    }
}

/// One previously-registered OS unwind table, deregistered on
/// `JITRuntime` drop.
enum UnwindRegistration {
    #[cfg(not(windows))]
    Frame(*const u8),
    #[cfg(windows)]
    FunctionTable(*mut RawRuntimeFunction),
}

#[cfg(windows)]
#[repr(C)]
struct RawRuntimeFunction {
    begin_address: u32,
    end_address: u32,
    unwind_info_address: u32,
}

/// Owns every executable page, symbol-table entry, and OS unwind
/// registration produced by linking one or more [`IRContext`]s. Dropping it
/// deregisters every unwind entry and frees every page (spec.md §5).
#[derive(Default)]
pub struct JITRuntime {
    memory: MemoryManager,
    function_table: HashMap<String, usize>,
    global_table: HashMap<String, usize>,
    globals: Vec<u8>,
    unwind_registrations: Vec<UnwindRegistration>,
}

impl JITRuntime {
    pub fn new() -> JITRuntime {
        JITRuntime::default()
    }

    /// Compile and link every function and global variable declared in
    /// `ctx`, making them reachable through
    /// [`Self::get_pointer_to_function`]/[`Self::get_pointer_to_global`].
    pub fn add(&mut self, ctx: &IRContext) -> JitResult<()> {
        let globals_base = self.globals.len();
        let mut offset = globals_base;
        for (_global_ref, data) in ctx.globals() {
            let size = round_up8(data.ty.alloc_size(ctx)) as usize;
            data.globals_offset.set(offset as i64);
            self.global_table.insert(data.name.clone(), offset);
            offset += size;
        }
        self.globals.resize(offset, 0);

        let mut holder = MachineCodeHolder::new();
        for (func_ref, _func) in ctx.functions() {
            holder.add_function(ctx, func_ref);
        }
        for (value, ptr) in ctx.global_mappings() {
            if let Operand::FuncValue(func_ref) = value {
                holder.add_external_function(func_ref, ptr);
            }
        }

        self.link(ctx, &holder)?;

        for (_global_ref, data) in ctx.globals() {
            if let Some(initializer) = data.initializer {
                let offset = data.globals_offset.get() as usize;
                self.init_global(ctx, offset, initializer)?;
            }
        }

        Ok(())
    }

    /// Reserve one contiguous, 16-byte-aligned region sized for the
    /// holder's code/data/unwind buffers (plus, on Windows, its
    /// `RUNTIME_FUNCTION` table), relocate the holder into it, make it
    /// executable, and register its unwind info with the OS.
    fn link(&mut self, ctx: &IRContext, holder: &MachineCodeHolder) -> JitResult<()> {
        let code_size = round_up16(holder.code_size());
        let data_size = round_up16(holder.data_size());
        let unwind_size = round_up16(holder.unwind_data_size());

        #[cfg(windows)]
        let table_size =
            round_up16(holder.function_table().len() * std::mem::size_of::<RawRuntimeFunction>());
        #[cfg(not(windows))]
        let table_size = 0usize;

        let base = self.memory.alloc(code_size + data_size + unwind_size + table_size)?;
        let code_dst = base;
        let data_dst = unsafe { base.add(code_size) };
        let unwind_dst = unsafe { base.add(code_size + data_size) };

        let globals_ptr = self.globals.as_ptr() as usize;
        unsafe {
            holder.relocate(code_dst, data_dst, unwind_dst, |global_ref| {
                let data = ctx.global_data(global_ref);
                globals_ptr + data.globals_offset.get() as usize
            });
        }

        self.memory.make_executable()?;

        #[cfg(windows)]
        {
            let table_dst = unsafe { base.add(code_size + data_size + unwind_size) } as *mut RawRuntimeFunction;
            let mut count = 0u32;
            for entry in holder.function_table() {
                if entry.external.is_none() {
                    unsafe {
                        let slot = table_dst.add(count as usize);
                        (*slot).begin_address = entry.begin_address as u32;
                        (*slot).end_address = entry.end_address as u32;
                        (*slot).unwind_info_address =
                            (code_size + data_size + entry.begin_unwind_data) as u32;
                    }
                    count += 1;
                }
            }
            if count > 0 {
                let ok = unsafe {
                    winapi::um::winnt::RtlAddFunctionTable(
                        table_dst as *mut winapi::um::winnt::RUNTIME_FUNCTION,
                        count,
                        base as u64,
                    )
                };
                if ok == 0 {
                    return Err(JitError::UnwindRegistrationFailed);
                }
                self.unwind_registrations
                    .push(UnwindRegistration::FunctionTable(table_dst));
            }
        }

        #[cfg(not(windows))]
        {
            if unwind_size > 0 {
                self.register_eh_frame(unwind_dst, holder.unwind_data_size())?;
            }
        }

        for (func_ref, func) in ctx.functions() {
            if let Some(index) = holder.table_index(func_ref) {
                let entry = &holder.function_table()[index];
                let address = match entry.external {
                    Some(external) => external,
                    None => code_dst as usize + entry.begin_address,
                };
                self.function_table.insert(func.name.clone(), address);
            }
        }

        Ok(())
    }

    /// Register the holder's concatenated CIE/FDE blob with the OS unwinder.
    /// On Linux, `__register_frame` accepts a pointer to the whole
    /// `.eh_frame`-shaped blob and walks it itself; on macOS it only accepts
    /// one FDE at a time, so the blob is walked here and each entry is
    /// registered individually — both behaviors ported directly from
    /// `JITRuntime::add(MachineCodeHolder*)`.
    #[cfg(all(unix, not(target_os = "macos")))]
    fn register_eh_frame(&mut self, unwind_dst: *mut u8, _len: usize) -> JitResult<()> {
        unsafe {
            __register_frame(unwind_dst as *const u8);
        }
        self.unwind_registrations
            .push(UnwindRegistration::Frame(unwind_dst as *const u8));
        Ok(())
    }

    #[cfg(target_os = "macos")]
    fn register_eh_frame(&mut self, unwind_dst: *mut u8, len: usize) -> JitResult<()> {
        unsafe {
            let mut entry = unwind_dst;
            let end = unwind_dst.add(len);
            while entry < end {
                let length = (entry as *const u32).read_unaligned();
                if length == 0 {
                    break;
                }
                if length == 0xffff_ffff {
                    let length64 = (entry.add(4) as *const u64).read_unaligned();
                    if length64 == 0 {
                        break;
                    }
                    let cie_offset = (entry.add(12) as *const u64).read_unaligned();
                    if cie_offset != 0 {
                        __register_frame(entry as *const u8);
                        self.unwind_registrations
                            .push(UnwindRegistration::Frame(entry as *const u8));
                    }
                    entry = entry.add(length64 as usize + 12);
                } else {
                    let cie_offset = (entry.add(4) as *const u32).read_unaligned();
                    if cie_offset != 0 {
                        __register_frame(entry as *const u8);
                        self.unwind_registrations
                            .push(UnwindRegistration::Frame(entry as *const u8));
                    }
                    entry = entry.add(length as usize + 4);
                }
            }
        }
        Ok(())
    }

    fn init_global(&mut self, ctx: &IRContext, offset: usize, value: Operand) -> JitResult<()> {
        match value {
            Operand::ConstStruct(r) => {
                let data = ctx.const_struct_data(r);
                let field_types = match &data.ty {
                    crate::ir::types::Type::Struct(sref) => &ctx.struct_data(*sref).fields,
                    _ => return Err(JitError::UnknownConstantType("struct".to_string())),
                };
                let mut field_offset = offset;
                for (field_value, field_ty) in data.fields.clone().into_iter().zip(field_types.clone()) {
                    self.init_global(ctx, field_offset, field_value)?;
                    field_offset += round_up8(field_ty.alloc_size(ctx)) as usize;
                }
                Ok(())
            }
            Operand::ConstInt(r) => {
                let data = ctx.const_int_data(r);
                unsafe {
                    let dst = self.globals.as_mut_ptr().add(offset);
                    match data.ty.int_bits() {
                        Some(1) | Some(8) => dst.write(data.value as u8),
                        Some(16) => (dst as *mut u16).write_unaligned(data.value as u16),
                        Some(32) => (dst as *mut u32).write_unaligned(data.value as u32),
                        Some(64) => (dst as *mut u64).write_unaligned(data.value),
                        _ => return Err(JitError::UnknownConstantType("int".to_string())),
                    }
                }
                Ok(())
            }
            Operand::ConstFP(r) => {
                let data = ctx.const_fp_data(r);
                unsafe {
                    let dst = self.globals.as_mut_ptr().add(offset);
                    match data.ty {
                        crate::ir::types::Type::Float => {
                            (dst as *mut f32).write_unaligned(data.value as f32)
                        }
                        crate::ir::types::Type::Double => (dst as *mut f64).write_unaligned(data.value),
                        _ => return Err(JitError::UnknownConstantType("float".to_string())),
                    }
                }
                Ok(())
            }
            Operand::FuncValue(func_ref) => {
                let name = ctx.function(func_ref).name.clone();
                let address = self
                    .function_table
                    .get(&name)
                    .copied()
                    .ok_or_else(|| JitError::UnknownConstantType(name.clone()))?;
                unsafe {
                    let dst = self.globals.as_mut_ptr().add(offset) as *mut u64;
                    dst.write_unaligned(address as u64);
                }
                Ok(())
            }
            _ => Err(JitError::UnknownConstantType(
                "initializer is not a constant".to_string(),
            )),
        }
    }

    /// Look up a previously-added function's native entry point by name.
    pub fn get_pointer_to_function(&self, name: &str) -> Option<*const u8> {
        self.function_table.get(name).map(|&a| a as *const u8)
    }

    /// Look up a previously-added global variable's address inside this
    /// runtime's `globals` buffer.
    pub fn get_pointer_to_global(&self, name: &str) -> Option<*const u8> {
        self.global_table
            .get(name)
            .map(|&offset| unsafe { self.globals.as_ptr().add(offset) })
    }

    /// Walk the current call stack, skipping `frames_to_skip` frames (plus
    /// this call's own frame), and resolve each return address to a
    /// printable name/file/line. Frames that resolve to nothing are
    /// elided, matching `JITStackFrame::operator bool`.
    pub fn capture_stack_trace(&self, frames_to_skip: usize, include_native: bool) -> Vec<JitStackFrame> {
        let ips = capture_ips();

        #[cfg(windows)]
        let resolver = if include_native {
            Some(crate::jit::symbols::DbgHelpResolver::new())
        } else {
            None
        };

        ips.into_iter()
            .skip(frames_to_skip + 1)
            .filter_map(|ip| {
                #[cfg(windows)]
                let frame = resolver.as_ref().map(|r| r.resolve(ip)).unwrap_or_default();
                #[cfg(not(windows))]
                let frame = if include_native {
                    crate::jit::symbols::resolve(ip)
                } else {
                    JitStackFrame::default()
                };

                if frame.is_empty() {
                    None
                } else {
                    Some(frame)
                }
            })
            .collect()
    }
}

impl Drop for JITRuntime {
    fn drop(&mut self) {
        for reg in self.unwind_registrations.drain(..) {
            match reg {
                #[cfg(not(windows))]
                UnwindRegistration::Frame(fde) => unsafe {
                    __deregister_frame(fde);
                },
                #[cfg(windows)]
                UnwindRegistration::FunctionTable(table) => unsafe {
                    winapi::um::winnt::RtlDeleteFunctionTable(table as *mut winapi::um::winnt::RUNTIME_FUNCTION);
                },
            }
        }
        // `self.memory`'s own `Drop` frees every page after the loop above
        // has deregistered all of their unwind info, matching spec.md §5.
    }
}

#[cfg(not(windows))]
extern "C" {
    fn __register_frame(fde: *const u8);
    fn __deregister_frame(fde: *const u8);
}

#[cfg(not(windows))]
fn capture_ips() -> SmallVec<[*mut std::ffi::c_void; 32]> {
    let mut ips: SmallVec<[*mut std::ffi::c_void; 32]> = SmallVec::new();
    backtrace::trace(|frame| {
        ips.push(frame.ip());
        ips.len() < 32
    });
    ips
}

#[cfg(windows)]
fn capture_ips() -> SmallVec<[*mut std::ffi::c_void; 32]> {
    let mut raw: [*mut std::ffi::c_void; 32] = [std::ptr::null_mut(); 32];
    let count = unsafe {
        winapi::um::winnt::RtlCaptureStackBackTrace(0, 32, raw.as_mut_ptr(), std::ptr::null_mut())
    };
    raw[..count as usize].iter().copied().collect()
}
