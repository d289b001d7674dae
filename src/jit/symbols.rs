//! Resolves a captured instruction pointer to a printable name, file, and
//! line (spec.md §4.11). Ported from `NativeSymbolResolver`: the original's
//! `GetName` is a thin wrapper around a platform symbol API, which is
//! exactly what `backtrace::resolve` is on Unix/macOS.

use crate::jit::runtime::JitStackFrame;

#[cfg(not(windows))]
pub fn resolve(ip: *mut std::ffi::c_void) -> JitStackFrame {
    let mut frame = JitStackFrame {
        line_number: -1,
        ..Default::default()
    };
    backtrace::resolve(ip, |symbol| {
        if let Some(name) = symbol.name() {
            frame.printable_name = name.to_string();
        }
        if let Some(filename) = symbol.filename() {
            frame.file_name = filename.to_string_lossy().into_owned();
        }
        if let Some(lineno) = symbol.lineno() {
            frame.line_number = lineno as i32;
        }
    });
    frame
}

/// DbgHelp needs a process-wide `SymInitialize` call before any lookup and a
/// matching `SymCleanup`; one resolver is created per
/// `capture_stack_trace(.., include_native: true)` call, same lifetime as
/// the original's stack-allocated `NativeSymbolResolver`.
#[cfg(windows)]
pub struct DbgHelpResolver {
    process: winapi::shared::ntdef::HANDLE,
}

#[cfg(windows)]
impl DbgHelpResolver {
    pub fn new() -> DbgHelpResolver {
        use winapi::um::dbghelp::SymInitialize;
        use winapi::um::processthreadsapi::GetCurrentProcess;

        let process = unsafe { GetCurrentProcess() };
        unsafe {
            SymInitialize(process, std::ptr::null_mut(), 1);
        }
        DbgHelpResolver { process }
    }

    pub fn resolve(&self, ip: *mut std::ffi::c_void) -> JitStackFrame {
        use winapi::ctypes::c_char;
        use winapi::um::dbghelp::{SymFromAddr, SymGetLineFromAddr64, IMAGEHLP_LINEW64, SYMBOL_INFO};

        const MAX_SYM_NAME: usize = 2000;
        let mut frame = JitStackFrame {
            line_number: -1,
            ..Default::default()
        };

        // `SYMBOL_INFO` ends with a flexible `Name: [c_char; 1]` array; the
        // caller over-allocates and tells DbgHelp the real capacity via
        // `MaxNameLen`, the usual pattern for this API.
        let mut buffer = vec![0u8; std::mem::size_of::<SYMBOL_INFO>() + MAX_SYM_NAME];
        let info = buffer.as_mut_ptr() as *mut SYMBOL_INFO;
        unsafe {
            (*info).SizeOfStruct = std::mem::size_of::<SYMBOL_INFO>() as u32;
            (*info).MaxNameLen = MAX_SYM_NAME as u32;

            let mut displacement: u64 = 0;
            let ok = SymFromAddr(self.process, ip as u64, &mut displacement, info);
            if ok != 0 {
                let name_ptr = (*info).Name.as_ptr() as *const c_char;
                let name = std::ffi::CStr::from_ptr(name_ptr).to_string_lossy().into_owned();
                frame.printable_name = name;
            }

            let mut line: IMAGEHLP_LINEW64 = std::mem::zeroed();
            line.SizeOfStruct = std::mem::size_of::<IMAGEHLP_LINEW64>() as u32;
            let mut line_displacement: u32 = 0;
            let ok = SymGetLineFromAddr64(self.process, ip as u64, &mut line_displacement, &mut line);
            if ok != 0 {
                frame.file_name = widestring_to_string(line.FileName);
                frame.line_number = line.LineNumber as i32;
            }
        }
        frame
    }
}

#[cfg(windows)]
fn widestring_to_string(ptr: *mut u16) -> String {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;

    if ptr.is_null() {
        return String::new();
    }
    unsafe {
        let mut len = 0;
        while *ptr.add(len) != 0 {
            len += 1;
        }
        let slice = std::slice::from_raw_parts(ptr, len);
        OsString::from_wide(slice).to_string_lossy().into_owned()
    }
}

#[cfg(windows)]
impl Drop for DbgHelpResolver {
    fn drop(&mut self) {
        unsafe {
            winapi::um::dbghelp::SymCleanup(self.process);
        }
    }
}
