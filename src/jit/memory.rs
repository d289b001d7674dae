//! Executable-memory management for the JIT runtime (spec.md §4.11/§5).
//!
//! Ported from `JITRuntime::allocJitMemory`/`virtualAlloc`/`virtualFree`:
//! bump-allocate within 1 MiB blocks, requesting a fresh block once the
//! current one doesn't have room. Unlike the original, which hands back
//! `PAGE_EXECUTE_READWRITE`/`PROT_READ|WRITE|EXEC` memory up front, each
//! block here is allocated read-write and only flipped to read-execute once
//! its code has actually been written, so nothing is ever simultaneously
//! writable and executable.

use crate::error::{JitError, JitResult};

const BLOCK_SIZE: usize = 1024 * 1024;

/// One OS-backed block of memory plus a bump cursor.
struct MemoryBlock {
    base: *mut u8,
    size: usize,
    used: usize,
}

impl MemoryBlock {
    fn alloc(size: usize) -> JitResult<MemoryBlock> {
        let base = unsafe { os::alloc(size) }.map_err(JitError::AllocFailed)?;
        Ok(MemoryBlock { base, size, used: 0 })
    }

    fn remaining(&self) -> usize {
        self.size - self.used
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        unsafe { os::free(self.base, self.size) };
    }
}

/// Bump allocator handing out pointers into a growing set of
/// [`MemoryBlock`]s (spec.md §5: "Allocation is bump-pointer within the
/// current page; a new page is added when the requested size does not
/// fit"). Every block outlives the `MemoryManager` itself until it is
/// dropped, at which point every block is freed in one pass, matching
/// `JITRuntime`'s destructor.
#[derive(Default)]
pub struct MemoryManager {
    blocks: Vec<MemoryBlock>,
}

impl MemoryManager {
    pub fn new() -> MemoryManager {
        MemoryManager::default()
    }

    /// Reserve `size` contiguous bytes, writable but not yet executable.
    pub fn alloc(&mut self, size: usize) -> JitResult<*mut u8> {
        if let Some(block) = self.blocks.last_mut() {
            if block.remaining() >= size {
                let ptr = unsafe { block.base.add(block.used) };
                block.used += size;
                return Ok(ptr);
            }
        }
        let block_size = size.max(BLOCK_SIZE);
        let mut block = MemoryBlock::alloc(block_size)?;
        block.used = size;
        let ptr = block.base;
        self.blocks.push(block);
        Ok(ptr)
    }

    /// Flip every block's protection from read-write to read-execute. Called
    /// once per `JITRuntime::add`, after all of that call's code has been
    /// written into the blocks it allocated.
    pub fn make_executable(&self) -> JitResult<()> {
        for block in &self.blocks {
            unsafe { os::protect_exec(block.base, block.size) }.map_err(JitError::ProtectFailed)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
mod os {
    use std::io;
    use std::ptr;

    pub unsafe fn alloc(size: usize) -> io::Result<*mut u8> {
        unsafe {
            let ptr = libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::from_raw_os_error(errno::errno().0));
            }
            Ok(ptr as *mut u8)
        }
    }

    pub unsafe fn protect_exec(base: *mut u8, size: usize) -> io::Result<()> {
        unsafe {
            let result = libc::mprotect(base as *mut libc::c_void, size, libc::PROT_READ | libc::PROT_EXEC);
            if result != 0 {
                return Err(io::Error::from_raw_os_error(errno::errno().0));
            }
            Ok(())
        }
    }

    pub unsafe fn free(base: *mut u8, size: usize) {
        unsafe {
            libc::munmap(base as *mut libc::c_void, size);
        }
    }
}

#[cfg(windows)]
mod os {
    use std::io;
    use std::ptr;

    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE};

    pub unsafe fn alloc(size: usize) -> io::Result<*mut u8> {
        unsafe {
            let ptr = VirtualAlloc(ptr::null_mut(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE);
            if ptr.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(ptr as *mut u8)
        }
    }

    pub unsafe fn protect_exec(base: *mut u8, size: usize) -> io::Result<()> {
        unsafe {
            let mut old_protect = 0;
            let ok = VirtualProtect(base as *mut _, size, PAGE_EXECUTE_READ, &mut old_protect);
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    pub unsafe fn free(base: *mut u8, _size: usize) {
        unsafe {
            VirtualFree(base as *mut _, 0, MEM_RELEASE);
        }
    }
}
