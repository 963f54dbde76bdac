//! Executable memory manager: mmap → copy → mprotect W^X transition,
//! plus the macOS `MAP_JIT` + `pthread_jit_write_protect_np` toggle, the
//! Windows `VirtualAlloc` path, and an icache flush after install.
//!
//! Grounded on the reference runtime's AOT bundle loader
//! (`raya-runtime::bundle::loader::load_executable_code`), which does the
//! same mmap/copy/mprotect dance for code loaded off disk; this manager does
//! it for code produced in-process by the native backends instead.

use std::ptr::NonNull;

use thiserror::Error;

/// Failures from the OS memory-mapping primitives.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The initial read/write mapping could not be created.
    #[error("failed to allocate executable memory region ({size} bytes, os error {os_error})")]
    AllocFailed {
        /// Requested region size.
        size: usize,
        /// Raw OS error code (`errno` on Unix, `GetLastError` on Windows).
        os_error: i32,
    },
    /// The write→execute protection transition failed.
    #[error("failed to switch memory region to executable (os error {os_error})")]
    ProtectFailed {
        /// Raw OS error code.
        os_error: i32,
    },
}

impl MemoryError {
    /// Whether the OS error looks like a missing JIT entitlement (Apple
    /// hardened-runtime or similar), in which case callers should fall back
    /// to the helper-stub backend rather than treating this as fatal.
    pub fn looks_like_missing_entitlement(&self) -> bool {
        let code = match self {
            MemoryError::AllocFailed { os_error, .. } => *os_error,
            MemoryError::ProtectFailed { os_error } => *os_error,
        };
        #[cfg(unix)]
        {
            code == libc::EPERM || code == libc::ENOTSUP
        }
        #[cfg(not(unix))]
        {
            let _ = code;
            false
        }
    }
}

/// Rounds `n` up to the next multiple of `page_size` (JITEntry's
/// `code_size`/`code_capacity` split, §3: the mapping is always a whole
/// number of pages even though the emitted code rarely fills the last one).
fn align_up(n: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return n;
    }
    (n + page_size - 1) / page_size * page_size
}

/// A mapped region of executable memory owned by the memory manager.
///
/// Dropping it unmaps the region. `size` is the exact number of code bytes
/// written; `capacity` is the page-aligned length of the underlying mapping
/// (`mmap`/`VirtualAlloc` never reserve a partial page), mirroring the
/// `code_size` / `code_capacity` split on `JITEntry`. The mapping is valid
/// for `capacity` bytes and is `PROT_READ | PROT_EXEC` once
/// [`ExecutableMemory::install`] returns Ok.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    capacity: usize,
}

// Safety: once installed the region is read+exec only; callers only ever
// read through raw function-pointer casts, never mutate it concurrently.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl ExecutableMemory {
    /// Copies `code` into a fresh page-aligned executable mapping and flips
    /// it to `PROT_READ | PROT_EXEC`, flushing the instruction cache
    /// afterward.
    pub fn install(code: &[u8]) -> Result<Self, MemoryError> {
        if code.is_empty() {
            return Ok(Self {
                ptr: NonNull::dangling(),
                size: 0,
                capacity: 0,
            });
        }
        let capacity = align_up(code.len(), imp::page_size());
        let mem = imp::map_and_protect(code, capacity)?;
        imp::flush_icache(mem.ptr.as_ptr(), mem.size);
        Ok(mem)
    }

    /// Raw pointer to the start of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Size of the written code in bytes (`code_size`).
    pub fn len(&self) -> usize {
        self.size
    }

    /// Page-aligned size of the underlying mapping in bytes (`code_capacity`).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the region is empty (zero-length code was installed).
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Function pointer at `offset` bytes into the region.
    ///
    /// # Safety
    /// `offset` must land on a valid, fully-written instruction boundary
    /// produced by one of this crate's native backends.
    pub unsafe fn fn_ptr_at(&self, offset: usize) -> *const u8 {
        self.ptr.as_ptr().add(offset)
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        if self.capacity > 0 {
            imp::unmap(self.ptr.as_ptr(), self.capacity);
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod imp {
    use super::{ExecutableMemory, MemoryError};
    use std::ptr::NonNull;

    /// Detected page size, queried fresh each call (cheap `sysconf`; the
    /// reference AOT loader this manager is grounded on does the same
    /// rather than caching it in a static).
    pub(super) fn page_size() -> usize {
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz > 0 {
            sz as usize
        } else {
            4096
        }
    }

    pub(super) fn map_and_protect(code: &[u8], capacity: usize) -> Result<ExecutableMemory, MemoryError> {
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(MemoryError::AllocFailed {
                    size: capacity,
                    os_error: *libc::__errno_location(),
                });
            }

            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());

            let result = libc::mprotect(ptr, capacity, libc::PROT_READ | libc::PROT_EXEC);
            if result != 0 {
                let err = *libc::__errno_location();
                libc::munmap(ptr, capacity);
                return Err(MemoryError::ProtectFailed { os_error: err });
            }

            Ok(ExecutableMemory {
                ptr: NonNull::new(ptr as *mut u8).expect("mmap returned non-null, checked above"),
                size: code.len(),
                capacity,
            })
        }
    }

    pub(super) fn unmap(ptr: *mut u8, capacity: usize) {
        unsafe {
            libc::munmap(ptr as *mut libc::c_void, capacity);
        }
    }

    /// x86-64 and most non-Apple AArch64 targets keep the icache coherent
    /// with the dcache for normal stores; nothing to flush explicitly.
    pub(super) fn flush_icache(_ptr: *mut u8, _size: usize) {}
}

#[cfg(target_os = "macos")]
mod imp {
    use super::{ExecutableMemory, MemoryError};
    use std::ptr::NonNull;

    extern "C" {
        fn pthread_jit_write_protect_np(enabled: libc::c_int);
        fn sys_icache_invalidate(start: *mut libc::c_void, len: usize);
    }

    /// Detected page size, queried fresh each call.
    pub(super) fn page_size() -> usize {
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz > 0 {
            sz as usize
        } else {
            16384 // Apple Silicon's default page size
        }
    }

    /// `MAP_JIT` lets a hardened-runtime-signed process hold the same page
    /// writable and executable at once, toggled via
    /// `pthread_jit_write_protect_np` rather than a second `mprotect` call.
    pub(super) fn map_and_protect(code: &[u8], capacity: usize) -> Result<ExecutableMemory, MemoryError> {
        const MAP_JIT: libc::c_int = 0x0800;
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANON | MAP_JIT,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(MemoryError::AllocFailed {
                    size: capacity,
                    os_error: *libc::__error(),
                });
            }

            pthread_jit_write_protect_np(0);
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());
            pthread_jit_write_protect_np(1);

            Ok(ExecutableMemory {
                ptr: NonNull::new(ptr as *mut u8).expect("mmap returned non-null, checked above"),
                size: code.len(),
                capacity,
            })
        }
    }

    pub(super) fn unmap(ptr: *mut u8, capacity: usize) {
        unsafe {
            libc::munmap(ptr as *mut libc::c_void, capacity);
        }
    }

    pub(super) fn flush_icache(ptr: *mut u8, size: usize) {
        unsafe {
            sys_icache_invalidate(ptr as *mut libc::c_void, size);
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::{ExecutableMemory, MemoryError};
    use std::ptr::NonNull;
    use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::GetSystemInfo;
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    /// Detected page size via `GetSystemInfo`, queried fresh each call.
    pub(super) fn page_size() -> usize {
        unsafe {
            let mut info = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        }
    }

    pub(super) fn map_and_protect(code: &[u8], capacity: usize) -> Result<ExecutableMemory, MemoryError> {
        unsafe {
            let ptr = VirtualAlloc(
                std::ptr::null(),
                capacity,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            );
            if ptr.is_null() {
                return Err(MemoryError::AllocFailed {
                    size: capacity,
                    os_error: windows_sys::Win32::Foundation::GetLastError() as i32,
                });
            }

            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());

            Ok(ExecutableMemory {
                ptr: NonNull::new(ptr as *mut u8).expect("VirtualAlloc returned non-null, checked above"),
                size: code.len(),
                capacity,
            })
        }
    }

    pub(super) fn unmap(ptr: *mut u8, capacity: usize) {
        unsafe {
            VirtualFree(ptr as *mut core::ffi::c_void, 0, MEM_RELEASE);
        }
        let _ = capacity;
    }

    pub(super) fn flush_icache(ptr: *mut u8, size: usize) {
        unsafe {
            FlushInstructionCache(GetCurrentProcess(), ptr as *const core::ffi::c_void, size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_installs_as_empty_region() {
        let mem = ExecutableMemory::install(&[]).unwrap();
        assert!(mem.is_empty());
        assert_eq!(mem.len(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn ret_instruction_round_trips_through_install() {
        // 0xC3 is `ret` on x86-64; on AArch64 this is still a harmless byte
        // pattern to copy/protect even though it's not a valid instruction.
        let code = vec![0xC3u8; 64];
        let mem = ExecutableMemory::install(&code).unwrap();
        assert_eq!(mem.len(), 64);
        assert!(!mem.as_ptr().is_null());
    }

    #[cfg(unix)]
    #[test]
    fn capacity_is_rounded_up_to_a_whole_page() {
        let page = imp::page_size();
        assert!(page > 0);
        let code = vec![0xC3u8; 1];
        let mem = ExecutableMemory::install(&code).unwrap();
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.capacity(), page);
        assert_eq!(mem.capacity() % page, 0);
    }

    #[test]
    fn align_up_rounds_to_next_page_boundary() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }
}
