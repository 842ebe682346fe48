//! Thin FFI boundary onto `mm/` internals the safe `kernel` crate bindings
//! do not (yet) expose: walking the caller's VMA list, `vm_munmap`,
//! `vm_mmap`, and the TLB/cache flush used after rebuild. Mirrors exactly
//! what `src/kernel_vd/krestore.c` in the original implementation calls
//! directly; this is the Rust-for-Linux equivalent of that same direct call.

use core::ffi::{c_int, c_ulong};
use kernel::bindings;

/// Mirrors `struct vm_area_struct` fields this module actually reads.
/// The kernel crate's generated `bindings::vm_area_struct` is used directly
/// rather than redeclared here; this module only adds the free functions
/// bindgen does not surface as safe wrappers.
pub type VmAreaStruct = bindings::vm_area_struct;

extern "C" {
    /// `int vm_munmap(unsigned long start, size_t len)`
    fn vm_munmap(start: c_ulong, len: c_ulong) -> c_int;

    /// `unsigned long vm_mmap(struct file *file, unsigned long addr,
    ///   unsigned long len, unsigned long prot, unsigned long flags,
    ///   unsigned long offset)`
    fn vm_mmap(
        file: *mut bindings::file,
        addr: c_ulong,
        len: c_ulong,
        prot: c_ulong,
        flags: c_ulong,
        offset: c_ulong,
    ) -> c_ulong;

    /// `void flush_tlb_mm(struct mm_struct *mm)`
    fn flush_tlb_mm(mm: *mut bindings::mm_struct);
}

pub const PROT_READ: c_ulong = 0x1;
pub const PROT_WRITE: c_ulong = 0x2;
pub const PROT_EXEC: c_ulong = 0x4;

pub const MAP_PRIVATE: c_ulong = 0x02;
pub const MAP_FIXED: c_ulong = 0x10;
pub const MAP_ANONYMOUS: c_ulong = 0x20;
pub const MAP_GROWSDOWN: c_ulong = 0x0100;

/// Unmaps `[start, start+len)` in the current task's address space.
///
/// # Safety
/// Caller must hold `current`'s mmap write lock (or otherwise be in a
/// context where mutating the current task's VMA list is legal), as the
/// kernel's own `vm_munmap` requires.
pub unsafe fn munmap(start: usize, len: usize) -> Result<(), c_int> {
    // SAFETY: forwarded to the kernel's own munmap entry point; the
    // precondition is documented on this function.
    let ret = unsafe { vm_munmap(start as c_ulong, len as c_ulong) };
    if ret != 0 {
        Err(ret)
    } else {
        Ok(())
    }
}

/// Maps `len` bytes at `start` with `prot`/`flags`, anonymous (no backing
/// file).
///
/// # Safety
/// Same preconditions as [`munmap`]; `start` must be page-aligned.
pub unsafe fn mmap_anonymous(
    start: usize,
    len: usize,
    prot: c_ulong,
    flags: c_ulong,
) -> Result<usize, c_int> {
    // SAFETY: forwarded to the kernel's own mmap entry point.
    let ret = unsafe { vm_mmap(core::ptr::null_mut(), start as c_ulong, len as c_ulong, prot, flags, 0) };
    if (ret as isize) < 0 && (ret as isize) > -4096 {
        Err(ret as c_int)
    } else {
        Ok(ret as usize)
    }
}

/// Maps `len` bytes at `start` backed by `file` at `offset`.
///
/// # Safety
/// `file` must be a valid, open `struct file *` for the duration of the
/// call; same alignment/lock preconditions as [`munmap`].
pub unsafe fn mmap_file(
    file: *mut bindings::file,
    start: usize,
    len: usize,
    prot: c_ulong,
    flags: c_ulong,
    offset: u64,
) -> Result<usize, c_int> {
    // SAFETY: forwarded to the kernel's own mmap entry point.
    let ret = unsafe { vm_mmap(file, start as c_ulong, len as c_ulong, prot, flags, offset as c_ulong) };
    if (ret as isize) < 0 && (ret as isize) > -4096 {
        Err(ret as c_int)
    } else {
        Ok(ret as usize)
    }
}

/// Flushes the current task's TLB entries and, on x86_64, the CPU cache
/// hierarchy. x86_64 has coherent I/D caches so the cache flush is strictly
/// unnecessary there; it is kept so this module stays correct if ever built
/// for an architecture without that guarantee (see SPEC_FULL.md §4.6).
///
/// # Safety
/// Must be called with `current.mm` non-null.
pub unsafe fn flush_tlb_and_cache(mm: *mut bindings::mm_struct) {
    // SAFETY: `mm` is non-null per this function's contract.
    unsafe { flush_tlb_mm(mm) };
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::asm!("wbinvd", options(nostack, preserves_flags));
        core::arch::asm!("mfence", options(nostack, preserves_flags));
    }
}
