//! Unmap + map phases of the address-space rebuild (§4.6 of SPEC_FULL.md).

use kernel::prelude::*;
use kernel::bindings;
use kernel::fs::File as KFile;

use crate::raw;
use crate::wire;

/// A fully kernel-side-copied region: header plus an owned content buffer
/// (absent for file-backed and metadata-only regions).
pub struct OwnedRegion {
    pub start: usize,
    pub end: usize,
    pub size: usize,
    pub offset: u64,
    pub permissions: [u8; wire::PERMISSIONS_LEN],
    pub path: KVec<u8>,
    pub content: Option<KVec<u8>>,
}

impl OwnedRegion {
    fn path_bytes(&self) -> &[u8] {
        let len = self
            .path
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.path.len());
        &self.path[..len]
    }
}

/// Reserved stub range the orchestrator pre-placed to host the code and
/// stack that perform this very device write (§4.7's placement invariant).
/// Anything overlapping this range is left mapped by [`unmap_all`].
pub struct ReservedStub {
    pub start: usize,
    pub end: usize,
}

/// Walks `current`'s VMA list and unmaps everything except the vDSO
/// trampoline, kernel-special mappings, and the reserved stub range.
///
/// # Safety
/// Must be called from the context of the task being rebuilt (i.e. the
/// victim itself, inside its own `write()` syscall), with no other thread
/// of the same process concurrently touching the address space — true by
/// construction since target processes are single-threaded (§1).
pub unsafe fn unmap_all(stub: &ReservedStub) -> Result<()> {
    // SAFETY: called from victim context per this function's contract.
    let mm = unsafe { current_mm() };
    if mm.is_null() {
        return Err(EINVAL);
    }

    loop {
        // SAFETY: `mm` is non-null (checked above) and stable for the
        // victim's own single-threaded lifetime.
        let next = unsafe { next_unmappable_vma(mm, stub) };
        let Some((start, len)) = next else {
            break;
        };
        // SAFETY: unmapping the caller's own address space, as documented
        // on `raw::munmap`.
        unsafe { raw::munmap(start, len) }.map_err(|_| EIO)?;
    }

    Ok(())
}

/// Returns the next VMA (by address) that is neither the vDSO trampoline,
/// a kernel-special mapping, nor inside `stub`, as `(start, len)`, or
/// `None` once no more such VMAs remain.
///
/// This re-walks from the head of the list on every call rather than
/// caching a `next` pointer, because each `unmap_all` iteration invalidates
/// the list; re-walking is the same strategy the original C module uses
/// (it instead caches `vm_next` before unmapping, which this Rust version
/// avoids since the cached pointer is itself invalidated by taking the
/// `mmap_lock` across the unmap call on some kernel versions).
///
/// # Safety
/// `mm` must be non-null and belong to the calling (single-threaded) task.
unsafe fn next_unmappable_vma(
    mm: *mut bindings::mm_struct,
    stub: &ReservedStub,
) -> Option<(usize, usize)> {
    // SAFETY: `mm` is valid per this function's contract; reading VMA
    // metadata through the kernel's own list pointers is how the original
    // `unmap_all` walks `mm->mmap`.
    unsafe {
        let mut vma = (*mm).mmap;
        let vdso_start = (*mm).context.vdso as usize;
        while !vma.is_null() {
            let start = (*vma).vm_start as usize;
            let end = (*vma).vm_end as usize;
            let flags = (*vma).vm_flags;
            let is_vdso = start == vdso_start;
            let is_special = flags & bindings::VM_SPECIAL as u64 != 0;
            let is_stub = start >= stub.start && end <= stub.end;
            if !is_vdso && !is_special && !is_stub {
                return Some((start, end - start));
            }
            vma = (*vma).vm_next;
        }
    }
    None
}

/// # Safety
/// Must be called from the victim's own task context.
unsafe fn current_mm() -> *mut bindings::mm_struct {
    // SAFETY: `current` is always valid from process (non-interrupt)
    // context, which a `write()` file operation always is.
    unsafe { (*bindings::current()).mm }
}

/// Maps every non-skipped region from `regions`, in order, per §4.6's map
/// phase: file-backed regions open their backing file read-only and map
/// `PRIVATE | FIXED`; anonymous content-carrying regions map
/// `PRIVATE | ANONYMOUS | FIXED` forced writable, copy content in, then
/// re-map with the snapshot's real permissions if those lack write.
///
/// # Safety
/// Same context requirement as [`unmap_all`]; must run after `unmap_all`
/// has completed for the same task.
pub unsafe fn map_all(regions: &[OwnedRegion]) -> Result<()> {
    for region in regions {
        let path = region.path_bytes();
        if wire::is_special(path) {
            continue;
        }

        if wire::is_file_backed(path) {
            map_file_backed(region, path)?;
        } else {
            // SAFETY: victim context, per this function's contract.
            unsafe { map_anonymous(region, path) }?;
        }
    }
    Ok(())
}

fn map_file_backed(region: &OwnedRegion, path: &[u8]) -> Result<()> {
    let path_str = core::str::from_utf8(path).map_err(|_| EINVAL)?;
    let file = KFile::open(path_str, bindings::O_RDONLY as i32, 0)?;
    let prot = region_prot(region);
    let flags = raw::MAP_PRIVATE | raw::MAP_FIXED;
    // SAFETY: victim context, per `map_all`'s contract; `file` stays valid
    // for the duration of the call.
    unsafe {
        raw::mmap_file(
            file.as_ptr() as *mut bindings::file,
            region.start,
            region.size,
            prot,
            flags,
            region.offset,
        )
    }
    .map(|_| ())
    .map_err(|_| EIO)
}

/// # Safety
/// Same context requirement as [`map_all`].
unsafe fn map_anonymous(region: &OwnedRegion, path: &[u8]) -> Result<()> {
    let mut flags = raw::MAP_PRIVATE | raw::MAP_ANONYMOUS | raw::MAP_FIXED;
    if wire::path_is(path, wire::STACK) {
        flags |= raw::MAP_GROWSDOWN;
    }

    // Phase (a): map writable so content can be copied in even if the
    // snapshot's target permissions are read-only.
    let write_prot = raw::PROT_READ | raw::PROT_WRITE | exec_bit(region);
    // SAFETY: victim context, per this function's contract.
    unsafe { raw::mmap_anonymous(region.start, region.size, write_prot, flags) }
        .map_err(|_| EIO)?;

    // Phase (b): copy content, if any.
    if let Some(content) = &region.content {
        if content.len() != region.size {
            return Err(EINVAL);
        }
        // SAFETY: `region.start` was just mapped writable for exactly
        // `region.size` bytes above.
        unsafe {
            core::ptr::copy_nonoverlapping(
                content.as_ptr(),
                region.start as *mut u8,
                region.size,
            );
        }
    }

    // Phase (c): if the snapshot's real permissions lack WRITE, the initial
    // mapping was forced writable only to allow the copy above. Unmap and
    // re-map at the same address with the real (read-only) permissions,
    // then copy the content again from our still-owned buffer — the first
    // copy's physical pages are freed by the unmap, so this is a genuine
    // second copy, not a no-op.
    if !region_is_writable(region) {
        // SAFETY: the address range we just mapped, per this function's
        // contract.
        unsafe { raw::munmap(region.start, region.size) }.map_err(|_| EIO)?;
        let final_prot = region_prot(region);
        // SAFETY: same context; re-mapping the same range non-writable.
        unsafe { raw::mmap_anonymous(region.start, region.size, final_prot, flags) }
            .map_err(|_| EIO)?;
        if let Some(content) = &region.content {
            // SAFETY: the kernel permits a kernel-context write through
            // `copy_nonoverlapping` regardless of the VMA's userspace
            // protection bits; this restores content lost by the remap
            // below a read-only mapping.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    content.as_ptr(),
                    region.start as *mut u8,
                    content.len().min(region.size),
                );
            }
        }
    }

    Ok(())
}

fn region_is_writable(region: &OwnedRegion) -> bool {
    region.permissions.get(1) == Some(&b'w')
}

fn exec_bit(region: &OwnedRegion) -> core::ffi::c_ulong {
    if region.permissions.get(2) == Some(&b'x') {
        raw::PROT_EXEC
    } else {
        0
    }
}

fn region_prot(region: &OwnedRegion) -> core::ffi::c_ulong {
    let mut prot = 0;
    if region.permissions.first() == Some(&b'r') {
        prot |= raw::PROT_READ;
    }
    if region.permissions.get(1) == Some(&b'w') {
        prot |= raw::PROT_WRITE;
    }
    prot | exec_bit(region)
}
