// SPDX-License-Identifier: GPL-2.0

//! `krestore_mapping` — the kernel-resident half of live process migration
//! (component F of SPEC_FULL.md). A single-open character device that, on
//! `write()` from a user-context victim task, unmaps the caller's entire
//! address space (save for a reserved stub range and kernel specials) and
//! re-establishes every mapping named in a migration snapshot, at its
//! original virtual address, with original permissions, file backing, and
//! contents.
//!
//! Register restoration is deliberately NOT performed here; see
//! SPEC_FULL.md §4.6 and §9 for why the user-space variant was chosen.

#![no_std]

use kernel::prelude::*;
use kernel::sync::Mutex;
use kernel::{miscdev, new_mutex};

mod raw;
mod rebuild;
mod wire;

use rebuild::{OwnedRegion, ReservedStub};

/// Fixed virtual address range the restore orchestrator pre-places its
/// stub at before issuing the device write (§4.7's placement invariant).
/// Kept in lockstep with `migrate_core::victim::RESERVED_STUB_BASE` by
/// hand, same caveat as `wire.rs`'s layout duplication.
const RESERVED_STUB_BASE: usize = 0x7000_0000_0000;
const RESERVED_STUB_LEN: usize = 4096 * 4;

const USER_BLOCK_LEN: usize = 936;

module! {
    type: KrestoreMapping,
    name: "krestore_mapping",
    author: "live process migration",
    description: "Kernel-resident address-space rebuilder for process migration",
    license: "GPL",
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Entry,
    Remapping,
}

struct DeviceInner {
    state: DeviceState,
}

#[pin_data]
struct KrestoreMapping {
    #[pin]
    inner: Mutex<DeviceInner>,
}

kernel::impl_module! {
    impl kernel::Module for KrestoreMapping {
        fn init(_module: &'static ThisModule) -> Result<Self> {
            let inner = pin_init!(DeviceInner { state: DeviceState::Entry });
            let this = try_pin_init!(Self {
                inner <- new_mutex!(inner, "krestore_mapping::inner"),
            });
            miscdev::Registration::new_pinned::<KrestoreFile>(fmt!("krestore_mapping"), this)
        }
    }
}

struct KrestoreFile;

#[vtable]
impl kernel::file::Operations for KrestoreFile {
    type Data = Pin<KBox<KrestoreMapping>>;
    type OpenData = Pin<KBox<KrestoreMapping>>;

    fn open(shared: &Pin<KBox<KrestoreMapping>>, _file: &kernel::file::File) -> Result<Self::Data> {
        let mut inner = shared.inner.lock();
        if inner.state != DeviceState::Entry {
            return Err(EBUSY);
        }
        inner.state = DeviceState::Remapping;
        pr_info!("/dev/krestore_mapping: opened, ENTRY -> REMAPPING\n");
        Ok(shared.clone())
    }

    fn release(data: Self::Data, _file: &kernel::file::File) {
        let mut inner = data.inner.lock();
        inner.state = DeviceState::Entry;
        pr_info!("/dev/krestore_mapping: closed, -> ENTRY\n");
    }

    fn write(
        data: <Self::Data as kernel::file::IntoPointer>::Borrowed<'_>,
        _file: &kernel::file::File,
        reader: &mut impl kernel::io_buffer::IoBufferReader,
        _offset: u64,
    ) -> Result<usize> {
        {
            let inner = data.inner.lock();
            if inner.state != DeviceState::Remapping {
                return Err(EINVAL);
            }
        }

        let regions = parse_snapshot(reader)?;
        pre_validate_file_backed(&regions)?;

        let stub = ReservedStub {
            start: RESERVED_STUB_BASE,
            end: RESERVED_STUB_BASE + RESERVED_STUB_LEN,
        };

        // SAFETY: `write()` always runs in the victim's own task context,
        // and the victim is single-threaded (§1's scope restriction), so
        // no other thread can race the unmap/map sequence below.
        unsafe {
            rebuild::unmap_all(&stub)?;
            rebuild::map_all(&regions)?;
            let mm = (*kernel::bindings::current()).mm;
            if !mm.is_null() {
                raw::flush_tlb_and_cache(mm);
            }
        }

        // Per SPEC_FULL.md §4.6: on completion the write returns 0 (all
        // bytes considered consumed, not a short-write/EOF signal); the
        // orchestrator observes the syscall's *return*, not its count.
        Ok(0)
    }

    fn read(
        _data: <Self::Data as kernel::file::IntoPointer>::Borrowed<'_>,
        _file: &kernel::file::File,
        _writer: &mut impl kernel::io_buffer::IoBufferWriter,
        _offset: u64,
    ) -> Result<usize> {
        Err(EINVAL)
    }
}

/// Parses the fixed framing of §4.5: user block (discarded; registers are
/// restored from user space per §4.6/§9), region count, then per-region
/// headers with content read inline for anonymous content-carrying
/// regions. Everything is read sequentially off `reader` — there are no
/// embedded pointers on the wire (§9), so no raw `copy_from_user` calls
/// are needed beyond what `IoBufferReader` already performs per `read()`.
fn parse_snapshot(reader: &mut impl kernel::io_buffer::IoBufferReader) -> Result<KVec<OwnedRegion>> {
    let mut discard = [0u8; USER_BLOCK_LEN];
    reader.read_slice(&mut discard)?;

    let mut count_buf = [0u8; 8];
    reader.read_slice(&mut count_buf)?;
    let num_regions = u64::from_ne_bytes(count_buf) as usize;

    // A single open device accepts one snapshot at a time (the state
    // machine enforces this); a sane upper bound avoids a misbehaving
    // caller driving an unbounded kernel allocation from `num_regions`.
    const MAX_REGIONS: usize = 1 << 20;
    if num_regions > MAX_REGIONS {
        return Err(EINVAL);
    }

    let mut regions = KVec::with_capacity(num_regions, GFP_KERNEL)?;

    let mut header_buf = [0u8; wire::REGION_HEADER_LEN];
    for _ in 0..num_regions {
        reader.read_slice(&mut header_buf)?;
        let header = wire::RegionHeader::parse(&header_buf).ok_or(EINVAL)?;

        let path_bytes = header.path_str();
        let mut path = KVec::with_capacity(path_bytes.len() + 1, GFP_KERNEL)?;
        path.extend_from_slice(path_bytes, GFP_KERNEL)?;
        path.push(0, GFP_KERNEL)?;

        let content = if wire::is_special(path_bytes) || wire::is_file_backed(path_bytes) {
            None
        } else {
            let mut buf = KVec::with_capacity(header.size, GFP_KERNEL)?;
            buf.resize(header.size, 0, GFP_KERNEL)?;
            reader.read_slice(&mut buf)?;
            Some(buf)
        };

        regions.push(
            OwnedRegion {
                start: header.start,
                end: header.end,
                size: header.size,
                offset: header.offset,
                permissions: header.permissions,
                path,
                content,
            },
            GFP_KERNEL,
        )?;
    }

    Ok(regions)
}

/// Opens every file-backed region's path read-only before any destructive
/// step, per the rebuild contract in SPEC_FULL.md §4.6 and scenario S6.
fn pre_validate_file_backed(regions: &[OwnedRegion]) -> Result<()> {
    for region in regions {
        let path = {
            let len = region
                .path
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(region.path.len());
            &region.path[..len]
        };
        if wire::is_special(path) || !wire::is_file_backed(path) {
            continue;
        }
        let path_str = core::str::from_utf8(path).map_err(|_| ENOENT)?;
        kernel::fs::File::open(path_str, kernel::bindings::O_RDONLY as i32, 0)
            .map_err(|_| ENOENT)?;
    }
    Ok(())
}
