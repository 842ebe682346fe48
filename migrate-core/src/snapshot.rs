//! Snapshot model (component D): the `UserBlock` plus an ordered list of
//! regions that together fully describe a migratable process, and the
//! invariants that must hold before anything is put on the wire.
//!
//! This file replaces the teacher's userfaultfd-based `WorkerSnapshot`/
//! `SnapshotManager` pair (worker-recycling golden pages) with the value
//! types this system actually needs: one owned, self-contained snapshot
//! per migration, built once from a stopped tracee and consumed once by
//! the wire encoder.

use crate::error::SnapshotError;
use crate::maps::{self, RegionKind};
use crate::tracer::Tracer;
use crate::user::UserBlock;
use nix::unistd::Pid;

#[derive(Debug, Clone)]
pub struct SnapshotRegion {
    pub start: usize,
    pub end: usize,
    pub offset: u64,
    pub permissions: String,
    pub path: String,
    pub kind: RegionKind,
    /// Present only for [`RegionKind::AnonymousContent`] regions; its
    /// length always equals `end - start`.
    pub content: Option<Vec<u8>>,
}

impl SnapshotRegion {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub user: UserBlock,
    pub regions: Vec<SnapshotRegion>,
    /// Aggregate number of content bytes read off the target while
    /// building `regions`, per SPEC_FULL.md §4.2's `snapshot_memory(pid)
    /// -> (regions, total_bytes_read)` contract. Diagnostic only; not
    /// carried on the wire.
    pub total_bytes_read: u64,
}

impl Snapshot {
    /// Captures a full snapshot of `pid` via `tracer`, which must already
    /// be attached and have the tracee stopped. Brk/data-segment state is
    /// captured as part of whichever anonymous region currently backs it
    /// (there is no separate brk record — see DESIGN.md's resolution of
    /// the brk Open Question).
    pub fn capture(tracer: &Tracer, pid: Pid) -> Result<Self, SnapshotError> {
        let user = UserBlock::capture(tracer)?;
        let (captured, total_bytes_read) = maps::snapshot_memory(pid)?;

        let mut regions = Vec::with_capacity(captured.len());
        for captured_region in captured {
            let region = captured_region.region;
            regions.push(SnapshotRegion {
                start: region.start,
                end: region.end,
                offset: region.offset,
                permissions: region.permissions,
                path: region.path,
                kind: region.kind,
                content: captured_region.content,
            });
        }

        let snapshot = Self {
            user,
            regions,
            total_bytes_read,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Checks the invariants the rest of the pipeline relies on: regions
    /// are address-ordered and non-overlapping, and every content-carrying
    /// region's buffer length matches its address range.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        for window in self.regions.windows(2) {
            if window[0].end > window[1].start {
                return Err(SnapshotError::UnsortedRegions(window[0].start));
            }
        }
        for region in &self.regions {
            if let Some(content) = &region.content {
                if content.len() != region.len() {
                    return Err(SnapshotError::ContentLengthMismatch(
                        region.start,
                        region.end,
                        content.len(),
                        region.len(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: usize, end: usize, kind: RegionKind, content: Option<Vec<u8>>) -> SnapshotRegion {
        SnapshotRegion {
            start,
            end,
            offset: 0,
            permissions: "rw-p".to_string(),
            path: String::new(),
            kind,
            content,
        }
    }

    #[test]
    fn validate_accepts_sorted_non_overlapping() {
        let snap = Snapshot {
            user: UserBlock::from_bytes(vec![0u8; crate::user::USER_BLOCK_LEN]).unwrap(),
            regions: vec![
                region(0x1000, 0x2000, RegionKind::AnonymousContent, Some(vec![0u8; 0x1000])),
                region(0x2000, 0x3000, RegionKind::FileBacked, None),
            ],
            total_bytes_read: 0x1000,
        };
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn validate_rejects_overlap() {
        let snap = Snapshot {
            user: UserBlock::from_bytes(vec![0u8; crate::user::USER_BLOCK_LEN]).unwrap(),
            regions: vec![
                region(0x1000, 0x2500, RegionKind::AnonymousContent, Some(vec![0u8; 0x1500])),
                region(0x2000, 0x3000, RegionKind::FileBacked, None),
            ],
            total_bytes_read: 0x1500,
        };
        assert!(snap.validate().is_err());
    }

    #[test]
    fn validate_rejects_content_length_mismatch() {
        let snap = Snapshot {
            user: UserBlock::from_bytes(vec![0u8; crate::user::USER_BLOCK_LEN]).unwrap(),
            regions: vec![region(
                0x1000,
                0x2000,
                RegionKind::AnonymousContent,
                Some(vec![0u8; 10]),
            )],
            total_bytes_read: 10,
        };
        assert!(snap.validate().is_err());
    }
}
