//! Integration coverage for component B against the current process's own
//! `/proc/self/maps`, mirroring how the teacher's integration tests drive
//! fork/exec-based behavior against the current process rather than a
//! separate fleet (consistent with S1-S5's substitution note).

use migrate_core::maps::{self, RegionKind};
use nix::unistd::Pid;

#[test]
fn maps_are_address_ordered_and_classified() {
    let pid = Pid::from_raw(std::process::id() as i32);
    let regions = maps::read_maps(pid).expect("read_maps on self");

    assert!(!regions.is_empty());
    for window in regions.windows(2) {
        assert!(
            window[0].start <= window[1].start,
            "regions must appear in address order"
        );
    }

    // The test binary itself is file-backed; at least one region must be.
    assert!(regions
        .iter()
        .any(|r| matches!(r.kind, RegionKind::FileBacked)));

    // The stack is always anonymous content-carrying.
    let stack = regions
        .iter()
        .find(|r| r.path == "[stack]")
        .expect("process has a stack region");
    assert_eq!(stack.kind, RegionKind::AnonymousContent);
}

#[test]
fn anonymous_region_content_length_matches_its_range() {
    let pid = Pid::from_raw(std::process::id() as i32);
    let regions = maps::read_maps(pid).expect("read_maps on self");

    let stack = regions
        .iter()
        .find(|r| r.path == "[stack]")
        .expect("process has a stack region");

    let content = maps::read_region_content(pid, stack).expect("read_region_content");
    assert_eq!(content.len(), stack.len());
}
