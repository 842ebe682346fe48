//! Integration coverage for component E's round-trip against a snapshot
//! built from a real, currently-running process, exercising the same
//! path `checkpointer`/`orchestrator` take rather than hand-built
//! fixtures only.

use migrate_core::maps::{self, RegionKind};
use migrate_core::snapshot::{Snapshot, SnapshotRegion};
use migrate_core::user::UserBlock;
use migrate_core::wire;
use nix::unistd::Pid;

fn self_snapshot() -> Snapshot {
    let pid = Pid::from_raw(std::process::id() as i32);
    let (captured, total_bytes_read) = maps::snapshot_memory(pid).expect("snapshot_memory");

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

    Snapshot {
        user: UserBlock::from_bytes(vec![0u8; migrate_core::user::USER_BLOCK_LEN]).unwrap(),
        regions,
        total_bytes_read,
    }
}

#[test]
fn encoding_and_decoding_a_real_process_snapshot_preserves_region_count() {
    let snapshot = self_snapshot();
    snapshot.validate().expect("self snapshot must validate");

    let mut buf = Vec::new();
    wire::encode_snapshot(&mut buf, &snapshot).expect("encode");

    let decoded = wire::decode_snapshot(&mut &buf[..]).expect("decode");
    assert_eq!(decoded.regions.len(), snapshot.regions.len());

    for (original, decoded_region) in snapshot.regions.iter().zip(decoded.regions.iter()) {
        assert_eq!(original.start as u64, decoded_region.start);
        assert_eq!(original.end as u64, decoded_region.end);
        assert_eq!(original.path, decoded_region.path);
        assert_eq!(
            original.content.is_some(),
            decoded_region.content.is_some(),
            "content presence must match for region {:?}",
            original.path
        );
    }
}

#[test]
fn a_deleted_backing_region_does_not_desync_regions_that_follow_it() {
    // Insert a synthetic region whose backing has been unlinked (the kernel
    // appends " (deleted)" to the path) ahead of the real regions. Per
    // SPEC_FULL.md §4.2 this still classifies FileBacked, so no content
    // bytes are written for it; if the encoder and decoder ever disagreed
    // on that classification, every region after it would be read from the
    // wrong wire offset.
    let mut snapshot = self_snapshot();
    snapshot.regions.insert(
        0,
        SnapshotRegion {
            start: 0x1000,
            end: 0x2000,
            offset: 0,
            permissions: "r-xp".to_string(),
            path: "/usr/lib/libdeleted.so.1 (deleted)".to_string(),
            kind: RegionKind::FileBacked,
            content: None,
        },
    );
    for region in &mut snapshot.regions[1..] {
        region.start += 0x2000;
        region.end += 0x2000;
    }

    let mut buf = Vec::new();
    wire::encode_snapshot(&mut buf, &snapshot).expect("encode");

    let decoded = wire::decode_snapshot(&mut &buf[..]).expect("decode");
    assert_eq!(decoded.regions.len(), snapshot.regions.len());

    assert_eq!(decoded.regions[0].path, "/usr/lib/libdeleted.so.1 (deleted)");
    assert!(decoded.regions[0].content.is_none());

    for (original, decoded_region) in snapshot.regions.iter().zip(decoded.regions.iter()).skip(1) {
        assert_eq!(original.start as u64, decoded_region.start);
        assert_eq!(original.end as u64, decoded_region.end);
        assert_eq!(original.path, decoded_region.path);
        assert_eq!(original.content.is_some(), decoded_region.content.is_some());
    }
}

#[test]
fn decode_fails_cleanly_on_a_truncated_stream() {
    let snapshot = self_snapshot();
    let mut buf = Vec::new();
    wire::encode_snapshot(&mut buf, &snapshot).expect("encode");

    buf.truncate(buf.len() / 2);
    assert!(wire::decode_snapshot(&mut &buf[..]).is_err());
}
