//! Wire codec (component E): encodes and decodes a [`Snapshot`] as a flat,
//! fixed-layout binary stream. Used both for the TCP transport between
//! checkpoint and restore hosts and for on-disk dump files (§11).
//!
//! Host-endian throughout (`to_ne_bytes`/`from_ne_bytes`): the spec treats
//! source and destination as "presumed identical" x86_64 hosts, so there is
//! no cross-endian concern to design around.
//!
//! This layout is duplicated by hand in `krestore-mapping::wire` for the
//! `#![no_std]` kernel module, which cannot depend on this crate's
//! `std::io`-based encoder; `wire_integration` tests exercise both sides
//! against the same constants to keep them honest.

use crate::error::WireError;
use crate::snapshot::{Snapshot, SnapshotRegion};
use crate::user::{UserBlock, USER_BLOCK_LEN};
use std::io::{Read, Write};

pub const PERMISSIONS_LEN: usize = 5;
pub const PATH_LEN: usize = 256;
pub const REGION_HEADER_LEN: usize = 8 * 4 + PERMISSIONS_LEN + PATH_LEN;

/// Writes a full snapshot: user block, region count, then each region's
/// header immediately followed by its content (if any).
pub fn encode_snapshot<W: Write>(writer: &mut W, snapshot: &Snapshot) -> Result<(), WireError> {
    writer.write_all(snapshot.user.as_bytes())?;
    writer.write_all(&(snapshot.regions.len() as u64).to_ne_bytes())?;

    for region in &snapshot.regions {
        encode_region_header(writer, region)?;
        if let Some(content) = &region.content {
            writer.write_all(content)?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn encode_region_header<W: Write>(writer: &mut W, region: &SnapshotRegion) -> Result<(), WireError> {
    writer.write_all(&(region.start as u64).to_ne_bytes())?;
    writer.write_all(&(region.end as u64).to_ne_bytes())?;
    writer.write_all(&(region.len() as u64).to_ne_bytes())?;
    writer.write_all(&region.offset.to_ne_bytes())?;

    let mut permissions = [0u8; PERMISSIONS_LEN];
    let perm_bytes = region.permissions.as_bytes();
    let perm_len = perm_bytes.len().min(PERMISSIONS_LEN - 1);
    if region.permissions.len() > PERMISSIONS_LEN - 1 {
        return Err(WireError::BadPermissions(region.permissions.clone()));
    }
    permissions[..perm_len].copy_from_slice(&perm_bytes[..perm_len]);
    writer.write_all(&permissions)?;

    let mut path = [0u8; PATH_LEN];
    let path_bytes = region.path.as_bytes();
    if path_bytes.len() >= PATH_LEN {
        return Err(WireError::PathTooLong(
            region.path.clone().into(),
            path_bytes.len(),
            PATH_LEN,
        ));
    }
    path[..path_bytes.len()].copy_from_slice(path_bytes);
    writer.write_all(&path)?;

    Ok(())
}

/// Parsed region header plus any content that followed it on the wire.
pub struct DecodedRegion {
    pub start: u64,
    pub end: u64,
    pub size: u64,
    pub offset: u64,
    pub permissions: String,
    pub path: String,
    pub content: Option<Vec<u8>>,
}

/// A fully decoded snapshot as received off the wire, kept distinct from
/// [`Snapshot`] because the receiving side never needs the classification
/// logic in `maps::RegionKind` — it only replays what the header says.
pub struct WireSnapshot {
    pub user: UserBlock,
    pub regions: Vec<DecodedRegion>,
}

/// Reads a full snapshot, deciding per region whether content follows by
/// re-deriving the classification from the path field exactly as
/// `krestore_mapping::wire` does on the kernel side.
pub fn decode_snapshot<R: Read>(reader: &mut R) -> Result<WireSnapshot, WireError> {
    let mut user_bytes = vec![0u8; USER_BLOCK_LEN];
    reader.read_exact(&mut user_bytes)?;
    let user = UserBlock::from_bytes(user_bytes)
        .map_err(|_| WireError::Truncated(0, USER_BLOCK_LEN))?;

    let mut count_buf = [0u8; 8];
    reader.read_exact(&mut count_buf)?;
    let num_regions = u64::from_ne_bytes(count_buf) as usize;

    let mut regions = Vec::with_capacity(num_regions);
    for _ in 0..num_regions {
        let mut header_buf = [0u8; REGION_HEADER_LEN];
        reader.read_exact(&mut header_buf)?;

        let start = read_u64(&header_buf[0..8]);
        let end = read_u64(&header_buf[8..16]);
        let size = read_u64(&header_buf[16..24]);
        let offset = read_u64(&header_buf[24..32]);
        let permissions = decode_cstr(&header_buf[32..32 + PERMISSIONS_LEN]);
        let path = decode_cstr(&header_buf[32 + PERMISSIONS_LEN..REGION_HEADER_LEN]);

        let content = if is_special(&path) || is_file_backed(&path) {
            None
        } else {
            let mut buf = vec![0u8; size as usize];
            reader.read_exact(&mut buf)?;
            Some(buf)
        };

        regions.push(DecodedRegion {
            start,
            end,
            size,
            offset,
            permissions,
            path,
            content,
        });
    }

    Ok(WireSnapshot { user, regions })
}

fn read_u64(buf: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(buf);
    u64::from_ne_bytes(arr)
}

fn decode_cstr(buf: &[u8]) -> String {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

/// Delegates to [`maps::classify`] rather than re-deriving the rule: the
/// spec's classification invariant requires one pure function of path,
/// applied consistently on encode (where `classify` already runs) and
/// decode (here). A second, independently-written predicate would be one
/// more place for the rule to drift out of sync.
pub fn is_special(path: &str) -> bool {
    matches!(crate::maps::classify(path), crate::maps::RegionKind::Skip)
}

pub fn is_file_backed(path: &str) -> bool {
    matches!(
        crate::maps::classify(path),
        crate::maps::RegionKind::FileBacked
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::RegionKind;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            user: UserBlock::from_bytes(vec![7u8; USER_BLOCK_LEN]).unwrap(),
            regions: vec![
                SnapshotRegion {
                    start: 0x1000,
                    end: 0x2000,
                    offset: 0,
                    permissions: "rw-p".to_string(),
                    path: String::new(),
                    kind: RegionKind::AnonymousContent,
                    content: Some(vec![0xABu8; 0x1000]),
                },
                SnapshotRegion {
                    start: 0x2000,
                    end: 0x3000,
                    offset: 0x1000,
                    permissions: "r-xp".to_string(),
                    path: "/usr/lib/libc.so.6".to_string(),
                    kind: RegionKind::FileBacked,
                    content: None,
                },
            ],
            total_bytes_read: 0x1000,
        }
    }

    #[test]
    fn round_trips_a_snapshot() {
        let snapshot = sample_snapshot();
        let mut buf = Vec::new();
        encode_snapshot(&mut buf, &snapshot).expect("encode");

        let decoded = decode_snapshot(&mut &buf[..]).expect("decode");
        assert_eq!(decoded.user.as_bytes(), snapshot.user.as_bytes());
        assert_eq!(decoded.regions.len(), 2);

        assert_eq!(decoded.regions[0].start, 0x1000);
        assert_eq!(decoded.regions[0].content.as_ref().unwrap().len(), 0x1000);

        assert_eq!(decoded.regions[1].path, "/usr/lib/libc.so.6");
        assert!(decoded.regions[1].content.is_none());
    }

    #[test]
    fn round_trips_a_deleted_backing_without_desyncing_later_regions() {
        // A region whose backing file has been unlinked still classifies as
        // FileBacked (SPEC_FULL.md §4.2): `maps::classify` (encode-time) and
        // `wire::is_file_backed`/`is_special` (decode-time) must agree, or
        // every region after this one gets parsed at the wrong offset.
        let deleted_path = "/usr/lib/libfoo.so.1 (deleted)";
        assert_eq!(crate::maps::classify(deleted_path), RegionKind::FileBacked);

        let snapshot = Snapshot {
            user: UserBlock::from_bytes(vec![7u8; USER_BLOCK_LEN]).unwrap(),
            regions: vec![
                SnapshotRegion {
                    start: 0x1000,
                    end: 0x2000,
                    offset: 0x500,
                    permissions: "r-xp".to_string(),
                    path: deleted_path.to_string(),
                    kind: RegionKind::FileBacked,
                    content: None,
                },
                SnapshotRegion {
                    start: 0x2000,
                    end: 0x2400,
                    offset: 0,
                    permissions: "rw-p".to_string(),
                    path: "[heap]".to_string(),
                    kind: RegionKind::AnonymousContent,
                    content: Some(vec![0x42u8; 0x400]),
                },
            ],
            total_bytes_read: 0x400,
        };

        let mut buf = Vec::new();
        encode_snapshot(&mut buf, &snapshot).expect("encode");

        let decoded = decode_snapshot(&mut &buf[..]).expect("decode");
        assert_eq!(decoded.regions.len(), 2);

        assert_eq!(decoded.regions[0].path, deleted_path);
        assert!(
            decoded.regions[0].content.is_none(),
            "deleted-backing region must not consume content bytes"
        );

        // If the deleted-backing region had been misclassified, this
        // region's header would be read from the wrong byte offset.
        assert_eq!(decoded.regions[1].start, 0x2000);
        assert_eq!(decoded.regions[1].path, "[heap]");
        assert_eq!(
            decoded.regions[1].content.as_deref(),
            Some(&[0x42u8; 0x400][..])
        );
    }

    #[test]
    fn rejects_path_too_long() {
        let mut snapshot = sample_snapshot();
        snapshot.regions[1].path = "/".to_string() + &"a".repeat(PATH_LEN);
        let mut buf = Vec::new();
        assert!(encode_snapshot(&mut buf, &snapshot).is_err());
    }

    #[test]
    fn decode_reports_truncation() {
        let snapshot = sample_snapshot();
        let mut buf = Vec::new();
        encode_snapshot(&mut buf, &snapshot).expect("encode");
        buf.truncate(buf.len() - 10);
        assert!(decode_snapshot(&mut &buf[..]).is_err());
    }
}
