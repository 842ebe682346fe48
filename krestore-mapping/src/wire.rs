// On-the-wire layout shared with `migrate_core::wire` on the userspace side.
// Duplicated here (not shared via a common crate) because this module is
// `#![no_std]` and cannot depend on the userspace crate's `std::io` traits;
// the layout itself — not the encoder — is the contract, so it is kept in
// lockstep by hand and exercised by `migrate-core`'s wire round-trip tests
// against these exact constants.

pub const PERMISSIONS_LEN: usize = 5;
pub const PATH_LEN: usize = 256;

/// `start, end, size, offset` (8 bytes each) + permissions (5) + path (256).
pub const REGION_HEADER_LEN: usize = 8 * 4 + PERMISSIONS_LEN + PATH_LEN;

/// One parsed region header, still borrowing its path bytes from the
/// caller-supplied buffer (no allocation for metadata).
pub struct RegionHeader<'a> {
    pub start: usize,
    pub end: usize,
    pub size: usize,
    pub offset: u64,
    pub permissions: [u8; PERMISSIONS_LEN],
    pub path: &'a [u8],
}

impl<'a> RegionHeader<'a> {
    /// Parses one fixed-size region header out of `buf`, which must be at
    /// least [`REGION_HEADER_LEN`] bytes.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < REGION_HEADER_LEN {
            return None;
        }
        let start = read_u64(&buf[0..8])? as usize;
        let end = read_u64(&buf[8..16])? as usize;
        let size = read_u64(&buf[16..24])? as usize;
        let offset = read_u64(&buf[24..32])?;
        let mut permissions = [0u8; PERMISSIONS_LEN];
        permissions.copy_from_slice(&buf[32..32 + PERMISSIONS_LEN]);
        let path_start = 32 + PERMISSIONS_LEN;
        let path = &buf[path_start..path_start + PATH_LEN];
        Some(Self {
            start,
            end,
            size,
            offset,
            permissions,
            path,
        })
    }

    /// The path field with trailing NUL padding stripped.
    pub fn path_str(&self) -> &[u8] {
        let len = self
            .path
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.path.len());
        &self.path[..len]
    }

    pub fn permission_str(&self) -> &[u8] {
        &self.permissions[..4]
    }

    pub fn is_writable(&self) -> bool {
        self.permission_str().get(1) == Some(&b'w')
    }

    pub fn is_readable(&self) -> bool {
        self.permission_str().first() == Some(&b'r')
    }

    pub fn is_executable(&self) -> bool {
        self.permission_str().get(2) == Some(&b'x')
    }
}

fn read_u64(buf: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = buf.try_into().ok()?;
    Some(u64::from_ne_bytes(arr))
}

pub fn path_is(path: &[u8], name: &[u8]) -> bool {
    path == name
}

pub const VDSO: &[u8] = b"[vdso]";
pub const VVAR: &[u8] = b"[vvar]";
pub const VSYSCALL: &[u8] = b"[vsyscall]";
pub const STACK: &[u8] = b"[stack]";

pub const DEV_PREFIX: &[u8] = b"/dev/";

pub fn is_special(path: &[u8]) -> bool {
    path_is(path, VDSO)
        || path_is(path, VVAR)
        || path_is(path, VSYSCALL)
        || path.starts_with(DEV_PREFIX)
}

/// Mirrors `maps::classify`'s rule by hand (userspace side, `migrate-core`):
/// a path anchored at `/` is file-backed, full stop — including a path with
/// " (deleted)" appended, since the bytes still name an exact destination
/// path to pre-validate against. Must stay in lockstep with that function or
/// the two hosts can classify the same region differently.
pub fn is_file_backed(path: &[u8]) -> bool {
    path.starts_with(b"/")
}
