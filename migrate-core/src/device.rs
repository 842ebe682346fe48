//! Userspace handle onto `/dev/krestore_mapping` (the device component F
//! implements in the kernel). Opening it transitions the device from
//! ENTRY to REMAPPING; writing a snapshot's wire bytes through it performs
//! the rebuild; dropping the handle closes it, returning the device to
//! ENTRY.

use crate::error::RebuildError;
use crate::snapshot::Snapshot;
use crate::wire;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_DEVICE_PATH: &str = "/dev/krestore_mapping";

pub struct RebuildDevice {
    path: PathBuf,
    file: File,
}

impl RebuildDevice {
    /// Opens the device. A `EBUSY` here means another remapping is already
    /// in flight (the kernel-side state machine only permits one open at a
    /// time); every other `io::Error` is surfaced as-is.
    pub fn open(path: &Path) -> Result<Self, RebuildError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.raw_os_error() == Some(libc::EBUSY) {
                    RebuildError::Busy
                } else {
                    RebuildError::DeviceOpen(path.to_path_buf(), e)
                }
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Encodes `snapshot` onto the wire and writes it through the device in
    /// one call, triggering the kernel-side unmap-then-map rebuild. Must be
    /// invoked from the victim's own task context (see `victim.rs`).
    pub fn rebuild(&mut self, snapshot: &Snapshot) -> Result<(), RebuildError> {
        let mut payload = Vec::new();
        wire::encode_snapshot(&mut payload, snapshot)
            .map_err(|_| RebuildError::DeviceWrite(std::io::Error::from(std::io::ErrorKind::InvalidData)))?;
        self.file
            .write_all(&payload)
            .map_err(RebuildError::DeviceWrite)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_nonexistent_device_reports_open_error() {
        let err = RebuildDevice::open(Path::new("/dev/krestore_mapping_does_not_exist"));
        assert!(err.is_err());
        match err {
            Err(RebuildError::DeviceOpen(path, _)) => {
                assert_eq!(path, PathBuf::from("/dev/krestore_mapping_does_not_exist"))
            }
            other => panic!("unexpected result: {:?}", other.err().map(|e| e.to_string())),
        }
    }
}
