//! Error taxonomy for live process migration.
//!
//! Each subsystem gets a closed, matchable `thiserror` enum so callers can
//! branch on failure mode (e.g. retry on `WireError::ShortRead`, but not on
//! `RebuildError::PathNotFound`). The CLI entry points collect these into
//! `anyhow::Error` via `?` and add context with `anyhow::Context`.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error("ptrace attach to pid {0} failed: {1}")]
    Attach(i32, nix::Error),
    #[error("ptrace detach from pid {0} failed: {1}")]
    Detach(i32, nix::Error),
    #[error("waitpid for pid {0} failed: {1}")]
    Wait(i32, nix::Error),
    #[error("pid {0} stopped on unexpected signal {1:?}")]
    UnexpectedStop(i32, nix::sys::signal::Signal),
    #[error("pid {0} exited before tracing completed (status {1})")]
    UnexpectedExit(i32, i32),
    #[error("getregs on pid {0} failed: {1}")]
    GetRegs(i32, nix::Error),
    #[error("setregs on pid {0} failed: {1}")]
    SetRegs(i32, nix::Error),
    #[error("single-step on pid {0} failed: {1}")]
    Step(i32, nix::Error),
    #[error("PTRACE_PEEKUSER on pid {0} at offset {1} failed: {2}")]
    PeekUser(i32, usize, nix::Error),
    #[error("PTRACE_SYSCALL resume on pid {0} failed: {1}")]
    ResumeUntilSyscall(i32, nix::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MapsError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, io::Error),
    #[error("malformed /proc/{0}/maps line: {1:?}")]
    MalformedLine(i32, String),
    #[error("process_vm_readv on pid {0} for region {1:#x}-{2:#x} failed: {3}")]
    VmReadv(i32, usize, usize, nix::Error),
    #[error("short read for pid {0} region {1:#x}-{2:#x}: got {3} of {4} bytes")]
    ShortRead(i32, usize, usize, usize, usize),
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error(transparent)]
    Tracer(#[from] TracerError),
    #[error("user area word count mismatch: expected {expected}, parsed {actual}")]
    WordCountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Maps(#[from] MapsError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error("region list is not sorted or overlaps at index {0}")]
    UnsortedRegions(usize),
    #[error("anonymous content-carrying region {0:#x}-{1:#x} has content length {2}, expected {3}")]
    ContentLengthMismatch(usize, usize, usize, usize),
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error during wire transfer: {0}")]
    Io(#[from] io::Error),
    #[error("path {0:?} is {1} bytes, exceeds the {2}-byte wire field")]
    PathTooLong(PathBuf, usize, usize),
    #[error("permissions field {0:?} is not exactly 4 ASCII characters")]
    BadPermissions(String),
    #[error("peer closed the connection after {0} of {1} expected bytes")]
    Truncated(usize, usize),
}

#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    #[error("device {0} open failed: {1}")]
    DeviceOpen(PathBuf, io::Error),
    #[error("device write failed: {0}")]
    DeviceWrite(io::Error),
    #[error("device reported busy: a remapping is already in progress")]
    Busy,
    #[error("backing file for region {0:?} could not be opened on the destination host")]
    PathNotFound(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Tracer(#[from] TracerError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("fork for victim process failed: {0}")]
    Fork(nix::Error),
    #[error("listener bind on {0} failed: {1}")]
    Listen(String, io::Error),
    #[error("accept on listener failed: {0}")]
    Accept(io::Error),
    #[error("failed to read incoming snapshot: {0}")]
    Read(io::Error),
    #[error("dump file {0} could not be opened: {1}")]
    DumpFile(PathBuf, io::Error),
    #[error("/proc/{0}/mem access failed: {1}")]
    RemoteMemory(i32, io::Error),
    #[error("injected syscall in pid {0} returned errno {1}")]
    RemoteSyscall(i32, i32),
    #[error("shutdown requested (SIGINT/SIGTERM/SIGQUIT); any victim in flight has been killed")]
    ShutdownRequested,
}
