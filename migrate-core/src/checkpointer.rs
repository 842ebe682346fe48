//! Source-side driver: attaches to a running process, captures its
//! snapshot, and ships the encoded bytes either over TCP to a restore
//! orchestrator or into a dump file for later replay (§11).

use crate::error::OrchestratorError;
use crate::snapshot::Snapshot;
use crate::tracer::Tracer;
use crate::wire;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::io::Write;
use std::net::TcpStream;
use std::path::Path;

/// Attaches to `pid` and captures a full snapshot while it is stopped.
/// The tracer is returned alongside the snapshot rather than detached
/// here: migration destroys the source instance, so the caller only
/// tears it down (via [`finish`]) once the snapshot has actually made it
/// to the destination. On any failure before that point the target is
/// left attached and stopped, per the documented "operator's
/// responsibility" failure mode.
pub fn checkpoint(pid: Pid) -> Result<(Tracer, Snapshot), OrchestratorError> {
    let tracer = Tracer::attach(pid)?;
    let snapshot = Snapshot::capture(&tracer, pid)?;
    Ok((tracer, snapshot))
}

/// Delivers the terminal kill the source side owes its target once the
/// snapshot has been handed off successfully: migration moves the
/// process, it does not clone it.
pub fn finish(tracer: &Tracer) -> Result<(), OrchestratorError> {
    tracer.detach(Some(Signal::SIGKILL))?;
    Ok(())
}

/// Encodes `snapshot` and streams it to `addr` over a fresh TCP
/// connection, closing the stream once every byte has been written so the
/// receiving orchestrator's EOF-delimited read completes.
pub fn send_to(addr: &str, snapshot: &Snapshot) -> Result<(), OrchestratorError> {
    let mut stream =
        TcpStream::connect(addr).map_err(|e| OrchestratorError::Listen(addr.to_string(), e))?;
    wire::encode_snapshot(&mut stream, snapshot)?;
    stream
        .shutdown(std::net::Shutdown::Write)
        .map_err(|e| OrchestratorError::Listen(addr.to_string(), e))?;
    Ok(())
}

/// Encodes `snapshot` into a dump file at `path` (§11's supplement to the
/// live network transport), reusing the exact same wire codec.
pub fn write_dump(path: &Path, snapshot: &Snapshot) -> Result<(), OrchestratorError> {
    let mut file = std::fs::File::create(path)
        .map_err(|e| OrchestratorError::DumpFile(path.to_path_buf(), e))?;
    wire::encode_snapshot(&mut file, snapshot)?;
    file.flush()
        .map_err(|e| OrchestratorError::DumpFile(path.to_path_buf(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;
    use nix::unistd::{fork, ForkResult};

    #[test]
    fn checkpoint_and_detach_leaves_target_runnable() {
        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                raise(Signal::SIGSTOP).ok();
                std::thread::sleep(std::time::Duration::from_millis(200));
                std::process::exit(0);
            }
            ForkResult::Parent { child } => {
                std::thread::sleep(std::time::Duration::from_millis(50));
                let (tracer, snapshot) = checkpoint(child).expect("checkpoint");
                assert!(snapshot.region_count() > 0);
                finish(&tracer).expect("finish");
                let _ = nix::sys::wait::waitpid(child, None);
            }
        }
    }

    #[test]
    fn write_dump_round_trips_through_decode() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                raise(Signal::SIGSTOP).ok();
                std::thread::sleep(std::time::Duration::from_millis(200));
                std::process::exit(0);
            }
            ForkResult::Parent { child } => {
                std::thread::sleep(std::time::Duration::from_millis(50));
                let (tracer, snapshot) = checkpoint(child).expect("checkpoint");
                write_dump(tmp.path(), &snapshot).expect("write_dump");

                let mut file = std::fs::File::open(tmp.path()).expect("open dump");
                let decoded = wire::decode_snapshot(&mut file).expect("decode");
                assert_eq!(decoded.regions.len(), snapshot.region_count());

                finish(&tracer).expect("finish");
                let _ = nix::sys::wait::waitpid(child, None);
            }
        }
    }
}
