//! Restore orchestrator (component G): listens for an incoming checkpoint,
//! forks a victim host process, drives it through the stub-injection and
//! device-write sequence, restores its registers, and detaches it to run
//! free at the checkpointed program's original instruction pointer.

use crate::device::DEFAULT_DEVICE_PATH;
use crate::error::{OrchestratorError, RebuildError};
use crate::signals;
use crate::tracer::Tracer;
use crate::victim;
use crate::wire;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::io::Read;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct RestoreOptions {
    pub device_path: std::path::PathBuf,
    /// Single-steps the victim after detach and prints GPRs each
    /// instruction, per the step-by-step diagnostic mode (`-s`).
    pub step_by_step: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            device_path: DEFAULT_DEVICE_PATH.into(),
            step_by_step: false,
        }
    }
}

/// Poll interval while waiting for a connection so a requested shutdown is
/// noticed promptly without spinning the listener thread.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Accepts one TCP connection on `bind_addr`, reads the snapshot off it,
/// and restores it into a freshly forked victim. Returns the victim's pid
/// once it has been detached and is running free.
///
/// Polls [`signals::shutdown_requested`] between non-blocking accept
/// attempts so a bare listen (no connection yet, no victim forked) aborts
/// cleanly on SIGINT/SIGTERM/SIGQUIT instead of blocking forever.
pub fn listen_and_restore(
    bind_addr: &str,
    options: &RestoreOptions,
) -> Result<i32, OrchestratorError> {
    let listener = TcpListener::bind(bind_addr)
        .map_err(|e| OrchestratorError::Listen(bind_addr.to_string(), e))?;
    listener
        .set_nonblocking(true)
        .map_err(OrchestratorError::Accept)?;
    eprintln!("[restore] listening on {}", bind_addr);

    let mut stream = loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                eprintln!("[restore] accepted connection from {}", peer);
                break stream;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if signals::shutdown_requested() {
                    eprintln!("[restore] shutdown requested while listening, aborting");
                    return Err(OrchestratorError::ShutdownRequested);
                }
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => return Err(OrchestratorError::Accept(e)),
        }
    };
    stream
        .set_nonblocking(false)
        .map_err(OrchestratorError::Accept)?;

    restore_from_reader(&mut stream, options)
}

/// Restores a snapshot already sitting in a dump file (§11), bypassing the
/// network listener entirely.
pub fn restore_from_dump(path: &Path, options: &RestoreOptions) -> Result<i32, OrchestratorError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| OrchestratorError::DumpFile(path.to_path_buf(), e))?;
    restore_from_reader(&mut file, options)
}

fn restore_from_reader<R: Read>(
    reader: &mut R,
    options: &RestoreOptions,
) -> Result<i32, OrchestratorError> {
    // The wire format carries no overall length prefix (only per-content
    // lengths, already known from each region header); the sender closes
    // its side once the snapshot is fully written, so the transfer is
    // delimited by EOF here, on both the TCP and dump-file paths.
    let mut payload = Vec::new();
    reader
        .read_to_end(&mut payload)
        .map_err(OrchestratorError::Read)?;

    let snapshot = wire::decode_snapshot(&mut &payload[..])?;
    eprintln!(
        "[restore] decoded snapshot: {} regions",
        snapshot.regions.len()
    );

    if let Some(missing) = first_missing_file_backed(&snapshot) {
        return Err(OrchestratorError::Rebuild(RebuildError::PathNotFound(
            missing,
        )));
    }

    let victim_pid = victim::spawn_traced_child()?;
    eprintln!("[restore] victim pid {} traced and stopped", victim_pid);
    kill_victim_on_shutdown(victim_pid)?;

    let tracer = Tracer::from_traced_child(victim_pid);
    tracer.wait_for_stop()?;
    kill_victim_on_shutdown(victim_pid)?;

    let buf_addr = victim::stage_payload(&tracer, &payload)?;
    let stub_addr = victim::install_stub(
        &tracer,
        options.device_path.to_string_lossy().as_ref(),
        buf_addr,
        payload.len(),
    )?;
    kill_victim_on_shutdown(victim_pid)?;

    let mut regs = tracer.get_regs()?;
    regs.rip = stub_addr as u64;
    regs.rsp = victim::stub_stack_top() as u64;
    tracer.set_regs(&regs)?;
    eprintln!("[restore] stub installed at {:#x}, resuming victim", stub_addr);

    // Step through open()'s enter/exit and write()'s enter/exit traps.
    // PTRACE_SYSCALL stops twice per syscall; four stops covers exactly
    // these two syscalls in the stub.
    for _ in 0..4 {
        match tracer.resume_until_syscall()? {
            WaitStatus::Exited(_, code) => {
                return Err(OrchestratorError::Rebuild(RebuildError::DeviceWrite(
                    std::io::Error::other(format!(
                        "victim exited during rebuild with code {}",
                        code
                    )),
                )))
            }
            WaitStatus::PtraceSyscall(_) | WaitStatus::Stopped(_, _) => {}
            _ => {}
        }
        kill_victim_on_shutdown(victim_pid)?;
    }

    let write_exit_regs = tracer.get_regs()?;
    if (write_exit_regs.rax as i64) < 0 {
        let errno = -(write_exit_regs.rax as i64) as i32;
        let err = if errno == libc::ENOENT {
            first_missing_file_backed(&snapshot)
                .map(RebuildError::PathNotFound)
                .unwrap_or_else(|| {
                    RebuildError::DeviceWrite(std::io::Error::from_raw_os_error(errno))
                })
        } else {
            RebuildError::DeviceWrite(std::io::Error::from_raw_os_error(errno))
        };
        return Err(OrchestratorError::Rebuild(err));
    }
    eprintln!("[restore] device write completed, rebuild applied");
    kill_victim_on_shutdown(victim_pid)?;

    let target_regs = snapshot.user.gpregs();
    tracer.set_regs(&target_regs)?;
    eprintln!(
        "[restore] registers restored, rip={:#x} rsp={:#x}",
        target_regs.rip, target_regs.rsp
    );

    if options.step_by_step {
        run_step_by_step(&tracer)?;
    }
    kill_victim_on_shutdown(victim_pid)?;

    tracer.detach(None)?;
    eprintln!("[restore] victim {} detached, running free", victim_pid);

    Ok(victim_pid.as_raw())
}

/// Pre-flight check for scenario S6: a file-backed region whose path isn't
/// openable on this host before any destructive rebuild step runs. The
/// device itself re-derives the same check at rebuild time (and the actual
/// `-ENOENT` it reports is also mapped back to [`RebuildError::PathNotFound`]
/// below), but failing here means a missing backing file never costs the
/// victim its address space.
fn first_missing_file_backed(snapshot: &wire::WireSnapshot) -> Option<PathBuf> {
    snapshot
        .regions
        .iter()
        .find(|r| wire::is_file_backed(&r.path) && std::fs::File::open(&r.path).is_err())
        .map(|r| PathBuf::from(&r.path))
}

/// Checked at every point in the rebuild sequence where the victim is in
/// an indeterminate, half-rebuilt state: if a shutdown signal landed
/// (`signals::install_signal_handlers`), per §7's "failure during rebuild
/// leaves the victim indeterminate and the orchestrator kills it" this
/// kills the victim outright rather than leaving it attached and stopped.
fn kill_victim_on_shutdown(victim_pid: Pid) -> Result<(), OrchestratorError> {
    if !signals::shutdown_requested() {
        return Ok(());
    }
    eprintln!(
        "[restore] shutdown requested mid-rebuild, killing victim {}",
        victim_pid
    );
    let _ = kill(victim_pid, Signal::SIGKILL);
    Err(OrchestratorError::ShutdownRequested)
}

/// Step-by-step diagnostic mode: single-steps the victim one instruction
/// at a time, printing its GPRs after each step, until it stops on a
/// signal other than `SIGTRAP` (the expected single-step trap) or exits.
fn run_step_by_step(tracer: &Tracer) -> Result<(), OrchestratorError> {
    loop {
        kill_victim_on_shutdown(tracer.pid())?;
        let status = tracer.single_step()?;
        let regs = tracer.get_regs()?;
        eprintln!(
            "[restore:step] rip={:#x} rsp={:#x} rax={:#x}",
            regs.rip, regs.rsp, regs.rax
        );
        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => continue,
            WaitStatus::Stopped(_, sig) => {
                eprintln!("[restore:step] stopped on {:?}, ending step mode", sig);
                break;
            }
            WaitStatus::Exited(_, code) => {
                eprintln!("[restore:step] victim exited with code {}", code);
                break;
            }
            _ => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_point_at_the_well_known_device() {
        let options = RestoreOptions::default();
        assert_eq!(options.device_path, Path::new(DEFAULT_DEVICE_PATH));
        assert!(!options.step_by_step);
    }

    fn decoded_region(path: &str) -> wire::DecodedRegion {
        wire::DecodedRegion {
            start: 0x1000,
            end: 0x2000,
            size: 0x1000,
            offset: 0,
            permissions: "r-xp".to_string(),
            path: path.to_string(),
            content: None,
        }
    }

    fn wire_snapshot(regions: Vec<wire::DecodedRegion>) -> wire::WireSnapshot {
        wire::WireSnapshot {
            user: crate::user::UserBlock::from_bytes(vec![0u8; crate::user::USER_BLOCK_LEN])
                .unwrap(),
            regions,
        }
    }

    #[test]
    fn first_missing_file_backed_finds_an_unopenable_path() {
        let snapshot = wire_snapshot(vec![
            decoded_region("[heap]"),
            decoded_region("/this/path/does/not/exist/anywhere"),
        ]);
        let missing = first_missing_file_backed(&snapshot);
        assert_eq!(
            missing,
            Some(PathBuf::from("/this/path/does/not/exist/anywhere"))
        );
    }

    #[test]
    fn first_missing_file_backed_ignores_paths_that_exist() {
        let snapshot = wire_snapshot(vec![decoded_region("/proc/self/maps")]);
        assert_eq!(first_missing_file_backed(&snapshot), None);
    }

    #[test]
    fn first_missing_file_backed_ignores_non_file_backed_regions() {
        let snapshot = wire_snapshot(vec![decoded_region("[stack]")]);
        assert_eq!(first_missing_file_backed(&snapshot), None);
    }

    #[test]
    fn kill_victim_on_shutdown_is_a_noop_when_no_shutdown_was_requested() {
        signals::SHUTDOWN_REQUESTED.store(false, std::sync::atomic::Ordering::SeqCst);
        let pid = nix::unistd::getpid();
        assert!(kill_victim_on_shutdown(pid).is_ok());
    }

    #[test]
    fn kill_victim_on_shutdown_kills_the_victim_and_reports_shutdown() {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{fork, ForkResult};

        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                std::thread::sleep(Duration::from_secs(5));
                std::process::exit(0);
            }
            ForkResult::Parent { child } => {
                signals::SHUTDOWN_REQUESTED.store(true, std::sync::atomic::Ordering::SeqCst);
                let result = kill_victim_on_shutdown(child);
                signals::SHUTDOWN_REQUESTED.store(false, std::sync::atomic::Ordering::SeqCst);

                assert!(matches!(result, Err(OrchestratorError::ShutdownRequested)));
                match waitpid(child, None) {
                    Ok(WaitStatus::Signaled(_, Signal::SIGKILL, _)) => {}
                    other => panic!("expected victim to be SIGKILLed, got {:?}", other),
                }
            }
        }
    }
}
