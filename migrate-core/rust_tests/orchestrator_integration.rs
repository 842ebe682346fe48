//! End-to-end coverage of the actual S1-style path: a real checkpointed
//! process, `checkpointer::send_to` over a loopback TCP connection,
//! `orchestrator::listen_and_restore` on the far end forking its own victim
//! and driving it through stub installation and the device-write sequence.
//!
//! This is the one part of that pipeline this environment can exercise for
//! real: there is no `/dev/krestore_mapping` node here (no kernel module
//! loaded), so the injected `write()` the stub performs is guaranteed to
//! fail. The test asserts it fails there specifically — `RebuildError`, not
//! earlier, at the network transfer or victim fork/stub-injection stages —
//! rather than claiming it reproduces a full rebuild.

use migrate_core::checkpointer;
use migrate_core::error::{OrchestratorError, RebuildError};
use migrate_core::orchestrator::{self, RestoreOptions};
use nix::sys::signal::{raise, Signal};
use nix::unistd::{fork, ForkResult};

/// Arbitrary high, rarely-used loopback port for this one test; a real test
/// harness running these suites concurrently could collide, but this crate
/// only ever runs this integration file's tests serially against it.
const BIND_ADDR: &str = "127.0.0.1:58231";

#[test]
fn loopback_restore_reaches_the_device_write_and_fails_there() {
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            raise(Signal::SIGSTOP).ok();
            std::thread::sleep(std::time::Duration::from_secs(2));
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            std::thread::sleep(std::time::Duration::from_millis(50));

            let restore_thread = std::thread::spawn(|| {
                orchestrator::listen_and_restore(BIND_ADDR, &RestoreOptions::default())
            });
            // Give the listener a moment to bind before connecting.
            std::thread::sleep(std::time::Duration::from_millis(100));

            let (tracer, snapshot) = checkpointer::checkpoint(child).expect("checkpoint");
            checkpointer::send_to(BIND_ADDR, &snapshot).expect("send_to");

            let result = restore_thread.join().expect("restore thread panicked");

            match result {
                Err(OrchestratorError::Rebuild(RebuildError::DeviceWrite(_)))
                | Err(OrchestratorError::Rebuild(RebuildError::PathNotFound(_))) => {}
                other => panic!(
                    "expected the restore to fail at the device-write step, got {:?}",
                    other
                ),
            }

            checkpointer::finish(&tracer).expect("finish");
            let _ = nix::sys::wait::waitpid(child, None);
        }
    }
}
