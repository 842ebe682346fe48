//! Signal handling for graceful shutdown (ambient component J/L support).
//!
//! The restore orchestrator installs this before listening: a daemon
//! thread sets [`SHUTDOWN_REQUESTED`] when SIGINT/SIGTERM/SIGQUIT arrives,
//! and `orchestrator` polls [`shutdown_requested`] at its own check
//! points — between non-blocking accept attempts while only listening
//! (no victim yet, so the listen simply aborts), and at every step of the
//! rebuild sequence once a victim has been forked, where it kills that
//! victim before returning `ShutdownRequested`, per §7's "failure during
//! rebuild leaves the victim indeterminate and the orchestrator kills it"
//! rule.
//!
//! Spawned as a daemon thread: it dies with the process, no explicit
//! teardown required.

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handlers() -> Result<(), Box<dyn std::error::Error>> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            eprintln!("[restore] received signal {}, requesting shutdown", sig);
            SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        }
    });

    Ok(())
}

#[inline]
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag() {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        assert!(!shutdown_requested());
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        assert!(shutdown_requested());
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    }
}
