//! Integration coverage for component D: capturing a real, forked and
//! stopped child process end to end through `Tracer::attach` +
//! `Snapshot::capture`.

use migrate_core::maps::RegionKind;
use migrate_core::snapshot::Snapshot;
use migrate_core::tracer::Tracer;
use nix::sys::signal::{raise, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};

#[test]
fn capture_on_a_live_child_produces_a_valid_snapshot() {
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            raise(Signal::SIGSTOP).ok();
            std::thread::sleep(std::time::Duration::from_millis(300));
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            std::thread::sleep(std::time::Duration::from_millis(50));

            let tracer = Tracer::attach(child).expect("attach");
            let snapshot = Snapshot::capture(&tracer, child).expect("capture");

            assert!(snapshot.region_count() > 0);
            assert!(snapshot
                .regions
                .iter()
                .any(|r| matches!(r.kind, RegionKind::AnonymousContent)));
            snapshot.validate().expect("captured snapshot must validate");

            tracer.detach(Some(Signal::SIGKILL)).ok();
            let _ = waitpid(child, None);
        }
    }
}

#[test]
fn captured_gpregs_reflect_a_stopped_instruction_pointer() {
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            raise(Signal::SIGSTOP).ok();
            std::thread::sleep(std::time::Duration::from_millis(300));
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            std::thread::sleep(std::time::Duration::from_millis(50));

            let tracer = Tracer::attach(child).expect("attach");
            let direct_regs = tracer.get_regs().expect("getregs");
            let snapshot = Snapshot::capture(&tracer, child).expect("capture");

            assert_eq!(snapshot.user.gpregs().rip, direct_regs.rip);

            tracer.detach(Some(Signal::SIGKILL)).ok();
            let _ = waitpid(child, None);
        }
    }
}
