//! `restore` — listen for an incoming checkpoint (or replay a dump file),
//! rebuild the address space through the kernel device, and hand control
//! to the restored process.

use anyhow::{Context, Result};
use clap::Parser;
use migrate_core::config::RestoreArgs;
use migrate_core::device::DEFAULT_DEVICE_PATH;
use migrate_core::orchestrator::{self, RestoreOptions};
use migrate_core::signals;
use std::fs::File;
use std::io::Write as _;

fn main() -> Result<()> {
    let args = RestoreArgs::parse();

    if let Some(logfile) = &args.logfile {
        let file = File::create(logfile)
            .with_context(|| format!("opening logfile {}", logfile.display()))?;
        redirect_stdout(file)?;
    }

    signals::install_signal_handlers().context("installing signal handlers")?;

    let options = RestoreOptions {
        device_path: args.device.unwrap_or_else(|| DEFAULT_DEVICE_PATH.into()),
        step_by_step: args.step_by_step,
    };

    let victim_pid = if let Some(dump_path) = &args.from_dump {
        orchestrator::restore_from_dump(dump_path, &options)
            .with_context(|| format!("restoring from dump file {}", dump_path.display()))?
    } else {
        let port = args.listen_port.expect("clap enforces listen xor dump");
        let bind_addr = format!("127.0.0.1:{}", port);
        orchestrator::listen_and_restore(&bind_addr, &options)
            .with_context(|| format!("restoring from connection on {}", bind_addr))?
    };

    println!("{}", victim_pid);
    Ok(())
}

/// Best-effort stdout redirect for `-f <logfile>`: writes subsequent
/// `println!` output (the final victim pid) to the file instead of the
/// terminal. The orchestrator's own progress lines go to stderr
/// regardless and are unaffected.
fn redirect_stdout(mut file: File) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    let rc = unsafe { libc::dup2(fd, libc::STDOUT_FILENO) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error()).context("dup2 onto stdout");
    }
    file.flush().ok();
    Ok(())
}
