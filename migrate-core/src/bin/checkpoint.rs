//! `checkpoint` — attach to a running process, capture its state, and
//! ship it to a destination host (or a local dump file) before killing
//! the source instance.

use anyhow::{Context, Result};
use clap::Parser;
use migrate_core::checkpointer;
use migrate_core::config::CheckpointArgs;
use nix::unistd::Pid;

fn main() -> Result<()> {
    let args = CheckpointArgs::parse();
    let pid = Pid::from_raw(args.pid);

    eprintln!("[checkpoint] attaching to pid {}", pid);
    let (tracer, snapshot) =
        checkpointer::checkpoint(pid).with_context(|| format!("checkpointing pid {}", pid))?;
    eprintln!(
        "[checkpoint] captured {} regions",
        snapshot.region_count()
    );

    if let Some(dump_path) = &args.dump {
        checkpointer::write_dump(dump_path, &snapshot)
            .with_context(|| format!("writing dump file {}", dump_path.display()))?;
        eprintln!("[checkpoint] wrote dump to {}", dump_path.display());
    } else {
        let destination = args
            .destination
            .as_deref()
            .expect("clap enforces destination xor dump");
        checkpointer::send_to(destination, &snapshot)
            .with_context(|| format!("sending snapshot to {}", destination))?;
        eprintln!("[checkpoint] sent snapshot to {}", destination);
    }

    checkpointer::finish(&tracer).context("killing source process after handoff")?;
    eprintln!("[checkpoint] pid {} migrated, source killed", pid);

    Ok(())
}
