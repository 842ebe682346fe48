//! CLI argument parsing for both binaries (component H).
//!
//! `checkpoint` attaches to a running pid and ships its state either to a
//! `host:port` destination or into a local dump file; `restore` does the
//! inverse, either listening for a connection or replaying a dump file.

use clap::Parser;
use std::path::PathBuf;

/// checkpoint <pid> <host:port> | checkpoint <pid> --dump <path>
#[derive(Parser, Debug)]
#[command(name = "checkpoint", version, about = "Checkpoint a running process")]
pub struct CheckpointArgs {
    /// pid of the target process to checkpoint
    pub pid: i32,

    /// destination host:port to stream the snapshot to
    #[arg(required_unless_present = "dump")]
    pub destination: Option<String>,

    /// write the snapshot to a local dump file instead of streaming it
    #[arg(long, conflicts_with = "destination", env = "MIGRATE_DUMP_PATH")]
    pub dump: Option<PathBuf>,
}

/// restore <listen-port> [-f <logfile>] [-s] | restore --from-dump <path>
#[derive(Parser, Debug)]
#[command(name = "restore", version, about = "Restore a checkpointed process")]
pub struct RestoreArgs {
    /// port to listen on (binds 127.0.0.1:<listen-port>) for one incoming
    /// checkpoint connection
    #[arg(required_unless_present = "from_dump")]
    pub listen_port: Option<u16>,

    /// replay a previously written dump file instead of listening
    #[arg(long, conflicts_with = "listen_port", env = "MIGRATE_DUMP_PATH")]
    pub from_dump: Option<PathBuf>,

    /// redirect the orchestrator's stdout to this file
    #[arg(short = 'f', long = "logfile")]
    pub logfile: Option<PathBuf>,

    /// path to the rebuild device, overriding the well-known default
    /// (ambient testability hook, not part of the documented CLI surface)
    #[arg(long = "device", env = "MIGRATE_DEVICE")]
    pub device: Option<PathBuf>,

    /// single-step the restored victim after register restore, printing
    /// its GPRs each instruction, until it stops on a non-trap signal
    #[arg(short = 's', long)]
    pub step_by_step: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn checkpoint_requires_destination_or_dump() {
        assert!(CheckpointArgs::try_parse_from(["checkpoint", "123"]).is_err());
        assert!(CheckpointArgs::try_parse_from(["checkpoint", "123", "10.0.0.1:9000"]).is_ok());
        assert!(CheckpointArgs::try_parse_from(["checkpoint", "123", "--dump", "out.dump"]).is_ok());
    }

    #[test]
    fn checkpoint_rejects_both_destination_and_dump() {
        assert!(CheckpointArgs::try_parse_from([
            "checkpoint",
            "123",
            "10.0.0.1:9000",
            "--dump",
            "out.dump"
        ])
        .is_err());
    }

    #[test]
    fn restore_requires_listen_or_from_dump() {
        assert!(RestoreArgs::try_parse_from(["restore"]).is_err());
        assert!(RestoreArgs::try_parse_from(["restore", "9000"]).is_ok());
        assert!(RestoreArgs::try_parse_from(["restore", "--from-dump", "in.dump"]).is_ok());
    }

    #[test]
    fn restore_step_by_step_flag_parses() {
        let args = RestoreArgs::try_parse_from(["restore", "9000", "-s"]).unwrap();
        assert!(args.step_by_step);
    }
}
