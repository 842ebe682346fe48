//! Live process migration core library.
//!
//! Exposes the checkpoint/restore subsystems for the `checkpoint` and
//! `restore` binaries and for integration testing. See `SPEC_FULL.md` at
//! the workspace root for the full component breakdown.

pub mod checkpointer;
pub mod config;
pub mod device;
pub mod error;
pub mod maps;
pub mod orchestrator;
pub mod signals;
pub mod snapshot;
pub mod tracer;
pub mod user;
pub mod victim;
pub mod wire;
