//! Victim process management: forks the blank host process the restored
//! program will rebuild itself into, and injects the tiny "victim stub" —
//! a hand-assembled code blob that opens and writes `/dev/krestore_mapping`
//! entirely from memory the kernel's unmap phase is told to leave alone.
//!
//! The stub exists because the device `write()` unmaps the caller's whole
//! address space (save for the reserved range) as part of servicing the
//! call. A normal dynamically-linked Rust process's own code and stack
//! would be unmapped out from under itself mid-syscall; the stub sidesteps
//! this by being the only code and stack the victim is running from at the
//! moment it calls `write()`.

use crate::error::OrchestratorError;
use crate::tracer::Tracer;
use nix::sys::ptrace;
use nix::sys::signal::{raise, Signal};
use nix::unistd::{fork, ForkResult, Pid};
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;

/// Fixed virtual address range the stub is mapped into. Kept in lockstep
/// by hand with `krestore_mapping`'s `RESERVED_STUB_BASE`/`RESERVED_STUB_LEN`
/// (see that crate's `lib.rs`), the same duplication tradeoff as the wire
/// layout: this boundary can't share a common crate across the std / no_std
/// split, so both sides hardcode the same well-known constants.
pub const RESERVED_STUB_BASE: usize = 0x7000_0000_0000;
pub const RESERVED_STUB_LEN: usize = 4096 * 4;

const DEVICE_PATH_OFFSET: usize = 4096;
const STACK_TOP_OFFSET: usize = RESERVED_STUB_LEN - 256;

/// Forks a child that immediately traces itself and stops, ready for the
/// parent to drive through the stub-injection sequence.
pub fn spawn_traced_child() -> Result<Pid, OrchestratorError> {
    match unsafe { fork() }.map_err(OrchestratorError::Fork)? {
        ForkResult::Child => {
            ptrace::traceme().expect("PTRACE_TRACEME failed in victim child");
            raise(Signal::SIGSTOP).expect("raise(SIGSTOP) failed in victim child");
            unreachable!("victim child must be fully replaced by the rebuilt address space");
        }
        ForkResult::Parent { child } => Ok(child),
    }
}

/// Maps the reserved stub range inside the traced child via a ptrace-
/// injected `mmap` syscall, then writes the device path string and the
/// stub's machine code into it. Returns the stub's code entry point.
pub fn install_stub(
    tracer: &Tracer,
    device_path: &str,
    buf_addr: usize,
    buf_len: usize,
) -> Result<usize, OrchestratorError> {
    remote_mmap(
        tracer,
        RESERVED_STUB_BASE,
        RESERVED_STUB_LEN,
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        libc::MAP_PRIVATE | libc::MAP_FIXED | libc::MAP_ANONYMOUS,
    )?;

    let path_addr = RESERVED_STUB_BASE + DEVICE_PATH_OFFSET;
    let mut path_bytes = device_path.as_bytes().to_vec();
    path_bytes.push(0);
    write_remote_memory(tracer.pid(), path_addr, &path_bytes)?;

    let code = build_stub_code(path_addr as u64, buf_addr as u64, buf_len as u64);
    write_remote_memory(tracer.pid(), RESERVED_STUB_BASE, &code)?;

    Ok(RESERVED_STUB_BASE)
}

/// Copies `content` into the victim's original (pre-rebuild) memory, at an
/// address the kernel picks via a non-fixed anonymous mmap. This is where
/// the snapshot's wire bytes live for the device to read during `write()`;
/// it does not need to survive the unmap, only the syscall's userspace
/// copy-in, which completes before any unmapping happens.
pub fn stage_payload(tracer: &Tracer, content: &[u8]) -> Result<usize, OrchestratorError> {
    let addr = remote_mmap(
        tracer,
        0,
        content.len().max(1),
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
    )?;
    write_remote_memory(tracer.pid(), addr, content)?;
    Ok(addr)
}

pub fn stub_stack_top() -> usize {
    RESERVED_STUB_BASE + STACK_TOP_OFFSET
}

/// Hand-assembled x86_64 machine code equivalent to:
/// ```c
/// int fd = open(path, O_WRONLY);
/// write(fd, buf, len);
/// for (;;) {}
/// ```
/// The trailing infinite loop is a safety net: the orchestrator intercepts
/// control at the `write` syscall's exit trap (via `PTRACE_SYSCALL`
/// stepping) long before execution would ever reach it.
fn build_stub_code(path_addr: u64, buf_addr: u64, buf_len: u64) -> Vec<u8> {
    let mut code = Vec::new();

    // movabs rdi, path_addr
    code.push(0x48);
    code.push(0xBF);
    code.extend_from_slice(&path_addr.to_ne_bytes());
    // xor esi, esi        (O_WRONLY = 0)
    code.extend_from_slice(&[0x31, 0xF6]);
    // xor edx, edx        (mode, unused for O_WRONLY)
    code.extend_from_slice(&[0x31, 0xD2]);
    // mov eax, 2          (sys_open)
    code.extend_from_slice(&[0xB8, 0x02, 0x00, 0x00, 0x00]);
    // syscall
    code.extend_from_slice(&[0x0F, 0x05]);
    // mov rdi, rax        (fd)
    code.extend_from_slice(&[0x48, 0x89, 0xC7]);
    // movabs rsi, buf_addr
    code.push(0x48);
    code.push(0xBE);
    code.extend_from_slice(&buf_addr.to_ne_bytes());
    // movabs rdx, buf_len
    code.push(0x48);
    code.push(0xBA);
    code.extend_from_slice(&buf_len.to_ne_bytes());
    // mov eax, 1          (sys_write)
    code.extend_from_slice(&[0xB8, 0x01, 0x00, 0x00, 0x00]);
    // syscall
    code.extend_from_slice(&[0x0F, 0x05]);
    // jmp $ (self loop, 2-byte short jump -2)
    code.extend_from_slice(&[0xEB, 0xFE]);

    code
}

/// Injects a single syscall into the traced child by overwriting its next
/// instruction with a bare `syscall`, pointing registers at the desired
/// call, single-stepping it, then restoring everything that was there
/// before. Same technique the headcrab debuggee wrapper uses for its
/// generic `syscall()` helper.
fn remote_mmap(
    tracer: &Tracer,
    addr: usize,
    len: usize,
    prot: i32,
    flags: i32,
) -> Result<usize, OrchestratorError> {
    let saved_regs = tracer.get_regs()?;
    let mut call_regs = saved_regs;
    call_regs.rax = libc::SYS_mmap as u64;
    call_regs.rdi = addr as u64;
    call_regs.rsi = len as u64;
    call_regs.rdx = prot as u64;
    call_regs.r10 = flags as u64;
    call_regs.r8 = u64::MAX; // fd = -1
    call_regs.r9 = 0; // offset

    let rip = saved_regs.rip as usize;
    let saved_insn = read_remote_memory(tracer.pid(), rip, 2)?;
    write_remote_memory(tracer.pid(), rip, &[0x0F, 0x05])?;

    tracer.set_regs(&call_regs)?;
    tracer.single_step()?;

    let result_regs = tracer.get_regs()?;
    let result = result_regs.rax as i64;

    write_remote_memory(tracer.pid(), rip, &saved_insn)?;
    tracer.set_regs(&saved_regs)?;

    if result < 0 && result > -4096 {
        return Err(OrchestratorError::RemoteSyscall(
            tracer.pid().as_raw(),
            -result as i32,
        ));
    }

    Ok(result as usize)
}

/// Reads `len` bytes from `pid`'s address space at `addr` via
/// `/proc/pid/mem`, used here only to save/restore the handful of
/// instruction bytes `remote_mmap` overwrites.
fn read_remote_memory(pid: Pid, addr: usize, len: usize) -> Result<Vec<u8>, OrchestratorError> {
    let path = format!("/proc/{}/mem", pid);
    let file = OpenOptions::new()
        .read(true)
        .open(&path)
        .map_err(|e| OrchestratorError::RemoteMemory(pid.as_raw(), e))?;
    let mut buf = vec![0u8; len];
    file.read_exact_at(&mut buf, addr as u64)
        .map_err(|e| OrchestratorError::RemoteMemory(pid.as_raw(), e))?;
    Ok(buf)
}

/// Writes `bytes` into `pid`'s address space at `addr` via `/proc/pid/mem`,
/// the write-side counterpart to `maps::read_region_content`'s
/// `process_vm_readv` use.
pub fn write_remote_memory(pid: Pid, addr: usize, bytes: &[u8]) -> Result<(), OrchestratorError> {
    let path = format!("/proc/{}/mem", pid);
    let file = OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|e| OrchestratorError::RemoteMemory(pid.as_raw(), e))?;
    file.write_all_at(bytes, addr as u64)
        .map_err(|e| OrchestratorError::RemoteMemory(pid.as_raw(), e))?;
    Ok(())
}
