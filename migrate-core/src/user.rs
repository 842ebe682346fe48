//! User-metadata reader (component C): captures the tracee's `struct user`
//! area word-by-word via `PTRACE_PEEKUSER`, the same raw escape hatch
//! `Tracer::peek_user` wraps.
//!
//! `struct user` is read rather than reconstructed from `PTRACE_GETREGS`
//! because it additionally carries the FPU/debug-register state and the
//! `start_code`/`start_stack`/`signal` bookkeeping fields the spec's
//! snapshot model treats as an opaque block to replay verbatim.

use crate::error::UserError;
use crate::tracer::Tracer;

/// `sizeof(struct user)` on x86_64 Linux (glibc's `<sys/user.h>`).
pub const USER_BLOCK_LEN: usize = 936;
const WORD_LEN: usize = std::mem::size_of::<libc::c_long>();
const WORD_COUNT: usize = USER_BLOCK_LEN / WORD_LEN;

/// Byte offsets of `struct user`'s trailing bookkeeping fields on x86_64
/// glibc. After `regs` (216 bytes: [`gpregs`]'s `user_regs_struct`),
/// `u_fpvalid` plus alignment padding (8 bytes) and `i387`
/// (`user_fpregs_struct`, 512 bytes) bring the next real field to 736.
const U_TSIZE_OFFSET: usize = 736;
const U_DSIZE_OFFSET: usize = 744;
const U_SSIZE_OFFSET: usize = 752;
const START_CODE_OFFSET: usize = 760;
const START_STACK_OFFSET: usize = 768;

/// An opaque, word-aligned copy of the tracee's `struct user` area.
#[derive(Debug, Clone)]
pub struct UserBlock(Vec<u8>);

impl UserBlock {
    pub fn capture(tracer: &Tracer) -> Result<Self, UserError> {
        let mut bytes = Vec::with_capacity(USER_BLOCK_LEN);
        for word_index in 0..WORD_COUNT {
            let offset = word_index * WORD_LEN;
            let word = tracer.peek_user(offset)?;
            bytes.extend_from_slice(&word.to_ne_bytes());
        }
        if bytes.len() != USER_BLOCK_LEN {
            return Err(UserError::WordCountMismatch {
                expected: USER_BLOCK_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, UserError> {
        if bytes.len() != USER_BLOCK_LEN {
            return Err(UserError::WordCountMismatch {
                expected: USER_BLOCK_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `struct user`'s first member on x86_64 Linux is `struct
    /// user_regs_struct regs`, so the GPR/segment state PTRACE_GETREGS
    /// would return is already present at offset 0 of this block. The
    /// orchestrator uses this to restore registers after rebuild without
    /// needing a second, redundant capture.
    pub fn gpregs(&self) -> libc::user_regs_struct {
        const REGS_LEN: usize = std::mem::size_of::<libc::user_regs_struct>();
        debug_assert!(REGS_LEN <= USER_BLOCK_LEN);
        // SAFETY: `libc::user_regs_struct` is a C repr struct of plain
        // integers; `self.0` has at least REGS_LEN initialized bytes at
        // offset 0, matching the real `struct user` layout this was
        // captured from.
        unsafe { std::ptr::read_unaligned(self.0.as_ptr() as *const libc::user_regs_struct) }
    }

    fn word_at(&self, offset: usize) -> u64 {
        let mut arr = [0u8; WORD_LEN];
        arr.copy_from_slice(&self.0[offset..offset + WORD_LEN]);
        u64::from_ne_bytes(arr)
    }

    /// Text segment size in bytes. Real `struct user` field `u_tsize`.
    pub fn u_tsize(&self) -> u64 {
        self.word_at(U_TSIZE_OFFSET)
    }

    /// Data segment size in bytes. Real `struct user` field `u_dsize`.
    pub fn u_dsize(&self) -> u64 {
        self.word_at(U_DSIZE_OFFSET)
    }

    /// Stack size in bytes. Real `struct user` field `u_ssize`.
    pub fn u_ssize(&self) -> u64 {
        self.word_at(U_SSIZE_OFFSET)
    }

    /// Start address of the text segment. Real `struct user` field
    /// `start_code`.
    pub fn start_code(&self) -> u64 {
        self.word_at(START_CODE_OFFSET)
    }

    /// Start address of the stack. Real `struct user` field `start_stack`.
    pub fn start_stack(&self) -> u64 {
        self.word_at(START_STACK_OFFSET)
    }

    /// End of the text segment. Not a real `struct user` field — derived as
    /// `start_code() + u_tsize()`, the a.out-era convention those two real
    /// fields together describe.
    pub fn end_code(&self) -> u64 {
        self.start_code().wrapping_add(self.u_tsize())
    }

    /// Start of the data segment. Not a real `struct user` field —
    /// approximated as [`end_code`](Self::end_code), since the data segment
    /// conventionally begins immediately after text.
    pub fn start_data(&self) -> u64 {
        self.end_code()
    }

    /// End of the data segment. Not a real `struct user` field — derived as
    /// `start_data() + u_dsize()`.
    pub fn end_data(&self) -> u64 {
        self.start_data().wrapping_add(self.u_dsize())
    }

    /// Start of the break segment. Not a real `struct user` field —
    /// approximated as [`end_data`](Self::end_data), the position the break
    /// starts at before any `brk()` calls have grown it.
    pub fn start_brk(&self) -> u64 {
        self.end_data()
    }

    /// Current break. Not a real `struct user` field and not recoverable
    /// from one: a live process's break may have grown past `start_brk()`,
    /// but `struct user` carries no record of that growth. Returns
    /// `start_brk()`, i.e. the break's position as of process start.
    pub fn brk(&self) -> u64 {
        self.start_brk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(UserBlock::from_bytes(vec![0u8; 10]).is_err());
        assert!(UserBlock::from_bytes(vec![0u8; USER_BLOCK_LEN]).is_ok());
    }

    #[test]
    fn word_count_divides_evenly() {
        assert_eq!(WORD_COUNT * WORD_LEN, USER_BLOCK_LEN);
    }

    #[test]
    fn bookkeeping_accessors_read_the_documented_offsets() {
        let mut bytes = vec![0u8; USER_BLOCK_LEN];
        let poke = |bytes: &mut Vec<u8>, offset: usize, value: u64| {
            bytes[offset..offset + WORD_LEN].copy_from_slice(&value.to_ne_bytes());
        };
        poke(&mut bytes, START_CODE_OFFSET, 0x4000_0000);
        poke(&mut bytes, U_TSIZE_OFFSET, 0x1000);
        poke(&mut bytes, U_DSIZE_OFFSET, 0x2000);
        poke(&mut bytes, U_SSIZE_OFFSET, 0x3000);
        poke(&mut bytes, START_STACK_OFFSET, 0x7fff_0000);

        let block = UserBlock::from_bytes(bytes).unwrap();
        assert_eq!(block.start_code(), 0x4000_0000);
        assert_eq!(block.u_tsize(), 0x1000);
        assert_eq!(block.end_code(), 0x4000_1000);
        assert_eq!(block.start_data(), 0x4000_1000);
        assert_eq!(block.u_dsize(), 0x2000);
        assert_eq!(block.end_data(), 0x4000_3000);
        assert_eq!(block.start_brk(), 0x4000_3000);
        assert_eq!(block.brk(), 0x4000_3000);
        assert_eq!(block.u_ssize(), 0x3000);
        assert_eq!(block.start_stack(), 0x7fff_0000);
    }
}
