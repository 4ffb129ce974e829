use crate::error::Error;

/// Per-architecture table of syscall numbers used by the orchestrators.
/// Modeled as a flat record of optionals rather than a class hierarchy:
/// call sites pick a primary syscall and fall back to an alternative
/// when the table reports the primary unavailable (`mmap2` vs `mmap`,
/// `signal` vs `rt_sigaction`, individual socket syscalls vs the
/// multiplexed `socketcall`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallTable {
    pub mmap: Option<i64>,
    pub mmap2: Option<i64>,
    pub munmap: Option<i64>,
    pub fork: Option<i64>,
    pub wait4: Option<i64>,
    pub setpgid: Option<i64>,
    pub setsid: Option<i64>,
    pub getsid: Option<i64>,
    pub signal: Option<i64>,
    pub rt_sigaction: Option<i64>,
    pub socket: Option<i64>,
    pub connect: Option<i64>,
    pub sendmsg: Option<i64>,
    pub socketcall: Option<i64>,
    pub open: Option<i64>,
    pub close: Option<i64>,
    pub dup2: Option<i64>,
    pub ioctl: Option<i64>,
    pub kill: Option<i64>,
}

impl SyscallTable {
    /// Prefer `mmap2`, fall back to `mmap`.
    pub fn mmap_syscall(&self) -> Option<i64> {
        self.mmap2.or(self.mmap)
    }
}

/// A debugger-style remote-control handle over a single tracee, as
/// consumed by the attach/steal orchestrators. One concrete instance
/// ships for x86_64 Linux (see `ptrace_x86_64`); the trait itself makes
/// no assumption about architecture.
pub trait Debugger {
    /// Raw per-architecture register file. Kept as an associated type
    /// rather than a fixed struct so the orchestrators, which are generic
    /// over `D: Debugger`, can copy a register snapshot from one tracee
    /// onto another (used when parking a throwaway child in its own
    /// process group during `setsid`).
    type Regs: Copy;

    fn pid(&self) -> i32;

    /// True once `detach` has run (or attach never fully succeeded).
    fn is_detached(&self) -> bool;

    /// Advance the tracee to a syscall-stop boundary. The orchestrator
    /// only needs *a* boundary, not a specific one, since every register
    /// used to get there is about to be overwritten for an injected call.
    fn advance_to_syscall(&mut self) -> Result<(), Error>;

    /// Read the tracee's current registers.
    fn get_regs(&self) -> Result<Self::Regs, Error>;

    /// Write the tracee's registers.
    fn set_regs(&self, regs: &Self::Regs) -> Result<(), Error>;

    /// Snapshot registers at the current stop. Used both as the restore
    /// point on detach and as the template for every injected syscall.
    fn save_regs(&mut self) -> Result<(), Error>;

    /// Restore the snapshot taken by `save_regs`.
    fn restore_regs(&mut self) -> Result<(), Error>;

    /// Detach from the tracee. A no-op if already detached.
    fn detach(&mut self) -> Result<(), Error>;

    /// Copy `data` into the tracee's address space at `addr`.
    fn write_mem(&mut self, addr: u64, data: &[u8]) -> Result<(), Error>;

    /// Copy `buf.len()` bytes from the tracee's address space at `addr`.
    fn read_mem(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error>;

    /// Execute a syscall inside the tracee using its own credentials and
    /// address space. `args` are zero-padded to six integer arguments.
    /// Returns the raw (possibly negative-as-unsigned) return value.
    fn remote_syscall(&mut self, num: i64, args: [u64; 6]) -> Result<i64, Error>;

    fn syscalls(&self) -> &SyscallTable;
}

/// Linux's "last page" convention: syscall return values within 4096 of
/// the address space ceiling are negated errno values rather than valid
/// pointers/counts. `mmap`'s return is checked this way since it returns
/// an address, not a small integer.
pub fn is_error_pointer(ret: u64) -> bool {
    ret >= (-4096i64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_pointer_boundary() {
        assert!(!is_error_pointer(0));
        assert!(!is_error_pointer(0x7fff_0000));
        assert!(is_error_pointer((-1i64) as u64));
        assert!(is_error_pointer((-4096i64) as u64));
        assert!(!is_error_pointer((-4097i64) as u64));
    }

    #[test]
    fn mmap_prefers_mmap2() {
        let mut table = SyscallTable::default();
        table.mmap = Some(9);
        assert_eq!(table.mmap_syscall(), Some(9));
        table.mmap2 = Some(192);
        assert_eq!(table.mmap_syscall(), Some(192));
    }
}
