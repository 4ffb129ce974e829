//! Concrete x86_64 Linux implementation of the `Debugger` trait: plain
//! `PTRACE_ATTACH`/`PTRACE_SYSCALL`/`PTRACE_DETACH`, register save/restore
//! via `PTRACE_GETREGS`/`PTRACE_SETREGS`, and memory access through
//! `/proc/<pid>/mem` rather than word-at-a-time `PEEKDATA`/`POKEDATA`.

use crate::debugger::{Debugger, SyscallTable};
use crate::error::{Error, SysError};
use rustix::io::Errno;
use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind};
use std::os::unix::fs::FileExt;

fn last_errno() -> Errno {
    Errno::from_io_error(&IoError::last_os_error()).unwrap()
}

/// x86_64 syscall numbers used by this crate. `mmap2` and `socketcall`
/// are 32-bit-only and have no x86_64 equivalent; `signal` likewise has
/// no raw x86_64 syscall (glibc emulates it via `rt_sigaction`), which is
/// exactly the case the ignore-SIGHUP routine's fallback branch exists for.
pub const X86_64_SYSCALLS: SyscallTable = SyscallTable {
    mmap: Some(9),
    mmap2: None,
    munmap: Some(11),
    fork: Some(57),
    wait4: Some(61),
    setpgid: Some(109),
    setsid: Some(112),
    getsid: Some(124),
    signal: None,
    rt_sigaction: Some(13),
    socket: Some(41),
    connect: Some(42),
    sendmsg: Some(46),
    socketcall: None,
    open: Some(2),
    close: Some(3),
    dup2: Some(33),
    ioctl: Some(16),
    kill: Some(62),
};

pub struct X86_64Debugger {
    pid: libc::pid_t,
    detached: bool,
    anchor_regs: Option<libc::user_regs_struct>,
    mem: Option<File>,
}

impl X86_64Debugger {
    /// Attach to `pid` via `PTRACE_ATTACH` and wait for the initial stop.
    /// The target is assumed to already be stopped externally by a
    /// job-control signal (see `stopresume`), so seize semantics are not
    /// needed here - plain attach matches that stop-then-control flow.
    pub fn attach(pid: i32) -> Result<Self, Error> {
        let ret = unsafe { libc::ptrace(libc::PTRACE_ATTACH, pid as libc::pid_t, 0, 0) };
        if ret < 0 {
            return Err(SysError("ptrace(ATTACH)", last_errno()).into());
        }

        let mut status: libc::c_int = 0;
        loop {
            let w = unsafe { libc::waitpid(pid, &mut status, 0) };
            if w < 0 {
                if last_errno() == Errno::INTR {
                    continue;
                }
                return Err(SysError("waitpid()", last_errno()).into());
            }
            break;
        }

        Ok(X86_64Debugger {
            pid,
            detached: false,
            anchor_regs: None,
            mem: None,
        })
    }

    fn wait_stop(&self) -> Result<(), Error> {
        let mut status: libc::c_int = 0;
        loop {
            let w = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if w < 0 {
                if last_errno() == Errno::INTR {
                    continue;
                }
                return Err(SysError("waitpid()", last_errno()).into());
            }
            break;
        }
        Ok(())
    }

    fn raw_get_regs(&self) -> Result<libc::user_regs_struct, Error> {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGS,
                self.pid,
                0,
                &mut regs as *mut _ as *mut libc::c_void,
            )
        };
        if ret < 0 {
            return Err(SysError("ptrace(GETREGS)", last_errno()).into());
        }
        Ok(regs)
    }

    fn raw_set_regs(&self, regs: &libc::user_regs_struct) -> Result<(), Error> {
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_SETREGS,
                self.pid,
                0,
                regs as *const _ as *mut libc::c_void,
            )
        };
        if ret < 0 {
            return Err(SysError("ptrace(SETREGS)", last_errno()).into());
        }
        Ok(())
    }

    fn single_step_syscall(&self) -> Result<(), Error> {
        let ret = unsafe { libc::ptrace(libc::PTRACE_SYSCALL, self.pid, 0, 0) };
        if ret < 0 {
            return Err(SysError("ptrace(SYSCALL)", last_errno()).into());
        }
        self.wait_stop()
    }

    fn mem_file(&mut self) -> Result<&mut File, Error> {
        if self.mem.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(format!("/proc/{}/mem", self.pid))?;
            self.mem = Some(file);
        }
        Ok(self.mem.as_mut().unwrap())
    }
}

impl Debugger for X86_64Debugger {
    type Regs = libc::user_regs_struct;

    fn pid(&self) -> i32 {
        self.pid
    }

    fn is_detached(&self) -> bool {
        self.detached
    }

    fn advance_to_syscall(&mut self) -> Result<(), Error> {
        loop {
            let ret = unsafe { libc::ptrace(libc::PTRACE_SYSCALL, self.pid, 0, 0) };
            if ret < 0 {
                return Err(SysError("ptrace(SYSCALL)", last_errno()).into());
            }
            self.wait_stop()?;

            // Any syscall-stop is a valid boundary: we are about to
            // overwrite every argument register for our own call.
            return Ok(());
        }
    }

    fn get_regs(&self) -> Result<Self::Regs, Error> {
        self.raw_get_regs()
    }

    fn set_regs(&self, regs: &Self::Regs) -> Result<(), Error> {
        self.raw_set_regs(regs)
    }

    fn save_regs(&mut self) -> Result<(), Error> {
        let regs = self.raw_get_regs()?;
        self.anchor_regs = Some(regs);
        Ok(())
    }

    fn restore_regs(&mut self) -> Result<(), Error> {
        let regs = self.anchor_regs.ok_or_else(|| {
            Error::Io(IoError::new(ErrorKind::Other, "no saved registers to restore"))
        })?;
        self.raw_set_regs(&regs)
    }

    fn detach(&mut self) -> Result<(), Error> {
        if self.detached {
            return Ok(());
        }
        let ret = unsafe { libc::ptrace(libc::PTRACE_DETACH, self.pid, 0, 0) };
        self.detached = true;
        if ret < 0 {
            return Err(SysError("ptrace(DETACH)", last_errno()).into());
        }
        Ok(())
    }

    fn write_mem(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        let file = self.mem_file()?;
        file.write_all_at(data, addr)?;
        Ok(())
    }

    fn read_mem(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        let file = self.mem_file()?;
        file.read_exact_at(buf, addr)?;
        Ok(())
    }

    fn remote_syscall(&mut self, num: i64, args: [u64; 6]) -> Result<i64, Error> {
        let anchor = self.anchor_regs.ok_or_else(|| {
            Error::Io(IoError::new(ErrorKind::Other, "no anchor registers for remote syscall"))
        })?;

        let mut regs = anchor;
        regs.rax = num as u64;
        regs.rdi = args[0];
        regs.rsi = args[1];
        regs.rdx = args[2];
        regs.r10 = args[3];
        regs.r8 = args[4];
        regs.r9 = args[5];
        // Rewind to the `syscall` instruction (2 bytes) the tracee was
        // already stopped just past, and reuse it rather than injecting
        // a synthetic one.
        regs.rip = anchor.rip.wrapping_sub(2);

        self.raw_set_regs(&regs)?;
        // Enter the syscall...
        self.single_step_syscall()?;
        // ...and exit it.
        self.single_step_syscall()?;

        let result = self.raw_get_regs()?;
        Ok(result.rax as i64)
    }

    fn syscalls(&self) -> &SyscallTable {
        &X86_64_SYSCALLS
    }
}

impl Drop for X86_64Debugger {
    fn drop(&mut self) {
        if !self.detached {
            let _ = self.detach();
        }
    }
}
