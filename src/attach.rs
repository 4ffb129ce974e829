//! Attach orchestrator (C7): redirects an already-running process's
//! controlling terminal fds onto a pty slave supplied by the caller.
//! Grounded in reptyr's `attach_child`.

use crate::debugger::Debugger;
use crate::error::Error;
use crate::fdlist::FdList;
use crate::procstat::{Dev, StatHandle};
use crate::ptrace_x86_64::X86_64Debugger;
use crate::scratch::Scratch;
use crate::session;
use crate::stopresume;
use crate::term;
use crate::ttyfd;
use rustix::process::{kill_process, Pid, Signal};
use std::fs::OpenOptions;
use std::os::fd::AsFd;

pub fn attach(target: i32, pty_slave_path: &str, force_stdio: bool) -> Result<(), Error> {
    crate::pgroup::preflight(target)?;

    if !force_stdio {
        copy_termios(target, pty_slave_path)?;
    }

    let mut stat = StatHandle::open(target)?;
    let target_ctty: Dev = stat.read()?.ctty;

    stopresume::stop_and_wait(target, &mut stat, Signal::TSTP);

    // Everything from here on, including the debugger attach itself, must
    // still fall through to stopresume::resume below on every failure path -
    // the target was just frozen with TSTP and must not be left stopped.
    let result = (|| -> Result<(), Error> {
        let mut dbg = X86_64Debugger::attach(target)?;
        let result = run_attach(&mut dbg, target, pty_slave_path, force_stdio, target_ctty);

        let _ = dbg.restore_regs();
        let _ = dbg.detach();

        if let Err(ref err) = result {
            crate::debug!("attach of pid {} failed, rolling back: {}", target, err);
        }

        if result.is_ok() {
            stopresume::stop_and_wait(target, &mut stat, Signal::STOP);
            let _ = kill_process(Pid::from_raw(target).unwrap(), Signal::WINCH);
        }

        result
    })();

    stopresume::resume(target);

    result
}

/// Apply the target's current tty settings to the new slave before it
/// becomes anyone's controlling terminal, so the target sees no change
/// in line discipline, echo, or window size across the handoff.
fn copy_termios(target: i32, pty_slave_path: &str) -> Result<(), Error> {
    let mut src_tty = None;
    for n in 0..3 {
        let path = format!("/proc/{target}/fd/{n}");
        if let Ok(f) = OpenOptions::new().read(true).write(true).open(&path) {
            if term::is_tty(&f.as_fd()) {
                src_tty = Some(f);
                break;
            }
        }
    }
    let src_tty = src_tty.ok_or(Error::Notty)?;

    let saved = term::save_tty_state(&src_tty.as_fd())?;
    let slave = OpenOptions::new().read(true).write(true).open(pty_slave_path)?;
    term::restore_tty_state(&slave.as_fd(), &saved)?;
    term::copy_tty_size(&slave.as_fd(), &src_tty.as_fd())?;
    Ok(())
}

fn run_attach(
    dbg: &mut X86_64Debugger,
    target: i32,
    pty_slave_path: &str,
    force_stdio: bool,
    target_ctty: Dev,
) -> Result<(), Error> {
    dbg.advance_to_syscall()?;
    dbg.save_regs()?;

    let mut scratch = Scratch::map(dbg, crate::scratch::page_size())?;

    let outcome = (|| -> Result<(), Error> {
        let old_fds: FdList = if force_stdio {
            ttyfd::stdio_fds()
        } else {
            ttyfd::discover(target, target_ctty)?
        };

        let mut path_bytes = pty_slave_path.as_bytes().to_vec();
        path_bytes.push(0);
        dbg.write_mem(scratch.addr(), &path_bytes)?;

        let open_num = dbg.syscalls().open.ok_or(Error::Remote(libc::ENOSYS))?;
        let new_fd = dbg.remote_syscall(
            open_num,
            [
                scratch.addr(),
                (libc::O_RDWR | libc::O_NOCTTY) as u64,
                0,
                0,
                0,
                0,
            ],
        )?;
        if new_fd < 0 {
            return Err(Error::Remote(-new_fd as i32));
        }
        let new_fd = new_fd as i32;

        let inner = take_tty(dbg, target, new_fd, scratch.addr(), &old_fds);

        if let Some(close_num) = dbg.syscalls().close {
            let _ = dbg.remote_syscall(close_num, [new_fd as u64, 0, 0, 0, 0, 0]);
        }

        inner
    })();

    scratch.unmap(dbg);
    outcome
}

fn take_tty(
    dbg: &mut X86_64Debugger,
    target: i32,
    new_fd: i32,
    scratch_addr: u64,
    old_fds: &FdList,
) -> Result<(), Error> {
    ignore_hup(dbg, scratch_addr)?;

    let getsid_num = dbg.syscalls().getsid.ok_or(Error::Remote(libc::ENOSYS))?;
    let sid = dbg.remote_syscall(getsid_num, [0; 6])?;

    if sid == target as i64 {
        if let Some(old_fd) = old_fds.first() {
            let ioctl_num = dbg.syscalls().ioctl.ok_or(Error::Remote(libc::ENOSYS))?;
            let ret = dbg.remote_syscall(
                ioctl_num,
                [old_fd as u64, libc::TIOCNOTTY as u64, 0, 0, 0, 0],
            )?;
            if ret < 0 {
                return Err(Error::Remote(-ret as i32));
            }
        }
    } else {
        session::setsid(dbg)?;
    }

    let ioctl_num = dbg.syscalls().ioctl.ok_or(Error::Remote(libc::ENOSYS))?;
    let ret = dbg.remote_syscall(
        ioctl_num,
        [new_fd as u64, libc::TIOCSCTTY as u64, 0, 0, 0, 0],
    )?;
    if ret < 0 {
        return Err(Error::Remote(-ret as i32));
    }

    let dup2_num = dbg.syscalls().dup2.ok_or(Error::Remote(libc::ENOSYS))?;
    for old_fd in old_fds.iter() {
        let ret = dbg.remote_syscall(dup2_num, [new_fd as u64, *old_fd as u64, 0, 0, 0, 0])?;
        if ret < 0 {
            return Err(Error::Remote(-ret as i32));
        }
    }

    Ok(())
}

/// Matches the raw `rt_sigaction(2)` ABI, which differs from glibc's
/// user-facing `struct sigaction` field order - the kernel expects
/// `{handler, flags, restorer, mask}`, not glibc's `{handler, mask,
/// flags, restorer}`. Constructed by hand since this is a direct
/// syscall injection, not a libc call the target will ever make.
#[repr(C)]
struct KernelSigaction {
    handler: u64,
    flags: u64,
    restorer: u64,
    mask: u64,
}

const KERNEL_SIGSET_SIZE: u64 = 8;

pub(crate) fn ignore_hup(dbg: &mut X86_64Debugger, scratch_addr: u64) -> Result<(), Error> {
    if let Some(signal_num) = dbg.syscalls().signal {
        let ret = dbg.remote_syscall(
            signal_num,
            [libc::SIGHUP as u64, libc::SIG_IGN as u64, 0, 0, 0, 0],
        )?;
        if ret < 0 {
            return Err(Error::Remote(-ret as i32));
        }
        return Ok(());
    }

    let rt_sigaction_num = dbg.syscalls().rt_sigaction.ok_or(Error::Remote(libc::ENOSYS))?;

    let act = KernelSigaction {
        handler: libc::SIG_IGN as u64,
        flags: 0,
        restorer: 0,
        mask: 0,
    };
    let act_bytes = unsafe {
        std::slice::from_raw_parts(
            &act as *const _ as *const u8,
            std::mem::size_of::<KernelSigaction>(),
        )
    };
    dbg.write_mem(scratch_addr, act_bytes)?;

    let ret = dbg.remote_syscall(
        rt_sigaction_num,
        [libc::SIGHUP as u64, scratch_addr, 0, KERNEL_SIGSET_SIZE, 0, 0],
    )?;
    if ret < 0 {
        return Err(Error::Remote(-ret as i32));
    }
    Ok(())
}
