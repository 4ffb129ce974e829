//! Steal orchestrator (C10): extracts the master side of a target's pty
//! from its terminal emulator and hands it to the controller, leaving
//! the target's session alive but now driven by us. Grounded in reptyr's
//! `steal_pty`/`steal_child_pty`/`steal_cleanup_child`.

use crate::attach;
use crate::debugger::Debugger;
use crate::error::Error;
use crate::fdlist::FdList;
use crate::fdpass::{self, StealSocket};
use crate::masterfd;
use crate::procstat::{self, read_stat, UNIX98_PTY_SLAVE_MAJOR};
use crate::ptrace_x86_64::X86_64Debugger;
use crate::scratch::{self, Scratch};
use std::os::fd::OwnedFd;

pub fn steal(target: i32) -> Result<OwnedFd, Error> {
    let target_stat = read_stat(target)?;
    if procstat::major(target_stat.ctty) != UNIX98_PTY_SLAVE_MAJOR {
        return Err(Error::NotPty);
    }

    // Heuristic: the process driving the target's pty master is the
    // parent of the target's session leader. If a leader has exec'd into
    // a detached shim this comes up empty and the later TIOCGPTN scan
    // fails cleanly with NotFound, rather than stealing the wrong fd.
    let leader_stat = read_stat(target_stat.sid)?;
    let emulator_pid = leader_stat.ppid;
    crate::debug!("assuming emulator for pid {} is pid {}", target, emulator_pid);

    let controller_socket = StealSocket::create("ptygraft-steal")?;

    let mut emulator = X86_64Debugger::attach(emulator_pid)?;
    let outcome = run_steal(&mut emulator, &target_stat, &controller_socket);

    let _ = emulator.restore_regs();
    let _ = emulator.detach();

    if let Err(ref err) = outcome {
        crate::debug!("steal of pid {} failed: {}", target, err);
    }

    outcome
}

fn run_steal(
    emulator: &mut X86_64Debugger,
    target_stat: &procstat::ProcStat,
    controller_socket: &StealSocket,
) -> Result<OwnedFd, Error> {
    emulator.advance_to_syscall()?;
    emulator.save_regs()?;

    let mut scratch = Scratch::map(emulator, scratch::page_size())?;

    let result = (|| -> Result<OwnedFd, Error> {
        let master_fds = masterfd::find(emulator, scratch.addr(), target_stat.ctty)?;
        let first_master = master_fds.first().ok_or(Error::NotFound)?;

        let emulator_sock_fd =
            fdpass::connect_emulator(emulator, scratch.addr(), controller_socket.path())?;
        fdpass::send_fd(emulator, scratch.addr(), emulator_sock_fd, first_master)?;
        let received = fdpass::recv_fd(&controller_socket.socket)?;

        block_hup_in_session_leader(target_stat.sid)?;

        sanitize_emulator_fds(emulator, scratch.addr(), &master_fds, emulator_sock_fd)?;

        Ok(received)
    })();

    scratch.unmap(emulator);
    result
}

/// Once the master fds are neutralised in the emulator, it can no longer
/// deliver I/O to the session; if it now exits, the kernel would hang up
/// the session leader. Ignoring SIGHUP there first closes that race.
fn block_hup_in_session_leader(sid: i32) -> Result<(), Error> {
    let mut leader = X86_64Debugger::attach(sid)?;

    let result = (|| -> Result<(), Error> {
        leader.advance_to_syscall()?;
        leader.save_regs()?;
        let mut scratch = Scratch::map(&mut leader, scratch::page_size())?;
        let r = attach::ignore_hup(&mut leader, scratch.addr());
        scratch.unmap(&mut leader);
        r
    })();

    let _ = leader.restore_regs();
    let _ = leader.detach();
    result
}

/// Cover the now-orphaned master fds with `/dev/null` and close the
/// transfer socket, so the emulator's further reads/writes on what used
/// to be the pty master go nowhere instead of racing the controller.
fn sanitize_emulator_fds(
    emulator: &mut X86_64Debugger,
    scratch_addr: u64,
    master_fds: &FdList,
    emulator_sock_fd: i32,
) -> Result<(), Error> {
    let path = b"/dev/null\0";
    emulator.write_mem(scratch_addr, path)?;

    let open_num = emulator.syscalls().open.ok_or(Error::Remote(libc::ENOSYS))?;
    let null_fd = emulator.remote_syscall(
        open_num,
        [scratch_addr, libc::O_RDONLY as u64, 0, 0, 0, 0],
    )?;
    if null_fd < 0 {
        return Err(Error::Remote(-null_fd as i32));
    }
    let null_fd = null_fd as i32;

    if let Some(dup2_num) = emulator.syscalls().dup2 {
        for fd in master_fds.iter() {
            let _ = emulator.remote_syscall(dup2_num, [null_fd as u64, *fd as u64, 0, 0, 0, 0]);
        }
    }

    if let Some(close_num) = emulator.syscalls().close {
        let _ = emulator.remote_syscall(close_num, [null_fd as u64, 0, 0, 0, 0, 0]);
        let _ = emulator.remote_syscall(close_num, [emulator_sock_fd as u64, 0, 0, 0, 0, 0]);
    }

    Ok(())
}
