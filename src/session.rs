use crate::debugger::Debugger;
use crate::error::Error;
use crate::ptrace_x86_64::X86_64Debugger;
use std::fs;
use std::os::raw::c_long;

const SIGKILL: i32 = libc::SIGKILL;

/// Make `target` a session leader via a throwaway child, generalized
/// from reptyr's `do_setsid`: fork inside the target to get a disposable
/// pid, park every process that shares the target's process group under
/// that pid's group, call `setsid` in the target, then kill and reap the
/// throwaway. This lets a target that is already a process-group leader
/// (and so cannot `setsid` directly without orphaning its group) still
/// gain a new session without losing track of its group members.
pub fn setsid(target: &mut X86_64Debugger) -> Result<(), Error> {
    let fork_num = target.syscalls().fork.ok_or(Error::Remote(libc::ENOSYS))?;
    let forked = target.remote_syscall(fork_num, [0; 6])?;
    if forked < 0 {
        return Err(Error::Remote(-forked as i32));
    }
    let dummy_pid = forked as i32;

    let mut dummy = X86_64Debugger::attach(dummy_pid)?;
    // Freeze the throwaway in the target's own anchor state immediately,
    // so it never executes any of the target's own further instructions -
    // we drive it purely through register overwrites from here on.
    let target_anchor = target.get_regs()?;
    dummy.set_regs(&target_anchor)?;
    dummy.save_regs()?;

    let result = (|| -> Result<(), Error> {
        let setpgid_num = dummy.syscalls().setpgid.ok_or(Error::Remote(libc::ENOSYS))?;
        let err = dummy.remote_syscall(setpgid_num, [0, 0, 0, 0, 0, 0])?;
        if err < 0 {
            return Err(Error::Remote(-err as i32));
        }

        move_process_group(target, target.pid(), dummy_pid)?;

        let setsid_num = target.syscalls().setsid.ok_or(Error::Remote(libc::ENOSYS))?;
        let err = target.remote_syscall(setsid_num, [0; 6])?;
        if err < 0 {
            move_process_group(target, dummy_pid, target.pid())?;
            return Err(Error::Remote(-err as i32));
        }

        Ok(())
    })();

    // Regardless of outcome: kill the throwaway, detach it, and have the
    // target reap it so it doesn't become our own zombie.
    unsafe {
        libc::kill(dummy_pid as libc::pid_t, SIGKILL);
    }
    let _ = dummy.detach();
    if let Some(wait4_num) = target.syscalls().wait4 {
        let _ = target.remote_syscall(wait4_num, [dummy_pid as u64, 0, libc::WNOHANG as u64, 0, 0, 0]);
    }

    result
}

/// Instruct `target` to `setpgid(pid, to)` for every pid whose pgid
/// currently equals `from`.
fn move_process_group(target: &mut X86_64Debugger, from: i32, to: i32) -> Result<(), Error> {
    let setpgid_num = target.syscalls().setpgid.ok_or(Error::Remote(libc::ENOSYS))?;

    for entry in fs::read_dir("/proc")? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name();
        let pid: i32 = match name.to_str().and_then(|s| s.parse().ok()) {
            Some(p) => p,
            None => continue,
        };

        if getpgid(pid) == from {
            // Non-terminal failures here are not fatal: a pid may have
            // exited between the /proc scan and this call.
            let ret = target.remote_syscall(setpgid_num, [pid as u64, to as u64, 0, 0, 0, 0]);
            if matches!(ret, Ok(n) if n < 0) || ret.is_err() {
                crate::debug!("setpgid({}, {}) failed while migrating group, ignoring", pid, to);
            }
        }
    }

    Ok(())
}

fn getpgid(pid: i32) -> i32 {
    let ret: c_long = unsafe { libc::getpgid(pid) as c_long };
    ret as i32
}
