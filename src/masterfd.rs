use crate::debugger::Debugger;
use crate::error::Error;
use crate::fdlist::FdList;
use crate::procstat::{self, rdev_of, makedev, PTMX_DEVICE_MAJOR, PTMX_DEVICE_MINOR};
use crate::ptrace_x86_64::X86_64Debugger;
use std::fs;

/// Find every fd in `emulator` whose underlying device is the ptmx
/// multiplexer and whose `TIOCGPTN` matches `target_ctty`'s minor
/// number - i.e. the master side(s) of the target's pty, as seen from
/// inside the process driving it.
pub fn find(
    emulator: &mut X86_64Debugger,
    scratch_addr: u64,
    target_ctty: procstat::Dev,
) -> Result<FdList, Error> {
    let ptmx_dev = makedev(PTMX_DEVICE_MAJOR, PTMX_DEVICE_MINOR);
    let target_minor = procstat::minor(target_ctty);

    let fd_dir = format!("/proc/{}/fd", emulator.pid());
    let mut found = FdList::new();

    for entry in fs::read_dir(&fd_dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name();
        let fd_num: i32 = match name.to_str().and_then(|s| s.parse().ok()) {
            Some(n) => n,
            None => continue,
        };

        let dev = match rdev_of(entry.path()) {
            Ok(d) => d,
            Err(_) => continue,
        };
        if dev != ptmx_dev {
            continue;
        }

        let ioctl_num = emulator.syscalls().ioctl.ok_or(Error::Remote(libc::ENOSYS))?;
        let ret = emulator.remote_syscall(
            ioctl_num,
            [fd_num as u64, libc::TIOCGPTN as u64, scratch_addr, 0, 0, 0],
        )?;
        if ret < 0 {
            continue;
        }

        let mut buf = [0u8; 4];
        if emulator.read_mem(scratch_addr, &mut buf).is_err() {
            continue;
        }
        let ptn = i32::from_ne_bytes(buf);

        if ptn as u32 == target_minor {
            found.push(fd_num);
        }
    }

    if found.is_empty() {
        return Err(Error::NotFound);
    }

    Ok(found)
}
