use crate::error::Error;
use crate::fdlist::FdList;
use crate::procstat::{rdev_of, Dev};
use std::fs;

/// Enumerate fds open in `pid` whose underlying device matches `ctty`,
/// `/dev/tty`, or `/dev/console`. All access here is local: we stat
/// `/proc/<pid>/fd/*` from the controller's own process; no remote
/// syscall is needed for discovery, only for acting on what's found.
pub fn discover(pid: i32, ctty: Dev) -> Result<FdList, Error> {
    // Matches reptyr's get_child_tty_fds: a failed stat on either path is
    // fatal, not silently treated as "device absent".
    let tty_dev = rdev_of("/dev/tty")?;
    let console_dev = rdev_of("/dev/console")?;

    let fd_dir = format!("/proc/{pid}/fd");
    let entries = fs::read_dir(&fd_dir)?;

    let mut fds = FdList::new();
    for entry in entries {
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

        if dev == ctty || dev == tty_dev || dev == console_dev {
            fds.push(fd_num);
        }
    }

    Ok(fds)
}

/// Fixed `{0, 1, 2}` list used when `force_stdio` bypasses discovery.
pub fn stdio_fds() -> FdList {
    FdList::from_iter([0, 1, 2])
}
