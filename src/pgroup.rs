use crate::error::Error;
use crate::procstat::read_stat;
use std::fs;

/// Refuse to proceed if any other process shares `target`'s process
/// group. We are somewhat conservative here: if a pid is an
/// not-yet-exec'd child of `target`, the session orchestrator's
/// setpgid-based strategy might suffice, but detecting that case is
/// fragile, so we just bail out.
pub fn preflight(target: i32) -> Result<(), Error> {
    let target_stat = read_stat(target)?;
    let target_pgid = target_stat.pgid;

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
        if pid == target {
            continue;
        }

        let st = match read_stat(pid) {
            Ok(st) => st,
            Err(_) => continue,
        };

        if st.pgid == target_pgid {
            return Err(Error::Busy);
        }
    }

    Ok(())
}
