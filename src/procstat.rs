use crate::error::Error;
use rustix::fd::{AsFd, BorrowedFd};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Packed major/minor device number, as returned by `stat(2)`'s `st_rdev`.
pub type Dev = u64;

/// A process's kernel-reported identity and controlling-terminal device,
/// parsed from `/proc/<pid>/stat`.
#[derive(Debug, Clone)]
pub struct ProcStat {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    pub pgid: i32,
    pub sid: i32,
    pub ctty: Dev,
}

/// Holds `/proc/<pid>/stat` open so repeated polling (see `stopresume`)
/// is cheap and does not race pid reuse.
pub struct StatHandle {
    file: File,
}

impl StatHandle {
    pub fn open(pid: i32) -> Result<Self, Error> {
        let file = File::open(format!("/proc/{pid}/stat"))?;
        Ok(StatHandle { file })
    }

    pub fn read(&mut self) -> Result<ProcStat, Error> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; 1024];
        let n = self.file.read(&mut buf)?;
        parse_stat(&buf[..n])
    }
}

/// Read `/proc/<pid>/stat` once. Prefer `StatHandle` when polling.
pub fn read_stat(pid: i32) -> Result<ProcStat, Error> {
    StatHandle::open(pid)?.read()
}

/// Parse the fixed-shape prefix of a stat record: `pid (comm) state ppid
/// pgid sid tty_nr ...`. `comm` is truncated at the first `)`, matching
/// the kernel's own 16-byte truncation of the field (comm cannot contain
/// `)` in practice, so the outermost-paren ambiguity reptyr's own parser
/// accepts does not arise here).
pub fn parse_stat(buf: &[u8]) -> Result<ProcStat, Error> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::Malformed)?;

    let open_paren = text.find('(').ok_or(Error::Malformed)?;
    let close_paren = text.find(')').ok_or(Error::Malformed)?;
    if close_paren < open_paren {
        return Err(Error::Malformed);
    }

    let pid: i32 = text[..open_paren].trim().parse().map_err(|_| Error::Malformed)?;
    let mut comm = text[open_paren + 1..close_paren].to_string();
    comm.truncate(16); // TASK_COMM_LEN; enforced here, not just assumed of the kernel

    let rest = text[close_paren + 1..].trim_start();
    let mut fields = rest.split_whitespace();

    let state = fields
        .next()
        .and_then(|s| s.chars().next())
        .ok_or(Error::Malformed)?;
    let ppid: i32 = fields.next().ok_or(Error::Malformed)?.parse().map_err(|_| Error::Malformed)?;
    let pgid: i32 = fields.next().ok_or(Error::Malformed)?.parse().map_err(|_| Error::Malformed)?;
    let sid: i32 = fields.next().ok_or(Error::Malformed)?.parse().map_err(|_| Error::Malformed)?;
    let tty_nr: u32 = fields.next().ok_or(Error::Malformed)?.parse().map_err(|_| Error::Malformed)?;

    Ok(ProcStat {
        pid,
        comm,
        state,
        ppid,
        pgid,
        sid,
        ctty: tty_nr as Dev,
    })
}

/// Stat a path and return its device node (`st_rdev`), for comparing
/// against a `ProcStat::ctty` value.
pub fn rdev_of(path: impl AsRef<Path>) -> Result<Dev, Error> {
    let meta = std::fs::metadata(path)?;
    Ok(meta.rdev() as Dev)
}

/// Stat an already-open fd and return its device node.
pub fn rdev_of_fd(fd: BorrowedFd) -> Result<Dev, Error> {
    let st = rustix::fs::fstat(fd.as_fd())?;
    Ok(st.st_rdev as Dev)
}

/// Major/minor decomposition matching glibc's `makedev(3)` encoding.
pub fn major(dev: Dev) -> u32 {
    (((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff)) as u32
}

pub fn minor(dev: Dev) -> u32 {
    ((dev & 0xff) | ((dev >> 12) & !0xff)) as u32
}

pub fn makedev(major: u32, minor: u32) -> Dev {
    let major = major as u64;
    let minor = minor as u64;
    (((major & 0xfff) << 8) | (minor & 0xff) | ((major & !0xfff) << 32) | ((minor & !0xff) << 12)) as Dev
}

/// Device major number of the multiplexing ptmx node: major 5, minor 2.
pub const PTMX_DEVICE_MAJOR: u32 = 5;
pub const PTMX_DEVICE_MINOR: u32 = 2;

/// Device major number of Unix-98 pty slaves (`/dev/pts/N`).
pub const UNIX98_PTY_SLAVE_MAJOR: u32 = 136;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_record() {
        let line = b"1234 (bash) S 1000 1234 1234 34816 1235 4194560 100 0 0 0 1 1 0 0 20 0 1 0 999 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0 0 0 0 0 0 0 0 0\n";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1000);
        assert_eq!(stat.pgid, 1234);
        assert_eq!(stat.sid, 1234);
        assert_eq!(stat.ctty, 34816);
    }

    #[test]
    fn comm_longer_than_task_comm_len_is_truncated() {
        let line = b"9 (this-name-is-way-too-long-for-comm) S 1 9 9 34816 -1\n";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.comm.len(), 16);
        assert_eq!(stat.comm, "this-name-is-way");
    }

    #[test]
    fn comm_with_embedded_space_survives() {
        let line = b"55 (my cool proc) T 1 55 55 1027 -1\n";
        let stat = parse_stat(line).unwrap();
        assert_eq!(stat.comm, "my cool proc");
        assert_eq!(stat.state, 'T');
    }

    #[test]
    fn rejects_truncated_record() {
        let line = b"1234 (bash) S 1000 1234\n";
        assert!(parse_stat(line).is_err());
    }

    #[test]
    fn major_minor_round_trip() {
        for (maj, min) in [(5u32, 2u32), (136, 4000), (4, 1), (0, 0)] {
            let dev = makedev(maj, min);
            assert_eq!(major(dev), maj);
            assert_eq!(minor(dev), min);
        }
    }

    #[test]
    fn ptmx_device_matches_documented_major_minor() {
        let dev = makedev(PTMX_DEVICE_MAJOR, PTMX_DEVICE_MINOR);
        assert_eq!(major(dev), 5);
        assert_eq!(minor(dev), 2);
    }
}
