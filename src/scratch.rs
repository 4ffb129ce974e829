use crate::debugger::{is_error_pointer, Debugger};
use crate::error::Error;
use sysconf::raw::{sysconf, SysconfVariable};

const PROT_READ_WRITE: u64 = (libc::PROT_READ | libc::PROT_WRITE) as u64;
const MAP_ANON_PRIVATE: u64 = (libc::MAP_ANONYMOUS | libc::MAP_PRIVATE) as u64;

/// System page size, queried once per call site. Falls back to the
/// universal 4 KiB page on the rare host where `sysconf` can't answer.
pub fn page_size() -> usize {
    match sysconf(SysconfVariable::ScPageSize) {
        Ok(n) if n > 0 => n as usize,
        _ => 4096,
    }
}

/// One page of anonymous RW memory mapped inside a tracee, used to stage
/// short-lived argument blobs (paths, sockaddrs, sigaction structs,
/// control messages) for remote syscalls.
pub struct Scratch {
    addr: u64,
    len: usize,
}

impl Scratch {
    pub const NONE: u64 = u64::MAX;

    /// Map one page of scratch memory inside `dbg`'s tracee.
    pub fn map(dbg: &mut impl Debugger, page_size: usize) -> Result<Self, Error> {
        let syscall = dbg
            .syscalls()
            .mmap_syscall()
            .ok_or_else(|| Error::Remote(libc::ENOSYS))?;

        let ret = dbg.remote_syscall(
            syscall,
            [0, page_size as u64, PROT_READ_WRITE, MAP_ANON_PRIVATE, 0, 0],
        )?;

        let addr = ret as u64;
        if is_error_pointer(addr) {
            return Err(Error::Remote(-(addr as i64) as i32));
        }

        Ok(Scratch {
            addr,
            len: page_size,
        })
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Unmap the scratch page. Safe to call more than once.
    pub fn unmap(&mut self, dbg: &mut impl Debugger) {
        if self.addr == Self::NONE {
            return;
        }
        if let Some(syscall) = dbg.syscalls().munmap {
            let _ = dbg.remote_syscall(syscall, [self.addr, self.len as u64, 0, 0, 0, 0]);
        }
        self.addr = Self::NONE;
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Scratch {
            addr: Self::NONE,
            len: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_sane() {
        let size = page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }
}
