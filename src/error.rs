use rustix::io::Errno;
use std::fmt;
use std::io;

/// Low-level syscall failure: name of the call plus errno.
#[derive(Debug)]
pub struct SysError(pub &'static str, pub Errno);

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.0, self.1)
    }
}

/// Outcome of an attach/steal attempt.
#[derive(Debug)]
pub enum Error {
    /// Another process shares the target's process group.
    Busy,
    /// Target has no controlling terminal and force-stdio was not requested.
    Notty,
    /// Target's controlling terminal is not a Unix-98 pty slave (steal only).
    NotPty,
    /// No matching master pty fd was found in the emulator.
    NotFound,
    /// A kernel record did not have the expected shape (proc stat, control message).
    Malformed,
    /// Local I/O failure: opening /proc entries, sockets, the scratch mapping.
    Io(io::Error),
    /// A syscall injected into the target or emulator returned an error.
    Remote(i32),
    /// Growable fd list failed to grow.
    Oom,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Busy => write!(f, "target shares its process group with another process"),
            Error::Notty => write!(f, "target has no controlling terminal"),
            Error::NotPty => write!(f, "target's controlling terminal is not a pty"),
            Error::NotFound => write!(f, "no matching pty master found"),
            Error::Malformed => write!(f, "unexpected kernel record shape"),
            Error::Io(err) => write!(f, "{}", err),
            Error::Remote(errno) => write!(f, "remote syscall failed: {}", io::Error::from_raw_os_error(*errno)),
            Error::Oom => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<Errno> for Error {
    fn from(err: Errno) -> Self {
        Error::Io(io::Error::from_raw_os_error(err.raw_os_error()))
    }
}

impl From<SysError> for Error {
    fn from(err: SysError) -> Self {
        Error::Io(io::Error::from_raw_os_error(err.1.raw_os_error()))
    }
}
