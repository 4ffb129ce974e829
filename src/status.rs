// These constants follow bash conventions for exit codes.
// They are not standartizied, but are quite common.

use crate::error::Error;

/// Success.
pub const EXIT_SUCCESS: i32 = 0;

/// General error.
/// E.g. resource not available, permission denined, etc.
pub const EXIT_FAILURE: i32 = 1;

/// Invalid usage.
/// E.g. missing required option.
pub const EXIT_USAGE: i32 = 2;

/// Target is busy (shares process group, or similar precondition failed).
pub const EXIT_BUSY: i32 = 3;

/// Target has no suitable terminal.
pub const EXIT_NOTTY: i32 = 4;

/// A remote syscall failed inside the target or emulator.
pub const EXIT_REMOTE: i32 = 5;

/// Map an operation error to a process exit code.
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Busy => EXIT_BUSY,
        Error::Notty | Error::NotPty | Error::NotFound => EXIT_NOTTY,
        Error::Malformed | Error::Oom => EXIT_FAILURE,
        Error::Io(_) => EXIT_FAILURE,
        Error::Remote(_) => EXIT_REMOTE,
    }
}
