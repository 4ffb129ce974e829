use crate::error::SysError;
use rustix::io::retry_on_intr;
use rustix::termios::{
    self, ControlModes, InputModes, LocalModes, OptionalActions, OutputModes, SpecialCodeIndex,
    Termios,
};
use std::os::fd::BorrowedFd;

/// Check if descriptor is a tty.
pub fn is_tty(fd: &BorrowedFd) -> bool {
    termios::isatty(fd)
}

/// Copy win size from src to dst.
pub fn copy_tty_size(dst_tty_fd: &BorrowedFd, src_tty_fd: &BorrowedFd) -> Result<(), SysError> {
    let win_size = match retry_on_intr(|| termios::tcgetwinsize(src_tty_fd)) {
        Ok(win_size) => win_size,
        Err(err) => return Err(SysError("tcgetwinsize()", err)),
    };

    if let Err(err) = retry_on_intr(|| termios::tcsetwinsize(dst_tty_fd, win_size)) {
        return Err(SysError("tcsetwinsize()", err));
    }

    Ok(())
}

/// Save tty state into a variable.
pub fn save_tty_state(tty_fd: &BorrowedFd) -> Result<Termios, SysError> {
    match retry_on_intr(|| termios::tcgetattr(tty_fd)) {
        Ok(term) => Ok(term),
        Err(err) => Err(SysError("tcgetattr()", err)),
    }
}

/// Restore tty state from a variable.
pub fn restore_tty_state(tty_fd: &BorrowedFd, term: &Termios) -> Result<(), SysError> {
    if let Err(err) = retry_on_intr(|| termios::tcsetattr(tty_fd, OptionalActions::Now, term)) {
        return Err(SysError("tcsetattr()", err));
    }
    Ok(())
}

/// Put a tty into raw mode, returning the previous state so it can be restored.
/// Equivalent to the traditional cfmakeraw(3) flag set.
pub fn enter_raw_mode(tty_fd: &BorrowedFd) -> Result<Termios, SysError> {
    let saved = save_tty_state(tty_fd)?;

    let mut raw = saved.clone();
    raw.input_modes &= !(InputModes::IGNBRK
        | InputModes::BRKINT
        | InputModes::PARMRK
        | InputModes::ISTRIP
        | InputModes::INLCR
        | InputModes::IGNCR
        | InputModes::ICRNL
        | InputModes::IXON);
    raw.output_modes &= !OutputModes::OPOST;
    raw.local_modes &=
        !(LocalModes::ECHO | LocalModes::ECHONL | LocalModes::ICANON | LocalModes::ISIG | LocalModes::IEXTEN);
    raw.control_modes &= !(ControlModes::CSIZE | ControlModes::PARENB);
    raw.control_modes |= ControlModes::CS8;
    raw.special_codes[SpecialCodeIndex::VMIN] = 1;
    raw.special_codes[SpecialCodeIndex::VTIME] = 0;

    if let Err(err) = retry_on_intr(|| termios::tcsetattr(tty_fd, OptionalActions::Now, &raw)) {
        return Err(SysError("tcsetattr()", err));
    }

    Ok(saved)
}
