//! Post-operation hand-off (A3): not part of the remote-syscall core.
//! After `attach` succeeds the new pty slave is already the target's
//! controlling terminal, so there is nothing left to relay. After
//! `steal` succeeds the CLI owns the master fd and splices it against
//! its own stdin/stdout until either side reaches EOF.

use crate::error::Error;
use crate::reader::InterruptibleReader;
use crate::signal::{self, SignalEvent};
use crate::term;
use crate::writer::InterruptibleWriter;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The new pty slave is already the target's controlling terminal;
/// print its path and let the caller decide what to do next.
pub fn post_attach(pty_slave_path: &str) {
    println!("{pty_slave_path}");
}

/// Put our own stdin into raw mode and splice it against the stolen
/// master fd until either direction hits EOF, forwarding `SIGWINCH` as a
/// window-size copy in the meantime.
pub fn post_steal(master: OwnedFd) -> Result<(), Error> {
    let stdin_fd = unsafe { BorrowedFd::borrow_raw(0) };

    let saved_state = if term::is_tty(&stdin_fd) {
        Some(term::enter_raw_mode(&stdin_fd)?)
    } else {
        None
    };

    let result = run_relay(&master, &stdin_fd);

    if let Some(state) = saved_state {
        let _ = term::restore_tty_state(&stdin_fd, &state);
    }

    result
}

fn dup_fd(fd: &impl AsFd) -> Result<OwnedFd, Error> {
    let raw = unsafe { libc::dup(fd.as_fd().as_raw_fd()) };
    if raw < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

fn run_relay(master: &OwnedFd, stdin_fd: &BorrowedFd) -> Result<(), Error> {
    signal::init_relay_signals()?;

    let stdout_fd = unsafe { BorrowedFd::borrow_raw(1) };

    let master_to_stdout = Arc::new(InterruptibleReader::new(dup_fd(master)?)?);
    let stdout_writer = Arc::new(InterruptibleWriter::open(dup_fd(&stdout_fd)?)?);
    let stdin_reader = Arc::new(InterruptibleReader::new(dup_fd(stdin_fd)?)?);
    let stdin_to_master = Arc::new(InterruptibleWriter::open(dup_fd(master)?)?);

    let out_thread = {
        let reader = Arc::clone(&master_to_stdout);
        let writer = Arc::clone(&stdout_writer);
        thread::spawn(move || {
            let mut src = reader.blocking_reader();
            let mut dst = writer.blocking_writer();
            let _ = io::copy(&mut src, &mut dst);
            let _ = writer.close();
        })
    };

    let in_thread = {
        let reader = Arc::clone(&stdin_reader);
        let writer = Arc::clone(&stdin_to_master);
        thread::spawn(move || {
            let mut src = reader.blocking_reader();
            let mut dst = writer.blocking_writer();
            let _ = io::copy(&mut src, &mut dst);
            let _ = writer.close();
        })
    };

    loop {
        if out_thread.is_finished() || in_thread.is_finished() {
            break;
        }

        match signal::wait_signal(Some(POLL_INTERVAL)) {
            Ok(SignalEvent::Resize(_)) => {
                let _ = term::copy_tty_size(&master.as_fd(), stdin_fd);
            }
            Ok(SignalEvent::Interrupt(sig)) | Ok(SignalEvent::Quit(sig)) => {
                // Re-raise against ourselves so the process exits with the
                // standard 128+N signal-death status, mirroring the
                // teacher's raise_signal call site.
                let _ = signal::deliver_signal(sig);
                break;
            }
            Ok(SignalEvent::Unknown(_)) | Ok(SignalEvent::Timeout) => {}
            Err(_) => break,
        }
    }

    let _ = master_to_stdout.close();
    let _ = stdin_reader.close();
    let _ = stdout_writer.close();
    let _ = stdin_to_master.close();
    let _ = signal::unblock_signals();

    let _ = out_thread.join();
    let _ = in_thread.join();

    Ok(())
}
