use crate::error::SysError;
use crate::shim::{self, SigAction, SigMask};
use rustix::process::{self, Signal};
use std::time::Duration;

/// Signals the post-attach/post-steal relay cares about.
/// Before starting the relay threads, the main thread blocks all of these,
/// and later all created threads inherit the block mask.
/// One thread fetches signals one by one using sigwait().
const EVENT_SIGNALS: [Signal; 5] = [
    // graceful termination
    Signal::TERM,
    Signal::INT,
    Signal::HUP,
    Signal::QUIT,
    // tty resize
    Signal::WINCH,
];

/// Signals groupped into event categories.
#[derive(Debug, PartialEq)]
pub enum SignalEvent {
    Interrupt(Signal),
    Quit(Signal),
    Resize(Signal),
    Unknown(Signal),
    Timeout,
}

/// Categorize signals into higher-level event types.
fn to_event(sig: Signal) -> SignalEvent {
    match sig {
        Signal::TERM | Signal::INT | Signal::HUP => SignalEvent::Interrupt(sig),
        Signal::QUIT => SignalEvent::Quit(sig),
        Signal::WINCH => SignalEvent::Resize(sig),
        _ => SignalEvent::Unknown(sig),
    }
}

/// Initialize signal handlers and mask for the relay.
pub fn init_relay_signals() -> Result<(), SysError> {
    if let Err(err) = shim::sigmask(&EVENT_SIGNALS, SigMask::Block) {
        return Err(SysError("sigmask()", err));
    }
    for sig in EVENT_SIGNALS {
        if let Err(err) = shim::sigaction(sig, SigAction::Default) {
            return Err(SysError("sigaction()", err));
        }
    }

    if let Err(err) = shim::sigmask(&[Signal::PIPE], SigMask::Block) {
        return Err(SysError("sigmask()", err));
    }
    if let Err(err) = shim::sigaction(Signal::PIPE, SigAction::Ignore) {
        return Err(SysError("sigaction()", err));
    }

    Ok(())
}

/// Unblock event signals that we've blocked.
pub fn unblock_signals() -> Result<(), SysError> {
    if let Err(err) = shim::sigmask(&EVENT_SIGNALS, SigMask::Unblock) {
        return Err(SysError("sigmask()", err));
    }

    Ok(())
}

/// Wait next event signal.
pub fn wait_signal(timeout: Option<Duration>) -> Result<SignalEvent, SysError> {
    loop {
        let maybe_sig =
            shim::sigwait(&EVENT_SIGNALS, timeout).map_err(|err| SysError("sigwait()", err))?;

        if let Some(sig) = maybe_sig {
            let event = to_event(sig);
            if let SignalEvent::Unknown(_) = event {
                continue;
            }
            return Ok(event);
        }

        return Ok(SignalEvent::Timeout);
    }
}

/// Unblock and deliver signal to current process, to trigger its default
/// handling (used to re-raise a termination signal against ourselves
/// after cleaning up).
pub fn deliver_signal(sig: Signal) -> Result<(), SysError> {
    if let Err(err) = shim::sigmask(&[sig], SigMask::Unblock) {
        return Err(SysError("sigmask()", err));
    }

    if let Err(err) = process::kill_process(process::getpid(), sig) {
        return Err(SysError("kill()", err));
    }

    if let Err(err) = shim::sigmask(&[sig], SigMask::Block) {
        return Err(SysError("sigmask()", err));
    }

    Ok(())
}
