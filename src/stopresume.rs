use crate::procstat::StatHandle;
use rustix::process::{self, Pid, Signal};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Send a job-control stop signal to `pid` and poll its stat record until
/// it reports state `T`, or `STOP_TIMEOUT` elapses. A poll-based wait (not
/// ptrace's own wait) is used deliberately: the point is for the target's
/// real parent shell to observe the stop too, which a ptrace-only wait
/// would not produce. Timeout is not an error - it just means the attach
/// proceeds without the nicety of a clean shell-visible stop.
pub fn stop_and_wait(pid: i32, stat: &mut StatHandle, sig: Signal) {
    let _ = process::kill_process(Pid::from_raw(pid).unwrap(), sig);
    wait_for_state(stat, 'T');
}

/// Poll `stat` until it reports the requested state character or
/// `STOP_TIMEOUT` elapses.
pub fn wait_for_state(stat: &mut StatHandle, want: char) {
    let start = Instant::now();
    loop {
        if start.elapsed() > STOP_TIMEOUT {
            crate::debug!("timed out waiting for state '{}', proceeding anyway", want);
            break;
        }
        match stat.read() {
            Ok(st) if st.state == want => break,
            Ok(_) => {}
            Err(_) => break,
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Resume a previously stopped process with `SIGCONT`. Always attempted,
/// regardless of whether the surrounding operation succeeded.
pub fn resume(pid: i32) {
    let _ = process::kill_process(Pid::from_raw(pid).unwrap(), Signal::CONT);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_bounded() {
        // wait_for_state on a stat handle that never reaches the target
        // state must not block past STOP_TIMEOUT plus one poll interval.
        let mut stat = match StatHandle::open(std::process::id() as i32) {
            Ok(s) => s,
            Err(_) => return,
        };
        let start = Instant::now();
        wait_for_state(&mut stat, 'Z');
        assert!(start.elapsed() < STOP_TIMEOUT + Duration::from_millis(200));
    }
}
