//! Termination signals for supervised children.
//!
//! The supervisor owns the `Child` inside its monitor task, so stopping a
//! process is split in two: [`send_terminate`] asks politely by pid, and the
//! monitor task performs the unconditional kill (and the reaping) when the
//! force-kill timeout elapses.

use std::io;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Send SIGTERM to `pid`.
///
/// Returns `Ok(false)` if the process is already gone, or on platforms
/// without a graceful signal (the caller then kills immediately).
pub fn send_terminate(pid: u32) -> io::Result<bool> {
    #[cfg(unix)]
    {
        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(false)
    }
}

/// Human-readable description of an exit status, e.g. `exit code 3` or
/// `signal 9`.
pub fn describe_exit(status: std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return format!("terminated by signal {sig}");
        }
    }
    "terminated abnormally".to_string()
}
