//! Liveness probing and process control around the pid file.
//!
//! "Running" means the pid file exists, holds a positive integer, and a
//! no-op signal to that pid succeeds. A pid reused by an unrelated process
//! after a crash also reads as running.

use std::fs;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::BackdropError;

/// Interval used when polling for a witness to appear or disappear.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Parse the pid recorded in `pid_file`.
pub fn read_pid(pid_file: &Path) -> Option<i32> {
    let contents = fs::read_to_string(pid_file).ok()?;
    contents.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

/// Signal-0 probe. EPERM means the process exists but belongs to someone else.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }

    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Pid of the live daemon recorded in `pid_file`, if any.
pub fn running_pid(pid_file: &Path) -> Option<i32> {
    read_pid(pid_file).filter(|pid| process_alive(*pid))
}

pub fn is_running(pid_file: &Path) -> bool {
    running_pid(pid_file).is_some()
}

/// Send SIGTERM to `pid`.
pub fn terminate(pid: i32) -> Result<(), BackdropError> {
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

/// Spawn `program` in its own process group with all stdio detached.
pub fn spawn_detached(program: &Path, args: &[&str]) -> io::Result<Child> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
