//! Zombie process reaping for PID 1
//!
//! Orphans are reparented to init, so every SIGCHLD wake-up has to drain
//! all terminated descendants, not only the supervised runtime.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fmt;

/// Information about a reaped process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapedProcess {
    pub pid: i32,
    pub status: WaitResult,
}

/// Exit status of a reaped process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Process exited normally with code
    Exited(i32),
    /// Process killed by signal
    Signaled(i32),
    /// Unknown status
    Unknown,
}

impl WaitResult {
    fn from_wait_status(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => WaitResult::Exited(code),
            WaitStatus::Signaled(_, signal, _) => WaitResult::Signaled(signal as i32),
            _ => WaitResult::Unknown,
        }
    }
}

impl fmt::Display for WaitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitResult::Exited(code) => write!(f, "exited with status {}", code),
            WaitResult::Signaled(sig) => write!(f, "killed by signal {}", sig),
            WaitResult::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Process-table operations the supervision loop depends on
pub trait ProcessTable {
    /// Reap every descendant that has already terminated (non-blocking)
    fn reap_all(&mut self) -> Vec<ReapedProcess>;

    /// Block until `pid` terminates and collect its status
    ///
    /// Returns `None` if `pid` is not (or no longer) a child.
    fn wait_for(&mut self, pid: i32) -> Option<WaitResult>;

    /// Send SIGKILL to `pid`
    fn force_kill(&mut self, pid: i32) -> Result<(), Errno>;

    /// Drain terminated descendants and pick out `pid`'s status
    ///
    /// Unrelated descendants are reaped and dropped.
    fn reap_child(&mut self, pid: i32) -> Option<WaitResult> {
        let mut found = None;
        for reaped in self.reap_all() {
            if reaped.pid == pid {
                found = Some(reaped.status);
            } else {
                log::debug!("Reaped unrelated PID {} ({})", reaped.pid, reaped.status);
            }
        }
        found
    }
}

impl<P: ProcessTable + ?Sized> ProcessTable for &mut P {
    fn reap_all(&mut self) -> Vec<ReapedProcess> {
        (**self).reap_all()
    }

    fn wait_for(&mut self, pid: i32) -> Option<WaitResult> {
        (**self).wait_for(pid)
    }

    fn force_kill(&mut self, pid: i32) -> Result<(), Errno> {
        (**self).force_kill(pid)
    }
}

/// `waitpid(2)`-backed process table
#[derive(Debug, Default)]
pub struct ZombieReaper;

impl ZombieReaper {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for ZombieReaper {
    fn reap_all(&mut self) -> Vec<ReapedProcess> {
        let mut reaped = Vec::new();

        loop {
            // Wait for any child, non-blocking
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => {
                    let Some(pid) = status.pid() else {
                        continue;
                    };
                    let result = WaitResult::from_wait_status(status);
                    log::debug!("Reaped PID {} ({})", pid, result);
                    reaped.push(ReapedProcess {
                        pid: pid.as_raw(),
                        status: result,
                    });
                }
                Err(Errno::EINTR) => continue,
                // No children at all
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    log::warn!("waitpid error: {}", e);
                    break;
                }
            }
        }

        reaped
    }

    fn wait_for(&mut self, pid: i32) -> Option<WaitResult> {
        loop {
            match waitpid(Pid::from_raw(pid), None) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    return Some(WaitResult::from_wait_status(status));
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(e) => {
                    log::debug!("waitpid({}) failed: {}", pid, e);
                    return None;
                }
            }
        }
    }

    fn force_kill(&mut self, pid: i32) -> Result<(), Errno> {
        kill(Pid::from_raw(pid), Signal::SIGKILL)
    }
}
