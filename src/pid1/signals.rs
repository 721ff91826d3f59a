//! Signal gate for PID 1
//!
//! Shutdown requests and child exits are never handled asynchronously.
//! The signals below stay blocked for the whole life of init and are
//! consumed one at a time with `sigtimedwait(2)`:
//! - SIGCHLD: a descendant terminated
//! - SIGUSR1/SIGPWR: halt (busybox `halt`)
//! - SIGTERM: restart (busybox `reboot`)
//! - SIGUSR2: power off (busybox `poweroff`)

use nix::errno::Errno;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::time::TimeSpec;
use std::ptr;
use std::time::{Duration, Instant};

use super::shutdown::ShutdownAction;

/// Something the supervision loop can wake up for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// One or more descendants exited (SIGCHLD)
    ChildExited,
    /// halt, reboot or poweroff was requested
    Shutdown(ShutdownAction),
    /// The timeout passed to `wait_next` elapsed
    Timeout,
}

impl GateEvent {
    /// Map a delivered signal to an event, `None` for signals outside the gate
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::SIGCHLD => Some(GateEvent::ChildExited),
            Signal::SIGUSR1 | Signal::SIGPWR => Some(GateEvent::Shutdown(ShutdownAction::Halt)),
            Signal::SIGTERM => Some(GateEvent::Shutdown(ShutdownAction::Restart)),
            Signal::SIGUSR2 => Some(GateEvent::Shutdown(ShutdownAction::PowerOff)),
            _ => None,
        }
    }
}

/// Source of supervision events
///
/// `SignalGate` is the real implementation. Waiting never returns on a
/// wake-up that does not map to a `GateEvent`.
pub trait EventSource {
    fn wait_next(&mut self, timeout: Option<Duration>) -> Result<GateEvent, SignalError>;
}

impl<E: EventSource + ?Sized> EventSource for &mut E {
    fn wait_next(&mut self, timeout: Option<Duration>) -> Result<GateEvent, SignalError> {
        (**self).wait_next(timeout)
    }
}

/// Blocked signal set turned into a pollable event stream
#[derive(Debug)]
pub struct SignalGate {
    mask: SigSet,
}

impl SignalGate {
    /// The set of signals intercepted by init
    pub fn signal_set() -> SigSet {
        let mut mask = SigSet::empty();
        for signal in [
            Signal::SIGCHLD,
            Signal::SIGUSR1,
            Signal::SIGPWR,
            Signal::SIGTERM,
            Signal::SIGUSR2,
        ] {
            mask.add(signal);
        }
        mask
    }

    /// Block the gate's signals for the calling thread
    ///
    /// Init is single threaded, so this is the process mask. Must happen
    /// before the runtime is spawned so no request is lost in between.
    pub fn block() -> Result<Self, SignalError> {
        let mask = Self::signal_set();
        mask.thread_block().map_err(SignalError::Block)?;
        log::debug!("Blocked supervision signals");
        Ok(Self { mask })
    }

    /// Signals a spawned child has to unblock before exec
    pub fn mask(&self) -> SigSet {
        self.mask
    }

    fn wait_once(&self, timeout: Option<Duration>) -> Result<Signal, Errno> {
        let set: &libc::sigset_t = self.mask.as_ref();
        let rc = match timeout {
            Some(timeout) => {
                let ts = TimeSpec::from_duration(timeout);
                unsafe { libc::sigtimedwait(set, ptr::null_mut(), ts.as_ref()) }
            }
            None => unsafe { libc::sigwaitinfo(set, ptr::null_mut()) },
        };
        if rc < 0 {
            return Err(Errno::last());
        }
        Signal::try_from(rc)
    }
}

impl EventSource for SignalGate {
    fn wait_next(&mut self, timeout: Option<Duration>) -> Result<GateEvent, SignalError> {
        // One-shot deadline: spurious wake-ups shrink the remaining time
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.wait_once(remaining) {
                Ok(signal) => match GateEvent::from_signal(signal) {
                    Some(event) => return Ok(event),
                    None => log::debug!("Ignoring unexpected {}", signal),
                },
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Ok(GateEvent::Timeout),
                Err(e) => return Err(SignalError::Wait(e)),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Failed to block signals: {0}")]
    Block(#[source] Errno),

    #[error("Waiting for signals failed: {0}")]
    Wait(#[source] Errno),
}
