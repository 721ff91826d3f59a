//! Bounded wait for the runtime once a shutdown has been requested
//!
//! The runtime gets `timeout` to exit on its own. After that it is killed
//! with SIGKILL and reaped, so teardown never starts with it still around.

use std::time::{Duration, Instant};

use super::launcher::ChildHandle;
use super::reaper::{ProcessTable, WaitResult};
use super::signals::{EventSource, GateEvent, SignalError};

/// How the graceful window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracefulExit {
    /// The runtime exited before the deadline
    pub graceful_ok: bool,
    pub wait_status: WaitResult,
    pub started_at: Instant,
    pub completed_at: Instant,
}

/// Wait up to `timeout` for `child` to exit, then kill it
pub fn wait_for_exit<E, P>(
    events: &mut E,
    procs: &mut P,
    child: &ChildHandle,
    timeout: Duration,
) -> Result<GracefulExit, SignalError>
where
    E: EventSource,
    P: ProcessTable,
{
    let started_at = Instant::now();
    let deadline = started_at + timeout;
    log::debug!("Waiting up to {} ms for the runtime to exit", timeout.as_millis());

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.wait_next(Some(remaining))? {
            GateEvent::ChildExited => {
                if let Some(status) = procs.reap_child(child.pid()) {
                    log::debug!("Runtime {} during graceful shutdown", status);
                    return Ok(GracefulExit {
                        graceful_ok: true,
                        wait_status: status,
                        started_at,
                        completed_at: Instant::now(),
                    });
                }
            }
            GateEvent::Shutdown(action) => {
                log::warn!("Ignoring {} request, shutdown already in progress", action);
            }
            GateEvent::Timeout => {
                log::warn!(
                    "Runtime did not exit within {} ms, killing PID {}",
                    timeout.as_millis(),
                    child.pid()
                );
                if let Err(e) = procs.force_kill(child.pid()) {
                    log::warn!("kill({}, SIGKILL) failed: {}", child.pid(), e);
                }
                let status = procs.wait_for(child.pid()).unwrap_or(WaitResult::Unknown);
                return Ok(GracefulExit {
                    graceful_ok: false,
                    wait_status: status,
                    started_at,
                    completed_at: Instant::now(),
                });
            }
        }
    }
}
