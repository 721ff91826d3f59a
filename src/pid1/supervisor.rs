//! Supervision state machine
//!
//! `Starting → Running → ShuttingDown → Done`. The loop owns the runtime's
//! handle and the signal gate, and is the only place a `ShutdownAction` is
//! chosen. All transitions happen on this stack; nothing runs in a signal
//! handler.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::graceful;
use super::launcher::{ChildHandle, LaunchError};
use super::reaper::{ProcessTable, WaitResult};
use super::shutdown::ShutdownAction;
use super::signals::{EventSource, GateEvent};
use super::Pid1Error;

/// Default graceful shutdown window
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default location of the restart-parameter file
pub const DEFAULT_REBOOT_PARAM_PATH: &str = "/run/reboot-param";

/// Settings the supervision loop needs
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub graceful_timeout: Duration,
    /// Action when the runtime exits without a shutdown request
    pub unintentional_exit_action: ShutdownAction,
    /// Read when a restart is requested; holds kernel restart arguments
    pub reboot_param_path: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: DEFAULT_GRACEFUL_TIMEOUT,
            unintentional_exit_action: ShutdownAction::Restart,
            reboot_param_path: PathBuf::from(DEFAULT_REBOOT_PARAM_PATH),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    ShuttingDown,
    Done,
}

/// How the runtime went away and what to do about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Shutdown was requested by a signal rather than the runtime dying
    pub intentional: bool,
    pub wait_status: WaitResult,
    /// The runtime exited within the graceful window
    pub graceful_ok: bool,
    pub shutdown_started_at: Option<Instant>,
    pub shutdown_completed_at: Option<Instant>,
    pub desired_action: ShutdownAction,
    /// Arguments for `LINUX_REBOOT_CMD_RESTART2`
    pub reboot_args: Option<String>,
}

impl ExitOutcome {
    /// Length of the graceful window, if one ran
    pub fn graceful_duration(&self) -> Option<Duration> {
        match (self.shutdown_started_at, self.shutdown_completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

/// Supervises a single runtime process until it is gone
pub struct Supervisor<'a, E, P> {
    config: &'a SupervisorConfig,
    events: E,
    procs: P,
    state: SupervisorState,
    requested: Option<ShutdownAction>,
    reboot_args: Option<String>,
}

impl<'a, E: EventSource, P: ProcessTable> Supervisor<'a, E, P> {
    /// `events` must already be intercepting signals (see `SignalGate::block`)
    pub fn new(config: &'a SupervisorConfig, events: E, procs: P) -> Self {
        Self {
            config,
            events,
            procs,
            state: SupervisorState::Starting,
            requested: None,
            reboot_args: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Launch the runtime and supervise it until it has been reaped
    pub fn run<F>(&mut self, launch: F) -> Result<ExitOutcome, Pid1Error>
    where
        F: FnOnce() -> Result<ChildHandle, LaunchError>,
    {
        let child = launch()?;
        log::debug!("Runtime started as PID {}", child.pid());
        self.state = SupervisorState::Running;

        loop {
            match self.events.wait_next(None)? {
                GateEvent::ChildExited => {
                    if let Some(status) = self.procs.reap_child(child.pid()) {
                        log::warn!("Runtime {}", status);
                        return Ok(self.finish(status, None));
                    }
                }
                GateEvent::Shutdown(action) => {
                    self.request(action);
                    self.state = SupervisorState::ShuttingDown;

                    let exit = graceful::wait_for_exit(
                        &mut self.events,
                        &mut self.procs,
                        &child,
                        self.config.graceful_timeout,
                    )?;
                    return Ok(self.finish(exit.wait_status, Some(exit)));
                }
                GateEvent::Timeout => {}
            }
        }
    }

    /// Record a shutdown request; the first one wins
    fn request(&mut self, action: ShutdownAction) {
        if let Some(current) = self.requested {
            log::warn!("Ignoring {} request, already committed to {}", action, current);
            return;
        }

        log::debug!("Received {} request", action);
        self.requested = Some(action);
        if action == ShutdownAction::Restart {
            self.reboot_args = read_reboot_args(&self.config.reboot_param_path);
        }
    }

    fn finish(&mut self, status: WaitResult, exit: Option<graceful::GracefulExit>) -> ExitOutcome {
        self.state = SupervisorState::Done;

        let outcome = ExitOutcome {
            intentional: self.requested.is_some(),
            wait_status: status,
            graceful_ok: exit.map_or(false, |e| e.graceful_ok),
            shutdown_started_at: exit.map(|e| e.started_at),
            shutdown_completed_at: exit.map(|e| e.completed_at),
            desired_action: self
                .requested
                .unwrap_or(self.config.unintentional_exit_action),
            reboot_args: self.reboot_args.take(),
        };
        log::debug!(
            "Shutdown action: {} (intentional: {}, graceful: {})",
            outcome.desired_action,
            outcome.intentional,
            outcome.graceful_ok
        );
        outcome
    }
}

/// Restart arguments from `path`, trimmed; missing or empty means none
pub fn read_reboot_args(path: &std::path::Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => {
            // The kernel takes a C string
            let content = if content.contains('\0') {
                log::warn!("Removing NUL bytes from {}", path.display());
                content.replace('\0', "")
            } else {
                content
            };
            let args = content.trim();
            if args.is_empty() {
                None
            } else {
                log::debug!("Restart arguments: {}", args);
                Some(args.to_string())
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            log::warn!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}
